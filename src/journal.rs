//! Append-only storage of the history's records.
//!
//! Every change to a [`History`](crate::history::History) is written as one line
//! before the call returns:
//!
//! ```txt
//! GROUP <label=Add class><count=1> CREATE <element=class#1><kind=class><arg.name=Foo>
//! UNDO
//! REDO
//! ```
//!
//! Replaying the lines from the start rebuilds the same timeline and cursor.
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::CodecError;
use crate::group::GROUP_KEYWORD;

pub const UNDO_KEYWORD: &str = "UNDO";
pub const REDO_KEYWORD: &str = "REDO";

/// One line of the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogRecord {
    /// A serialized [`CommandGroup`](crate::group::CommandGroup), kept verbatim.
    Group(String),
    Undo,
    Redo,
}

impl LogRecord {
    pub fn parse(line: &str) -> Result<Self, CodecError> {
        let line = line.trim();
        match line.split_whitespace().next() {
            Some(UNDO_KEYWORD) if line == UNDO_KEYWORD => Ok(LogRecord::Undo),
            Some(REDO_KEYWORD) if line == REDO_KEYWORD => Ok(LogRecord::Redo),
            Some(word) if word == GROUP_KEYWORD || word.starts_with("GROUP<") => {
                Ok(LogRecord::Group(line.to_string()))
            }
            _ => Err(CodecError::Malformed(format!("unknown log record `{}`", line))),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Group(line) => f.write_str(line),
            LogRecord::Undo => f.write_str(UNDO_KEYWORD),
            LogRecord::Redo => f.write_str(REDO_KEYWORD),
        }
    }
}

/// Where the records of one history go.
pub trait LogStore: Send + fmt::Debug {
    /// Appends one record and makes it durable before returning.
    fn append(&mut self, record: &LogRecord) -> io::Result<()>;

    /// Every record written so far, oldest first, as raw lines.
    fn read_all(&self) -> io::Result<Vec<String>>;

    /// Drops all records. Later appends start a new log.
    fn discard(&mut self) -> io::Result<()>;

    /// The file the records are written to, for stores kept on disk.
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// Log kept in memory.
///
/// The lines live behind a shared handle, so a test can inspect them or hand
/// them to a second history to replay.
#[derive(Clone, Debug, Default)]
pub struct MemoryLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log writing to existing `lines`.
    pub fn shared(lines: Arc<Mutex<Vec<String>>>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> Arc<Mutex<Vec<String>>> {
        self.lines.clone()
    }
}

impl LogStore for MemoryLog {
    fn append(&mut self, record: &LogRecord) -> io::Result<()> {
        self.lines.lock().push(record.to_string());
        Ok(())
    }

    fn read_all(&self) -> io::Result<Vec<String>> {
        Ok(self.lines.lock().clone())
    }

    fn discard(&mut self) -> io::Result<()> {
        self.lines.lock().clear();
        Ok(())
    }
}

/// Log kept in a text file, one record per line.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: Option<File>,
}

impl FileLog {
    /// Starts a new log at `path`, truncating any existing file.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        log::debug!("created history log {}", path.display());
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Continues the log at `path`, creating it if missing.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = Self::open_append(&path)?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Starts a new log under `dir` with a name unique to this process and call.
    pub fn in_dir(dir: impl AsRef<Path>) -> io::Result<Self> {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let name = format!(
            "undolog-history-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        );
        Self::create(dir.as_ref().join(name))
    }

    fn open_append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }
}

impl LogStore for FileLog {
    fn append(&mut self, record: &LogRecord) -> io::Result<()> {
        let mut file = match self.file.take() {
            Some(file) => file,
            None => Self::open_append(&self.path)?,
        };
        writeln!(file, "{}", record)?;
        file.flush()?;
        self.file = Some(file);
        Ok(())
    }

    fn read_all(&self) -> io::Result<Vec<String>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    fn discard(&mut self) -> io::Result<()> {
        self.file = None;
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => {
                log::debug!("removed history log {}", self.path.display());
                Ok(())
            }
        }
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
