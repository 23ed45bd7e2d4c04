//! The undo/redo timeline of one document.
//!
//! A [`History`] owns a list of [`CommandGroup`]s and a cursor, `undo_index`,
//! pointing at the group the next undo reverses.
//!
//! ```txt
//!  undo_index = 1
//!        |
//! +----+----+----+----+
//! | g0 | g1 | g2 | g3 |
//! +----+----+----+----+
//!  applied   undone
//! ```
//!
//! Adding a group while some are undone discards them first: after an undo,
//! a new edit starts a new branch and the old redo path is gone.
//!
//! Every change of the timeline is also appended to a [`LogStore`], so that a
//! history can be rebuilt with [`HistoryBuilder::replay`].
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::codec::CodecError;
use crate::group::{CommandGroup, GroupError};
use crate::journal::{FileLog, LogRecord, LogStore, MemoryLog};
use crate::registry::IdentityRegistry;
use crate::scope::Scope;

/// Process-unique identifier of a [`History`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HistoryId(u64);

impl HistoryId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        HistoryId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "history#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
    #[error(transparent)]
    Group(#[from] GroupError),
    #[error("malformed history record at line {line}")]
    MalformedRecord {
        line: usize,
        #[source]
        source: CodecError,
    },
    #[error("cannot replay history record at line {line}")]
    Replay {
        line: usize,
        #[source]
        source: GroupError,
    },
    #[error("history log failure")]
    Log(#[from] io::Error),
}

impl HistoryError {
    /// `true` for errors that only mean the request was out of range.
    /// Neither the history nor the diagram was touched.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HistoryError::NothingToUndo | HistoryError::NothingToRedo)
    }
}

/// Where a history writes its records.
#[derive(Debug, Default)]
pub enum LogTarget {
    /// A private in-memory log.
    #[default]
    Memory,
    /// A file at the given path.
    File(PathBuf),
    /// A new uniquely named file in the given directory.
    TempDir(PathBuf),
    /// Any other store.
    Store(Box<dyn LogStore>),
}

/// A builder to create a [History].
///
/// ```
/// use undolog::history::{HistoryBuilder, LogTarget};
///
/// let history = HistoryBuilder::new()
///     .capacity(100)
///     .log(LogTarget::Memory)
///     .build()
///     .unwrap();
///
/// assert_eq!(Some(100), history.capacity());
/// assert!(!history.is_undo_possible());
/// ```
#[derive(Debug, Default)]
pub struct HistoryBuilder {
    capacity: Option<usize>,
    log: LogTarget,
    registry: Option<Arc<IdentityRegistry>>,
    discard_log_on_drop: bool,
}

impl HistoryBuilder {
    /// Create a new builder instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of groups kept in the history.
    ///
    /// When more groups are added than the capacity, the oldest ones are removed.
    /// Their edits stay in the diagram but can no longer be undone.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn log(mut self, log: LogTarget) -> Self {
        self.log = log;
        self
    }

    /// Shares an existing registry, e.g. the one the host used to load the document.
    pub fn registry(mut self, registry: Arc<IdentityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Whether dropping the history deletes its log. Off by default.
    pub fn discard_log_on_drop(mut self, discard: bool) -> Self {
        self.discard_log_on_drop = discard;
        self
    }

    /// Create a new, empty [History].
    ///
    /// A [File](LogTarget::File) log is truncated.
    pub fn build(self) -> Result<History, HistoryError> {
        let log: Box<dyn LogStore> = match self.log {
            LogTarget::Memory => Box::new(MemoryLog::new()),
            LogTarget::File(path) => Box::new(FileLog::create(path)?),
            LogTarget::TempDir(dir) => Box::new(FileLog::in_dir(dir)?),
            LogTarget::Store(mut store) => {
                store.discard()?;
                store
            }
        };
        Ok(History::new(
            log,
            self.registry.unwrap_or_default(),
            self.capacity,
            self.discard_log_on_drop,
        ))
    }

    /// Rebuilds a [History] from its log and re-applies its edits to `scope`.
    ///
    /// Groups are rebuilt in log order, then every group up to the persisted cursor
    /// is redone against `scope`. Undone groups come back as redoable.
    ///
    /// Replay stops at the first record that cannot be parsed or applied. The
    /// groups before it are kept, the log is rewritten to match them, and the
    /// failure is reported in [Replay::error].
    ///
    /// # Return
    /// An error only if the log itself cannot be read or rewritten.
    pub fn replay<S>(self, scope: &mut S) -> Result<Replay, HistoryError>
    where
        S: Scope + ?Sized,
    {
        let log: Box<dyn LogStore> = match self.log {
            LogTarget::Memory => Box::new(MemoryLog::new()),
            LogTarget::File(path) => Box::new(FileLog::open(path)?),
            LogTarget::TempDir(dir) => Box::new(FileLog::in_dir(dir)?),
            LogTarget::Store(store) => store,
        };
        let lines = log.read_all()?;
        let mut history = History::new(
            log,
            self.registry.unwrap_or_default(),
            self.capacity,
            self.discard_log_on_drop,
        );
        let (replayed, error) = history.replay(&lines, scope)?;
        Ok(Replay {
            history,
            replayed,
            error,
        })
    }
}

/// Outcome of [HistoryBuilder::replay].
#[derive(Debug)]
pub struct Replay {
    pub history: History,
    /// Number of groups re-applied to the scope.
    pub replayed: usize,
    /// Why replay stopped early, if it did.
    pub error: Option<HistoryError>,
}

impl Replay {
    /// `true` if the whole log was replayed.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

struct Replayed {
    group: CommandGroup,
    line: usize,
}

/// Undo/redo timeline of command groups.
///
/// # Thread-safety
/// [History] is [Send] but not meant to be shared: every method runs to
/// completion on the caller's thread. Only the [IdentityRegistry] is shared.
#[derive(Debug)]
pub struct History {
    id: HistoryId,
    groups: VecDeque<CommandGroup>,
    undo_index: isize,
    capacity: Option<usize>,
    log: Box<dyn LogStore>,
    registry: Arc<IdentityRegistry>,
    discard_log_on_drop: bool,
}

impl History {
    pub(crate) fn new(
        log: Box<dyn LogStore>,
        registry: Arc<IdentityRegistry>,
        capacity: Option<usize>,
        discard_log_on_drop: bool,
    ) -> Self {
        let id = HistoryId::next();
        log::info!("created {} (capacity: {:?})", id, capacity);
        Self {
            id,
            groups: VecDeque::new(),
            undo_index: -1,
            capacity,
            log,
            registry,
            discard_log_on_drop,
        }
    }

    pub fn id(&self) -> HistoryId {
        self.id
    }

    /// The registry every command of this history resolves its refs through.
    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    /// Returns the maximum number of groups stored in the history.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// The file this history logs to, if its log is kept on disk.
    pub fn log_path(&self) -> Option<&Path> {
        self.log.path()
    }

    /// Records a group whose commands have already been applied.
    ///
    /// Groups after the cursor are discarded first. If the capacity is exceeded,
    /// the oldest groups are dropped.
    ///
    /// # Return
    /// [HistoryError::Log] if the record cannot be written. The history is then
    /// left unchanged.
    pub fn add(&mut self, group: CommandGroup) -> Result<(), HistoryError> {
        self.log.append(&LogRecord::Group(group.serialize()))?;
        log::debug!("add group `{}` ({} command(s))", group.label(), group.len());
        self.push(group);
        Ok(())
    }

    /// Applies `group` to `scope` and records it.
    ///
    /// If the group fails, or cannot be recorded, the scope is left as it was and
    /// nothing is added.
    pub fn execute<S>(&mut self, group: CommandGroup, scope: &mut S) -> Result<(), HistoryError>
    where
        S: Scope + ?Sized,
    {
        group.apply_all(scope, &self.registry)?;
        if let Err(e) = self.log.append(&LogRecord::Group(group.serialize())) {
            if let Err(rollback) = group.undo_all(scope, &self.registry) {
                log::error!("cannot roll back group `{}`: {}", group.label(), rollback);
            }
            return Err(e.into());
        }
        log::debug!("execute group `{}` ({} command(s))", group.label(), group.len());
        self.push(group);
        Ok(())
    }

    fn push(&mut self, group: CommandGroup) {
        let kept = (self.undo_index + 1) as usize;
        if kept < self.groups.len() {
            log::debug!("discard {} undone group(s)", self.groups.len() - kept);
            self.groups.truncate(kept);
        }
        if !group.set_owner(self.id) {
            log::warn!(
                "group `{}` already belongs to {:?}",
                group.label(),
                group.owner()
            );
        }
        self.groups.push_back(group);
        if let Some(capacity) = self.capacity {
            while self.groups.len() > capacity {
                if let Some(oldest) = self.groups.pop_front() {
                    log::debug!("drop oldest group `{}`", oldest.label());
                }
            }
        }
        self.undo_index = self.groups.len() as isize - 1;
    }

    /// Undoes the group at the cursor.
    ///
    /// Same as `self.undo_multi(1, scope)`.
    ///
    /// # Return
    /// [HistoryError::NothingToUndo] if every group is already undone.
    /// On any error the cursor does not move.
    pub fn undo<S>(&mut self, scope: &mut S) -> Result<(), HistoryError>
    where
        S: Scope + ?Sized,
    {
        let index = usize::try_from(self.undo_index).map_err(|_| HistoryError::NothingToUndo)?;
        let group = self.groups.get(index).ok_or(HistoryError::NothingToUndo)?;
        log::debug!("undo group `{}`", group.label());
        group.undo_all(scope, &self.registry)?;
        if let Err(e) = self.log.append(&LogRecord::Undo) {
            if let Err(restore) = group.redo_all(scope, &self.registry) {
                log::error!("cannot restore group `{}`: {}", group.label(), restore);
            }
            return Err(e.into());
        }
        self.undo_index -= 1;
        Ok(())
    }

    /// Redoes the group after the cursor.
    ///
    /// Same as `self.redo_multi(1, scope)`.
    ///
    /// # Return
    /// [HistoryError::NothingToRedo] if no group is undone.
    /// On any error the cursor does not move.
    pub fn redo<S>(&mut self, scope: &mut S) -> Result<(), HistoryError>
    where
        S: Scope + ?Sized,
    {
        let index = (self.undo_index + 1) as usize;
        let group = self.groups.get(index).ok_or(HistoryError::NothingToRedo)?;
        log::debug!("redo group `{}`", group.label());
        group.redo_all(scope, &self.registry)?;
        if let Err(e) = self.log.append(&LogRecord::Redo) {
            if let Err(restore) = group.undo_all(scope, &self.registry) {
                log::error!("cannot restore group `{}`: {}", group.label(), restore);
            }
            return Err(e.into());
        }
        self.undo_index += 1;
        Ok(())
    }

    /// Undo multiple steps.
    ///
    /// # Return
    /// [HistoryError::NothingToUndo] without touching anything if fewer than
    /// `count` groups can be undone. Otherwise stops at the first failing group,
    /// with the cursor just after it.
    /// If `count=0`, this method does nothing.
    pub fn undo_multi<S>(&mut self, count: usize, scope: &mut S) -> Result<(), HistoryError>
    where
        S: Scope + ?Sized,
    {
        if self.undoable_count() < count {
            return Err(HistoryError::NothingToUndo);
        }
        for _ in 0..count {
            self.undo(scope)?;
        }
        Ok(())
    }

    /// Redo multiple steps.
    ///
    /// # Return
    /// [HistoryError::NothingToRedo] without touching anything if fewer than
    /// `count` groups can be redone. Otherwise stops at the first failing group,
    /// with the cursor just before it.
    /// If `count=0`, this method does nothing.
    pub fn redo_multi<S>(&mut self, count: usize, scope: &mut S) -> Result<(), HistoryError>
    where
        S: Scope + ?Sized,
    {
        if self.redoable_count() < count {
            return Err(HistoryError::NothingToRedo);
        }
        for _ in 0..count {
            self.redo(scope)?;
        }
        Ok(())
    }

    /// Undo-redo bidirectionally.
    ///
    /// This is integrated method of [undo_multi](History::undo_multi) and [redo_multi](History::redo_multi).
    ///
    /// - `count < 0` => `self.undo_multi(-count, scope)`.
    /// - `0 < count` => `self.redo_multi(count, scope)`.
    pub fn jump<S>(&mut self, count: isize, scope: &mut S) -> Result<(), HistoryError>
    where
        S: Scope + ?Sized,
    {
        if count < 0 {
            self.undo_multi(count.unsigned_abs(), scope)
        } else {
            self.redo_multi(count as usize, scope)
        }
    }

    pub fn is_undo_possible(&self) -> bool {
        self.undo_index >= 0
    }

    pub fn is_redo_possible(&self) -> bool {
        self.undo_index + 1 < self.groups.len() as isize
    }

    /// The group the next [undo](History::undo) reverses.
    pub fn group_to_undo(&self) -> Option<&CommandGroup> {
        usize::try_from(self.undo_index)
            .ok()
            .and_then(|index| self.groups.get(index))
    }

    /// The group the next [redo](History::redo) repeats.
    pub fn group_to_redo(&self) -> Option<&CommandGroup> {
        self.groups.get((self.undo_index + 1) as usize)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Index of the group at the cursor; `-1` when nothing can be undone.
    pub fn undo_index(&self) -> isize {
        self.undo_index
    }

    /// Returns the number of groups that can be undone.
    pub fn undoable_count(&self) -> usize {
        (self.undo_index + 1) as usize
    }

    /// Returns the number of groups that can be redone.
    pub fn redoable_count(&self) -> usize {
        self.groups.len() - self.undoable_count()
    }

    /// All groups, oldest first.
    pub fn groups(&self) -> impl Iterator<Item = &CommandGroup> {
        self.groups.iter()
    }

    /// Forgets every group and discards the log.
    ///
    /// The diagram is not touched.
    pub fn reset(&mut self) -> Result<(), HistoryError> {
        self.log.discard()?;
        self.groups.clear();
        self.undo_index = -1;
        log::info!("reset {}", self.id);
        Ok(())
    }

    fn replay<S>(
        &mut self,
        lines: &[String],
        scope: &mut S,
    ) -> Result<(usize, Option<HistoryError>), HistoryError>
    where
        S: Scope + ?Sized,
    {
        let mut evicted: Vec<Replayed> = Vec::new();
        let mut timeline: VecDeque<Replayed> = VecDeque::new();
        let mut undo_index: isize = -1;
        let mut error = None;

        for (line, text) in (1..).zip(lines) {
            let record = match LogRecord::parse(text) {
                Ok(record) => record,
                Err(source) => {
                    error = Some(HistoryError::MalformedRecord { line, source });
                    break;
                }
            };
            match record {
                LogRecord::Group(text) => match CommandGroup::parse(&text) {
                    Ok(group) => {
                        timeline.truncate((undo_index + 1) as usize);
                        timeline.push_back(Replayed { group, line });
                        if let Some(capacity) = self.capacity {
                            while timeline.len() > capacity {
                                evicted.extend(timeline.pop_front());
                            }
                        }
                        undo_index = timeline.len() as isize - 1;
                    }
                    Err(source) => {
                        error = Some(HistoryError::Replay { line, source });
                        break;
                    }
                },
                LogRecord::Undo if undo_index >= 0 => undo_index -= 1,
                LogRecord::Redo if undo_index + 1 < timeline.len() as isize => undo_index += 1,
                record => {
                    error = Some(HistoryError::MalformedRecord {
                        line,
                        source: CodecError::Malformed(format!(
                            "`{}` does not match the timeline",
                            record
                        )),
                    });
                    break;
                }
            }
        }

        // Evicted groups stay applied but are no longer undoable.
        let mut replayed = 0;
        let mut committed = Vec::new();
        let mut failed = false;
        for entry in evicted {
            if let Err(source) = Self::replay_group(&entry.group, scope, &self.registry) {
                error = Some(HistoryError::Replay {
                    line: entry.line,
                    source,
                });
                failed = true;
                break;
            }
            committed.push(entry.group);
            replayed += 1;
        }

        let applied = (undo_index + 1) as usize;
        let mut groups = VecDeque::new();
        let mut undoable = 0;
        if !failed {
            for (index, entry) in timeline.into_iter().enumerate() {
                if index < applied {
                    if let Err(source) = Self::replay_group(&entry.group, scope, &self.registry) {
                        error = Some(HistoryError::Replay {
                            line: entry.line,
                            source,
                        });
                        // Undone groups depend on the one that failed.
                        break;
                    }
                    replayed += 1;
                    undoable += 1;
                }
                groups.push_back(entry.group);
            }
        }

        for group in &groups {
            group.set_owner(self.id);
        }
        self.groups = groups;
        self.undo_index = undoable as isize - 1;

        match &error {
            None => log::info!("replayed {} group(s) into {}", replayed, self.id),
            Some(e) => {
                log::warn!(
                    "history partially recovered, replayed {} group(s): {}",
                    replayed,
                    e
                );
                self.rewrite_log(&committed)?;
            }
        }
        Ok((replayed, error))
    }

    fn replay_group<S>(
        group: &CommandGroup,
        scope: &mut S,
        registry: &IdentityRegistry,
    ) -> Result<(), GroupError>
    where
        S: Scope + ?Sized,
    {
        group.check_references(scope, registry)?;
        group.redo_all(scope, registry)
    }

    /// Replaces the log with records of the recovered timeline.
    fn rewrite_log(&mut self, committed: &[CommandGroup]) -> Result<(), HistoryError> {
        self.log.discard()?;
        for group in committed.iter().chain(self.groups.iter()) {
            self.log.append(&LogRecord::Group(group.serialize()))?;
        }
        for _ in 0..self.redoable_count() {
            self.log.append(&LogRecord::Undo)?;
        }
        Ok(())
    }
}

impl Drop for History {
    fn drop(&mut self) {
        if self.discard_log_on_drop {
            if let Err(e) = self.log.discard() {
                log::warn!("cannot discard log of {}: {}", self.id, e);
            }
        }
    }
}
