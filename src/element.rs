//! Diagram elements as seen by the history.
//!
//! The history never owns diagram elements. It talks about them through
//! [`ElementRef`]s, small copyable identifiers, and only touches the live
//! objects through [`ElementHandle`]s handed out by a [`Scope`](crate::scope::Scope).
use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

/// Type tag of a diagram element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    Class,
    Interface,
    Note,
    Text,
    Actor,
    UseCase,
    Link,
    SdInstance,
    SdMessage,
}

impl ElementKind {
    pub const ALL: [ElementKind; 9] = [
        ElementKind::Class,
        ElementKind::Interface,
        ElementKind::Note,
        ElementKind::Text,
        ElementKind::Actor,
        ElementKind::UseCase,
        ElementKind::Link,
        ElementKind::SdInstance,
        ElementKind::SdMessage,
    ];

    /// The tag used in serialized records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Class => "class",
            ElementKind::Interface => "interface",
            ElementKind::Note => "note",
            ElementKind::Text => "text",
            ElementKind::Actor => "actor",
            ElementKind::UseCase => "usecase",
            ElementKind::Link => "link",
            ElementKind::SdInstance => "sdinstance",
            ElementKind::SdMessage => "sdmessage",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseRefError {
    #[error("unknown element kind `{0}`")]
    UnknownKind(String),
    #[error("invalid element ref `{0}`, expected `kind#id`")]
    Syntax(String),
}

impl FromStr for ElementKind {
    type Err = ParseRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ElementKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseRefError::UnknownKind(s.to_string()))
    }
}

/// Integer part of an [`ElementRef`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stable, serializable stand-in for a live diagram element.
///
/// Refs are minted by the [`IdentityRegistry`](crate::registry::IdentityRegistry) and
/// written to the durable log as `kind#id`, e.g. `class#12`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementRef {
    pub kind: ElementKind,
    pub id: ElementId,
}

impl ElementRef {
    pub fn new(kind: ElementKind, id: u64) -> Self {
        Self {
            kind,
            id: ElementId(id),
        }
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

impl FromStr for ElementRef {
    type Err = ParseRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once('#')
            .ok_or_else(|| ParseRefError::Syntax(s.to_string()))?;
        let kind = kind.parse::<ElementKind>()?;
        let id = id
            .parse::<u64>()
            .map_err(|_| ParseRefError::Syntax(s.to_string()))?;
        Ok(ElementRef::new(kind, id))
    }
}

/// A live diagram element.
///
/// Elements are shared through [`ElementHandle`]s, so implementations keep their
/// mutable state behind interior mutability.
pub trait Element: Any + Send + Sync + fmt::Debug {
    fn kind(&self) -> ElementKind;

    /// Upcast used by property setters to reach the concrete type.
    fn as_any(&self) -> &dyn Any;
}

pub type ElementHandle = Arc<dyn Element>;
