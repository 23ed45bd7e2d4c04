//! Static dispatch from `(ElementKind, property)` to accessor functions.
//!
//! A [`ModifyProperty`](crate::command::ModifyProperty) command only knows a property by
//! name. The table turns that name back into code, once, at startup, without any
//! runtime reflection.
//!
//! ```
//! use undolog::element::{Element, ElementKind};
//! use undolog::property::{PropertyError, PropertyTable};
//!
//! fn get_name(element: &dyn Element) -> Result<String, PropertyError> {
//!     Ok(format!("{:?}", element.kind()))
//! }
//! fn set_name(_element: &dyn Element, _value: &str) -> Result<(), PropertyError> {
//!     Ok(())
//! }
//!
//! let table = PropertyTable::builder()
//!     .property(ElementKind::Class, "name", get_name, set_name)
//!     .build();
//!
//! assert!(table.contains(ElementKind::Class, "name"));
//! assert!(!table.contains(ElementKind::Note, "name"));
//! ```
use std::collections::HashMap;

use thiserror::Error;

use crate::element::{Element, ElementKind};
use crate::scope::ScopeError;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PropertyError {
    #[error("cannot parse `{0}`")]
    InvalidValue(String),
    #[error("element has an unexpected concrete type")]
    WrongType,
}

pub type Getter = fn(&dyn Element) -> Result<String, PropertyError>;
pub type Setter = fn(&dyn Element, &str) -> Result<(), PropertyError>;

#[derive(Clone, Copy)]
struct Accessor {
    get: Getter,
    set: Setter,
}

type Entries = HashMap<ElementKind, HashMap<&'static str, Accessor>>;

/// Builder for [`PropertyTable`].
#[derive(Default)]
pub struct PropertyTableBuilder {
    entries: Entries,
}

impl PropertyTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a property of `kind`.
    pub fn property(
        mut self,
        kind: ElementKind,
        name: &'static str,
        get: Getter,
        set: Setter,
    ) -> Self {
        self.entries
            .entry(kind)
            .or_default()
            .insert(name, Accessor { get, set });
        self
    }

    /// Registers the same accessors for several kinds.
    pub fn shared_property(
        mut self,
        kinds: &[ElementKind],
        name: &'static str,
        get: Getter,
        set: Setter,
    ) -> Self {
        for &kind in kinds {
            self = self.property(kind, name, get, set);
        }
        self
    }

    pub fn build(self) -> PropertyTable {
        PropertyTable {
            entries: self.entries,
        }
    }
}

/// Immutable map of property accessors.
pub struct PropertyTable {
    entries: Entries,
}

impl PropertyTable {
    pub fn builder() -> PropertyTableBuilder {
        PropertyTableBuilder::new()
    }

    pub fn contains(&self, kind: ElementKind, property: &str) -> bool {
        self.entries
            .get(&kind)
            .is_some_and(|properties| properties.contains_key(property))
    }

    fn accessor(&self, kind: ElementKind, property: &str) -> Result<Accessor, ScopeError> {
        self.entries
            .get(&kind)
            .and_then(|properties| properties.get(property))
            .copied()
            .ok_or_else(|| ScopeError::UnknownProperty {
                kind,
                property: property.to_string(),
            })
    }

    pub fn get(&self, element: &dyn Element, property: &str) -> Result<String, ScopeError> {
        let accessor = self.accessor(element.kind(), property)?;
        (accessor.get)(element).map_err(|e| map_error(property, "", e))
    }

    pub fn set(&self, element: &dyn Element, property: &str, value: &str) -> Result<(), ScopeError> {
        let accessor = self.accessor(element.kind(), property)?;
        (accessor.set)(element, value).map_err(|e| map_error(property, value, e))
    }

    /// Properties registered for `kind`, sorted by name.
    pub fn properties(&self, kind: ElementKind) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .entries
            .get(&kind)
            .map(|properties| properties.keys().copied().collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }
}

fn map_error(property: &str, value: &str, error: PropertyError) -> ScopeError {
    match error {
        PropertyError::InvalidValue(_) => ScopeError::InvalidValue {
            property: property.to_string(),
            value: value.to_string(),
        },
        PropertyError::WrongType => ScopeError::Rejected(format!(
            "property `{}` is registered for a different element type",
            property
        )),
    }
}

impl std::fmt::Debug for PropertyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(kind, properties)| (kind, properties.keys())))
            .finish()
    }
}
