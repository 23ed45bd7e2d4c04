//! The capability through which commands touch a diagram.
//!
//! Commands and the history depend only on [`Scope`], never on concrete element
//! types. A host editor implements it over its own model; [`MemoryDiagram`](crate::diagram::MemoryDiagram)
//! is a complete in-memory implementation.
use thiserror::Error;

use crate::codec::Record;
use crate::element::{ElementHandle, ElementKind, ElementRef};
use crate::registry::{IdentityRegistry, RegistryError};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("{kind} elements have no property `{property}`")]
    UnknownProperty {
        kind: ElementKind,
        property: String,
    },
    #[error("invalid value `{value}` for property `{property}`")]
    InvalidValue { property: String, value: String },
    #[error("element is not part of this diagram")]
    Detached,
    #[error("missing link `{0}`")]
    MissingLink(String),
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Arguments needed to (re)create an element.
///
/// Scalar arguments are pre-serialized text, exactly as the durable log stores
/// them. Links name the other elements this one is attached to (e.g. the two
/// ends of an association) by ref, never by handle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ElementArgs {
    values: Vec<(String, String)>,
    links: Vec<(String, ElementRef)>,
}

impl ElementArgs {
    pub const VALUE_PREFIX: &'static str = "arg.";
    pub const LINK_PREFIX: &'static str = "link.";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.push((name.into(), value.into()));
        self
    }

    pub fn link(mut self, role: impl Into<String>, element: ElementRef) -> Self {
        self.links.push((role.into(), element));
        self
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn links(&self) -> impl Iterator<Item = (&str, ElementRef)> {
        self.links.iter().map(|(r, e)| (r.as_str(), *e))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Appends the arguments to `record` as `arg.*` and `link.*` fields.
    pub(crate) fn write_to(&self, record: &mut Record) {
        for (name, value) in &self.values {
            record.push(format!("{}{}", Self::VALUE_PREFIX, name), value.clone());
        }
        for (role, element) in &self.links {
            record.push(format!("{}{}", Self::LINK_PREFIX, role), element.to_string());
        }
    }

    pub(crate) fn read_from(record: &Record) -> Result<Self, crate::codec::CodecError> {
        let mut args = ElementArgs::new();
        for (name, value) in record.fields_with_prefix(Self::VALUE_PREFIX) {
            args = args.value(name, value);
        }
        for (role, value) in record.fields_with_prefix(Self::LINK_PREFIX) {
            let element = value
                .parse::<ElementRef>()
                .map_err(|e| crate::codec::CodecError::InvalidValue {
                    field: format!("{}{}", Self::LINK_PREFIX, role),
                    value: value.to_string(),
                    reason: e.to_string(),
                })?;
            args = args.link(role, element);
        }
        Ok(args)
    }
}

/// A link argument after its ref has been resolved in the current scope.
#[derive(Clone, Debug)]
pub struct ResolvedLink {
    pub role: String,
    pub element: ElementHandle,
}

/// A diagram, or a part of one, that commands can edit.
///
/// All methods take already-resolved handles. Commands resolve every ref through
/// the [`IdentityRegistry`] *before* calling into the scope, so a scope never sees
/// a half-resolved edit.
pub trait Scope {
    /// Creates an element of `kind` and adds it to the diagram.
    ///
    /// The returned handle is a new instance; the caller binds it to its ref.
    fn create_element(
        &mut self,
        kind: ElementKind,
        args: &ElementArgs,
        links: &[ResolvedLink],
    ) -> Result<ElementHandle, ScopeError>;

    /// Removes `element` from the diagram.
    ///
    /// A scope may refuse while [dependents](Scope::dependents) of `element`
    /// are still attached; [`Command::delete_cascade`](crate::command::Command::delete_cascade)
    /// removes those first.
    fn delete_element(&mut self, element: &ElementHandle) -> Result<(), ScopeError>;

    fn set_property(
        &mut self,
        element: &ElementHandle,
        property: &str,
        value: &str,
    ) -> Result<(), ScopeError>;

    /// Current value of `property`, serialized the way [`set_property`](Scope::set_property) accepts it.
    fn property(&self, element: &ElementHandle, property: &str) -> Result<String, ScopeError>;

    /// Whether `element` is currently part of this diagram.
    fn contains(&self, element: &ElementHandle) -> bool;

    /// Everything needed to recreate `element` later with [`create_element`](Scope::create_element).
    fn snapshot(
        &self,
        element: &ElementHandle,
        registry: &IdentityRegistry,
    ) -> Result<ElementArgs, ScopeError>;

    /// Elements that cannot outlive `element`, such as the links attached to a shape.
    fn dependents(&self, _element: &ElementHandle) -> Vec<ElementHandle> {
        Vec::new()
    }

    /// Called once after a group of commands ran, e.g. to redraw a canvas.
    fn refresh(&mut self) {}

    fn find_element(
        &self,
        registry: &IdentityRegistry,
        element: ElementRef,
    ) -> Option<ElementHandle> {
        registry.resolve(element, self).ok()
    }
}
