//! An in-memory [`Scope`]: a flat arena of shapes and links.
//!
//! Links hold handles to their two ends; shapes hold nothing. All cross
//! references that outlive an edit go through [`ElementRef`](crate::element::ElementRef)s
//! and the [`IdentityRegistry`], so the graph never needs back pointers.
//!
//! | Property     | Kinds                               | Text form      |
//! | :----------- | :---------------------------------- | :------------- |
//! | `name`       | all                                 | any text       |
//! | `position`   | all but `link`, `sdmessage`         | `x,y`          |
//! | `size`       | all but `link`, `sdmessage`         | `width,height` |
//! | `text`       | `note`, `text`                      | any text       |
//! | `stereotype` | `class`, `interface`                | any text       |
//! | `abstract`   | `class`                             | `true`/`false` |
//!
//! `link` and `sdmessage` elements need a `source` and a `destination` link.
use std::any::Any;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::codec::Record;
use crate::element::{Element, ElementHandle, ElementKind};
use crate::property::{PropertyError, PropertyTable};
use crate::registry::IdentityRegistry;
use crate::scope::{ElementArgs, ResolvedLink, Scope, ScopeError};

const LINK_ROLES: [&str; 2] = ["source", "destination"];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct ShapeState {
    name: String,
    position: (i32, i32),
    size: (u32, u32),
    text: String,
    stereotype: String,
    is_abstract: bool,
}

/// The element type of [`MemoryDiagram`].
#[derive(Debug)]
pub struct Shape {
    kind: ElementKind,
    state: Mutex<ShapeState>,
    links: Vec<ResolvedLink>,
}

impl Shape {
    pub fn new(kind: ElementKind) -> Self {
        Self::with_links(kind, Vec::new())
    }

    pub fn with_links(kind: ElementKind, links: Vec<ResolvedLink>) -> Self {
        Self {
            kind,
            state: Mutex::new(ShapeState::default()),
            links,
        }
    }

    pub fn links(&self) -> &[ResolvedLink] {
        &self.links
    }

    fn links_to(&self, element: &ElementHandle) -> bool {
        self.links
            .iter()
            .any(|link| same_element(&link.element, element))
    }
}

impl Element for Shape {
    fn kind(&self) -> ElementKind {
        self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn same_element(a: &ElementHandle, b: &ElementHandle) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn shape(element: &dyn Element) -> Result<&Shape, PropertyError> {
    element
        .as_any()
        .downcast_ref::<Shape>()
        .ok_or(PropertyError::WrongType)
}

fn parse_pair<T: FromStr>(value: &str) -> Result<(T, T), PropertyError> {
    let invalid = || PropertyError::InvalidValue(value.to_string());
    let (a, b) = value.split_once(',').ok_or_else(invalid)?;
    let a = a.trim().parse().map_err(|_| invalid())?;
    let b = b.trim().parse().map_err(|_| invalid())?;
    Ok((a, b))
}

fn get_name(element: &dyn Element) -> Result<String, PropertyError> {
    Ok(shape(element)?.state.lock().name.clone())
}

fn set_name(element: &dyn Element, value: &str) -> Result<(), PropertyError> {
    shape(element)?.state.lock().name = value.to_string();
    Ok(())
}

fn get_position(element: &dyn Element) -> Result<String, PropertyError> {
    let (x, y) = shape(element)?.state.lock().position;
    Ok(format!("{},{}", x, y))
}

fn set_position(element: &dyn Element, value: &str) -> Result<(), PropertyError> {
    let position = parse_pair(value)?;
    shape(element)?.state.lock().position = position;
    Ok(())
}

fn get_size(element: &dyn Element) -> Result<String, PropertyError> {
    let (width, height) = shape(element)?.state.lock().size;
    Ok(format!("{},{}", width, height))
}

fn set_size(element: &dyn Element, value: &str) -> Result<(), PropertyError> {
    let size = parse_pair(value)?;
    shape(element)?.state.lock().size = size;
    Ok(())
}

fn get_text(element: &dyn Element) -> Result<String, PropertyError> {
    Ok(shape(element)?.state.lock().text.clone())
}

fn set_text(element: &dyn Element, value: &str) -> Result<(), PropertyError> {
    shape(element)?.state.lock().text = value.to_string();
    Ok(())
}

fn get_stereotype(element: &dyn Element) -> Result<String, PropertyError> {
    Ok(shape(element)?.state.lock().stereotype.clone())
}

fn set_stereotype(element: &dyn Element, value: &str) -> Result<(), PropertyError> {
    shape(element)?.state.lock().stereotype = value.to_string();
    Ok(())
}

fn get_abstract(element: &dyn Element) -> Result<String, PropertyError> {
    Ok(shape(element)?.state.lock().is_abstract.to_string())
}

fn set_abstract(element: &dyn Element, value: &str) -> Result<(), PropertyError> {
    let is_abstract = value
        .parse()
        .map_err(|_| PropertyError::InvalidValue(value.to_string()))?;
    shape(element)?.state.lock().is_abstract = is_abstract;
    Ok(())
}

fn build_table() -> PropertyTable {
    use ElementKind::*;
    let boxed = [Class, Interface, Note, Text, Actor, UseCase, SdInstance];

    PropertyTable::builder()
        .shared_property(&ElementKind::ALL, "name", get_name, set_name)
        .shared_property(&boxed, "position", get_position, set_position)
        .shared_property(&boxed, "size", get_size, set_size)
        .shared_property(&[Note, Text], "text", get_text, set_text)
        .shared_property(&[Class, Interface], "stereotype", get_stereotype, set_stereotype)
        .property(Class, "abstract", get_abstract, set_abstract)
        .build()
}

/// Property accessors of [`Shape`].
pub fn property_table() -> &'static PropertyTable {
    static TABLE: OnceLock<PropertyTable> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

/// A diagram kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryDiagram {
    elements: Vec<ElementHandle>,
    refreshes: usize,
}

impl MemoryDiagram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Elements in creation order.
    pub fn elements(&self) -> impl Iterator<Item = &ElementHandle> {
        self.elements.iter()
    }

    /// How many times the diagram was asked to redraw.
    pub fn refresh_count(&self) -> usize {
        self.refreshes
    }

    /// One sorted line per element with its ref, properties and links.
    ///
    /// Two diagrams with equal descriptions are indistinguishable through the
    /// property table.
    pub fn describe(&self, registry: &IdentityRegistry) -> Vec<String> {
        let mut lines: Vec<String> = self
            .elements
            .iter()
            .map(|element| {
                let element_ref = registry.id_for(element);
                match self.snapshot(element, registry) {
                    Ok(args) => {
                        let mut record = Record::new();
                        args.write_to(&mut record);
                        format!("{} {}", element_ref, record.encode())
                    }
                    Err(e) => format!("{} ({})", element_ref, e),
                }
            })
            .collect();
        lines.sort();
        lines
    }

    fn position(&self, element: &ElementHandle) -> Option<usize> {
        self.elements.iter().position(|e| same_element(e, element))
    }

    fn check_attached(&self, element: &ElementHandle) -> Result<(), ScopeError> {
        if self.contains(element) {
            Ok(())
        } else {
            Err(ScopeError::Detached)
        }
    }
}

impl Scope for MemoryDiagram {
    fn create_element(
        &mut self,
        kind: ElementKind,
        args: &ElementArgs,
        links: &[ResolvedLink],
    ) -> Result<ElementHandle, ScopeError> {
        if matches!(kind, ElementKind::Link | ElementKind::SdMessage) {
            for role in LINK_ROLES {
                if !links.iter().any(|link| link.role == role) {
                    return Err(ScopeError::MissingLink(role.to_string()));
                }
            }
        }
        for link in links {
            self.check_attached(&link.element)?;
        }

        let element: ElementHandle = Arc::new(Shape::with_links(kind, links.to_vec()));
        for (name, value) in args.values() {
            property_table().set(element.as_ref(), name, value)?;
        }
        self.elements.push(element.clone());
        Ok(element)
    }

    fn delete_element(&mut self, element: &ElementHandle) -> Result<(), ScopeError> {
        let index = self.position(element).ok_or(ScopeError::Detached)?;
        let attached = self.dependents(element).len();
        if attached > 0 {
            return Err(ScopeError::Rejected(format!(
                "{} link(s) still attached",
                attached
            )));
        }
        self.elements.remove(index);
        Ok(())
    }

    fn set_property(
        &mut self,
        element: &ElementHandle,
        property: &str,
        value: &str,
    ) -> Result<(), ScopeError> {
        self.check_attached(element)?;
        property_table().set(element.as_ref(), property, value)
    }

    fn property(&self, element: &ElementHandle, property: &str) -> Result<String, ScopeError> {
        self.check_attached(element)?;
        property_table().get(element.as_ref(), property)
    }

    fn contains(&self, element: &ElementHandle) -> bool {
        self.position(element).is_some()
    }

    fn snapshot(
        &self,
        element: &ElementHandle,
        registry: &IdentityRegistry,
    ) -> Result<ElementArgs, ScopeError> {
        self.check_attached(element)?;
        let table = property_table();
        let mut args = ElementArgs::new();
        for property in table.properties(element.kind()) {
            args = args.value(property, table.get(element.as_ref(), property)?);
        }
        if let Some(shape) = element.as_any().downcast_ref::<Shape>() {
            for link in shape.links() {
                args = args.link(link.role.clone(), registry.id_for(&link.element));
            }
        }
        Ok(args)
    }

    fn dependents(&self, element: &ElementHandle) -> Vec<ElementHandle> {
        self.elements
            .iter()
            .filter(|e| {
                e.as_any()
                    .downcast_ref::<Shape>()
                    .is_some_and(|shape| shape.links_to(element))
            })
            .cloned()
            .collect()
    }

    fn refresh(&mut self) {
        self.refreshes += 1;
    }
}
