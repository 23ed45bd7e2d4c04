//! Stable identifiers for live diagram elements.
//!
//! Commands never hold the elements they operate on. They hold [`ElementRef`]s,
//! and the [`IdentityRegistry`] maps refs back to live instances at execution time.
//!
//! Identity is *instance* identity: two distinct elements with equal contents get
//! two different refs, and the same instance always gets the same ref.
//! ```
//! use std::sync::Arc;
//! use undolog::diagram::Shape;
//! use undolog::element::{ElementHandle, ElementKind};
//! use undolog::registry::IdentityRegistry;
//!
//! let registry = IdentityRegistry::new();
//! let a: ElementHandle = Arc::new(Shape::new(ElementKind::Class));
//! let b: ElementHandle = Arc::new(Shape::new(ElementKind::Class));
//!
//! assert_eq!(registry.id_for(&a), registry.id_for(&a));
//! assert_ne!(registry.id_for(&a), registry.id_for(&b));
//! ```
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use thiserror::Error;

use crate::element::{Element, ElementHandle, ElementId, ElementKind, ElementRef};
use crate::scope::Scope;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no element `{0}` in scope")]
    NotFound(ElementRef),
    #[error("element is already registered as `{existing}`, cannot rebind it to `{requested}`")]
    Conflict {
        existing: ElementRef,
        requested: ElementRef,
    },
    #[error("cannot bind a {actual} element to `{element}`")]
    KindMismatch {
        element: ElementRef,
        actual: ElementKind,
    },
}

struct Entry {
    element: ElementRef,
    // Keeps the allocation, and thus the address key, from being reused.
    _instance: Weak<dyn Element>,
}

#[derive(Default)]
struct Inner {
    by_instance: HashMap<usize, Entry>,
    by_id: HashMap<ElementId, Weak<dyn Element>>,
    last: u64,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.last += 1;
        self.last
    }
}

fn instance_key(handle: &ElementHandle) -> usize {
    Arc::as_ptr(handle) as *const () as usize
}

/// Assigns and caches [`ElementRef`]s for element instances.
///
/// The registry is append-only: entries are never removed, so a ref outlives the
/// element it was minted for. That lets a serialized history refer to an element
/// which is currently deleted and will be recreated by a later undo.
///
/// # Thread-safety
/// The registry is meant to be shared as `Arc<IdentityRegistry>`.
/// Lookups take a read lock; minting and binding take a write lock.
pub struct IdentityRegistry {
    inner: RwLock<Inner>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Returns the ref of `element`, minting a new one on first sight.
    pub fn id_for(&self, element: &ElementHandle) -> ElementRef {
        let key = instance_key(element);
        if let Some(entry) = self.inner.read().by_instance.get(&key) {
            return entry.element;
        }

        let mut inner = self.inner.write();
        // Another caller may have registered it between the two locks.
        if let Some(entry) = inner.by_instance.get(&key) {
            return entry.element;
        }
        let element_ref = ElementRef::new(element.kind(), inner.next_id());
        inner.by_instance.insert(
            key,
            Entry {
                element: element_ref,
                _instance: Arc::downgrade(element),
            },
        );
        inner.by_id.insert(element_ref.id, Arc::downgrade(element));
        log::debug!("registered new element {}", element_ref);
        element_ref
    }

    /// Reserves a fresh ref for an element that does not exist yet.
    pub fn mint(&self, kind: ElementKind) -> ElementRef {
        let element_ref = ElementRef::new(kind, self.inner.write().next_id());
        log::debug!("reserved {}", element_ref);
        element_ref
    }

    /// Binds `element` to an existing ref.
    ///
    /// Used when an element is recreated (undoing a delete, redoing a create) or
    /// loaded from a saved document, so that later commands naming the original
    /// ref resolve to the new instance.
    ///
    /// Rebinding an instance to the ref it already has is a no-op.
    pub fn assign(
        &self,
        element: &ElementHandle,
        element_ref: ElementRef,
    ) -> Result<(), RegistryError> {
        if element.kind() != element_ref.kind {
            return Err(RegistryError::KindMismatch {
                element: element_ref,
                actual: element.kind(),
            });
        }

        let key = instance_key(element);
        let mut inner = self.inner.write();
        if let Some(entry) = inner.by_instance.get(&key) {
            if entry.element != element_ref {
                return Err(RegistryError::Conflict {
                    existing: entry.element,
                    requested: element_ref,
                });
            }
        } else {
            inner.by_instance.insert(
                key,
                Entry {
                    element: element_ref,
                    _instance: Arc::downgrade(element),
                },
            );
        }
        inner.by_id.insert(element_ref.id, Arc::downgrade(element));
        inner.last = inner.last.max(element_ref.id.0);
        Ok(())
    }

    /// Returns the ref of `element` without minting one.
    pub fn lookup(&self, element: &ElementHandle) -> Option<ElementRef> {
        self.inner
            .read()
            .by_instance
            .get(&instance_key(element))
            .map(|entry| entry.element)
    }

    /// Finds the live element currently bound to `element_ref` inside `scope`.
    ///
    /// # Return
    /// [`RegistryError::NotFound`] if the bound instance is gone or is not part of
    /// `scope`. Callers replaying history should treat this as "not created yet"
    /// rather than as a fatal condition.
    pub fn resolve<S>(&self, element_ref: ElementRef, scope: &S) -> Result<ElementHandle, RegistryError>
    where
        S: Scope + ?Sized,
    {
        self.inner
            .read()
            .by_id
            .get(&element_ref.id)
            .and_then(Weak::upgrade)
            .filter(|handle| handle.kind() == element_ref.kind && scope.contains(handle))
            .ok_or(RegistryError::NotFound(element_ref))
    }

    /// Number of element instances ever registered.
    pub fn len(&self) -> usize {
        self.inner.read().by_instance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("IdentityRegistry")
            .field("instances", &inner.by_instance.len())
            .field("last", &inner.last)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::diagram::{MemoryDiagram, Shape};
    use crate::scope::{ElementArgs, Scope};

    fn shape(kind: ElementKind) -> ElementHandle {
        Arc::new(Shape::new(kind))
    }

    #[test]
    fn same_instance_same_ref() {
        let registry = IdentityRegistry::new();
        let a = shape(ElementKind::Class);
        let alias = a.clone();

        let first = registry.id_for(&a);
        let second = registry.id_for(&alias);

        assert_eq!(first, second);
        assert_eq!(ElementKind::Class, first.kind);
        assert_eq!(1, registry.len());
    }

    #[test]
    fn equal_values_distinct_refs() {
        let registry = IdentityRegistry::new();
        let a = shape(ElementKind::Note);
        let b = shape(ElementKind::Note);

        assert_ne!(registry.id_for(&a), registry.id_for(&b));
    }

    #[test]
    fn ids_are_monotonic() {
        let registry = IdentityRegistry::new();

        let r1 = registry.id_for(&shape(ElementKind::Class));
        let r2 = registry.mint(ElementKind::Link);
        let r3 = registry.id_for(&shape(ElementKind::Actor));

        assert!(r1.id < r2.id);
        assert!(r2.id < r3.id);
    }

    #[test]
    fn assign_rebinds_ref_to_new_instance() {
        let registry = IdentityRegistry::new();
        let old = shape(ElementKind::Class);
        let original = registry.id_for(&old);

        let recreated = shape(ElementKind::Class);
        registry.assign(&recreated, original).unwrap();

        assert_eq!(Some(original), registry.lookup(&recreated));
        assert_eq!(original, registry.id_for(&recreated));
    }

    #[test]
    fn assign_conflict_and_kind_mismatch() {
        let registry = IdentityRegistry::new();
        let a = shape(ElementKind::Class);
        let existing = registry.id_for(&a);
        let other = registry.mint(ElementKind::Class);

        assert_eq!(
            Err(RegistryError::Conflict {
                existing,
                requested: other
            }),
            registry.assign(&a, other)
        );
        assert!(registry.assign(&a, existing).is_ok());

        let note = registry.mint(ElementKind::Note);
        assert!(matches!(
            registry.assign(&shape(ElementKind::Class), note),
            Err(RegistryError::KindMismatch { .. })
        ));
    }

    #[test]
    fn assign_moves_mint_counter_forward() {
        let registry = IdentityRegistry::new();
        registry
            .assign(&shape(ElementKind::Class), ElementRef::new(ElementKind::Class, 40))
            .unwrap();

        assert_eq!(ElementId(41), registry.mint(ElementKind::Class).id);
    }

    #[test]
    fn resolve_within_scope() {
        let registry = IdentityRegistry::new();
        let mut diagram = MemoryDiagram::new();
        let handle = diagram
            .create_element(ElementKind::Class, &ElementArgs::new(), &[])
            .unwrap();
        let element_ref = registry.id_for(&handle);

        let resolved = registry.resolve(element_ref, &diagram).unwrap();
        assert!(Arc::ptr_eq(&handle, &resolved));

        diagram.delete_element(&handle).unwrap();
        assert_eq!(
            Err(RegistryError::NotFound(element_ref)),
            registry.resolve(element_ref, &diagram).map(|_| ())
        );
    }

    #[test]
    fn resolve_unknown_ref() {
        let registry = IdentityRegistry::new();
        let diagram = MemoryDiagram::new();
        let r = registry.mint(ElementKind::Note);

        assert!(registry.resolve(r, &diagram).is_err());
    }
}
