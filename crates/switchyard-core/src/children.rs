//! Typed child metadata attached by adapters.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

/// Child metadata keyed by type.
///
/// Each transport defines its own child types (routes, subscriptions) and
/// only inspects those. Attaching is additive and idempotent.
///
/// ```
/// use switchyard_core::Children;
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Route(&'static str);
///
/// let children = Children::default();
/// assert!(children.attach(Route("/a")));
/// assert!(!children.attach(Route("/a")));
/// assert_eq!(children.get::<Route>(), vec![Route("/a")]);
/// ```
#[derive(Default)]
pub struct Children {
    slots: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Children {
    /// Attaches `child`. Returns `false` if an equal child is present.
    pub fn attach<C>(&self, child: C) -> bool
    where
        C: PartialEq + Send + Sync + 'static,
    {
        let mut slots = self.slots.write();
        let slot = slots
            .entry(TypeId::of::<C>())
            .or_insert_with(|| Box::new(Vec::<C>::new()));
        match slot.downcast_mut::<Vec<C>>() {
            Some(list) if !list.contains(&child) => {
                list.push(child);
                true
            }
            _ => false,
        }
    }

    /// Returns all children of type `C` in attach order.
    pub fn get<C>(&self) -> Vec<C>
    where
        C: Clone + Send + Sync + 'static,
    {
        self.slots
            .read()
            .get(&TypeId::of::<C>())
            .and_then(|slot| slot.downcast_ref::<Vec<C>>())
            .cloned()
            .unwrap_or_default()
    }

    /// Returns `true` if at least one child of type `C` is attached.
    pub fn contains<C: Send + Sync + 'static>(&self) -> bool {
        self.slots
            .read()
            .get(&TypeId::of::<C>())
            .and_then(|slot| slot.downcast_ref::<Vec<C>>())
            .is_some_and(|list| !list.is_empty())
    }
}

impl fmt::Debug for Children {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Children")
            .field("kinds", &self.slots.read().len())
            .finish()
    }
}
