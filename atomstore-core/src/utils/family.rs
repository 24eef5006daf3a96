//! Atom Families
//!
//! An [`AtomFamily`] creates one atom per parameter and hands out the same
//! atom for the same parameter until it is removed.
//!
//! # Eviction
//!
//! Families never evict on their own. Entries leave through:
//!
//! - [`remove`](AtomFamily::remove) for a single parameter
//! - a removal predicate set with
//!   [`set_should_remove`](AtomFamily::set_should_remove), checked against
//!   every entry when set and again on each lookup
//! - [`release_unused`](AtomFamily::release_unused), which drops entries whose
//!   atom has no handle left outside the family
//!
//! Dropping the family's handle lets the store sweep the atom's record once
//! nothing else refers to it.
//!
//! # Example
//!
//! ```rust,ignore
//! use atomstore_core::{atom, utils::AtomFamily};
//!
//! let todos = AtomFamily::new(|id: &u32| atom(format!("todo {id}")));
//! let first = todos.get(1);
//! assert_eq!(first, todos.get(1));
//! ```

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;

use crate::atom::{Atom, AtomId, WritableAtom};

/// Atoms a family can hold.
pub trait FamilyMember: Clone + Send + Sync + 'static {
    fn atom_id(&self) -> AtomId;

    /// Number of live handles to the atom, this one included.
    fn handle_count(&self) -> usize;
}

impl<T: 'static> FamilyMember for Atom<T> {
    fn atom_id(&self) -> AtomId {
        self.id()
    }

    fn handle_count(&self) -> usize {
        Atom::handle_count(self)
    }
}

impl<T: 'static, A: 'static, R: 'static> FamilyMember for WritableAtom<T, A, R> {
    fn atom_id(&self) -> AtomId {
        self.id()
    }

    fn handle_count(&self) -> usize {
        self.as_atom().handle_count()
    }
}

type ShouldRemove<P> = Arc<dyn Fn(Instant, &P) -> bool + Send + Sync>;

struct Entry<A> {
    atom: A,
    created_at: Instant,
}

/// Parameter-keyed atom cache.
pub struct AtomFamily<P, A> {
    init: Box<dyn Fn(&P) -> A + Send + Sync>,
    atoms: DashMap<P, Entry<A>>,
    should_remove: RwLock<Option<ShouldRemove<P>>>,
}

impl<P, A> AtomFamily<P, A>
where
    P: Eq + Hash + Clone + Send + Sync + 'static,
    A: FamilyMember,
{
    pub fn new<F>(init: F) -> Self
    where
        F: Fn(&P) -> A + Send + Sync + 'static,
    {
        Self {
            init: Box::new(init),
            atoms: DashMap::new(),
            should_remove: RwLock::new(None),
        }
    }

    /// The atom for `param`, created on first use.
    pub fn get(&self, param: P) -> A {
        let should_remove = self.should_remove.read().clone();
        if let Some(entry) = self.atoms.get(&param) {
            let expired = should_remove
                .as_ref()
                .is_some_and(|should_remove| should_remove(entry.created_at, &param));
            if !expired {
                return entry.atom.clone();
            }
        }
        self.atoms.remove(&param);

        // The initializer may use the family itself, so it runs without a
        // shard lock held. A concurrent caller that got there first wins.
        let atom = (self.init)(&param);
        self.atoms
            .entry(param)
            .or_insert_with(|| Entry {
                atom,
                created_at: Instant::now(),
            })
            .atom
            .clone()
    }

    /// Whether `atom` is currently held by this family.
    pub fn contains(&self, atom: &A) -> bool {
        let id = atom.atom_id();
        self.atoms.iter().any(|entry| entry.atom.atom_id() == id)
    }

    pub fn remove(&self, param: &P) -> Option<A> {
        self.atoms.remove(param).map(|(_, entry)| entry.atom)
    }

    /// Install (or clear) a removal predicate, called with each entry's
    /// creation time and parameter. Matching entries are removed right away.
    pub fn set_should_remove<F>(&self, should_remove: Option<F>)
    where
        F: Fn(Instant, &P) -> bool + Send + Sync + 'static,
    {
        let should_remove: Option<ShouldRemove<P>> =
            should_remove.map(|f| Arc::new(f) as ShouldRemove<P>);
        *self.should_remove.write() = should_remove.clone();
        if let Some(should_remove) = should_remove {
            let before = self.atoms.len();
            self.atoms
                .retain(|param, entry| !should_remove(entry.created_at, param));
            trace!(removed = before - self.atoms.len(), "family entries expired");
        }
    }

    /// Remove entries whose atom is referenced by nothing but the family.
    /// Returns how many were removed.
    pub fn release_unused(&self) -> usize {
        let before = self.atoms.len();
        self.atoms.retain(|_, entry| entry.atom.handle_count() > 1);
        let released = before - self.atoms.len();
        if released > 0 {
            trace!(released, "family entries released");
        }
        released
    }

    pub fn params(&self) -> Vec<P> {
        self.atoms.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }
}

impl<P: Eq + Hash, A> fmt::Debug for AtomFamily<P, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomFamily")
            .field("len", &self.atoms.len())
            .field("should_remove", &self.should_remove.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{atom, PrimitiveAtom};
    use crate::store::Store;

    fn family() -> AtomFamily<u32, PrimitiveAtom<u32>> {
        AtomFamily::new(|id: &u32| atom(*id * 10))
    }

    #[test]
    fn same_param_same_atom() {
        let todos = family();
        let a = todos.get(1);
        let b = todos.get(1);
        let c = todos.get(2);
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert!(todos.contains(&a));
        assert_eq!(todos.len(), 2);
    }

    #[test]
    fn removed_params_get_fresh_atoms() {
        let store = Store::new();
        let todos = family();
        let first = todos.get(1);
        store.set(&first, 99).unwrap();

        todos.remove(&1);
        assert!(!todos.contains(&first));
        let second = todos.get(1);
        assert_ne!(first.id(), second.id());
        assert_eq!(store.get(&second).unwrap(), 10);
    }

    #[test]
    fn should_remove_expires_existing_and_future_lookups() {
        let todos = family();
        let _ = todos.get(1);
        let _ = todos.get(2);

        todos.set_should_remove(Some(|_created: Instant, param: &u32| *param == 1));
        assert_eq!(todos.params(), vec![2]);

        let a = todos.get(1);
        let b = todos.get(1);
        assert_ne!(a.id(), b.id());

        todos.set_should_remove(None::<fn(Instant, &u32) -> bool>);
        assert_eq!(todos.get(1).id(), todos.get(1).id());
    }

    #[test]
    fn unused_entries_are_released() {
        let todos = family();
        let kept = todos.get(1);
        let _ = todos.get(2);

        assert_eq!(todos.release_unused(), 1);
        assert_eq!(todos.params(), vec![1]);
        drop(kept);
        assert_eq!(todos.release_unused(), 1);
        assert!(todos.is_empty());
    }

    #[test]
    fn debug_shows_size_and_policy() {
        let todos = family();
        let _ = todos.get(1);
        assert_eq!(
            format!("{todos:?}"),
            "AtomFamily { len: 1, should_remove: false }"
        );
    }
}
