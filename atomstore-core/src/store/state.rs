//! Lock-protected store state.
//!
//! Everything in here runs while the store mutex is held, so nothing in this
//! module may call user code (read/write functions, hooks, listeners) or any
//! store method that locks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tracing::debug;

use super::dev::{DevHub, StoreEvent};
use super::Subscription;
use crate::atom::{AtomDef, AtomId, Teardown};
use crate::graph::{AtomState, Mounted, Revision};

pub(crate) type Dependents = SmallVec<[AtomId; 8]>;

pub(crate) struct StoreState {
    pub(crate) atoms: HashMap<AtomId, AtomState>,
    pub(crate) mounted: HashMap<AtomId, Mounted>,
    /// Atoms marked stale by a write, with the revision they had when marked.
    pub(crate) invalidated: IndexMap<AtomId, Revision>,
    /// Atoms whose revision changed since the last flush.
    pub(crate) changed: IndexSet<AtomId>,
    pub(crate) mount_queue: Vec<Arc<AtomDef>>,
    pub(crate) unmount_queue: Vec<Teardown>,
    /// Parent subscriptions of unmounted delegated atoms, dropped after the
    /// lock is released.
    pub(crate) released_links: Vec<Subscription>,
    pub(crate) dev: DevHub,
    pub(crate) gc_watermark: usize,
}

impl StoreState {
    pub(crate) fn new(gc_threshold: usize) -> Self {
        Self {
            atoms: HashMap::new(),
            mounted: HashMap::new(),
            invalidated: IndexMap::new(),
            changed: IndexSet::new(),
            mount_queue: Vec::new(),
            unmount_queue: Vec::new(),
            released_links: Vec::new(),
            dev: DevHub::default(),
            gc_watermark: gc_threshold,
        }
    }

    /// Get the record for `def`, creating it on first use.
    pub(crate) fn ensure(&mut self, def: &Arc<AtomDef>) -> &mut AtomState {
        self.atoms
            .entry(def.id)
            .or_insert_with(|| AtomState::new(def))
    }

    /// Resolve a descriptor from its id, if it is still alive.
    pub(crate) fn def_of(&self, id: AtomId) -> Option<Arc<AtomDef>> {
        if let Some(mounted) = self.mounted.get(&id) {
            return Some(Arc::clone(&mounted.def));
        }
        self.atoms.get(&id).and_then(|record| record.def.upgrade())
    }

    pub(crate) fn revision_of(&self, id: AtomId) -> Option<Revision> {
        self.atoms.get(&id).map(|record| record.revision)
    }

    pub(crate) fn note(&mut self, event: StoreEvent) {
        self.dev.record(event);
    }

    pub(crate) fn mark_changed(&mut self, id: AtomId) {
        if self.changed.insert(id) {
            self.note(StoreEvent::Changed(id));
        }
    }

    /// Live dependents of `id`, plus atoms with an in-flight async evaluation
    /// that read it.
    pub(crate) fn mounted_or_pending_dependents(&self, id: AtomId) -> Dependents {
        let mut dependents = Dependents::new();
        if let Some(mounted) = self.mounted.get(&id) {
            dependents.extend(
                mounted
                    .dependents
                    .iter()
                    .copied()
                    .filter(|dependent| self.mounted.contains_key(dependent)),
            );
        }
        if let Some(record) = self.atoms.get(&id) {
            for &dependent in &record.pending_dependents {
                if !dependents.contains(&dependent) {
                    dependents.push(dependent);
                }
            }
        }
        dependents
    }

    /// Mark every transitive live or pending dependent of `id` stale.
    pub(crate) fn invalidate_dependents(&mut self, id: AtomId) {
        let mut stack = vec![id];
        let mut visited = HashSet::new();

        while let Some(current) = stack.pop() {
            for dependent in self.mounted_or_pending_dependents(current) {
                if let Some(revision) = self.revision_of(dependent) {
                    self.invalidated.insert(dependent, revision);
                }
                if visited.insert(dependent) {
                    stack.push(dependent);
                }
            }
        }
    }

    /// Unmount `id` if nothing keeps it live, then recurse into its
    /// dependencies. Returns whether the atom is still mounted.
    pub(crate) fn unmount_atom(&mut self, id: AtomId) -> bool {
        let Some(mounted) = self.mounted.get(&id) else {
            return false;
        };
        if !mounted.listeners.is_empty() {
            return true;
        }
        let referenced = mounted.dependents.iter().any(|dependent| {
            self.mounted
                .get(dependent)
                .is_some_and(|live| live.dependencies.contains(&id))
        });
        if referenced {
            return true;
        }

        let Some(mounted) = self.mounted.remove(&id) else {
            return false;
        };
        // A mount hook that has not run yet is simply dropped.
        self.mount_queue.retain(|def| def.id != id);
        if let Some(teardown) = mounted.teardown {
            self.unmount_queue.push(teardown);
        }
        if let Some(link) = mounted.upstream {
            self.released_links.push(link);
        }
        debug!(atom = %mounted.def.name(), "unmounted");
        self.note(StoreEvent::Unmounted(id));

        for dependency in mounted.dependencies {
            if self.unmount_atom(dependency) {
                if let Some(live) = self.mounted.get_mut(&dependency) {
                    live.dependents.shift_remove(&id);
                }
            }
        }
        false
    }

    /// Remove records of unmounted atoms whose descriptors were dropped.
    ///
    /// The removed records are returned so their values drop after the lock
    /// is released.
    pub(crate) fn sweep(&mut self) -> Vec<AtomState> {
        let dead: HashSet<AtomId> = self
            .atoms
            .iter()
            .filter(|(id, record)| {
                !self.mounted.contains_key(id) && record.def.strong_count() == 0
            })
            .map(|(id, _)| *id)
            .collect();
        if dead.is_empty() {
            return Vec::new();
        }

        let removed: Vec<AtomState> = dead
            .iter()
            .filter_map(|id| self.atoms.remove(id))
            .collect();
        self.invalidated.retain(|id, _| !dead.contains(id));
        self.changed.retain(|id| !dead.contains(id));
        for record in self.atoms.values_mut() {
            record.pending_dependents.retain(|id| !dead.contains(id));
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{atom, derived};
    use crate::store::Listener;
    use crate::store::ListenerId;

    fn mount(state: &mut StoreState, def: &Arc<AtomDef>, dependencies: &[AtomId]) {
        state.ensure(def);
        state.mounted.insert(
            def.id,
            Mounted::new(Arc::clone(def), dependencies.iter().copied().collect()),
        );
        for dependency in dependencies {
            if let Some(live) = state.mounted.get_mut(dependency) {
                live.dependents.insert(def.id);
            }
        }
    }

    #[test]
    fn invalidation_reaches_transitive_live_dependents() {
        let source = atom(1);
        let middle = derived(|_| Ok(1));
        let leaf = derived(|_| Ok(1));
        let mut state = StoreState::new(16);

        mount(&mut state, &source.def, &[]);
        mount(&mut state, &middle.def, &[source.id()]);
        mount(&mut state, &leaf.def, &[middle.id()]);

        state.invalidate_dependents(source.id());

        assert!(state.invalidated.contains_key(&middle.id()));
        assert!(state.invalidated.contains_key(&leaf.id()));
        assert!(!state.invalidated.contains_key(&source.id()));
    }

    #[test]
    fn pending_dependents_are_invalidated_while_unmounted() {
        let source = atom(1);
        let reader = derived(|_| Ok(1));
        let mut state = StoreState::new(16);

        state.ensure(&reader.def);
        state
            .ensure(&source.def)
            .pending_dependents
            .insert(reader.id());

        state.invalidate_dependents(source.id());
        assert_eq!(state.invalidated.get(&reader.id()), Some(&0));
    }

    #[test]
    fn unmount_cascades_to_unreferenced_dependencies() {
        let source = atom(1);
        let reader = derived(|_| Ok(1));
        let mut state = StoreState::new(16);

        mount(&mut state, &source.def, &[]);
        mount(&mut state, &reader.def, &[source.id()]);

        assert!(!state.unmount_atom(reader.id()));
        assert!(state.mounted.is_empty());
    }

    #[test]
    fn listeners_keep_atoms_mounted() {
        let source = atom(1);
        let mut state = StoreState::new(16);

        mount(&mut state, &source.def, &[]);
        if let Some(live) = state.mounted.get_mut(&source.id()) {
            live.listeners.insert(ListenerId::next(), Listener::new(|| {}));
        }

        assert!(state.unmount_atom(source.id()));
        assert!(state.mounted.contains_key(&source.id()));
    }

    #[test]
    fn live_dependents_keep_dependencies_mounted() {
        let source = atom(1);
        let reader = derived(|_| Ok(1));
        let mut state = StoreState::new(16);

        mount(&mut state, &source.def, &[]);
        mount(&mut state, &reader.def, &[source.id()]);

        assert!(state.unmount_atom(source.id()));
    }

    #[test]
    fn sweep_drops_only_records_of_dead_descriptors() {
        let kept = atom(1);
        let dropped = atom(2);
        let mut state = StoreState::new(16);

        state.ensure(&kept.def);
        state.ensure(&dropped.def);
        let dropped_id = dropped.id();
        drop(dropped);

        let removed = state.sweep();
        assert_eq!(removed.len(), 1);
        assert!(state.atoms.contains_key(&kept.id()));
        assert!(!state.atoms.contains_key(&dropped_id));
    }
}
