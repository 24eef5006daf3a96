//! Scoped stores.
//!
//! A store created with [`Store::derive`] keeps independent records only for
//! the atoms it was scoped to. Every other primitive atom is owned by the
//! parent: reads and writes go to the parent, and the child keeps a mirror
//! record so its own derived atoms can track revisions locally. Derived atoms
//! always evaluate in the child, so a derived atom reading a scoped atom sees
//! the child's value.
//!
//! # Keeping mirrors current
//!
//! A mirror is refreshed whenever the child reads through it and the parent
//! revision moved. While the atom is mounted in the child, the child also
//! holds a parent subscription that refreshes the mirror and pushes
//! invalidation to the child's live dependents.

use std::sync::Arc;

use indexmap::IndexSet;
use tracing::{debug, warn};

use super::{Listener, Store, StoreInner};
use crate::atom::{AnyAtom, AtomDef, Value};
use crate::error::AtomError;
use crate::graph::Snapshot;

impl StoreInner {
    /// Whether reads and writes of `def` go to the parent store.
    pub(crate) fn is_delegated(&self, def: &AtomDef) -> bool {
        self.parent.is_some() && def.is_primitive() && !self.scoped.contains(&def.id)
    }

    fn parent_store(&self) -> Result<&Store, AtomError> {
        self.parent.as_ref().ok_or(AtomError::StoreDropped)
    }

    /// Read a delegated atom from the parent and refresh the local mirror.
    pub(crate) fn read_delegated(&self, def: &Arc<AtomDef>) -> Result<Snapshot, AtomError> {
        let upstream = self.parent_store()?.inner.read_atom_state(def)?;
        Ok(self.mirror(def, upstream, false))
    }

    /// Write a delegated atom in the parent, then refresh the mirror.
    ///
    /// This store's transaction keeps the parent batched, so the parent
    /// flushes once when the outermost write here returns.
    pub(crate) fn write_through(&self, def: &Arc<AtomDef>, value: Value) -> Result<(), AtomError> {
        let parent = &self.parent_store()?.inner;
        parent.transaction(|| parent.set_primitive(def, value))?;
        self.sync_upstream(def)
    }

    /// Refresh the mirror of `def` and push the change to local dependents.
    fn sync_upstream(&self, def: &Arc<AtomDef>) -> Result<(), AtomError> {
        let upstream = self.parent_store()?.inner.read_atom_state(def)?;
        self.mirror(def, upstream, true);
        Ok(())
    }

    /// Copy the parent's slot into the local record when the parent revision
    /// moved since the last copy.
    ///
    /// With `propagate`, a change is marked and invalidates local dependents
    /// like a local write would. Without it, only an invalidation already in
    /// progress is advanced.
    fn mirror(&self, def: &Arc<AtomDef>, upstream: Snapshot, propagate: bool) -> Snapshot {
        let (snapshot, previous) = {
            let mut state = self.state.lock();
            let invalidated = state.invalidated.get(&def.id).copied();
            let record = state.ensure(def);
            if record.upstream == Some(upstream.revision) {
                return record.snapshot();
            }
            record.upstream = Some(upstream.revision);

            let previous_revision = record.revision;
            let previous = if record.slot.same_as(&upstream.slot, def) {
                None
            } else {
                record.revision += 1;
                record.settled_once = true;
                Some(std::mem::replace(&mut record.slot, upstream.slot))
            };
            let revision = record.revision;
            let snapshot = record.snapshot();

            if revision != previous_revision {
                debug!(atom = %def.name(), upstream = upstream.revision, "mirror refreshed");
                if propagate {
                    state.mark_changed(def.id);
                    state.invalidate_dependents(def.id);
                } else if invalidated == Some(previous_revision) {
                    state.invalidated.insert(def.id, revision);
                    state.mark_changed(def.id);
                }
            }
            (snapshot, previous)
        };
        drop(previous);
        snapshot
    }

    /// Subscribe to the parent for a delegated atom that just mounted here.
    pub(crate) fn link_upstream(&self, def: &Arc<AtomDef>) -> Result<(), AtomError> {
        let child = self.weak();
        let weak_def = Arc::downgrade(def);
        let listener = Listener::new(move || {
            let (Some(child), Some(def)) = (child.upgrade(), weak_def.upgrade()) else {
                return;
            };
            if let Err(error) = child.transaction(|| child.sync_upstream(&def)) {
                warn!(atom = %def.name(), %error, "scoped mirror refresh failed");
            }
        });
        let link = self.parent_store()?.inner.subscribe_erased(def, listener)?;

        let stale = {
            let mut state = self.state.lock();
            match state.mounted.get_mut(&def.id) {
                Some(mounted) => mounted.upstream.replace(link),
                None => Some(link),
            }
        };
        drop(stale);
        Ok(())
    }
}

impl Store {
    /// Create a scoped child store.
    ///
    /// Atoms in `scoped` get records of their own in the child, starting
    /// from their initial values. Other primitive atoms stay shared with
    /// this store.
    pub fn derive<I>(&self, scoped: I) -> Store
    where
        I: IntoIterator,
        I::Item: Into<AnyAtom>,
    {
        let scoped: IndexSet<_> = scoped.into_iter().map(|atom| atom.into().id()).collect();
        debug!(parent = self.inner.id.raw(), scoped = scoped.len(), "scoped store created");
        Store {
            inner: StoreInner::new(self.inner.config.clone(), Some(self.clone()), scoped),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
