//! Mount Manager
//!
//! An atom is live ("mounted") while it has a listener or while a live atom
//! depends on it. Live atoms get reverse edges, so writes push invalidation
//! to them, and writable live atoms run their `on_mount` hook.
//!
//! # Ordering
//!
//! Mounting reads the atom first and mounts its dependencies before the atom
//! itself, so a dependency is live before its dependent observes it.
//! Unmounting goes the other way: an atom unmounts only once no live
//! dependent still lists it, and then releases its own dependencies.
//!
//! Hooks never run here. They are queued and run by the flush loop once the
//! lock is released.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use tracing::{debug, warn};

use super::dev::StoreEvent;
use super::{Listener, ListenerId, StoreInner};
use crate::atom::{AtomDef, AtomId};
use crate::error::AtomError;
use crate::graph::Mounted;

impl StoreInner {
    /// Make `def` live, mounting its dependencies first.
    pub(crate) fn mount_atom(&self, def: &Arc<AtomDef>) -> Result<(), AtomError> {
        if self.state.lock().mounted.contains_key(&def.id) {
            return Ok(());
        }

        self.read_atom_state(def)?;
        let dependencies: Vec<AtomId> = {
            let state = self.state.lock();
            state
                .atoms
                .get(&def.id)
                .map(|record| record.dependencies.keys().copied().collect())
                .unwrap_or_default()
        };
        for &dependency in &dependencies {
            let Some(dependency_def) = self.state.lock().def_of(dependency) else {
                continue;
            };
            self.mount_atom(&dependency_def)?;
            if let Some(live) = self.state.lock().mounted.get_mut(&dependency) {
                live.dependents.insert(def.id);
            }
        }

        {
            let mut state = self.state.lock();
            if state.mounted.contains_key(&def.id) {
                return Ok(());
            }
            let dependencies: IndexSet<AtomId> = dependencies
                .into_iter()
                .filter(|dependency| state.mounted.contains_key(dependency))
                .collect();
            state
                .mounted
                .insert(def.id, Mounted::new(Arc::clone(def), dependencies));
            // Delegated atoms run their hook in the owning store.
            if def.on_mount.is_some() && !self.is_delegated(def) {
                state.mount_queue.push(Arc::clone(def));
            }
            state.note(StoreEvent::Mounted(def.id));
            debug!(atom = %def.name(), "mounted");
        }

        if self.is_delegated(def) {
            self.link_upstream(def)?;
        }
        Ok(())
    }

    /// Reconcile a live atom's mounted dependencies with its last
    /// evaluation. Skipped while an async evaluation is outstanding.
    pub(crate) fn mount_dependencies(&self, def: &Arc<AtomDef>) -> Result<(), AtomError> {
        let (to_mount, to_unmount) = {
            let state = self.state.lock();
            let (Some(mounted), Some(record)) =
                (state.mounted.get(&def.id), state.atoms.get(&def.id))
            else {
                return Ok(());
            };
            if record.slot.is_pending() {
                return Ok(());
            }
            let to_mount: Vec<_> = record
                .dependencies
                .iter()
                .filter(|(dependency, _)| !mounted.dependencies.contains(*dependency))
                .map(|(dependency, revision)| (*dependency, *revision))
                .collect();
            let to_unmount: Vec<AtomId> = mounted
                .dependencies
                .iter()
                .copied()
                .filter(|dependency| !record.dependencies.contains_key(dependency))
                .collect();
            (to_mount, to_unmount)
        };

        for (dependency, revision) in to_mount {
            let Some(dependency_def) = self.state.lock().def_of(dependency) else {
                continue;
            };
            self.mount_atom(&dependency_def)?;

            let mut state = self.state.lock();
            if let Some(live) = state.mounted.get_mut(&dependency) {
                live.dependents.insert(def.id);
            }
            if let Some(live) = state.mounted.get_mut(&def.id) {
                live.dependencies.insert(dependency);
            }
            if state.revision_of(dependency) != Some(revision) {
                state.mark_changed(dependency);
                state.invalidate_dependents(dependency);
            }
        }

        if !to_unmount.is_empty() {
            let mut state = self.state.lock();
            for dependency in to_unmount {
                if let Some(live) = state.mounted.get_mut(&def.id) {
                    live.dependencies.shift_remove(&dependency);
                }
                if state.unmount_atom(dependency) {
                    if let Some(live) = state.mounted.get_mut(&dependency) {
                        live.dependents.shift_remove(&def.id);
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn subscribe_erased(
        &self,
        def: &Arc<AtomDef>,
        listener: Listener,
    ) -> Result<Subscription, AtomError> {
        let id = ListenerId::next();
        let mounted = self.transaction(|| {
            self.mount_atom(def)?;
            let mut state = self.state.lock();
            match state.mounted.get_mut(&def.id) {
                Some(live) => {
                    live.listeners.insert(id, listener);
                    Ok(())
                }
                None => Err(AtomError::Uninitialized { atom: def.name() }),
            }
        });

        let subscription = Subscription {
            store: Some(self.weak()),
            atom: def.id,
            listener: id,
        };
        match mounted {
            Ok(()) => Ok(subscription),
            Err(error) => {
                if let Err(rollback) = subscription.unsubscribe() {
                    warn!(
                        atom = %def.name(),
                        error = %rollback,
                        "rollback of failed subscribe failed"
                    );
                }
                Err(error)
            }
        }
    }

    fn unsubscribe(&self, atom: AtomId, listener: ListenerId) -> Result<(), AtomError> {
        self.transaction(|| {
            let mut state = self.state.lock();
            if let Some(live) = state.mounted.get_mut(&atom) {
                live.listeners.shift_remove(&listener);
            }
            state.unmount_atom(atom);
            Ok(())
        })?;
        self.release_links();
        Ok(())
    }

    /// Drop parent subscriptions of unmounted delegated atoms, outside the
    /// lock.
    pub(crate) fn release_links(&self) {
        let links = std::mem::take(&mut self.state.lock().released_links);
        drop(links);
    }
}

/// A live listener registration.
///
/// Dropping a subscription unsubscribes; use
/// [`unsubscribe`](Self::unsubscribe) to observe errors from the teardown
/// hooks that run as a result.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    store: Option<Weak<StoreInner>>,
    atom: AtomId,
    listener: ListenerId,
}

impl Subscription {
    pub fn listener_id(&self) -> ListenerId {
        self.listener
    }

    pub fn atom_id(&self) -> AtomId {
        self.atom
    }

    /// Remove the listener, unmounting what is no longer observed.
    pub fn unsubscribe(mut self) -> Result<(), AtomError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), AtomError> {
        match self.store.take().and_then(|store| store.upgrade()) {
            Some(store) => store.unsubscribe(self.atom, self.listener),
            None => Ok(()),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            warn!(atom = %self.atom, %error, "unsubscribe on drop failed");
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("atom", &self.atom)
            .field("listener", &self.listener)
            .field("active", &self.store.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
