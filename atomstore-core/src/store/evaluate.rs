//! Evaluator: the pull-based read path.
//!
//! # How It Works
//!
//! `read_atom_state` returns a record snapshot for an atom, recomputing only
//! when needed:
//!
//! 1. A mounted atom that has not been invalidated is kept current by the
//!    write path, so its cached result is returned as is.
//! 2. Otherwise, each recorded dependency is read (recursively, through this
//!    same function). If every one still has the revision recorded for it,
//!    the cache is valid.
//! 3. Otherwise the read function runs with a fresh [`Getter`]. The
//!    dependency map it builds fully replaces the old one.
//!
//! A new result bumps the revision unless it equals the previous value.
//! Errors always bump it. Async reads are committed as pending and settled
//! later by [`StoreInner::settle`].

use std::future::Future;
use std::sync::Arc;

use futures_util::future::{AbortHandle, BoxFuture, FutureExt};
use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::context::EvaluationFrame;
use super::{Evaluation, Getter, StoreInner};
use crate::atom::{AtomDef, AtomId, Read};
use crate::error::AtomError;
use crate::graph::{Revision, Slot, Snapshot};
use crate::pending::{self, AbortSignal, Outcome, PendingHandle};

type DependencyList = SmallVec<[(AtomId, Revision); 8]>;

impl StoreInner {
    /// Return an up-to-date snapshot of `def`'s record.
    ///
    /// Read failures are part of the snapshot. An `Err` here means the read
    /// could not happen at all (a cycle, or a dropped store).
    pub(crate) fn read_atom_state(&self, def: &Arc<AtomDef>) -> Result<Snapshot, AtomError> {
        if self.is_delegated(def) {
            return self.read_delegated(def);
        }
        if EvaluationFrame::contains(self.id, def.id) {
            return Err(AtomError::CyclicDependency { atom: def.name() });
        }

        let dependencies: Option<DependencyList> = {
            let mut state = self.state.lock();
            let mounted = state.mounted.contains_key(&def.id);
            let invalidated = state.invalidated.get(&def.id).copied();
            let record = state.ensure(def);
            if !record.slot.is_initialized() {
                None
            } else if mounted && invalidated != Some(record.revision) {
                return Ok(record.snapshot());
            } else {
                Some(
                    record
                        .dependencies
                        .iter()
                        .map(|(id, revision)| (*id, *revision))
                        .collect(),
                )
            }
        };

        if let Some(dependencies) = dependencies {
            if self.dependencies_fresh(&dependencies) {
                if let Some(record) = self.state.lock().atoms.get(&def.id) {
                    return Ok(record.snapshot());
                }
            }
        }
        self.evaluate(def)
    }

    fn dependencies_fresh(&self, dependencies: &[(AtomId, Revision)]) -> bool {
        dependencies.iter().all(|&(id, revision)| {
            let def = self.state.lock().def_of(id);
            match def {
                Some(def) => self
                    .read_atom_state(&def)
                    .is_ok_and(|snapshot| snapshot.revision == revision),
                None => false,
            }
        })
    }

    fn evaluate(&self, def: &Arc<AtomDef>) -> Result<Snapshot, AtomError> {
        match &def.read {
            Read::Primitive(_) => Ok(self.state.lock().ensure(def).snapshot()),
            Read::Derived(read) => {
                let eval = Evaluation::new(
                    self.weak(),
                    Arc::clone(def),
                    self.next_generation(),
                    AbortSignal::inert(),
                );
                let getter = Getter::new(Arc::clone(&eval));
                trace!(atom = %def.name(), "evaluating");

                let result = {
                    let _frame = EvaluationFrame::enter(self.id, def.id);
                    read(&getter)
                };
                let dependencies = eval.settle();
                let slot = match result {
                    Ok(value) => Slot::Value(value),
                    Err(error) => {
                        debug!(atom = %def.name(), %error, "read failed");
                        Slot::Error(error)
                    }
                };
                Ok(self.commit(def, slot, dependencies))
            }
            Read::Async(read) => {
                let generation = self.next_generation();
                let (abort, registration) = AbortHandle::new_pair();
                let eval = Evaluation::new(
                    self.weak(),
                    Arc::clone(def),
                    generation,
                    AbortSignal::new(abort.clone()),
                );
                trace!(atom = %def.name(), generation, "evaluating async");

                let future = {
                    let _frame = EvaluationFrame::enter(self.id, def.id);
                    read(Getter::new(Arc::clone(&eval)))
                };
                let dependencies = eval.detach();

                let name: Arc<str> = Arc::from(def.name());
                let driver = self.settlement(
                    def.id,
                    generation,
                    Arc::clone(&eval),
                    pending::abortable(Arc::clone(&name), future, registration),
                );
                let handle = PendingHandle::new(def.id, name, generation, abort, driver, eval);
                let snapshot = self.commit(def, Slot::Pending(handle.clone()), dependencies);
                handle.launch(self.config.async_driver);
                Ok(snapshot)
            }
        }
    }

    /// Wrap an async read so that its result is written back to the store.
    fn settlement(
        &self,
        atom: AtomId,
        generation: u64,
        eval: Arc<Evaluation>,
        future: impl Future<Output = Outcome> + Send + 'static,
    ) -> BoxFuture<'static, Outcome> {
        let store = self.weak();
        async move {
            let outcome = future.await;
            eval.settle();
            match store.upgrade() {
                Some(store) => store.settle(atom, generation, outcome),
                None => outcome,
            }
        }
        .boxed()
    }

    /// Store a fresh evaluation result.
    fn commit(
        &self,
        def: &Arc<AtomDef>,
        slot: Slot,
        dependencies: IndexMap<AtomId, Revision>,
    ) -> Snapshot {
        let id = def.id;
        let pending = slot.is_pending();
        let mut superseded = None;

        let (snapshot, previous) = {
            let mut state = self.state.lock();

            let dropped: SmallVec<[AtomId; 8]> = state
                .ensure(def)
                .dependencies
                .keys()
                .copied()
                .filter(|dependency| !dependencies.contains_key(dependency))
                .collect();
            for dependency in dropped {
                if let Some(record) = state.atoms.get_mut(&dependency) {
                    record.pending_dependents.shift_remove(&id);
                }
            }
            // Reverse edges are for live atoms; mounting adds them otherwise.
            let live = state.mounted.contains_key(&id);
            for dependency in dependencies.keys() {
                if live {
                    if let Some(mounted) = state.mounted.get_mut(dependency) {
                        mounted.dependents.insert(id);
                    }
                }
                if let Some(record) = state.atoms.get_mut(dependency) {
                    if pending {
                        record.pending_dependents.insert(id);
                    } else {
                        record.pending_dependents.shift_remove(&id);
                    }
                }
            }

            let invalidated = state.invalidated.get(&id).copied();
            let record = state.ensure(def);
            record.dependencies = dependencies;
            let previous_revision = record.revision;

            let previous = if record.slot.same_as(&slot, def) {
                trace!(atom = %def.name(), "value unchanged");
                None
            } else {
                let previous = std::mem::replace(&mut record.slot, slot);
                record.revision += 1;
                if !record.slot.is_pending() {
                    record.settled_once = true;
                }
                match (&previous, &record.slot) {
                    (Slot::Pending(old), Slot::Pending(new)) => {
                        superseded = Some((old.clone(), new.clone()));
                    }
                    (Slot::Pending(old), _) => old.cancel(),
                    _ => {}
                }
                Some(previous)
            };

            let revision = record.revision;
            let snapshot = record.snapshot();
            if revision != previous_revision && invalidated == Some(previous_revision) {
                state.invalidated.insert(id, revision);
                state.mark_changed(id);
            }
            (snapshot, previous)
        };

        drop(previous);
        if let Some((old, new)) = superseded {
            old.supersede(new);
        }
        snapshot
    }

    /// Record a dependency read by an async evaluation after its synchronous
    /// part returned. Ignored once the evaluation is no longer current.
    pub(crate) fn track_detached(&self, eval: &Evaluation, dependency: AtomId, revision: Revision) {
        let atom = eval.atom().id;
        let mut state = self.state.lock();
        let current = state
            .atoms
            .get(&atom)
            .is_some_and(|record| record.is_pending_generation(eval.generation()));
        if !current {
            return;
        }
        if let Some(record) = state.atoms.get_mut(&atom) {
            record.dependencies.insert(dependency, revision);
        }
        if let Some(record) = state.atoms.get_mut(&dependency) {
            record.pending_dependents.insert(atom);
        }
        if state.mounted.contains_key(&atom) {
            if let Some(mounted) = state.mounted.get_mut(&dependency) {
                mounted.dependents.insert(atom);
            }
        }
    }

    /// Write the result of async evaluation `generation` to `atom`'s record.
    ///
    /// Results of superseded generations are discarded and reported as
    /// [`AtomError::Superseded`], which consumers resolve by following the
    /// successor chain.
    pub(crate) fn settle(&self, atom: AtomId, generation: u64, outcome: Outcome) -> Outcome {
        let (def, previous) = {
            let mut state = self.state.lock();
            let current = state
                .atoms
                .get(&atom)
                .is_some_and(|record| record.is_pending_generation(generation));
            if !current {
                trace!(%atom, generation, "discarding superseded async result");
                return Err(AtomError::Superseded {
                    atom: atom.to_string(),
                });
            }

            let slot = match &outcome {
                Ok(value) => Slot::Value(Arc::clone(value)),
                Err(error) => Slot::Error(error.clone()),
            };
            let mut previous = None;
            let mut dependencies = SmallVec::<[AtomId; 8]>::new();
            if let Some(record) = state.atoms.get_mut(&atom) {
                previous = Some(std::mem::replace(&mut record.slot, slot));
                record.revision += 1;
                record.settled_once = true;
                dependencies.extend(record.dependencies.keys().copied());
            }
            for dependency in dependencies {
                if let Some(record) = state.atoms.get_mut(&dependency) {
                    record.pending_dependents.shift_remove(&atom);
                }
            }
            state.mark_changed(atom);
            state.invalidate_dependents(atom);
            (state.def_of(atom), previous)
        };
        drop(previous);
        debug!(%atom, generation, ok = outcome.is_ok(), "async evaluation settled");

        let flushed = self.transaction(|| match &def {
            Some(def) => self.mount_dependencies(def),
            None => Ok(()),
        });
        if let Err(error) = flushed {
            warn!(%atom, %error, "flush after async settlement failed");
        }
        outcome
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
