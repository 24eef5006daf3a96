//! Batch Coordinator
//!
//! Groups writes into transactions and delivers their effects once.
//!
//! # How It Works
//!
//! 1. `transaction` counts nesting depth. Only the outermost transaction
//!    recomputes and flushes; nested ones just run.
//! 2. `recompute_invalidated` orders the dependents of every changed atom
//!    topologically and recomputes the invalidated ones that actually have a
//!    changed dependency. Recomputed atoms whose value changed join the
//!    changed set, so the pass cascades without glitches.
//! 3. `flush` notifies listeners of changed live atoms (each listener at most
//!    once per round), then runs queued unmount teardowns and mount hooks.
//!    Writes made by those callbacks land in the same store; the loop keeps
//!    going until nothing is left, so a callback's transaction never
//!    interleaves with the round that triggered it.
//!
//! A failing hook does not stop the loop. Failures are collected and
//! returned once the loop is done.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use super::dev::{self, StoreEvent};
use super::{Listener, ListenerId, SelfWriter, StoreInner};
use crate::atom::{AtomDef, AtomId};
use crate::error::AtomError;
use crate::graph::topological_order;

struct BatchGuard<'a> {
    depth: &'a AtomicUsize,
}

impl<'a> BatchGuard<'a> {
    fn enter(depth: &'a AtomicUsize) -> Self {
        depth.fetch_add(1, Ordering::AcqRel);
        Self { depth }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Clears the flushing flag even if a callback panics.
struct FlushGuard<'a> {
    flushing: &'a AtomicBool,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flushing.store(false, Ordering::Release);
    }
}

impl StoreInner {
    /// Run `f` as a transaction. The outermost transaction recomputes
    /// invalidated atoms and flushes callbacks when `f` returns.
    ///
    /// A scoped store's ancestors are batched for the same span, so writes
    /// delegated upward are flushed in each ancestor once, nearest first,
    /// after this store has flushed.
    ///
    /// An error from `f` wins over an error from a flush.
    pub(crate) fn transaction<R>(
        &self,
        f: impl FnOnce() -> Result<R, AtomError>,
    ) -> Result<R, AtomError> {
        let _gate = self.gate.lock();
        let ancestors: Vec<&StoreInner> = self.ancestors().collect();
        let enlisted: Vec<BatchGuard<'_>> = ancestors
            .iter()
            .map(|ancestor| BatchGuard::enter(&ancestor.batch_depth))
            .collect();

        let outcome = {
            let _batch = BatchGuard::enter(&self.batch_depth);
            f()
        };
        let flushed = self.finish_batch();
        let mut outcome = outcome.and_then(|value| flushed.map(|()| value));
        for (ancestor, guard) in ancestors.into_iter().zip(enlisted) {
            drop(guard);
            let flushed = ancestor.finish_batch();
            outcome = outcome.and_then(|value| flushed.map(|()| value));
        }
        outcome
    }

    fn ancestors(&self) -> impl Iterator<Item = &StoreInner> {
        std::iter::successors(self.parent.as_ref().map(|parent| &*parent.inner), |&inner| {
            inner.parent.as_ref().map(|parent| &*parent.inner)
        })
    }

    /// Recompute and flush if no transaction is open any more.
    fn finish_batch(&self) -> Result<(), AtomError> {
        if self.batch_depth.load(Ordering::Acquire) > 0 {
            return Ok(());
        }
        self.recompute_invalidated();
        let flushed = self.flush();
        self.maybe_collect();
        flushed
    }

    /// Recompute invalidated atoms reachable from the changed set, in
    /// dependency order.
    pub(crate) fn recompute_invalidated(&self) {
        let order: Vec<AtomId> = {
            let state = self.state.lock();
            if state.changed.is_empty() {
                return;
            }
            let roots: Vec<AtomId> = state.changed.iter().copied().collect();
            topological_order(roots, |atom| state.mounted_or_pending_dependents(atom))
                .into_iter()
                .filter(|atom| {
                    let revision = state.revision_of(*atom);
                    revision.is_some() && state.invalidated.get(atom).copied() == revision
                })
                .collect()
        };
        if order.is_empty() {
            return;
        }
        trace!(count = order.len(), "recomputing invalidated atoms");

        for atom in order {
            let (def, has_changed_dependency) = {
                let state = self.state.lock();
                let has_changed_dependency = state.atoms.get(&atom).is_some_and(|record| {
                    record
                        .dependencies
                        .keys()
                        .any(|dependency| *dependency != atom && state.changed.contains(dependency))
                });
                (state.def_of(atom), has_changed_dependency)
            };

            if has_changed_dependency {
                if let Some(def) = def {
                    if let Err(error) = self
                        .read_atom_state(&def)
                        .and_then(|_| self.mount_dependencies(&def))
                    {
                        warn!(atom = %def.name(), %error, "recompute failed");
                    }
                }
            }
            self.state.lock().invalidated.shift_remove(&atom);
        }
    }

    /// Deliver listener notifications and lifecycle hooks until quiescent.
    ///
    /// Returns immediately inside a transaction or when a flush is already
    /// running further up the stack; that flush picks up the new work.
    pub(crate) fn flush(&self) -> Result<(), AtomError> {
        if self.batch_depth.load(Ordering::Acquire) > 0 {
            return Ok(());
        }
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        let _guard = FlushGuard {
            flushing: &self.flushing,
        };

        let mut errors = Vec::new();
        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let (listeners, teardowns, mounts, events, dev_listeners) = {
                let mut state = self.state.lock();
                let mut listeners: IndexMap<ListenerId, Listener> = IndexMap::new();
                let changed: Vec<AtomId> = state.changed.drain(..).collect();
                for atom in changed {
                    let Some(mounted) = state.mounted.get(&atom) else {
                        continue;
                    };
                    let silent = state
                        .atoms
                        .get(&atom)
                        .is_some_and(|record| record.slot.is_pending() && record.settled_once);
                    if silent {
                        continue;
                    }
                    for (id, listener) in &mounted.listeners {
                        listeners.entry(*id).or_insert_with(|| listener.clone());
                    }
                }
                let teardowns = std::mem::take(&mut state.unmount_queue);
                let mounts = std::mem::take(&mut state.mount_queue);
                let (events, dev_listeners) = state.dev.drain();
                (listeners, teardowns, mounts, events, dev_listeners)
            };

            dev::dispatch(events, dev_listeners);
            for listener in listeners.values() {
                listener.notify();
            }
            for teardown in teardowns {
                if let Err(error) = teardown() {
                    warn!(%error, "unmount teardown failed");
                    errors.push(error);
                }
            }
            for def in mounts {
                if let Err(error) = self.run_on_mount(&def) {
                    warn!(atom = %def.name(), %error, "mount hook failed");
                    errors.push(error);
                }
            }
            self.release_links();

            if !self.state.lock().changed.is_empty() {
                self.recompute_invalidated();
            }

            let state = self.state.lock();
            if state.changed.is_empty()
                && state.unmount_queue.is_empty()
                && state.mount_queue.is_empty()
            {
                break;
            }
        }

        let (events, dev_listeners) = {
            let mut state = self.state.lock();
            state.note(StoreEvent::Flushed);
            state.dev.drain()
        };
        dev::dispatch(events, dev_listeners);
        debug!(rounds, errors = errors.len(), "flushed");

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(AtomError::Lifecycle(errors)),
        }
    }

    /// Run `def`'s mount hook and keep its teardown.
    fn run_on_mount(&self, def: &Arc<AtomDef>) -> Result<(), AtomError> {
        let Some(on_mount) = def.on_mount.clone() else {
            return Ok(());
        };
        let teardown = on_mount(SelfWriter::new(self.weak(), Arc::clone(def)))?;
        if let Some(teardown) = teardown {
            let mut state = self.state.lock();
            match state.mounted.get_mut(&def.id) {
                Some(mounted) => mounted.teardown = Some(teardown),
                // Unmounted by the hook itself; tear down on the next round.
                None => state.unmount_queue.push(teardown),
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::atom::{action, atom, derived, Teardown};
    use crate::error::AtomError;
    use crate::store::Store;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        (calls, move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn one_write_touching_two_atoms_notifies_once() {
        let store = Store::new();
        let a = atom(0);
        let b = atom(0);
        let sum = derived({
            let (a, b) = (a.clone(), b.clone());
            move |get| Ok(get.get(&a)? + get.get(&b)?)
        });
        let both = action({
            let (a, b) = (a.clone(), b.clone());
            move |set, n: i32| {
                set.set(&a, n)?;
                set.set(&b, n)
            }
        });
        let (calls, listener) = counter();
        let _sub = store.subscribe(&sum, listener).unwrap();

        store.set(&both, 2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(&sum).unwrap(), 4);
    }

    #[test]
    fn listener_sees_consistent_diamond() {
        let store = Store::new();
        let base = atom(1);
        let plus = derived({
            let base = base.clone();
            move |get| Ok(get.get(&base)? + 1)
        });
        let times = derived({
            let base = base.clone();
            move |get| Ok(get.get(&base)? * 10)
        });
        let join = derived({
            let (plus, times) = (plus.clone(), times.clone());
            move |get| Ok((get.get(&plus)?, get.get(&times)?))
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let listener = {
            let (store, join, seen) = (store.clone(), join.clone(), seen.clone());
            move || {
                if let Ok(pair) = store.get(&join) {
                    seen.lock().push(pair);
                }
            }
        };
        let _sub = store.subscribe(&join, listener).unwrap();

        store.set(&base, 2).unwrap();
        store.set(&base, 3).unwrap();
        assert_eq!(*seen.lock(), vec![(3, 20), (4, 30)]);
    }

    #[test]
    fn listener_writes_are_flushed_after_the_current_round() {
        let store = Store::new();
        let source = atom(0);
        let mirror = atom(0);
        let order = Arc::new(Mutex::new(Vec::new()));

        let _mirror_sub = store
            .subscribe(&mirror, {
                let order = order.clone();
                move || order.lock().push("mirror")
            })
            .unwrap();
        let _source_sub = store
            .subscribe(&source, {
                let (store, source, mirror, order) =
                    (store.clone(), source.clone(), mirror.clone(), order.clone());
                move || {
                    order.lock().push("source");
                    if let Ok(value) = store.get(&source) {
                        let _ = store.set(&mirror, value);
                    }
                }
            })
            .unwrap();

        store.set(&source, 7).unwrap();
        assert_eq!(store.get(&mirror).unwrap(), 7);
        assert_eq!(*order.lock(), vec!["source", "mirror"]);
    }

    #[test]
    fn hook_errors_are_aggregated() {
        let store = Store::new();
        let first = atom(0).with_on_mount(|_set| Err(AtomError::msg("first")));
        let second = atom(0).with_on_mount(|_set| Err(AtomError::msg("second")));
        let both = derived({
            let (first, second) = (first.clone(), second.clone());
            move |get| Ok(get.get(&first)? + get.get(&second)?)
        });

        let err = store.subscribe(&both, || {}).unwrap_err();
        match err {
            AtomError::Lifecycle(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn teardown_errors_surface_from_unsubscribe() {
        let store = Store::new();
        let count = atom(0).with_on_mount(|_set| {
            Ok(Some(Box::new(|| Err(AtomError::msg("leaked"))) as Teardown))
        });

        let sub = store.subscribe(&count, || {}).unwrap();
        let err = sub.unsubscribe().unwrap_err();
        assert_eq!(err.to_string(), "leaked");
    }

    #[test]
    fn mount_hooks_can_write_to_their_atom() {
        let store = Store::new();
        let count = atom(0).with_on_mount(|set| {
            set.set(5)?;
            Ok(None)
        });
        let (calls, listener) = counter();

        let _sub = store.subscribe(&count, listener).unwrap();
        assert_eq!(store.get(&count).unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn independent_branches_survive_a_failing_one() {
        let store = Store::new();
        let base = atom(0);
        let failing = derived({
            let base = base.clone();
            move |get| -> Result<i32, AtomError> {
                if get.get(&base)? > 0 {
                    Err(AtomError::msg("branch failed"))
                } else {
                    Ok(0)
                }
            }
        });
        let healthy = derived({
            let base = base.clone();
            move |get| Ok(get.get(&base)? * 2)
        });
        let (failing_calls, failing_listener) = counter();
        let (healthy_calls, healthy_listener) = counter();
        let _a = store.subscribe(&failing, failing_listener).unwrap();
        let _b = store.subscribe(&healthy, healthy_listener).unwrap();

        store.set(&base, 1).unwrap();

        assert!(store.get(&failing).is_err());
        assert_eq!(store.get(&healthy).unwrap(), 2);
        assert_eq!(failing_calls.load(Ordering::SeqCst), 1);
        assert_eq!(healthy_calls.load(Ordering::SeqCst), 1);
    }
}
