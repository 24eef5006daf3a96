//! Developer introspection.
//!
//! Inspectors enumerate mounted atoms, read raw records, restore values and
//! watch store events. None of this is needed to use a store; the public
//! methods are compiled only with the `devtools` feature.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::atom::AtomId;

/// Something that happened inside a store, delivered to devtools listeners
/// at the end of each flush round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "atom", rename_all = "snake_case")]
pub enum StoreEvent {
    Changed(AtomId),
    Mounted(AtomId),
    Unmounted(AtomId),
    Flushed,
}

type DevListener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// Event buffer and devtools listeners. Events are buffered only while at
/// least one listener exists.
#[derive(Default)]
pub(crate) struct DevHub {
    listeners: IndexMap<u64, DevListener>,
    events: Vec<StoreEvent>,
    next_id: u64,
}

impl DevHub {
    pub(crate) fn record(&mut self, event: StoreEvent) {
        if !self.listeners.is_empty() {
            self.events.push(event);
        }
    }

    /// Take buffered events along with the listeners to deliver them to.
    pub(crate) fn drain(&mut self) -> (Vec<StoreEvent>, Vec<DevListener>) {
        if self.events.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let events = std::mem::take(&mut self.events);
        (events, self.listeners.values().cloned().collect())
    }

    #[cfg_attr(not(feature = "devtools"), allow(dead_code))]
    pub(crate) fn add(&mut self, listener: DevListener) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.insert(id, listener);
        id
    }

    #[cfg_attr(not(feature = "devtools"), allow(dead_code))]
    pub(crate) fn remove(&mut self, id: u64) {
        self.listeners.shift_remove(&id);
        if self.listeners.is_empty() {
            self.events.clear();
        }
    }
}

pub(crate) fn dispatch(events: Vec<StoreEvent>, listeners: Vec<DevListener>) {
    for event in &events {
        for listener in &listeners {
            listener(event);
        }
    }
}

#[cfg(feature = "devtools")]
pub use inspect::{AtomSnapshot, DevSubscription, MountedSnapshot, Restore};

#[cfg(feature = "devtools")]
mod inspect {
    use std::any::Any;
    use std::sync::{Arc, Weak};

    use serde::Serialize;
    use tracing::debug;

    use super::StoreEvent;
    use crate::atom::{AnyAtom, AtomDef, AtomId, AtomKind, WritableAtom};
    use crate::error::AtomError;
    use crate::graph::Revision;
    use crate::store::{Store, StoreInner};

    /// Serializable view of an atom's record.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct AtomSnapshot {
        pub atom: AtomId,
        pub label: Option<String>,
        pub kind: AtomKind,
        pub revision: Revision,
        /// One of `uninit`, `value`, `error`, `pending`.
        pub status: &'static str,
        pub error: Option<String>,
        pub dependencies: Vec<(AtomId, Revision)>,
        pub pending_dependents: Vec<AtomId>,
    }

    /// Serializable view of a mounted atom.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct MountedSnapshot {
        pub atom: AtomId,
        pub listeners: usize,
        pub dependencies: Vec<AtomId>,
        pub dependents: Vec<AtomId>,
        pub has_teardown: bool,
    }

    /// One atom/value pair for [`Store::dev_restore`].
    pub struct Restore {
        def: Arc<AtomDef>,
        value: Box<dyn Any + Send>,
    }

    impl Restore {
        pub fn new<T, A, R>(atom: &WritableAtom<T, A, R>, value: T) -> Self
        where
            T: Send + 'static,
        {
            Self {
                def: Arc::clone(&atom.def),
                value: Box::new(value),
            }
        }
    }

    /// Removes a devtools listener when dropped.
    pub struct DevSubscription {
        store: Weak<StoreInner>,
        id: u64,
    }

    impl Drop for DevSubscription {
        fn drop(&mut self) {
            if let Some(store) = self.store.upgrade() {
                store.state.lock().dev.remove(self.id);
            }
        }
    }

    impl Store {
        /// Atoms currently mounted in this store.
        pub fn dev_mounted_atoms(&self) -> Vec<AnyAtom> {
            let state = self.inner.state.lock();
            state
                .mounted
                .values()
                .map(|mounted| AnyAtom {
                    def: Arc::clone(&mounted.def),
                })
                .collect()
        }

        /// The raw record for `atom`, if the store has one.
        pub fn dev_atom_state(&self, atom: impl Into<AnyAtom>) -> Option<AtomSnapshot> {
            let atom = atom.into();
            let state = self.inner.state.lock();
            let record = state.atoms.get(&atom.id())?;
            Some(AtomSnapshot {
                atom: atom.id(),
                label: atom.label().map(str::to_string),
                kind: atom.kind(),
                revision: record.revision,
                status: record.slot.status(),
                error: match &record.slot {
                    crate::graph::Slot::Error(error) => Some(error.to_string()),
                    _ => None,
                },
                dependencies: record
                    .dependencies
                    .iter()
                    .map(|(id, revision)| (*id, *revision))
                    .collect(),
                pending_dependents: record.pending_dependents.iter().copied().collect(),
            })
        }

        /// The mounted record for `atom`, if it is live.
        pub fn dev_mounted(&self, atom: impl Into<AnyAtom>) -> Option<MountedSnapshot> {
            let atom = atom.into();
            let state = self.inner.state.lock();
            let mounted = state.mounted.get(&atom.id())?;
            Some(MountedSnapshot {
                atom: atom.id(),
                listeners: mounted.listeners.len(),
                dependencies: mounted.dependencies.iter().copied().collect(),
                dependents: mounted.dependents.iter().copied().collect(),
                has_teardown: mounted.teardown.is_some(),
            })
        }

        /// Force primitive atoms to the given values in one transaction,
        /// propagating to dependents as a write would.
        pub fn dev_restore(
            &self,
            entries: impl IntoIterator<Item = Restore>,
        ) -> Result<(), AtomError> {
            let entries: Vec<Restore> = entries.into_iter().collect();
            debug!(count = entries.len(), "restoring atoms");
            self.inner.transaction(|| {
                for Restore { def, value } in entries {
                    if !def.is_primitive() {
                        return Err(AtomError::NotWritable { atom: def.name() });
                    }
                    let coerce = def
                        .coerce
                        .ok_or_else(|| AtomError::NotWritable { atom: def.name() })?;
                    let value = coerce(&def, value)?;
                    self.inner.set_primitive(&def, value)?;
                }
                Ok(())
            })
        }

        /// Watch store events. The listener stays registered until the
        /// returned guard is dropped.
        pub fn dev_subscribe_state<F>(&self, listener: F) -> DevSubscription
        where
            F: Fn(&StoreEvent) + Send + Sync + 'static,
        {
            let id = self.inner.state.lock().dev.add(Arc::new(listener));
            DevSubscription {
                store: Arc::downgrade(&self.inner),
                id,
            }
        }
    }
}
