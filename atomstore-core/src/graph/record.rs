//! Node Records
//!
//! Per-store bookkeeping for atoms. A store keeps one [`AtomState`] for every
//! atom it has evaluated, and a [`Mounted`] record only for atoms that are
//! currently live.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};

use crate::atom::{AtomDef, AtomId, Read, Teardown, Value};
use crate::error::AtomError;
use crate::pending::PendingHandle;
use crate::store::{Listener, ListenerId, Subscription};

/// Monotonic per-record counter, bumped whenever the record's result changes.
pub(crate) type Revision = u64;

/// The last result of an atom.
#[derive(Clone, Default)]
pub(crate) enum Slot {
    /// Never evaluated.
    #[default]
    Uninit,
    Value(Value),
    Error(AtomError),
    /// An async evaluation is outstanding.
    Pending(PendingHandle),
}

impl Slot {
    pub(crate) fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub(crate) fn is_initialized(&self) -> bool {
        !matches!(self, Self::Uninit)
    }

    /// Whether replacing `self` with `next` leaves the observable result
    /// unchanged. Errors and pending results always count as changes.
    pub(crate) fn same_as(&self, next: &Slot, def: &AtomDef) -> bool {
        match (self, next) {
            (Self::Value(prev), Self::Value(next)) => {
                Arc::ptr_eq(prev, next) || (def.equals)(prev.as_ref(), next.as_ref())
            }
            _ => false,
        }
    }

    pub(crate) fn status(&self) -> &'static str {
        match self {
            Self::Uninit => "uninit",
            Self::Value(_) => "value",
            Self::Error(_) => "error",
            Self::Pending(_) => "pending",
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninit => f.write_str("Uninit"),
            Self::Value(_) => f.write_str("Value(..)"),
            Self::Error(error) => f.debug_tuple("Error").field(error).finish(),
            Self::Pending(handle) => f.debug_tuple("Pending").field(handle).finish(),
        }
    }
}

/// State record for one atom in one store.
#[derive(Debug)]
pub(crate) struct AtomState {
    /// The descriptor, held weakly so unreferenced atoms can be swept.
    pub(crate) def: Weak<AtomDef>,

    pub(crate) slot: Slot,

    /// Dependencies read by the last evaluation, in read order, with the
    /// revision each had when it was read.
    pub(crate) dependencies: IndexMap<AtomId, Revision>,

    /// Atoms with an in-flight async evaluation that read this atom.
    pub(crate) pending_dependents: IndexSet<AtomId>,

    pub(crate) revision: Revision,

    /// Whether the atom has produced a non-pending result at least once.
    pub(crate) settled_once: bool,

    /// Parent revision mirrored by a delegated record in a scoped store.
    pub(crate) upstream: Option<Revision>,
}

impl AtomState {
    pub(crate) fn new(def: &Arc<AtomDef>) -> Self {
        let (slot, settled_once) = match &def.read {
            Read::Primitive(init) => (Slot::Value(Arc::clone(init)), true),
            Read::Derived(_) | Read::Async(_) => (Slot::Uninit, false),
        };
        Self {
            def: Arc::downgrade(def),
            slot,
            dependencies: IndexMap::new(),
            pending_dependents: IndexSet::new(),
            revision: 0,
            settled_once,
            upstream: None,
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            slot: self.slot.clone(),
            revision: self.revision,
        }
    }

    /// Whether the outstanding evaluation, if any, is `generation`.
    pub(crate) fn is_pending_generation(&self, generation: u64) -> bool {
        matches!(&self.slot, Slot::Pending(handle) if handle.generation() == generation)
    }
}

/// Point-in-time copy of a record's result.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub(crate) slot: Slot,
    pub(crate) revision: Revision,
}

/// Record for a live atom.
pub(crate) struct Mounted {
    /// Strong handle: live atoms pin their descriptor.
    pub(crate) def: Arc<AtomDef>,
    pub(crate) listeners: IndexMap<ListenerId, Listener>,
    /// Dependencies mounted on behalf of this atom.
    pub(crate) dependencies: IndexSet<AtomId>,
    /// Live atoms that read this atom.
    pub(crate) dependents: IndexSet<AtomId>,
    pub(crate) teardown: Option<Teardown>,
    /// Subscription to the parent store for delegated atoms.
    pub(crate) upstream: Option<Subscription>,
}

impl Mounted {
    pub(crate) fn new(def: Arc<AtomDef>, dependencies: IndexSet<AtomId>) -> Self {
        Self {
            def,
            listeners: IndexMap::new(),
            dependencies,
            dependents: IndexSet::new(),
            teardown: None,
            upstream: None,
        }
    }
}

impl fmt::Debug for Mounted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mounted")
            .field("atom", &self.def.id)
            .field("listeners", &self.listeners.len())
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .field("has_teardown", &self.teardown.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
