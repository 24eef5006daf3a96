//! Atom Store
//!
//! A [`Store`] owns the records of one isolated universe of atoms. Atoms are
//! plain descriptors; every value, dependency edge and subscription lives
//! here.
//!
//! # How It Works
//!
//! 1. `get` pulls: the evaluator returns a cached result when every recorded
//!    dependency still has the revision it had when read, and re-runs the
//!    atom's read function otherwise, recording a fresh dependency map.
//!
//! 2. `set` pushes: the written primitive's revision is bumped and every
//!    live (or async-pending) dependent is marked invalidated. Nothing is
//!    recomputed yet.
//!
//! 3. When the outermost write returns, invalidated atoms are recomputed in
//!    topological order, then listeners of changed atoms are notified once
//!    each, then mount and unmount hooks run. Writes made by listeners or
//!    hooks are folded into the same flush loop.
//!
//! # Locking
//!
//! Internal state sits behind one `parking_lot` mutex. The lock is never
//! held while user code runs (read and write functions, listeners, hooks),
//! so all of those may freely call back into the store.
//!
//! Transactions (writes, subscription changes, async settlement) also hold a
//! reentrant gate for their whole duration, so concurrent writers from
//! different threads are applied one transaction at a time. Reads do not
//! take the gate.
//!
//! # Example
//!
//! ```rust,ignore
//! use atomstore_core::{atom, derived, Store};
//!
//! let store = Store::new();
//! let count = atom(1);
//! let doubled = derived({
//!     let count = count.clone();
//!     move |get| Ok(get.get(&count)? * 2)
//! });
//!
//! let _sub = store.subscribe(&doubled, || println!("doubled changed"))?;
//! store.set(&count, 5)?;
//! assert_eq!(store.get(&doubled)?, 10);
//! ```

mod access;
mod context;
mod dev;
mod evaluate;
mod flush;
mod listener;
mod mount;
mod scope;
mod state;
mod write;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::debug;

use crate::atom::{downcast_value, AnyAtom, Atom, AtomDef, AtomId, WritableAtom};
use crate::config::StoreConfig;
use crate::error::{AtomError, ConfigError};

pub use access::{Getter, SetSelf, Setter};
pub use dev::StoreEvent;
#[cfg(feature = "devtools")]
pub use dev::{AtomSnapshot, DevSubscription, MountedSnapshot, Restore};
pub use listener::ListenerId;
pub use mount::Subscription;

pub(crate) use access::{Evaluation, SelfWriter};
pub(crate) use listener::Listener;

use state::StoreState;

/// Unique identifier for a store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(u64);

impl StoreId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A container for atom values.
///
/// Cloning a `Store` yields another handle to the same store.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    pub(crate) id: StoreId,
    pub(crate) config: StoreConfig,
    pub(crate) state: Mutex<StoreState>,
    /// Store that non-scoped primitive atoms delegate to.
    pub(crate) parent: Option<Store>,
    /// Atoms given independent records in a scoped store.
    pub(crate) scoped: IndexSet<AtomId>,
    /// Serializes transactions across threads. Shared by a store and every
    /// store derived from it, and reentrant so listeners and hooks can write.
    gate: Arc<ReentrantMutex<()>>,
    batch_depth: AtomicUsize,
    flushing: AtomicBool,
    write_depth: AtomicUsize,
    generations: AtomicU64,
    this: Weak<StoreInner>,
}

impl StoreInner {
    pub(crate) fn new(
        config: StoreConfig,
        parent: Option<Store>,
        scoped: IndexSet<AtomId>,
    ) -> Arc<Self> {
        let gate = parent
            .as_ref()
            .map(|parent| Arc::clone(&parent.inner.gate))
            .unwrap_or_else(|| Arc::new(ReentrantMutex::new(())));
        Arc::new_cyclic(|this| Self {
            id: StoreId::next(),
            gate,
            state: Mutex::new(StoreState::new(config.gc_threshold)),
            config,
            parent,
            scoped,
            batch_depth: AtomicUsize::new(0),
            flushing: AtomicBool::new(false),
            write_depth: AtomicUsize::new(0),
            generations: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    pub(crate) fn weak(&self) -> Weak<StoreInner> {
        self.this.clone()
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Read `def` and convert its result to the public value shape.
    pub(crate) fn read_value<T>(&self, def: &Arc<AtomDef>) -> Result<T, AtomError>
    where
        T: Clone + 'static,
    {
        let snapshot = self.read_atom_state(def)?;
        let value = (def.present)(def, &snapshot.slot)?;
        downcast_value(def, &value)
    }

    /// Sweep when the record count crosses the watermark. The watermark then
    /// grows with the live set so a store full of reachable atoms does not
    /// sweep on every call.
    pub(crate) fn maybe_collect(&self) {
        let due = {
            let state = self.state.lock();
            state.atoms.len() >= state.gc_watermark
        };
        if due {
            let removed = self.collect_garbage();
            let mut state = self.state.lock();
            state.gc_watermark = self.config.gc_threshold.max(state.atoms.len() * 2);
            debug!(removed, watermark = state.gc_watermark, "automatic sweep");
        }
    }

    pub(crate) fn collect_garbage(&self) -> usize {
        let removed = self.state.lock().sweep();
        let count = removed.len();
        if count > 0 {
            debug!(store = self.id.raw(), count, "swept records of dropped atoms");
        }
        drop(removed);
        count
    }
}

impl Store {
    /// Create a store with the default configuration.
    pub fn new() -> Self {
        Self {
            inner: StoreInner::new(StoreConfig::default(), None, IndexSet::new()),
        }
    }

    /// Create a store with a validated configuration.
    pub fn with_config(config: StoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: StoreInner::new(config, None, IndexSet::new()),
        })
    }

    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// The store this one delegates to, for scoped stores.
    pub fn parent(&self) -> Option<&Store> {
        self.inner.parent.as_ref()
    }

    /// Read an atom's current value.
    ///
    /// Returns the memoized error if the atom's read failed. For async atoms
    /// the value is an [`AsyncValue`](crate::AsyncValue), pending or settled.
    pub fn get<T>(&self, atom: &Atom<T>) -> Result<T, AtomError>
    where
        T: Clone + 'static,
    {
        let value = self.inner.read_value(&atom.def);
        self.inner.maybe_collect();
        value
    }

    /// Write to an atom and flush the resulting changes.
    pub fn set<T, A, R>(&self, atom: &WritableAtom<T, A, R>, args: A) -> Result<R, AtomError>
    where
        A: Send + 'static,
        R: 'static,
    {
        self.inner
            .transaction(|| self.inner.write_typed::<R>(&atom.def, Box::new(args)))
    }

    /// Read-modify-write an atom whose write argument is its value type.
    pub fn update<T, R, F>(&self, atom: &WritableAtom<T, T, R>, f: F) -> Result<R, AtomError>
    where
        T: Clone + Send + 'static,
        R: 'static,
        F: FnOnce(T) -> T,
    {
        self.inner.transaction(|| {
            let current = self.inner.read_value::<T>(&atom.def)?;
            self.inner.write_typed::<R>(&atom.def, Box::new(f(current)))
        })
    }

    /// Run several writes as one transaction: listeners fire once, after `f`
    /// returns.
    pub fn batch<R, F>(&self, f: F) -> Result<R, AtomError>
    where
        F: FnOnce(&Store) -> Result<R, AtomError>,
    {
        self.inner.transaction(|| f(self))
    }

    /// Listen for changes to `atom`, mounting it (and what it depends on)
    /// while the subscription lives.
    ///
    /// Dropping the returned [`Subscription`] unsubscribes.
    pub fn subscribe<T, F>(&self, atom: &Atom<T>, listener: F) -> Result<Subscription, AtomError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.subscribe_erased(&atom.def, Listener::new(listener))
    }

    /// Whether `atom` is currently live in this store.
    pub fn is_mounted(&self, atom: impl Into<AnyAtom>) -> bool {
        let atom = atom.into();
        self.inner.state.lock().mounted.contains_key(&atom.id())
    }

    /// Drop records of unmounted atoms whose descriptors no longer exist.
    /// Returns how many records were removed.
    pub fn collect_garbage(&self) -> usize {
        self.inner.collect_garbage()
    }

    /// Number of atom records currently held.
    pub fn record_count(&self) -> usize {
        self.inner.state.lock().atoms.len()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("records", &state.atoms.len())
            .field("mounted", &state.mounted.len())
            .field("scoped", &self.inner.parent.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
