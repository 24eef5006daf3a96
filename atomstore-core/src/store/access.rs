//! Access objects handed to user code.
//!
//! - [`Getter`] is given to read functions. Every read through it records a
//!   dependency of the atom being evaluated.
//! - [`Setter`] is given to write functions. Its reads are untracked; its
//!   writes recurse into the target atom's write function.
//! - [`SetSelf`] is given to mount hooks and writes to the mounted atom.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::StoreInner;
use crate::atom::{downcast_value, Atom, AtomDef, AtomId, WritableAtom};
use crate::error::AtomError;
use crate::graph::Revision;
use crate::pending::AbortSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// The read function is running synchronously.
    Collecting,
    /// The read function returned a future that has not settled yet.
    Detached,
    /// Finished or superseded; the getter is dead.
    Settled,
}

/// One invocation of an atom's read function.
pub(crate) struct Evaluation {
    store: Weak<StoreInner>,
    atom: Arc<AtomDef>,
    generation: u64,
    phase: Mutex<Phase>,
    collected: Mutex<IndexMap<AtomId, Revision>>,
    signal: AbortSignal,
}

impl Evaluation {
    pub(crate) fn new(
        store: Weak<StoreInner>,
        atom: Arc<AtomDef>,
        generation: u64,
        signal: AbortSignal,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            atom,
            generation,
            phase: Mutex::new(Phase::Collecting),
            collected: Mutex::new(IndexMap::new()),
            signal,
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// End the synchronous part, returning the dependencies read so far.
    /// Later reads are written straight to the record.
    pub(crate) fn detach(&self) -> IndexMap<AtomId, Revision> {
        let mut phase = self.phase.lock();
        if *phase == Phase::Collecting {
            *phase = Phase::Detached;
        }
        std::mem::take(&mut *self.collected.lock())
    }

    /// Finish the evaluation, returning the dependencies it collected.
    pub(crate) fn settle(&self) -> IndexMap<AtomId, Revision> {
        *self.phase.lock() = Phase::Settled;
        std::mem::take(&mut *self.collected.lock())
    }

    fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    fn track(&self, store: &StoreInner, dependency: AtomId, revision: Revision) {
        match self.phase() {
            Phase::Collecting => {
                self.collected.lock().insert(dependency, revision);
            }
            Phase::Detached => store.track_detached(self, dependency, revision),
            Phase::Settled => {}
        }
    }

    pub(crate) fn atom(&self) -> &Arc<AtomDef> {
        &self.atom
    }
}

/// Reads atoms on behalf of an evaluating atom, recording each as a
/// dependency.
///
/// A getter is only valid while its evaluation is in progress. Async reads
/// own their getter and may keep using it across `.await` points until the
/// future settles; after that every call fails with
/// [`AtomError::StaleAccess`].
#[derive(Clone)]
pub struct Getter {
    eval: Arc<Evaluation>,
}

impl Getter {
    pub(crate) fn new(eval: Arc<Evaluation>) -> Self {
        Self { eval }
    }

    /// Read `atom` and record it as a dependency.
    pub fn get<T>(&self, atom: &Atom<T>) -> Result<T, AtomError>
    where
        T: Clone + 'static,
    {
        let eval = &self.eval;
        if eval.phase() == Phase::Settled {
            return Err(AtomError::StaleAccess {
                atom: eval.atom.name(),
            });
        }
        if atom.def.id == eval.atom.id {
            return Err(AtomError::CyclicDependency {
                atom: eval.atom.name(),
            });
        }
        let store = eval.store.upgrade().ok_or(AtomError::StoreDropped)?;

        let snapshot = store.read_atom_state(&atom.def)?;
        eval.track(&store, atom.def.id, snapshot.revision);

        let value = (atom.def.present)(&atom.def, &snapshot.slot)?;
        downcast_value(&atom.def, &value)
    }

    /// Cancellation signal for this evaluation. It fires when a newer
    /// evaluation of the same atom supersedes this one.
    pub fn signal(&self) -> AbortSignal {
        self.eval.signal.clone()
    }
}

impl fmt::Debug for Getter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Getter")
            .field("atom", &self.eval.atom.id)
            .field("generation", &self.eval.generation)
            .field("phase", &self.eval.phase())
            .finish()
    }
}

/// Reads and writes atoms on behalf of a write function.
///
/// A setter used after its write call returned (for example from a spawned
/// task) runs each write as its own top-level transaction.
#[derive(Clone)]
pub struct Setter {
    store: Weak<StoreInner>,
    atom: Arc<AtomDef>,
    done: Arc<AtomicBool>,
}

impl Setter {
    pub(crate) fn new(store: Weak<StoreInner>, atom: Arc<AtomDef>) -> Self {
        Self {
            store,
            atom,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn finish(&self) {
        self.done.store(true, Ordering::Release);
    }

    pub(crate) fn atom_name(&self) -> String {
        self.atom.name()
    }

    fn store(&self) -> Result<Arc<StoreInner>, AtomError> {
        self.store.upgrade().ok_or(AtomError::StoreDropped)
    }

    /// Run `f` directly inside the write call, or as a new transaction once
    /// the write call has returned.
    fn run<R>(&self, f: impl FnOnce(&StoreInner) -> Result<R, AtomError>) -> Result<R, AtomError> {
        let store = self.store()?;
        if self.done.load(Ordering::Acquire) {
            store.transaction(|| f(&store))
        } else {
            f(&store)
        }
    }

    /// Read an atom without recording a dependency. Reads observe every
    /// write made so far, even inside a transaction.
    pub fn get<T>(&self, atom: &Atom<T>) -> Result<T, AtomError>
    where
        T: Clone + 'static,
    {
        self.store()?.read_value(&atom.def)
    }

    /// Write to another atom through its write function.
    ///
    /// Writing to the atom that owns this setter sets its own value when it
    /// is primitive and fails with [`AtomError::NotWritable`] otherwise.
    pub fn set<T, A, R>(&self, atom: &WritableAtom<T, A, R>, args: A) -> Result<R, AtomError>
    where
        A: Send + 'static,
        R: 'static,
    {
        if atom.def.id == self.atom.id {
            self.set_own_erased(Box::new(args))?;
            let unit: Box<dyn Any + Send> = Box::new(());
            return unit.downcast::<R>().map(|r| *r).map_err(|_| AtomError::TypeMismatch {
                atom: self.atom.name(),
            });
        }
        self.run(|store| store.write_typed::<R>(&atom.def, Box::new(args)))
    }

    /// The written atom's own value. Only primitive atoms have one.
    pub fn own_value<T>(&self) -> Result<T, AtomError>
    where
        T: Clone + 'static,
    {
        if !self.atom.is_primitive() {
            return Err(AtomError::NotWritable {
                atom: self.atom.name(),
            });
        }
        self.store()?.read_value(&self.atom)
    }

    /// Replace the written atom's own value.
    pub fn set_own_value<T>(&self, value: T) -> Result<(), AtomError>
    where
        T: Send + 'static,
    {
        self.set_own_erased(Box::new(value))
    }

    pub(crate) fn set_own_erased(&self, value: Box<dyn Any + Send>) -> Result<(), AtomError> {
        let coerce = match (self.atom.is_primitive(), self.atom.coerce) {
            (true, Some(coerce)) => coerce,
            _ => {
                return Err(AtomError::NotWritable {
                    atom: self.atom.name(),
                })
            }
        };
        let value = coerce(&self.atom, value)?;
        self.run(|store| store.set_primitive(&self.atom, value))
    }
}

impl fmt::Debug for Setter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter")
            .field("atom", &self.atom.id)
            .field("done", &self.done.load(Ordering::Relaxed))
            .finish()
    }
}

/// Type-erased writer for a mounted atom.
#[derive(Clone)]
pub(crate) struct SelfWriter {
    store: Weak<StoreInner>,
    atom: Arc<AtomDef>,
}

impl SelfWriter {
    pub(crate) fn new(store: Weak<StoreInner>, atom: Arc<AtomDef>) -> Self {
        Self { store, atom }
    }

    fn write<R: 'static>(&self, args: Box<dyn Any + Send>) -> Result<R, AtomError> {
        let store = self.store.upgrade().ok_or(AtomError::StoreDropped)?;
        store.transaction(|| store.write_typed::<R>(&self.atom, args))
    }
}

/// Writes to the atom an `on_mount` hook was registered on.
///
/// Each call is its own transaction. Inside the hook the transaction joins
/// the flush already in progress.
pub struct SetSelf<A, R = ()> {
    writer: SelfWriter,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R> SetSelf<A, R>
where
    A: Send + 'static,
    R: 'static,
{
    pub(crate) fn new(writer: SelfWriter) -> Self {
        Self {
            writer,
            _marker: PhantomData,
        }
    }

    pub fn set(&self, args: A) -> Result<R, AtomError> {
        self.writer.write::<R>(Box::new(args))
    }
}

impl<A, R> Clone for SetSelf<A, R> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, R> fmt::Debug for SetSelf<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SetSelf").field(&self.writer.atom.id).finish()
    }
}
