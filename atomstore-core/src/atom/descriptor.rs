//! Typed atom handles and their constructors.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use futures_util::FutureExt;

use super::{
    AsyncReadFn, AtomDef, AtomId, AtomKind, Capabilities, EqFn, Read, ReadFn, Teardown, Value,
    WriteFn,
};
use crate::error::AtomError;
use crate::graph::Slot;
use crate::pending::AsyncValue;
use crate::store::{Getter, SelfWriter, SetSelf, Setter};

/// A readable atom producing values of type `T`.
///
/// Cloning an `Atom` is cheap and preserves identity.
pub struct Atom<T> {
    pub(crate) def: Arc<AtomDef>,
    _marker: PhantomData<fn() -> T>,
}

/// An atom that also accepts writes of `A`, returning `R`.
///
/// Dereferences to [`Atom<T>`], so it can be passed anywhere a readable atom
/// is expected.
pub struct WritableAtom<T, A, R = ()> {
    atom: Atom<T>,
    _marker: PhantomData<fn(A) -> R>,
}

/// A primitive atom: its write argument is the new value.
pub type PrimitiveAtom<T> = WritableAtom<T, T, ()>;

/// A type-erased atom handle, used where atoms of different types mix
/// (scoping, devtools, families).
#[derive(Clone)]
pub struct AnyAtom {
    pub(crate) def: Arc<AtomDef>,
}

impl<T> Atom<T> {
    pub(crate) fn from_def(def: AtomDef) -> Self {
        Self {
            def: Arc::new(def),
            _marker: PhantomData,
        }
    }

    /// The atom's identity.
    pub fn id(&self) -> AtomId {
        self.def.id
    }

    /// The debug label, if one was set.
    pub fn label(&self) -> Option<&str> {
        self.def.label.as_deref()
    }

    pub fn kind(&self) -> AtomKind {
        self.def.kind()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.def.capabilities()
    }

    /// Erase the value type.
    pub fn erase(&self) -> AnyAtom {
        AnyAtom {
            def: Arc::clone(&self.def),
        }
    }

    /// Number of live handles sharing this descriptor.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.def)
    }

    /// Return a new descriptor with a debug label.
    ///
    /// The result is a distinct atom; build labels before handing the atom
    /// to other atoms.
    pub fn with_label(self, label: impl Into<String>) -> Self {
        let mut def = self.def.rebuilt();
        def.label = Some(Arc::from(label.into()));
        Self::from_def(def)
    }
}

impl<T> Atom<T>
where
    T: Send + Sync + 'static,
{
    /// Return a new descriptor that treats values as unchanged whenever
    /// `equals` holds, so dependents are not invalidated.
    pub fn with_equality<E>(self, equals: E) -> Self
    where
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let mut def = self.def.rebuilt();
        def.equals = Arc::new(move |a, b| match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => equals(a, b),
            _ => false,
        });
        Self::from_def(def)
    }
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Atom<T> {
    fn eq(&self, other: &Self) -> bool {
        self.def.id == other.def.id
    }
}

impl<T> Eq for Atom<T> {}

impl<T> Hash for Atom<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.def.id.hash(state);
    }
}

impl<T> fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.def.id)
            .field("label", &self.def.label)
            .field("kind", &self.def.kind())
            .finish()
    }
}

impl<T> fmt::Display for Atom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.def.name())
    }
}

impl<T, A, R> WritableAtom<T, A, R> {
    pub(crate) fn from_def(def: AtomDef) -> Self {
        Self {
            atom: Atom::from_def(def),
            _marker: PhantomData,
        }
    }

    /// Return a new descriptor with a debug label.
    pub fn with_label(self, label: impl Into<String>) -> Self {
        let mut def = self.atom.def.rebuilt();
        def.label = Some(Arc::from(label.into()));
        Self::from_def(def)
    }

    /// The readable side of this atom.
    pub fn as_atom(&self) -> &Atom<T> {
        &self.atom
    }
}

impl<T, A, R> WritableAtom<T, A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Return a new descriptor with a mount hook.
    ///
    /// The hook runs when the atom gains its first subscriber or live
    /// dependent; the teardown it returns runs when the atom unmounts.
    pub fn with_on_mount<M>(self, on_mount: M) -> Self
    where
        M: Fn(SetSelf<A, R>) -> Result<Option<Teardown>, AtomError> + Send + Sync + 'static,
    {
        let mut def = self.atom.def.rebuilt();
        def.on_mount = Some(Arc::new(move |writer: SelfWriter| {
            on_mount(SetSelf::new(writer))
        }));
        Self::from_def(def)
    }
}

impl<T, A, R> Deref for WritableAtom<T, A, R> {
    type Target = Atom<T>;

    fn deref(&self) -> &Atom<T> {
        &self.atom
    }
}

impl<T, A, R> Clone for WritableAtom<T, A, R> {
    fn clone(&self) -> Self {
        Self {
            atom: self.atom.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, A, R> fmt::Debug for WritableAtom<T, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritableAtom")
            .field("id", &self.atom.def.id)
            .field("label", &self.atom.def.label)
            .field("kind", &self.atom.def.kind())
            .finish()
    }
}

impl AnyAtom {
    pub fn id(&self) -> AtomId {
        self.def.id
    }

    pub fn label(&self) -> Option<&str> {
        self.def.label.as_deref()
    }

    pub fn kind(&self) -> AtomKind {
        self.def.kind()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.def.capabilities()
    }
}

impl<T> From<&Atom<T>> for AnyAtom {
    fn from(atom: &Atom<T>) -> Self {
        atom.erase()
    }
}

impl<T> From<Atom<T>> for AnyAtom {
    fn from(atom: Atom<T>) -> Self {
        AnyAtom { def: atom.def }
    }
}

impl<T, A, R> From<&WritableAtom<T, A, R>> for AnyAtom {
    fn from(atom: &WritableAtom<T, A, R>) -> Self {
        atom.atom.erase()
    }
}

impl PartialEq for AnyAtom {
    fn eq(&self, other: &Self) -> bool {
        self.def.id == other.def.id
    }
}

impl Eq for AnyAtom {}

impl Hash for AnyAtom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.def.id.hash(state);
    }
}

impl fmt::Debug for AnyAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnyAtom").field(&self.def.name()).finish()
    }
}

// ----------------------------------------------------------------------------
// Constructors
// ----------------------------------------------------------------------------

/// Create a primitive atom holding `init` until written.
pub fn atom<T>(init: T) -> PrimitiveAtom<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    WritableAtom::from_def(primitive_def(init, own_value_write()))
}

/// Create a primitive atom whose writes go through `write`.
///
/// Inside `write`, [`Setter::set_own_value`] replaces the atom's value.
pub fn atom_with_write<T, A, R, W>(init: T, write: W) -> WritableAtom<T, A, R>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    R: Send + 'static,
    W: Fn(&Setter, A) -> Result<R, AtomError> + Send + Sync + 'static,
{
    WritableAtom::from_def(primitive_def(init, erase_write(write)))
}

/// Create a write-only atom. Reading it yields `()`.
pub fn action<A, R, W>(write: W) -> WritableAtom<(), A, R>
where
    A: Send + 'static,
    R: Send + 'static,
    W: Fn(&Setter, A) -> Result<R, AtomError> + Send + Sync + 'static,
{
    WritableAtom::from_def(primitive_def((), erase_write(write)))
}

/// Create a read-only atom computed from other atoms.
pub fn derived<T, F>(read: F) -> Atom<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&Getter) -> Result<T, AtomError> + Send + Sync + 'static,
{
    Atom::from_def(derived_def(erase_read(read), None, partial_eq::<T>()))
}

/// Create a derived atom with a custom write.
pub fn writable<T, A, R, F, W>(read: F, write: W) -> WritableAtom<T, A, R>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(&Getter) -> Result<T, AtomError> + Send + Sync + 'static,
    W: Fn(&Setter, A) -> Result<R, AtomError> + Send + Sync + 'static,
{
    WritableAtom::from_def(derived_def(
        erase_read(read),
        Some(erase_write(write)),
        partial_eq::<T>(),
    ))
}

/// Create an atom whose value is computed asynchronously.
///
/// The getter handed to `read` is owned so it can move into the future;
/// reads after an `.await` are still tracked until the future settles.
pub fn derived_async<U, F, Fut>(read: F) -> Atom<AsyncValue<U>>
where
    U: Clone + Send + Sync + 'static,
    F: Fn(Getter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<U, AtomError>> + Send + 'static,
{
    let read: AsyncReadFn = Arc::new(move |getter: Getter| {
        let fut = read(getter);
        async move { fut.await.map(|value| Arc::new(value) as Value) }.boxed()
    });
    Atom::from_def(AtomDef {
        id: AtomId::next(),
        label: None,
        read: Read::Async(read),
        write: None,
        on_mount: None,
        equals: Arc::new(|_, _| false),
        present: present_async::<U>,
        coerce: None,
    })
}

fn primitive_def<T>(init: T, write: WriteFn) -> AtomDef
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    AtomDef {
        id: AtomId::next(),
        label: None,
        read: Read::Primitive(Arc::new(init)),
        write: Some(write),
        on_mount: None,
        equals: partial_eq::<T>(),
        present: present_sync,
        coerce: Some(coerce_value::<T>),
    }
}

fn derived_def(read: ReadFn, write: Option<WriteFn>, equals: EqFn) -> AtomDef {
    AtomDef {
        id: AtomId::next(),
        label: None,
        read: Read::Derived(read),
        write,
        on_mount: None,
        equals,
        present: present_sync,
        coerce: None,
    }
}

fn erase_read<T, F>(read: F) -> ReadFn
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&Getter) -> Result<T, AtomError> + Send + Sync + 'static,
{
    Arc::new(move |getter: &Getter| read(getter).map(|value| Arc::new(value) as Value))
}

fn erase_write<A, R, W>(write: W) -> WriteFn
where
    A: Send + 'static,
    R: Send + 'static,
    W: Fn(&Setter, A) -> Result<R, AtomError> + Send + Sync + 'static,
{
    Arc::new(move |setter: &Setter, args: Box<dyn Any + Send>| {
        let args = args
            .downcast::<A>()
            .map_err(|_| AtomError::TypeMismatch {
                atom: setter.atom_name(),
            })?;
        write(setter, *args).map(|result| Box::new(result) as Box<dyn Any + Send>)
    })
}

fn own_value_write() -> WriteFn {
    Arc::new(|setter: &Setter, args: Box<dyn Any + Send>| {
        setter.set_own_erased(args)?;
        Ok(Box::new(()) as Box<dyn Any + Send>)
    })
}

fn partial_eq<T>() -> EqFn
where
    T: PartialEq + Send + Sync + 'static,
{
    Arc::new(|a, b| match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    })
}

fn present_sync(def: &AtomDef, slot: &Slot) -> Result<Value, AtomError> {
    match slot {
        Slot::Value(value) => Ok(Arc::clone(value)),
        Slot::Error(error) => Err(error.clone()),
        Slot::Pending(_) | Slot::Uninit => Err(AtomError::Uninitialized { atom: def.name() }),
    }
}

fn present_async<U>(def: &AtomDef, slot: &Slot) -> Result<Value, AtomError>
where
    U: Clone + Send + Sync + 'static,
{
    let value = match slot {
        Slot::Value(value) => {
            AsyncValue::<U>::settled(Arc::from(def.name()), Ok(Arc::clone(value)))
        }
        Slot::Error(error) => {
            AsyncValue::<U>::settled(Arc::from(def.name()), Err(error.clone()))
        }
        Slot::Pending(handle) => AsyncValue::<U>::pending(handle.clone()),
        Slot::Uninit => return Err(AtomError::Uninitialized { atom: def.name() }),
    };
    Ok(Arc::new(value))
}

fn coerce_value<T>(def: &AtomDef, value: Box<dyn Any + Send>) -> Result<Value, AtomError>
where
    T: Send + Sync + 'static,
{
    value
        .downcast::<T>()
        .map(|value| Arc::new(*value) as Value)
        .map_err(|_| AtomError::TypeMismatch { atom: def.name() })
}
