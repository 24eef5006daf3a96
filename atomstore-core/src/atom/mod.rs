//! Atom Descriptors
//!
//! An atom is an immutable definition of a node in the computation graph.
//! It holds no state: reading or writing an atom always goes through a
//! [`Store`](crate::Store), which keeps one record per atom.
//!
//! # Kinds
//!
//! - **Primitive** atoms carry an initial value and a default write that
//!   replaces it.
//! - **Derived** atoms compute their value synchronously from other atoms.
//! - **Async** atoms produce a future; the store settles it and records the
//!   result (see [`pending`](crate::pending)).
//!
//! Any kind may carry a custom write function, and writable atoms may carry
//! an `on_mount` hook. Capabilities are explicit flags so callers can match on
//! them without inspecting closures.
//!
//! # Identity
//!
//! Every descriptor gets a process-unique [`AtomId`] when it is built. Clones
//! of an [`Atom`] share that id; the store keys everything by it.

mod descriptor;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;

use crate::error::AtomError;
use crate::graph::Slot;
use crate::store::{Getter, SelfWriter, Setter};

pub use descriptor::{
    action, atom, atom_with_write, derived, derived_async, writable, AnyAtom, Atom,
    PrimitiveAtom, WritableAtom,
};

/// Type-erased atom value as stored in records.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Teardown returned by an `on_mount` hook, run when the atom unmounts.
pub type Teardown = Box<dyn FnOnce() -> Result<(), AtomError> + Send>;

pub(crate) type ReadFn = Arc<dyn Fn(&Getter) -> Result<Value, AtomError> + Send + Sync>;
pub(crate) type AsyncReadFn =
    Arc<dyn Fn(Getter) -> BoxFuture<'static, Result<Value, AtomError>> + Send + Sync>;
pub(crate) type WriteFn = Arc<
    dyn Fn(&Setter, Box<dyn Any + Send>) -> Result<Box<dyn Any + Send>, AtomError> + Send + Sync,
>;
pub(crate) type OnMountFn =
    Arc<dyn Fn(SelfWriter) -> Result<Option<Teardown>, AtomError> + Send + Sync>;
pub(crate) type EqFn =
    Arc<dyn Fn(&(dyn Any + Send + Sync), &(dyn Any + Send + Sync)) -> bool + Send + Sync>;
pub(crate) type PresentFn = fn(&AtomDef, &Slot) -> Result<Value, AtomError>;
pub(crate) type CoerceFn = fn(&AtomDef, Box<dyn Any + Send>) -> Result<Value, AtomError>;

/// Unique identifier for an atom descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AtomId(u64);

impl AtomId {
    /// Generate a new unique atom ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "atom{}", self.0)
    }
}

/// How an atom produces its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomKind {
    Primitive,
    Derived,
    Async,
}

/// What a store may do with an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub readable: bool,
    pub writable: bool,
    pub mountable: bool,
}

pub(crate) enum Read {
    Primitive(Value),
    Derived(ReadFn),
    Async(AsyncReadFn),
}

impl Clone for Read {
    fn clone(&self) -> Self {
        match self {
            Self::Primitive(init) => Self::Primitive(Arc::clone(init)),
            Self::Derived(read) => Self::Derived(Arc::clone(read)),
            Self::Async(read) => Self::Async(Arc::clone(read)),
        }
    }
}

/// The type-erased descriptor behind every typed atom handle.
#[derive(Clone)]
pub(crate) struct AtomDef {
    pub(crate) id: AtomId,
    pub(crate) label: Option<Arc<str>>,
    pub(crate) read: Read,
    pub(crate) write: Option<WriteFn>,
    pub(crate) on_mount: Option<OnMountFn>,
    pub(crate) equals: EqFn,
    pub(crate) present: PresentFn,
    pub(crate) coerce: Option<CoerceFn>,
}

impl AtomDef {
    pub(crate) fn kind(&self) -> AtomKind {
        match self.read {
            Read::Primitive(_) => AtomKind::Primitive,
            Read::Derived(_) => AtomKind::Derived,
            Read::Async(_) => AtomKind::Async,
        }
    }

    pub(crate) fn capabilities(&self) -> Capabilities {
        Capabilities {
            readable: true,
            writable: self.write.is_some(),
            mountable: self.on_mount.is_some(),
        }
    }

    pub(crate) fn is_primitive(&self) -> bool {
        matches!(self.read, Read::Primitive(_))
    }

    /// Display name: `atomN` or `atomN:label`.
    pub(crate) fn name(&self) -> String {
        match &self.label {
            Some(label) => format!("{}:{}", self.id, label),
            None => self.id.to_string(),
        }
    }

    /// Copy of this descriptor under a fresh identity.
    pub(crate) fn rebuilt(&self) -> Self {
        Self {
            id: AtomId::next(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for AtomDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomDef")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("kind", &self.kind())
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// Clone a typed value out of an erased one.
pub(crate) fn downcast_value<T>(def: &AtomDef, value: &Value) -> Result<T, AtomError>
where
    T: Clone + 'static,
{
    value
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| AtomError::TypeMismatch { atom: def.name() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atom_ids_are_unique() {
        let id1 = AtomId::next();
        let id2 = AtomId::next();
        let id3 = AtomId::next();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn atom_ids_display_with_prefix() {
        let id = AtomId::next();
        assert_eq!(id.to_string(), format!("atom{}", id.raw()));
    }
}
