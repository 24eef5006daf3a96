//! Invalidator: the push-based write path.
//!
//! Writes run an atom's write function with a [`Setter`]. Setting a
//! primitive updates its record immediately (later reads in the same write
//! see it) and marks every live or pending dependent invalidated. Nothing is
//! recomputed or notified here; that happens when the outermost transaction
//! ends (see `flush.rs`).

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::{Setter, StoreInner};
use crate::atom::{AtomDef, Value};
use crate::error::AtomError;
use crate::graph::Slot;

/// Bounds write re-entrancy for one store.
struct DepthGuard<'a> {
    depth: &'a AtomicUsize,
}

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a AtomicUsize, limit: usize, def: &AtomDef) -> Result<Self, AtomError> {
        let current = depth.fetch_add(1, Ordering::AcqRel) + 1;
        if current > limit {
            depth.fetch_sub(1, Ordering::AcqRel);
            return Err(AtomError::WriteDepthExceeded {
                atom: def.name(),
                limit,
            });
        }
        Ok(Self { depth })
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }
}

impl StoreInner {
    /// Run `def`'s write function with type-erased arguments.
    pub(crate) fn write_erased(
        &self,
        def: &Arc<AtomDef>,
        args: Box<dyn Any + Send>,
    ) -> Result<Box<dyn Any + Send>, AtomError> {
        let _depth = DepthGuard::enter(&self.write_depth, self.config.max_write_depth, def)?;
        let write = def
            .write
            .clone()
            .ok_or_else(|| AtomError::NotWritable { atom: def.name() })?;
        trace!(atom = %def.name(), "writing");

        let setter = Setter::new(self.weak(), Arc::clone(def));
        let result = write(&setter, args);
        setter.finish();
        result
    }

    /// Like [`write_erased`](Self::write_erased), downcasting the result.
    pub(crate) fn write_typed<R: 'static>(
        &self,
        def: &Arc<AtomDef>,
        args: Box<dyn Any + Send>,
    ) -> Result<R, AtomError> {
        self.write_erased(def, args)?
            .downcast::<R>()
            .map(|result| *result)
            .map_err(|_| AtomError::TypeMismatch { atom: def.name() })
    }

    /// Replace a primitive atom's value and invalidate its dependents.
    pub(crate) fn set_primitive(&self, def: &Arc<AtomDef>, value: Value) -> Result<(), AtomError> {
        if self.is_delegated(def) {
            return self.write_through(def, value);
        }

        let previous = {
            let mut state = self.state.lock();
            let record = state.ensure(def);
            let unchanged = match &record.slot {
                Slot::Value(current) => (def.equals)(current.as_ref(), value.as_ref()),
                _ => false,
            };
            if unchanged {
                return Ok(());
            }
            let previous = std::mem::replace(&mut record.slot, Slot::Value(value));
            record.revision += 1;
            record.settled_once = true;
            trace!(atom = %def.name(), revision = record.revision, "primitive set");

            state.mark_changed(def.id);
            state.invalidate_dependents(def.id);
            previous
        };
        drop(previous);
        Ok(())
    }
}
