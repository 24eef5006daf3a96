//! Dependency Graph
//!
//! The graph of atoms is never stored as a standalone structure. Edges live
//! on the per-atom records of a store:
//!
//! - every [`AtomState`] lists the atoms its last evaluation read, together
//!   with the revision each had at that moment;
//! - every live atom's [`Mounted`] record lists the live atoms that read it.
//!
//! Dependencies are discovered while evaluating, so the graph changes shape
//! between evaluations. A dependent is stale when any recorded dependency
//! revision differs from that dependency's current revision.
//!
//! # Design Decisions
//!
//! 1. Forward edges (dependencies) exist for every evaluated atom, so pull
//!    reads can validate caches without any subscriber present.
//!
//! 2. Reverse edges (dependents) exist only for live atoms. Unobserved atoms
//!    therefore cost nothing on the write path; they revalidate lazily.
//!
//! 3. After a write, invalidated atoms are recomputed in topological order
//!    (see [`topological_order`]) so the pass is glitch-free.

mod record;
mod scheduler;

pub(crate) use record::{AtomState, Mounted, Revision, Slot, Snapshot};
pub(crate) use scheduler::topological_order;
