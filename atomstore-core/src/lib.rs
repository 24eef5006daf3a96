//! Atomstore Core
//!
//! This crate provides a reactive atom store. It implements:
//!
//! - Atom descriptors (primitive, derived, async, writable)
//! - Pull-based memoized evaluation with dynamic dependency tracking
//! - Push-based invalidation with glitch-free, batched recomputation
//! - Mount lifecycle with `on_mount` hooks and teardowns
//! - Scoped child stores and devtools inspection
//!
//! Atoms hold no state. Every value, dependency edge and subscription lives
//! in a [`Store`], so one atom descriptor can be used with any number of
//! independent stores.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `atom`: Atom descriptors and constructors
//! - `store`: The store, its evaluator, invalidator, mount manager and batch
//!   coordinator
//! - `pending`: Async evaluations and the values readers see for them
//! - `graph`: Per-atom records and recompute ordering
//! - `utils`: Families, loadables, selectors and other utility atoms
//!
//! # Example
//!
//! ```rust,ignore
//! use atomstore_core::{atom, derived, Store};
//!
//! let store = Store::new();
//! let count = atom(0);
//! let doubled = derived({
//!     let count = count.clone();
//!     move |get| Ok(get.get(&count)? * 2)
//! });
//!
//! let _sub = store.subscribe(&doubled, || println!("doubled changed"))?;
//!
//! store.set(&count, 5)?;
//! // Listener runs once, prints "doubled changed"
//! assert_eq!(store.get(&doubled)?, 10);
//! ```

pub mod atom;
pub mod config;
pub mod error;
mod graph;
pub mod pending;
pub mod store;
pub mod utils;

pub use atom::{
    action, atom, atom_with_write, derived, derived_async, writable, AnyAtom, Atom, AtomId,
    AtomKind, Capabilities, PrimitiveAtom, Teardown, WritableAtom,
};
pub use config::{AsyncDriver, StoreConfig};
pub use error::{AtomError, ConfigError};
pub use pending::{AbortSignal, AsyncValue};
pub use store::{Getter, ListenerId, SetSelf, Setter, Store, StoreEvent, StoreId, Subscription};
