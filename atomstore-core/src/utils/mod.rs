//! Utility atoms built on the public store API.
//!
//! Nothing in here reaches into store internals; these are ordinary atom
//! constructors and helpers.

mod default;
mod family;
mod loadable;
mod reducer;
mod refresh;
mod select;
mod unwrap;

pub use default::{atom_with_default, atom_with_reset, Update};
pub use family::{AtomFamily, FamilyMember};
pub use loadable::{loadable, Loadable};
pub use reducer::atom_with_reducer;
pub use refresh::atom_with_refresh;
pub use select::{select, select_with};
pub use unwrap::unwrap;
