//! Derived atoms that can be re-evaluated on demand.

use crate::atom::{atom, writable, WritableAtom};
use crate::error::AtomError;
use crate::store::Getter;

/// Create a derived atom that re-runs `read` whenever it is written with
/// `()`, even if nothing it depends on changed.
pub fn atom_with_refresh<T, F>(read: F) -> WritableAtom<T, (), ()>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&Getter) -> Result<T, AtomError> + Send + Sync + 'static,
{
    let epoch = atom(0u64).with_label("refresh");
    let tracked = epoch.clone();
    writable(
        move |get| {
            get.get(&tracked)?;
            read(get)
        },
        move |set, ()| {
            let current = set.get(&epoch)?;
            set.set(&epoch, current.wrapping_add(1))
        },
    )
}
