//! Synchronous view of an async atom with a stand-in while pending.

use crate::atom::{derived, Atom};
use crate::pending::AsyncValue;

/// Derive an atom that reads `source` as a plain value.
///
/// While `source` is pending the atom holds `fallback()`. Once it settles
/// the atom holds the result, and a failure is reported as the atom's
/// error.
pub fn unwrap<U, F>(source: &Atom<AsyncValue<U>>, fallback: F) -> Atom<U>
where
    U: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> U + Send + Sync + 'static,
{
    let source = source.clone();
    derived(move |get| match get.get(&source)?.peek() {
        None => Ok(fallback()),
        Some(Err(error)) if error.is_superseded() => Ok(fallback()),
        Some(outcome) => outcome,
    })
}
