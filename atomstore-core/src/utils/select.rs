//! Derived slices of larger atoms.

use crate::atom::{derived, Atom};

/// Derive the part of `source` picked out by `selector`.
///
/// Dependents of the slice are only invalidated when the selected value
/// changes, not on every change of `source`.
pub fn select<T, U, F>(source: &Atom<T>, selector: F) -> Atom<U>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&T) -> U + Send + Sync + 'static,
{
    let source = source.clone();
    derived(move |get| get.get(&source).map(|value| selector(&value)))
}

/// Like [`select`], with a custom notion of "unchanged".
pub fn select_with<T, U, F, E>(source: &Atom<T>, selector: F, equals: E) -> Atom<U>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&T) -> U + Send + Sync + 'static,
    E: Fn(&U, &U) -> bool + Send + Sync + 'static,
{
    select(source, selector).with_equality(equals)
}
