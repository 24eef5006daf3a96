//! Non-suspending view of an async atom.

use crate::atom::{derived, Atom};
use crate::error::AtomError;
use crate::pending::AsyncValue;

/// State of an async value at the time it was read.
#[derive(Debug, Clone)]
pub enum Loadable<U> {
    Loading,
    HasError(AtomError),
    HasData(U),
}

impl<U> Loadable<U> {
    pub fn is_loading(&self) -> bool {
        matches!(self, Loadable::Loading)
    }

    pub fn data(&self) -> Option<&U> {
        match self {
            Loadable::HasData(data) => Some(data),
            _ => None,
        }
    }
}

/// Errors compare by message, since [`AtomError`] may wrap arbitrary
/// sources.
impl<U: PartialEq> PartialEq for Loadable<U> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Loadable::Loading, Loadable::Loading) => true,
            (Loadable::HasData(a), Loadable::HasData(b)) => a == b,
            (Loadable::HasError(a), Loadable::HasError(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

/// Derive an atom that reports `source` as [`Loadable`] instead of handing
/// out a future.
///
/// The derived atom updates when the source settles, so subscribers see
/// `Loading` followed by `HasData` or `HasError`.
pub fn loadable<U>(source: &Atom<AsyncValue<U>>) -> Atom<Loadable<U>>
where
    U: Clone + PartialEq + Send + Sync + 'static,
{
    let source = source.clone();
    derived(move |get| {
        let value = match get.get(&source) {
            Ok(value) => value,
            Err(error) => return Ok(Loadable::HasError(error)),
        };
        Ok(match value.peek() {
            None => Loadable::Loading,
            Some(Ok(data)) => Loadable::HasData(data),
            Some(Err(error)) if error.is_superseded() => Loadable::Loading,
            Some(Err(error)) => Loadable::HasError(error),
        })
    })
}
