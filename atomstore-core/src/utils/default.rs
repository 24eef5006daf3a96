//! Resettable atoms.
//!
//! Both constructors take [`Update`] as their write argument: `Set` stores a
//! value, `Reset` goes back to the default.

use crate::atom::{atom, atom_with_write, writable, WritableAtom};
use crate::error::AtomError;
use crate::store::Getter;

/// Write argument of resettable atoms.
#[derive(Debug, Clone, PartialEq)]
pub enum Update<T> {
    Set(T),
    Reset,
}

/// Create a primitive atom that can be reset to `init`.
pub fn atom_with_reset<T>(init: T) -> WritableAtom<T, Update<T>, ()>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    let initial = init.clone();
    atom_with_write(init, move |set, update: Update<T>| match update {
        Update::Set(value) => set.set_own_value(value),
        Update::Reset => set.set_own_value(initial.clone()),
    })
}

/// Create an atom whose value is derived by `default` until it is set.
///
/// Once set, the atom holds that value and stops tracking whatever `default`
/// read. Resetting returns it to the derived value.
pub fn atom_with_default<T, F>(default: F) -> WritableAtom<T, Update<T>, ()>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&Getter) -> Result<T, AtomError> + Send + Sync + 'static,
{
    let overwritten = atom(None::<T>).with_label("overwritten");
    let read = {
        let overwritten = overwritten.clone();
        move |get: &Getter| match get.get(&overwritten)? {
            Some(value) => Ok(value),
            None => default(get),
        }
    };
    writable(read, move |set, update: Update<T>| match update {
        Update::Set(value) => set.set(&overwritten, Some(value)),
        Update::Reset => set.set(&overwritten, None),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn reset_restores_the_initial_value() {
        let store = Store::new();
        let name = atom_with_reset(String::from("guest"));

        store.set(&name, Update::Set("ada".into())).unwrap();
        assert_eq!(store.get(&name).unwrap(), "ada");
        store.set(&name, Update::Reset).unwrap();
        assert_eq!(store.get(&name).unwrap(), "guest");
    }

    #[test]
    fn defaults_track_until_overwritten() {
        let store = Store::new();
        let base = atom(2);
        let doubled = atom_with_default({
            let base = base.clone();
            move |get| Ok(get.get(&base)? * 2)
        });

        assert_eq!(store.get(&doubled).unwrap(), 4);
        store.set(&base, 3).unwrap();
        assert_eq!(store.get(&doubled).unwrap(), 6);

        store.set(&doubled, Update::Set(100)).unwrap();
        store.set(&base, 4).unwrap();
        assert_eq!(store.get(&doubled).unwrap(), 100);

        store.set(&doubled, Update::Reset).unwrap();
        assert_eq!(store.get(&doubled).unwrap(), 8);
    }
}
