//! Atoms updated by dispatching actions.

use crate::atom::{atom_with_write, WritableAtom};

/// Create a primitive atom written by dispatching actions through `reducer`.
pub fn atom_with_reducer<T, Act, F>(init: T, reducer: F) -> WritableAtom<T, Act, ()>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    Act: Send + 'static,
    F: Fn(&T, Act) -> T + Send + Sync + 'static,
{
    atom_with_write(init, move |set, action: Act| {
        let current = set.own_value::<T>()?;
        set.set_own_value(reducer(&current, action))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    enum Counter {
        Inc,
        Add(i32),
        Reset,
    }

    #[test]
    fn actions_fold_into_the_value() {
        let store = Store::new();
        let count = atom_with_reducer(0, |value: &i32, action: Counter| match action {
            Counter::Inc => value + 1,
            Counter::Add(n) => value + n,
            Counter::Reset => 0,
        });

        store.set(&count, Counter::Inc).unwrap();
        store.set(&count, Counter::Add(5)).unwrap();
        assert_eq!(store.get(&count).unwrap(), 6);

        store.set(&count, Counter::Reset).unwrap();
        assert_eq!(store.get(&count).unwrap(), 0);
    }
}
