//! Evaluation Context
//!
//! Tracks which atoms are being evaluated on the current thread, so that an
//! atom reading itself (directly or through other atoms) fails with
//! [`AtomError::CyclicDependency`](crate::AtomError::CyclicDependency)
//! instead of recursing forever.
//!
//! # Implementation
//!
//! A thread-local stack holds one entry per synchronous evaluation in
//! progress. Entries carry the store id as well as the atom id: two stores
//! may evaluate the same descriptor in a nested fashion (a scoped store
//! reading through its parent) without that being a cycle.
//!
//! Frames are RAII guards, so the stack stays balanced even if a read
//! function panics.

use std::cell::RefCell;

use super::StoreId;
use crate::atom::AtomId;

thread_local! {
    static EVALUATION_STACK: RefCell<Vec<(StoreId, AtomId)>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the evaluation entry when dropped.
pub(crate) struct EvaluationFrame {
    entry: (StoreId, AtomId),
}

impl EvaluationFrame {
    /// Push `atom` onto this thread's evaluation stack.
    pub(crate) fn enter(store: StoreId, atom: AtomId) -> Self {
        EVALUATION_STACK.with(|stack| stack.borrow_mut().push((store, atom)));
        Self {
            entry: (store, atom),
        }
    }

    /// Whether `atom` is already being evaluated by `store` on this thread.
    pub(crate) fn contains(store: StoreId, atom: AtomId) -> bool {
        EVALUATION_STACK.with(|stack| stack.borrow().contains(&(store, atom)))
    }

    #[cfg(test)]
    fn depth() -> usize {
        EVALUATION_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for EvaluationFrame {
    fn drop(&mut self) {
        EVALUATION_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(
                popped,
                Some(self.entry),
                "evaluation frames dropped out of order"
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_track_active_evaluations() {
        let store = StoreId::next();
        let atom = AtomId::next();

        assert!(!EvaluationFrame::contains(store, atom));
        {
            let _frame = EvaluationFrame::enter(store, atom);
            assert!(EvaluationFrame::contains(store, atom));
            assert_eq!(EvaluationFrame::depth(), 1);
        }
        assert!(!EvaluationFrame::contains(store, atom));
        assert_eq!(EvaluationFrame::depth(), 0);
    }

    #[test]
    fn nested_frames_unwind_in_order() {
        let store = StoreId::next();
        let outer = AtomId::next();
        let inner = AtomId::next();

        let _outer = EvaluationFrame::enter(store, outer);
        {
            let _inner = EvaluationFrame::enter(store, inner);
            assert!(EvaluationFrame::contains(store, outer));
            assert!(EvaluationFrame::contains(store, inner));
        }
        assert!(EvaluationFrame::contains(store, outer));
        assert!(!EvaluationFrame::contains(store, inner));
    }

    #[test]
    fn frames_are_scoped_per_store() {
        let parent = StoreId::next();
        let child = StoreId::next();
        let atom = AtomId::next();

        let _frame = EvaluationFrame::enter(child, atom);
        assert!(EvaluationFrame::contains(child, atom));
        assert!(!EvaluationFrame::contains(parent, atom));
    }
}
