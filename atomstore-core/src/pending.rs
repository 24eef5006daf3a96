//! Async Value Coordinator
//!
//! An async atom's read returns a future. The store never stores that future
//! as the atom's value; it wraps it in a [`PendingHandle`] and records the
//! atom as pending until the future settles.
//!
//! # How Supersession Works
//!
//! Every async evaluation gets a generation number. When a dependency change
//! re-evaluates an atom whose previous evaluation is still outstanding:
//!
//! 1. The new handle replaces the old one on the record.
//! 2. The old handle is linked to its successor and its abort signal fires.
//! 3. If the old future completes anyway, its result carries a stale
//!    generation and is discarded ("last generation wins", not "last to
//!    finish wins").
//!
//! Consumers that were holding the old [`AsyncValue`] follow the successor
//! link when they await it, so they resolve with the newest result.
//!
//! # Driving
//!
//! The wrapped future is `Shared`, so any number of consumers can await it
//! and it runs at most once. With [`AsyncDriver::Ambient`] the store also
//! spawns it on the caller's tokio runtime, which lets listeners observe
//! settlement without anyone awaiting.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::{AbortHandle, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::atom::{AtomId, Value};
use crate::config::AsyncDriver;
use crate::error::AtomError;
use crate::store::Evaluation;

/// Result of an async evaluation, type-erased.
pub(crate) type Outcome = Result<Value, AtomError>;

/// Handle to one in-flight async evaluation.
#[derive(Clone)]
pub(crate) struct PendingHandle {
    inner: Arc<PendingInner>,
}

struct PendingInner {
    atom: AtomId,
    name: Arc<str>,
    generation: u64,
    abort: AbortHandle,
    shared: Shared<BoxFuture<'static, Outcome>>,
    successor: Mutex<Option<PendingHandle>>,
    eval: Arc<Evaluation>,
}

impl PendingHandle {
    pub(crate) fn new(
        atom: AtomId,
        name: Arc<str>,
        generation: u64,
        abort: AbortHandle,
        future: BoxFuture<'static, Outcome>,
        eval: Arc<Evaluation>,
    ) -> Self {
        Self {
            inner: Arc::new(PendingInner {
                atom,
                name,
                generation,
                abort,
                shared: future.shared(),
                successor: Mutex::new(None),
                eval,
            }),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// Replace this evaluation with `successor` and signal cancellation.
    pub(crate) fn supersede(&self, successor: PendingHandle) {
        debug!(
            atom = %self.inner.atom,
            generation = self.inner.generation,
            successor = successor.generation(),
            "superseding async evaluation"
        );
        *self.inner.successor.lock() = Some(successor);
        self.inner.eval.settle();
        self.inner.abort.abort();
    }

    /// Abort without a successor, used when the owning record goes away.
    pub(crate) fn cancel(&self) {
        self.inner.eval.settle();
        self.inner.abort.abort();
    }

    /// Spawn the settlement driver according to the store's policy.
    pub(crate) fn launch(&self, driver: AsyncDriver) {
        if driver == AsyncDriver::Manual {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(self.inner.shared.clone());
            }
            Err(_) => trace!(
                atom = %self.inner.atom,
                "no tokio runtime entered; async value settles when awaited"
            ),
        }
    }

    fn successor(&self) -> Option<PendingHandle> {
        self.inner.successor.lock().clone()
    }

    /// Await the newest result along the supersession chain.
    pub(crate) async fn resolve(self) -> Outcome {
        let mut handle = self;
        loop {
            let outcome = handle.inner.shared.clone().await;
            match outcome {
                Err(error) if error.is_superseded() => match handle.successor() {
                    Some(next) => handle = next,
                    None => return Err(error),
                },
                other => return other,
            }
        }
    }

    /// The newest settled result, without driving anything.
    pub(crate) fn peek(&self) -> Option<Outcome> {
        let mut handle = self.clone();
        loop {
            let outcome = handle.inner.shared.peek()?.clone();
            match outcome {
                Err(error) if error.is_superseded() => match handle.successor() {
                    Some(next) => handle = next,
                    None => return Some(Err(error)),
                },
                other => return Some(other),
            }
        }
    }

    fn same_as(&self, other: &PendingHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn name(&self) -> &str {
        &self.inner.name
    }
}

impl fmt::Debug for PendingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingHandle")
            .field("atom", &self.inner.atom)
            .field("generation", &self.inner.generation)
            .field("settled", &self.inner.shared.peek().is_some())
            .finish()
    }
}

/// Cooperative cancellation flag handed to atom reads.
///
/// An async read can poll [`is_aborted`](Self::is_aborted) to stop early
/// once a newer evaluation has replaced it.
#[derive(Clone, Default)]
pub struct AbortSignal {
    handle: Option<AbortHandle>,
}

impl AbortSignal {
    pub(crate) fn new(handle: AbortHandle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// A signal that never fires, for synchronous evaluations.
    pub(crate) fn inert() -> Self {
        Self { handle: None }
    }

    pub fn is_aborted(&self) -> bool {
        self.handle.as_ref().is_some_and(AbortHandle::is_aborted)
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// The value of an async atom as seen by readers.
///
/// Reading an async atom yields an `AsyncValue` whether or not it has
/// settled. Await it (it implements [`IntoFuture`]) to get the result, or
/// [`peek`](Self::peek) for a non-blocking look.
pub struct AsyncValue<U> {
    state: AsyncState,
    _marker: PhantomData<fn() -> U>,
}

#[derive(Clone)]
enum AsyncState {
    Ready { name: Arc<str>, outcome: Outcome },
    Pending(PendingHandle),
}

impl<U> AsyncValue<U>
where
    U: Clone + Send + Sync + 'static,
{
    pub(crate) fn settled(name: Arc<str>, outcome: Outcome) -> Self {
        Self {
            state: AsyncState::Ready { name, outcome },
            _marker: PhantomData,
        }
    }

    pub(crate) fn pending(handle: PendingHandle) -> Self {
        Self {
            state: AsyncState::Pending(handle),
            _marker: PhantomData,
        }
    }

    /// Whether the evaluation this value came from was still outstanding when
    /// it was read.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, AsyncState::Pending(_))
    }

    /// The settled result, if available, following supersession.
    pub fn peek(&self) -> Option<Result<U, AtomError>> {
        match &self.state {
            AsyncState::Ready { name, outcome } => Some(typed(name, outcome.clone())),
            AsyncState::Pending(handle) => {
                handle.peek().map(|outcome| typed(handle.name(), outcome))
            }
        }
    }
}

fn typed<U>(name: &str, outcome: Outcome) -> Result<U, AtomError>
where
    U: Clone + 'static,
{
    let value = outcome?;
    value
        .downcast_ref::<U>()
        .cloned()
        .ok_or_else(|| AtomError::TypeMismatch {
            atom: name.to_string(),
        })
}

impl<U> IntoFuture for AsyncValue<U>
where
    U: Clone + Send + Sync + 'static,
{
    type Output = Result<U, AtomError>;
    type IntoFuture = BoxFuture<'static, Result<U, AtomError>>;

    fn into_future(self) -> Self::IntoFuture {
        match self.state {
            AsyncState::Ready { name, outcome } => async move { typed(&name, outcome) }.boxed(),
            AsyncState::Pending(handle) => async move {
                let name: Arc<str> = Arc::clone(&handle.inner.name);
                let outcome = handle.resolve().await;
                typed(&name, outcome)
            }
            .boxed(),
        }
    }
}

impl<U> Clone for AsyncValue<U> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            _marker: PhantomData,
        }
    }
}

/// Identity comparison: two values are equal when they come from the same
/// evaluation, or are the very same settled value.
impl<U> PartialEq for AsyncValue<U> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.state, &other.state) {
            (AsyncState::Pending(a), AsyncState::Pending(b)) => a.same_as(b),
            (
                AsyncState::Ready { outcome: Ok(a), .. },
                AsyncState::Ready { outcome: Ok(b), .. },
            ) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<U> fmt::Debug for AsyncValue<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            AsyncState::Ready { outcome: Ok(_), .. } => f.write_str("AsyncValue::Fulfilled"),
            AsyncState::Ready { outcome: Err(error), .. } => {
                f.debug_tuple("AsyncValue::Rejected").field(error).finish()
            }
            AsyncState::Pending(handle) => {
                f.debug_tuple("AsyncValue::Pending").field(handle).finish()
            }
        }
    }
}

/// Wrap `future` so an abort surfaces as [`AtomError::Superseded`].
pub(crate) fn abortable(
    name: Arc<str>,
    future: BoxFuture<'static, Outcome>,
    registration: futures_util::future::AbortRegistration,
) -> impl Future<Output = Outcome> + Send + 'static {
    let future = futures_util::future::Abortable::new(future, registration);
    async move {
        match future.await {
            Ok(outcome) => outcome,
            Err(_aborted) => Err(AtomError::Superseded {
                atom: name.to_string(),
            }),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
