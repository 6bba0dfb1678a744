//! One unit of in-flight work and its shared handle.
//!
//! An [`OperationHandle`] is returned from every submission and can be held
//! by any number of callers (coalesced submissions share one). The handle
//! exposes the lifecycle state, cooperative cancellation, and, once the
//! operation has finished, the terminal result in type-erased form.
//!
//! Cancellation is cooperative, not preemptive: [`OperationHandle::cancel`]
//! sets a flag and wakes any transport wait, but an executing work function
//! finishes through its own checkpoints. A transport response that arrives
//! after cancellation still reaches the work function, which checks the flag
//! before doing further processing.

use crate::error::QueueError;
use crate::state::{State, StateEvent, transition};
use std::any::{Any, type_name};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Lock a mutex, ignoring poisoning. Critical sections here only move plain
/// values, so a poisoned guard is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A success value with its concrete output type erased, tagged with the
/// type name it was produced as.
///
/// The tag is compared against the caller's expected output type at fan-out
/// time, before any downcast. Two structurally different requests coalesced
/// under one identifier surface as [`QueueError::IdentifierMismatch`] for
/// the caller whose expectation does not match.
#[derive(Clone)]
pub struct TaggedValue {
    kind: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl TaggedValue {
    /// Erase a concrete output value.
    pub(crate) fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            kind: type_name::<T>(),
            value: Arc::new(value),
        }
    }

    /// The type name the value was produced as.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    /// Recover the concrete value, or the actual kind on mismatch.
    ///
    /// # Errors
    ///
    /// Returns the stored kind tag when it differs from `T`.
    pub fn downcast<T: Clone + Send + Sync + 'static>(&self) -> Result<T, &'static str> {
        if self.kind != type_name::<T>() {
            return Err(self.kind);
        }
        self.value
            .downcast_ref::<T>()
            .map(Clone::clone)
            .ok_or(self.kind)
    }
}

impl fmt::Debug for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedValue").field("kind", &self.kind).finish()
    }
}

/// Terminal outcome of an operation with the success type erased.
pub type ErasedResult = Result<TaggedValue, QueueError>;

/// Composed completion handler stored for an in-flight operation.
pub(crate) type ErasedHandler = Box<dyn FnOnce(ErasedResult) + Send>;

/// Which finishing path is being taken; maps directly onto the lifecycle
/// table so a cooperative cancel can never force an executing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinishMode {
    /// Cancellation before start: legal only from `Ready`.
    Cancel,
    /// The work function set a result: legal only from `Executing`.
    Resolve,
}

impl FinishMode {
    pub(crate) const fn event(self) -> StateEvent {
        match self {
            Self::Cancel => StateEvent::Cancel,
            Self::Resolve => StateEvent::Resolve,
        }
    }
}

/// Drives the registry removal and fan-out for a finishing operation.
/// Installed by the queue; invoked at most once per operation.
pub(crate) type Finisher = Arc<dyn Fn(&OperationHandle, FinishMode, ErasedResult) + Send + Sync>;

/// Observes successful state transitions, `(from, to)`.
pub(crate) type Observer = Arc<dyn Fn(State, State) + Send + Sync>;

struct OperationInner {
    identifier: String,
    state: Mutex<State>,
    cancelled: AtomicBool,
    cancel_notify: Notify,
    handler: Mutex<Option<ErasedHandler>>,
    result: Mutex<Option<ErasedResult>>,
    finisher: Finisher,
    observer: Observer,
}

/// Shared handle to one operation.
///
/// Clones refer to the same underlying operation; coalesced submissions all
/// receive clones of one handle.
#[derive(Clone)]
pub struct OperationHandle {
    inner: Arc<OperationInner>,
}

impl OperationHandle {
    pub(crate) fn new(
        identifier: String,
        handler: ErasedHandler,
        finisher: Finisher,
        observer: Observer,
    ) -> Self {
        Self {
            inner: Arc::new(OperationInner {
                identifier,
                state: Mutex::new(State::Ready),
                cancelled: AtomicBool::new(false),
                cancel_notify: Notify::new(),
                handler: Mutex::new(Some(handler)),
                result: Mutex::new(None),
                finisher,
                observer,
            }),
        }
    }

    /// Identifier of the logical request this operation serves.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        *lock(&self.inner.state)
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Whether the operation is `Ready` or `Executing`.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self.state(), State::Ready | State::Executing)
    }

    /// The terminal result, once the operation has finished.
    #[must_use]
    pub fn result(&self) -> Option<ErasedResult> {
        lock(&self.inner.result).clone()
    }

    /// Request cancellation.
    ///
    /// A `Ready` operation finishes immediately with
    /// [`QueueError::Cancelled`] and vacates its registry entry before this
    /// call returns. An `Executing` operation is interrupted best-effort:
    /// the outstanding transport wait is woken, and the work function
    /// observes the flag at its checkpoints.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.cancel_notify.notify_waiters();
        tracing::debug!(identifier = %self.inner.identifier, "cancellation requested");
        (self.inner.finisher)(self, FinishMode::Cancel, Err(QueueError::Cancelled));
    }

    /// Two handles referring to the same operation.
    #[must_use]
    pub fn same_operation(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Move `Ready -> Executing`. Returns `false` when cancellation already
    /// claimed the operation or it has otherwise left `Ready`; the work
    /// function must not run in that case.
    pub(crate) fn start(&self) -> bool {
        let mut state = lock(&self.inner.state);
        if self.inner.cancelled.load(Ordering::Acquire) {
            // cancel() owns the Ready -> Finished transition and delivery.
            return false;
        }
        match transition(*state, StateEvent::Start) {
            Ok(next) => {
                let from = *state;
                *state = next;
                drop(state);
                (self.inner.observer)(from, next);
                true
            }
            Err(_) => false,
        }
    }

    /// Finish through the queue's registry protocol. The work function calls
    /// this with [`FinishMode::Resolve`] at its terminal points.
    pub(crate) fn finish(&self, mode: FinishMode, result: ErasedResult) {
        (self.inner.finisher)(self, mode, result);
    }

    /// Attempt the terminal transition and store the result. First caller
    /// wins; later attempts are no-ops. Must be invoked under the queue's
    /// registry coordination (or by the finisher fallback) so that entry
    /// removal stays atomic with the transition.
    pub(crate) fn try_finish(&self, mode: FinishMode, result: ErasedResult) -> bool {
        let mut state = lock(&self.inner.state);
        let Ok(next) = transition(*state, mode.event()) else {
            return false;
        };
        let from = *state;
        *state = next;
        drop(state);
        *lock(&self.inner.result) = Some(result);
        (self.inner.observer)(from, next);
        true
    }

    /// Take the composed completion handler for fan-out.
    pub(crate) fn take_handler(&self) -> Option<ErasedHandler> {
        lock(&self.inner.handler).take()
    }

    /// Replace the completion handler with a composition of the existing one
    /// and `next`, invoked in registration order. Called under the registry
    /// lock when a submission coalesces onto this operation.
    pub(crate) fn chain_handler(&self, next: ErasedHandler) {
        let mut slot = lock(&self.inner.handler);
        let composed: ErasedHandler = match slot.take() {
            Some(prev) => Box::new(move |result: ErasedResult| {
                prev(result.clone());
                next(result);
            }),
            None => {
                debug_assert!(false, "in-flight operation without a handler");
                next
            }
        };
        *slot = Some(composed);
    }

    /// Wait until cancellation is requested. Resolves immediately if the
    /// flag is already set.
    pub(crate) async fn cancelled_wait(&self) {
        let notified = self.inner.cancel_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.inner.cancelled.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("identifier", &self.inner.identifier)
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Handle wired with a standalone finisher, no queue involved.
    fn bare_handle(handler: ErasedHandler) -> OperationHandle {
        let finisher: Finisher = Arc::new(|handle, mode, result| {
            if handle.try_finish(mode, result.clone()) {
                if let Some(callback) = handle.take_handler() {
                    callback(result);
                }
            }
        });
        OperationHandle::new("op".to_string(), handler, finisher, Arc::new(|_, _| {}))
    }

    #[test]
    fn cancel_before_start_finishes_immediately() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let seen = delivered.clone();
        let handle = bare_handle(Box::new(move |result| {
            assert!(matches!(result, Err(QueueError::Cancelled)));
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        handle.cancel();

        assert_eq!(handle.state(), State::Finished);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        // The work function must never run after that.
        assert!(!handle.start());
    }

    #[test]
    fn resolve_wins_exactly_once() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let seen = delivered.clone();
        let handle = bare_handle(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(handle.start());
        handle.finish(FinishMode::Resolve, Ok(TaggedValue::new(7_u32)));
        handle.finish(FinishMode::Resolve, Ok(TaggedValue::new(8_u32)));

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        let value = handle.result().unwrap().unwrap();
        assert_eq!(value.downcast::<u32>().unwrap(), 7);
    }

    #[test]
    fn cancel_does_not_displace_an_executing_operation() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let seen = delivered.clone();
        let handle = bare_handle(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(handle.start());
        handle.cancel();

        // Cooperative: still executing, nothing delivered yet.
        assert_eq!(handle.state(), State::Executing);
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert!(handle.is_cancelled());

        // The work function observes the flag and resolves.
        handle.finish(FinishMode::Resolve, Err(QueueError::Cancelled));
        assert_eq!(handle.state(), State::Finished);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn chained_handlers_run_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = order.clone();
        let handle = bare_handle(Box::new(move |_| first.lock().unwrap().push(1)));
        let second = order.clone();
        handle.chain_handler(Box::new(move |_| second.lock().unwrap().push(2)));
        let third = order.clone();
        handle.chain_handler(Box::new(move |_| third.lock().unwrap().push(3)));

        assert!(handle.start());
        handle.finish(FinishMode::Resolve, Ok(TaggedValue::new(())));

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn tagged_value_downcast_checks_the_kind_first() {
        let value = TaggedValue::new("payload".to_string());
        assert_eq!(value.downcast::<String>().unwrap(), "payload");
        let err = value.downcast::<u32>().unwrap_err();
        assert_eq!(err, std::any::type_name::<String>());
    }

    #[tokio::test]
    async fn cancelled_wait_resolves_for_an_already_set_flag() {
        let handle = bare_handle(Box::new(|_| {}));
        handle.cancel();
        // Must not hang.
        handle.cancelled_wait().await;
    }
}
