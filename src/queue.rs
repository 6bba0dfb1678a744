//! The request queue: callback registry, coalescing, and fan-out.
//!
//! # Coalescing
//!
//! The registry maps each identifier to its one in-flight operation. A
//! submission whose descriptor is coalescing-eligible and whose identifier
//! already has an in-flight operation chains its completion onto that
//! operation instead of dispatching again; the single terminal result is
//! fanned out to every chained caller exactly once, in registration order.
//!
//! # Coordination
//!
//! All registry read-modify-write sequences go through one mutex, held only
//! for the map mutation itself and never while caller-supplied completion
//! code runs, so a completion handler may safely resubmit into the queue.
//! The terminal state transition and the registry removal happen under that
//! same mutex, which is what makes "an entry exists iff its operation is
//! `Ready` or `Executing`" an actual invariant rather than a convention.
//!
//! # Panics
//!
//! Finding no completion handler at completion time means the coalescing
//! contract was broken by a bug; the queue panics loudly instead of
//! silently dropping the callback.
//!
//! No timeout is enforced anywhere: a transport call that never completes
//! leaves its operation `Executing` and its registry entry occupied. That
//! is an accepted gap, not something this queue papers over.

use crate::error::QueueError;
use crate::operation::{
    ErasedHandler, ErasedResult, FinishMode, Finisher, Observer, OperationHandle, lock,
};
use crate::request::{DataRequest, JsonArrayRequest, JsonRequest, NoContentRequest, Request};
use crate::state::State;
use crate::transport::{HttpTransport, Transport};
use crate::variants::{self, ExecContext};
use reqwest::Url;
use std::any::type_name;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{oneshot, watch};

/// Configuration for a [`RequestQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    base_url: Url,
    suspended: bool,
}

impl QueueConfig {
    /// Configuration with the given base URL; the queue starts running.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            suspended: false,
        }
    }

    /// Start the queue suspended; submitted operations stay `Ready` until
    /// [`RequestQueue::set_suspended`] resumes it.
    #[must_use]
    pub fn start_suspended(mut self) -> Self {
        self.suspended = true;
        self
    }
}

struct QueueInner {
    registry: Mutex<HashMap<String, OperationHandle>>,
    transport: Arc<dyn Transport>,
    base_url: Url,
    suspended_tx: watch::Sender<bool>,
    executing_tx: watch::Sender<bool>,
    finisher: Finisher,
    observer: Observer,
}

impl QueueInner {
    /// Terminal protocol: transition, vacate the registry entry, and capture
    /// the composed handler atomically with respect to submissions, then
    /// invoke the handler outside the lock.
    fn finish(&self, handle: &OperationHandle, mode: FinishMode, result: ErasedResult) {
        let handler = {
            let mut registry = lock(&self.registry);
            if !handle.try_finish(mode, result.clone()) {
                // Some other path already finished this operation.
                return;
            }
            if registry
                .get(handle.identifier())
                .is_some_and(|registered| registered.same_operation(handle))
            {
                registry.remove(handle.identifier());
            }
            handle.take_handler()
        };
        let Some(handler) = handler else {
            missing_handler(handle.identifier());
        };
        tracing::debug!(
            identifier = %handle.identifier(),
            ok = result.is_ok(),
            "delivering terminal result"
        );
        handler(result);
    }
}

#[allow(clippy::panic)]
fn missing_handler(identifier: &str) -> ! {
    tracing::error!(identifier = %identifier, "no completion handler at completion time");
    panic!("coalescing contract broken: no completion handler for identifier `{identifier}`");
}

/// Finish path for operations that outlive their queue: deliver directly,
/// without registry involvement.
fn orphan_finish(handle: &OperationHandle, mode: FinishMode, result: ErasedResult) {
    tracing::warn!(identifier = %handle.identifier(), "queue dropped before operation finished");
    if handle.try_finish(mode, result.clone()) {
        if let Some(handler) = handle.take_handler() {
            handler(result);
        }
    }
}

/// Client-side outbound request orchestrator.
///
/// Owns the callback registry and dispatches operations onto the tokio
/// worker pool. Submission and cancellation are non-blocking from any
/// thread; clones share the same queue.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    /// Queue backed by a default [`HttpTransport`].
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self::with_transport(config, Arc::new(HttpTransport::default()))
    }

    /// Queue backed by an explicit transport.
    #[must_use]
    pub fn with_transport(config: QueueConfig, transport: Arc<dyn Transport>) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<QueueInner>| {
            let weak = weak.clone();
            let finisher: Finisher = Arc::new(move |handle, mode, result| {
                if let Some(inner) = weak.upgrade() {
                    inner.finish(handle, mode, result);
                } else {
                    orphan_finish(handle, mode, result);
                }
            });

            let (executing_tx, _) = watch::channel(false);
            let observer: Observer = {
                // Counter update and watch send share one lock: observers
                // fire with no common ordering, and a send landing after a
                // later crossing's send would leave the signal stale.
                let executing = Mutex::new(0_usize);
                let tx = executing_tx.clone();
                Arc::new(move |from, to| {
                    let mut count = lock(&executing);
                    match (from, to) {
                        (State::Ready, State::Executing) => *count += 1,
                        (State::Executing, State::Finished) => {
                            *count = count.saturating_sub(1);
                        }
                        _ => return,
                    }
                    tx.send_replace(*count > 0);
                })
            };

            let (suspended_tx, _) = watch::channel(config.suspended);
            QueueInner {
                registry: Mutex::new(HashMap::new()),
                transport,
                base_url: config.base_url,
                suspended_tx,
                executing_tx,
                finisher,
                observer,
            }
        });
        Self { inner }
    }

    /// Submit a request whose response body is ignored.
    pub fn submit_no_content<R, C>(&self, request: R, on_complete: C) -> OperationHandle
    where
        R: NoContentRequest,
        C: FnOnce(Result<(), QueueError>) + Send + 'static,
    {
        self.enqueue(request, on_complete, variants::run_no_content)
    }

    /// Submit a request whose raw response bytes go to its byte processor.
    pub fn submit_data<R, C>(&self, request: R, on_complete: C) -> OperationHandle
    where
        R: DataRequest,
        C: FnOnce(Result<R::Output, QueueError>) + Send + 'static,
    {
        self.enqueue(request, on_complete, variants::run_data)
    }

    /// Submit a request whose response must be a single JSON object.
    pub fn submit_json<R, C>(&self, request: R, on_complete: C) -> OperationHandle
    where
        R: JsonRequest,
        C: FnOnce(Result<R::Output, QueueError>) + Send + 'static,
    {
        self.enqueue(request, on_complete, variants::run_json)
    }

    /// Submit a request whose response must be a JSON array.
    pub fn submit_json_array<R, C>(&self, request: R, on_complete: C) -> OperationHandle
    where
        R: JsonArrayRequest,
        C: FnOnce(Result<R::Output, QueueError>) + Send + 'static,
    {
        self.enqueue(request, on_complete, variants::run_json_array)
    }

    /// Await a no-content request.
    ///
    /// # Errors
    ///
    /// Any [`QueueError`] the operation terminated with.
    pub async fn perform_no_content<R: NoContentRequest>(
        &self,
        request: R,
    ) -> Result<(), QueueError> {
        let (tx, rx) = oneshot::channel();
        let _operation = self.submit_no_content(request, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(QueueError::Cancelled))
    }

    /// Await a raw-bytes request.
    ///
    /// # Errors
    ///
    /// Any [`QueueError`] the operation terminated with.
    pub async fn perform_data<R: DataRequest>(&self, request: R) -> Result<R::Output, QueueError> {
        let (tx, rx) = oneshot::channel();
        let _operation = self.submit_data(request, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(QueueError::Cancelled))
    }

    /// Await a JSON-object request.
    ///
    /// # Errors
    ///
    /// Any [`QueueError`] the operation terminated with.
    pub async fn perform_json<R: JsonRequest>(&self, request: R) -> Result<R::Output, QueueError> {
        let (tx, rx) = oneshot::channel();
        let _operation = self.submit_json(request, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(QueueError::Cancelled))
    }

    /// Await a JSON-array request.
    ///
    /// # Errors
    ///
    /// Any [`QueueError`] the operation terminated with.
    pub async fn perform_json_array<R: JsonArrayRequest>(
        &self,
        request: R,
    ) -> Result<R::Output, QueueError> {
        let (tx, rx) = oneshot::channel();
        let _operation = self.submit_json_array(request, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(QueueError::Cancelled))
    }

    /// The in-flight operation for an identifier, if any.
    #[must_use]
    pub fn in_flight(&self, identifier: &str) -> Option<OperationHandle> {
        let registry = lock(&self.inner.registry);
        registry
            .get(identifier)
            .filter(|handle| handle.is_in_flight())
            .cloned()
    }

    /// Suspend or resume the queue. Suspension prevents `Ready` operations
    /// from starting; already-`Executing` operations are unaffected.
    pub fn set_suspended(&self, suspended: bool) {
        tracing::info!(suspended, "queue suspension changed");
        self.inner.suspended_tx.send_replace(suspended);
    }

    /// Whether the queue is currently suspended.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        *self.inner.suspended_tx.borrow()
    }

    /// Watch "the queue currently has at least one executing operation";
    /// updated on every state transition.
    #[must_use]
    pub fn executing_signal(&self) -> watch::Receiver<bool> {
        self.inner.executing_tx.subscribe()
    }

    /// Snapshot of the executing signal.
    #[must_use]
    pub fn is_executing(&self) -> bool {
        *self.inner.executing_tx.borrow()
    }

    /// The coalescing algorithm, under one serialized coordination point.
    fn enqueue<R, C, F, Fut>(&self, request: R, on_complete: C, run: F) -> OperationHandle
    where
        R: Request,
        C: FnOnce(Result<R::Output, QueueError>) + Send + 'static,
        F: FnOnce(ExecContext<R>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let descriptor = request.descriptor();
        let identifier = descriptor.identifier.clone();
        let wrapped = wrap_completion::<R::Output, C>(identifier.clone(), on_complete);

        let mut registry = lock(&self.inner.registry);
        if descriptor.coalesce {
            if let Some(existing) = registry.get(&identifier) {
                // A cancelled operation may still be winding down in
                // `Executing`; chaining onto it would hand this caller a
                // `Cancelled` it never asked for.
                if existing.is_in_flight() && !existing.is_cancelled() {
                    tracing::debug!(identifier = %identifier, "coalescing onto in-flight operation");
                    existing.chain_handler(wrapped);
                    return existing.clone();
                }
            }
        }

        let handle = OperationHandle::new(
            identifier.clone(),
            wrapped,
            self.inner.finisher.clone(),
            self.inner.observer.clone(),
        );
        // Overwrites a stale entry if one was somehow left behind, and
        // displaces the registered operation for non-coalescing duplicates;
        // the displaced operation still delivers through its own handler.
        registry.insert(identifier.clone(), handle.clone());
        drop(registry);

        tracing::debug!(identifier = %identifier, "dispatching new operation");
        let ctx = ExecContext {
            request: Arc::new(request),
            descriptor,
            handle: handle.clone(),
            transport: self.inner.transport.clone(),
            base_url: self.inner.base_url.clone(),
        };
        let suspended = self.inner.suspended_tx.subscribe();
        tokio::spawn(async move {
            wait_while_suspended(suspended, &ctx.handle).await;
            if ctx.handle.start() {
                run(ctx).await;
            }
        });
        handle
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("base_url", &self.inner.base_url)
            .field("suspended", &self.is_suspended())
            .field("executing", &self.is_executing())
            .finish_non_exhaustive()
    }
}

/// Park until the queue resumes, or until the operation is cancelled while
/// waiting (whichever comes first).
async fn wait_while_suspended(mut suspended: watch::Receiver<bool>, handle: &OperationHandle) {
    if !*suspended.borrow() {
        return;
    }
    tracing::debug!(identifier = %handle.identifier(), "operation parked while queue is suspended");
    tokio::select! {
        _ = suspended.wait_for(|suspended| !*suspended) => {}
        () = handle.cancelled_wait() => {}
    }
}

/// Bridge the typed completion into the erased registry handler, checking
/// the kind tag at fan-out time.
fn wrap_completion<T, C>(identifier: String, on_complete: C) -> ErasedHandler
where
    T: Clone + Send + Sync + 'static,
    C: FnOnce(Result<T, QueueError>) + Send + 'static,
{
    Box::new(move |erased: ErasedResult| match erased {
        Ok(tagged) => match tagged.downcast::<T>() {
            Ok(value) => on_complete(Ok(value)),
            Err(actual) => on_complete(Err(QueueError::IdentifierMismatch {
                identifier,
                expected: type_name::<T>(),
                actual,
            })),
        },
        Err(error) => on_complete(Err(error)),
    })
}
