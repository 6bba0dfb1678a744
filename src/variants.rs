//! The four response-shape executors.
//!
//! Every executor runs the same skeleton: build the wire request through the
//! transformer pipeline, dispatch through the transport raced against
//! cancellation, gate on transport errors and the acceptable status set,
//! re-check cancellation, then decode per shape. Failures at any step
//! resolve the operation with that failure; a cancellation observed at a
//! checkpoint resolves with [`QueueError::Cancelled`] and stops.

use crate::builder::build_wire_request;
use crate::error::QueueError;
use crate::operation::{FinishMode, OperationHandle, TaggedValue};
use crate::request::{
    DataRequest, JsonArrayRequest, JsonRequest, NoContentRequest, Request, RequestDescriptor,
};
use crate::transport::{Transport, TransportReply};
use bytes::Bytes;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;

/// Everything one executor needs, assembled by the queue at submission.
pub(crate) struct ExecContext<R: Request> {
    pub(crate) request: Arc<R>,
    pub(crate) descriptor: RequestDescriptor,
    pub(crate) handle: OperationHandle,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) base_url: Url,
}

impl<R: Request> ExecContext<R> {
    fn finish_value(&self, value: R::Output) {
        self.handle.finish(FinishMode::Resolve, Ok(TaggedValue::new(value)));
    }

    fn finish_error(&self, error: QueueError) {
        self.handle.finish(FinishMode::Resolve, Err(error));
    }

    fn finish_cancelled(&self) {
        tracing::debug!(identifier = %self.handle.identifier(), "operation cancelled mid-flight");
        self.finish_error(QueueError::Cancelled);
    }

    /// Shared steps: build, dispatch, transport-error and status gates,
    /// cancellation checkpoints. `None` means the operation has already
    /// been resolved (failure or cancellation) and the variant must stop.
    async fn exchange(&self) -> Option<TransportReply> {
        let wire = match build_wire_request(&self.descriptor, &self.base_url).await {
            Ok(wire) => wire,
            Err(error) => {
                self.finish_error(error);
                return None;
            }
        };

        // Post-build checkpoint: don't dispatch work nobody wants.
        if self.handle.is_cancelled() {
            self.finish_cancelled();
            return None;
        }

        let outcome = tokio::select! {
            outcome = self.transport.send(wire) => outcome,
            () = self.handle.cancelled_wait() => {
                self.finish_cancelled();
                return None;
            }
        };

        if self.handle.is_cancelled() {
            self.finish_cancelled();
            return None;
        }

        let reply = match outcome {
            Ok(reply) => reply,
            Err(error) => {
                self.finish_error(QueueError::transport(error));
                return None;
            }
        };

        if let Some(status) = reply.status {
            if !self.descriptor.accepts(status.as_u16()) {
                tracing::debug!(
                    identifier = %self.handle.identifier(),
                    status = status.as_u16(),
                    "response status outside the acceptable set"
                );
                self.finish_error(QueueError::InvalidStatusCode(status.as_u16()));
                return None;
            }
        }

        // Pre-decode checkpoint: cancellation may have been requested
        // between dispatch and this point.
        if self.handle.is_cancelled() {
            self.finish_cancelled();
            return None;
        }

        Some(reply)
    }

    /// The body, or resolve with `DidNotReceiveData` when absent.
    fn require_body(&self, reply: TransportReply) -> Option<Bytes> {
        match reply.body {
            Some(body) => Some(body),
            None => {
                self.finish_error(QueueError::DidNotReceiveData);
                None
            }
        }
    }
}

/// No-content executor: a passing exchange succeeds with unit, body ignored.
pub(crate) async fn run_no_content<R: NoContentRequest>(ctx: ExecContext<R>) {
    if ctx.exchange().await.is_some() {
        ctx.finish_value(());
    }
}

/// Raw-bytes executor: hands the non-empty body to the domain byte
/// processor.
pub(crate) async fn run_data<R: DataRequest>(ctx: ExecContext<R>) {
    let Some(reply) = ctx.exchange().await else { return };
    let Some(body) = ctx.require_body(reply) else { return };
    match ctx.request.process(body) {
        Ok(value) => ctx.finish_value(value),
        Err(error) => ctx.finish_error(QueueError::decode(error)),
    }
}

/// JSON-object executor: parses the body as a JSON object, re-checks
/// cancellation, then hands the object to the domain mapper.
pub(crate) async fn run_json<R: JsonRequest>(ctx: ExecContext<R>) {
    let Some(reply) = ctx.exchange().await else { return };
    let Some(body) = ctx.require_body(reply) else { return };
    let Ok(Value::Object(object)) = serde_json::from_slice::<Value>(&body) else {
        ctx.finish_error(QueueError::JsonDeserializationFailed);
        return;
    };
    if ctx.handle.is_cancelled() {
        ctx.finish_cancelled();
        return;
    }
    match ctx.request.parse(object) {
        Ok(value) => ctx.finish_value(value),
        Err(error) => ctx.finish_error(QueueError::decode(error)),
    }
}

/// JSON-array executor: like [`run_json`] but requires array shape.
pub(crate) async fn run_json_array<R: JsonArrayRequest>(ctx: ExecContext<R>) {
    let Some(reply) = ctx.exchange().await else { return };
    let Some(body) = ctx.require_body(reply) else { return };
    let Ok(Value::Array(array)) = serde_json::from_slice::<Value>(&body) else {
        ctx.finish_error(QueueError::JsonDeserializationFailed);
        return;
    };
    if ctx.handle.is_cancelled() {
        ctx.finish_cancelled();
        return;
    }
    match ctx.request.parse_array(array) {
        Ok(value) => ctx.finish_value(value),
        Err(error) => ctx.finish_error(QueueError::decode(error)),
    }
}
