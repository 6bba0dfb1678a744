//! Error types for the request queue.
//!
//! Every terminal failure is a [`QueueError`]. Errors raised by external
//! collaborators (the transport, transformers, domain decoders, body
//! serialization) are carried verbatim behind `Arc` so the whole enum stays
//! [`Clone`]: a coalesced result is fanned out to every chained caller, and
//! each of them receives the same error value.

use std::sync::Arc;
use thiserror::Error;

/// Boxed error type used at the transport, transformer, and decoder
/// boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by the request queue and its operations.
///
/// None of these are retried: every failure is terminal and is delivered
/// through the normal completion path to all chained callers.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// The operation was cancelled before it produced a result.
    #[error("operation was cancelled")]
    Cancelled,

    /// The response arrived without a body where one was required.
    #[error("response did not include a body")]
    DidNotReceiveData,

    /// The descriptor could not be assembled into a wire request
    /// (unresolvable URL or malformed header field).
    #[error("could not assemble a wire request from the descriptor")]
    FailedToCreateRequest,

    /// The response status code was outside the descriptor's acceptable set.
    #[error("response status code {0} is outside the acceptable set")]
    InvalidStatusCode(u16),

    /// The response body was not parseable as JSON of the required shape.
    #[error("response body was not valid JSON of the expected shape")]
    JsonDeserializationFailed,

    /// Two structurally different requests were coalesced under the same
    /// identifier and the terminal value does not match what this caller
    /// expected. Only the mismatching caller receives this error; the rest
    /// of the chain still gets the value.
    #[error("coalesced result for `{identifier}` holds {actual}, caller expected {expected}")]
    IdentifierMismatch {
        /// The shared identifier both requests were submitted under.
        identifier: String,
        /// Output type the mismatching caller expected.
        expected: &'static str,
        /// Output type actually carried by the terminal result.
        actual: &'static str,
    },

    /// Serializing the descriptor's body parameters to JSON failed. This is
    /// a build failure, not a transport failure.
    #[error("{0}")]
    BodySerialization(Arc<serde_json::Error>),

    /// The transport reported an error; carried verbatim.
    #[error("{0}")]
    Transport(Arc<BoxError>),

    /// A request transformer failed; carried verbatim. Transformers after
    /// the failing one are never invoked.
    #[error("{0}")]
    Transform(Arc<BoxError>),

    /// A domain decoder (byte processor or JSON mapper) rejected the
    /// payload; carried verbatim.
    #[error("{0}")]
    Decode(Arc<BoxError>),
}

impl QueueError {
    /// Wrap a transport boundary error.
    #[must_use]
    pub fn transport(err: BoxError) -> Self {
        Self::Transport(Arc::new(err))
    }

    /// Wrap a transformer boundary error.
    #[must_use]
    pub fn transform(err: BoxError) -> Self {
        Self::Transform(Arc::new(err))
    }

    /// Wrap a domain decoder error.
    #[must_use]
    pub fn decode(err: BoxError) -> Self {
        Self::Decode(Arc::new(err))
    }

    /// Whether this error is the cancellation outcome.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
