//! # request-queue
//!
//! Client-side outbound request orchestrator: queues asynchronous HTTP
//! operations, guarantees at most one in-flight unit of work per logical
//! request identity (coalescing), exposes four response-shape operation
//! variants (no-content, raw bytes, JSON object, JSON array), and applies
//! an ordered, fail-fast pipeline of request transformers before dispatch.
//!
//! ## Example
//!
//! ```no_run
//! use request_queue::{
//!     BoxError, JsonRequest, QueueConfig, Request, RequestDescriptor, RequestQueue,
//! };
//! use serde_json::{Map, Value};
//!
//! struct FetchUser {
//!     id: u64,
//! }
//!
//! impl Request for FetchUser {
//!     type Output = String;
//!
//!     fn descriptor(&self) -> RequestDescriptor {
//!         RequestDescriptor::builder(format!("user-{}", self.id))
//!             .path(format!("users/{}", self.id))
//!             .build()
//!     }
//! }
//!
//! impl JsonRequest for FetchUser {
//!     fn parse(&self, json: Map<String, Value>) -> Result<String, BoxError> {
//!         json.get("name")
//!             .and_then(Value::as_str)
//!             .map(str::to_owned)
//!             .ok_or_else(|| "missing name".into())
//!     }
//! }
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RequestQueue::new(QueueConfig::new("https://api.example.com/v1/".parse()?));
//!
//! // Await-style.
//! let name = queue.perform_json(FetchUser { id: 42 }).await?;
//!
//! // Callback-style; concurrent submissions for `user-42` coalesce onto
//! // the same in-flight operation and share one transport call.
//! let operation = queue.submit_json(FetchUser { id: 42 }, |result| {
//!     if let Ok(name) = result {
//!         println!("fetched {name}");
//!     }
//! });
//! operation.cancel();
//! # let _ = name;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - Operation lifecycle is monotonic: `Ready -> Executing -> Finished`
//!   (or `Ready -> Finished` when cancelled before start), with the result
//!   set exactly once.
//! - If N callers submit the same coalescing-eligible identifier before the
//!   first completes, all N receive the identical terminal result, each
//!   exactly once, in registration order.
//! - Transformers run strictly sequentially and fail fast.
//! - Cancellation is cooperative: checked after building the wire request
//!   and again before decoding; an outstanding transport call is aborted
//!   best-effort.
//!
//! Retry, caching, rate limiting, persistence, and timeouts are out of
//! scope. A transport call that never completes leaves its operation
//! executing indefinitely.

pub mod builder;
pub mod error;
pub mod operation;
pub mod queue;
pub mod request;
pub mod state;
pub mod transport;

mod variants;

pub use builder::Transformer;
pub use error::{BoxError, QueueError};
pub use operation::{ErasedResult, OperationHandle, TaggedValue};
pub use queue::{QueueConfig, RequestQueue};
pub use request::{
    DataRequest, JsonArrayRequest, JsonRequest, NoContentRequest, Request, RequestDescriptor,
    RequestDescriptorBuilder, Target,
};
pub use state::State;
pub use transport::{HttpTransport, Transport, TransportReply};

// Re-exported so descriptor construction does not force a direct reqwest
// dependency on callers.
pub use reqwest::{Method, StatusCode, Url};
