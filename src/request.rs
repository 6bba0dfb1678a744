//! Logical request descriptions and the four response-shape traits.
//!
//! A [`RequestDescriptor`] carries everything needed to identify, coalesce,
//! and build one outbound request. Domain request types implement
//! [`Request`] plus one of the shape traits ([`NoContentRequest`],
//! [`DataRequest`], [`JsonRequest`], or [`JsonArrayRequest`]) and are
//! submitted through the matching `RequestQueue` method.

use crate::builder::Transformer;
use crate::error::BoxError;
use bytes::Bytes;
use reqwest::{Method, Url};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Where the wire request points: a path resolved against the queue's base
/// URL, or a fully absolute URL.
#[derive(Debug, Clone)]
pub enum Target {
    /// Resolved relative to the queue's base URL.
    Path(String),
    /// Used as-is.
    Absolute(Url),
}

/// Description of one logical outbound request.
///
/// Equality of [`identifier`](Self::identifier) means "same logical request"
/// for coalescing purposes; the rest of the descriptor is not compared.
#[derive(Clone)]
pub struct RequestDescriptor {
    pub(crate) identifier: String,
    pub(crate) coalesce: bool,
    pub(crate) acceptable_statuses: Vec<u16>,
    pub(crate) target: Target,
    pub(crate) method: Method,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: Option<Map<String, Value>>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) transformers: Vec<Arc<dyn Transformer>>,
}

impl RequestDescriptor {
    /// Start building a descriptor for the given identifier.
    ///
    /// Defaults: `GET`, coalescing enabled, statuses 200–299 accepted, no
    /// query, body, headers, or transformers, target path `""` (the base
    /// URL itself).
    #[must_use]
    pub fn builder(identifier: impl Into<String>) -> RequestDescriptorBuilder {
        RequestDescriptorBuilder {
            identifier: identifier.into(),
            coalesce: true,
            acceptable_statuses: (200..300).collect(),
            target: Target::Path(String::new()),
            method: Method::GET,
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
            transformers: Vec::new(),
        }
    }

    /// Stable identity of the logical request.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether concurrent submissions with this identifier merge onto one
    /// in-flight operation.
    #[must_use]
    pub const fn coalesce(&self) -> bool {
        self.coalesce
    }

    /// HTTP method for the wire request.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Whether `status` is in the acceptable set.
    #[must_use]
    pub fn accepts(&self, status: u16) -> bool {
        self.acceptable_statuses.contains(&status)
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("identifier", &self.identifier)
            .field("coalesce", &self.coalesce)
            .field("method", &self.method)
            .field("target", &self.target)
            .field("transformers", &self.transformers.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`RequestDescriptor`].
pub struct RequestDescriptorBuilder {
    identifier: String,
    coalesce: bool,
    acceptable_statuses: Vec<u16>,
    target: Target,
    method: Method,
    query: Vec<(String, String)>,
    body: Option<Map<String, Value>>,
    headers: Vec<(String, String)>,
    transformers: Vec<Arc<dyn Transformer>>,
}

impl RequestDescriptorBuilder {
    /// Target a path relative to the queue's base URL.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.target = Target::Path(path.into());
        self
    }

    /// Target an absolute URL, ignoring the queue's base URL.
    #[must_use]
    pub fn url(mut self, url: Url) -> Self {
        self.target = Target::Absolute(url);
        self
    }

    /// Set the HTTP method.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Append a query parameter; merged with any already on the URL.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Insert a body parameter. The body is serialized as a JSON object.
    #[must_use]
    pub fn body_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Replace the body parameters wholesale.
    #[must_use]
    pub fn body(mut self, body: Map<String, Value>) -> Self {
        self.body = Some(body);
        self
    }

    /// Append a header field.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append a transformer; transformers run sequentially in the order
    /// they were added.
    #[must_use]
    pub fn transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    /// Enable or disable coalescing (enabled by default).
    #[must_use]
    pub fn coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    /// Replace the acceptable status code set (default 200–299).
    #[must_use]
    pub fn acceptable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.acceptable_statuses = statuses.into_iter().collect();
        self
    }

    /// Finish the descriptor.
    #[must_use]
    pub fn build(self) -> RequestDescriptor {
        RequestDescriptor {
            identifier: self.identifier,
            coalesce: self.coalesce,
            acceptable_statuses: self.acceptable_statuses,
            target: self.target,
            method: self.method,
            query: self.query,
            body: self.body,
            headers: self.headers,
            transformers: self.transformers,
        }
    }
}

/// A logical request with a typed output.
///
/// The output must be `Clone` because a coalesced result is fanned out to
/// every chained caller.
pub trait Request: Send + Sync + 'static {
    /// Value produced on success.
    type Output: Clone + Send + Sync + 'static;

    /// Describe this request. Called once per submission.
    fn descriptor(&self) -> RequestDescriptor;
}

/// A request whose response body is ignored.
pub trait NoContentRequest: Request<Output = ()> {}

impl<T: Request<Output = ()>> NoContentRequest for T {}

/// A request whose raw response bytes are handed to a domain byte
/// processor.
pub trait DataRequest: Request {
    /// Turn the response bytes into the output value.
    ///
    /// # Errors
    ///
    /// Any error is surfaced verbatim as the operation's failure.
    fn process(&self, data: Bytes) -> Result<Self::Output, BoxError>;
}

/// A request whose response body must parse as a single JSON object.
pub trait JsonRequest: Request {
    /// Map the parsed JSON object to the output value.
    ///
    /// # Errors
    ///
    /// Any error is surfaced verbatim as the operation's failure.
    fn parse(&self, json: Map<String, Value>) -> Result<Self::Output, BoxError>;
}

/// A request whose response body must parse as a JSON array.
pub trait JsonArrayRequest: Request {
    /// Map the parsed JSON array to the output value.
    ///
    /// # Errors
    ///
    /// Any error is surfaced verbatim as the operation's failure.
    fn parse_array(&self, json: Vec<Value>) -> Result<Self::Output, BoxError>;
}
