//! The transport boundary.
//!
//! The queue never talks to the network directly; it hands a fully built
//! wire request to a [`Transport`] and gets back a status code and body
//! bytes (either may be absent). [`HttpTransport`] is the reqwest-backed
//! production implementation. Cancellation of an outstanding call is
//! best-effort: the executor drops the transport future, which for
//! [`HttpTransport`] aborts the underlying connection.

use crate::error::BoxError;
use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};

/// What a transport produced for one dispatched request.
#[derive(Debug, Clone)]
pub struct TransportReply {
    /// Response status code, when the transport saw an HTTP response.
    pub status: Option<StatusCode>,
    /// Response body; `None` when absent or empty.
    pub body: Option<Bytes>,
}

/// Sends wire requests. Implementations must be shareable across the
/// executor pool.
///
/// This trait uses an explicit boxed future instead of `async fn` so it
/// stays dyn-compatible.
pub trait Transport: Send + Sync {
    /// Dispatch one request and resolve with its reply, or a transport
    /// error surfaced verbatim.
    fn send(&self, request: reqwest::Request) -> BoxFuture<'_, Result<TransportReply, BoxError>>;
}

/// Production transport backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Wrap an existing client (connection pool, TLS config, proxies).
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: reqwest::Request) -> BoxFuture<'_, Result<TransportReply, BoxError>> {
        Box::pin(async move {
            let response = self.client.execute(request).await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok(TransportReply {
                status: Some(status),
                body: (!body.is_empty()).then_some(body),
            })
        })
    }
}
