//! Wire request assembly and the transformer pipeline.
//!
//! A descriptor becomes a [`reqwest::Request`] in one pass: resolve the
//! target URL, merge query parameters, serialize the JSON body, apply
//! headers, then run the transformer chain. Transformers run strictly
//! sequentially in list order and the pipeline aborts at the first error;
//! a later transformer is never invoked once one has failed.

use crate::error::{BoxError, QueueError};
use crate::request::{RequestDescriptor, Target};
use futures::future::BoxFuture;
use reqwest::Url;
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use std::sync::Arc;

/// Rewrites an outgoing request before dispatch, e.g. injecting an auth
/// header. May suspend (token refresh, keychain access).
///
/// This trait uses an explicit boxed future instead of `async fn` so it
/// stays dyn-compatible.
pub trait Transformer: Send + Sync {
    /// Produce a transformed request, or fail the build.
    fn transform(
        &self,
        request: reqwest::Request,
    ) -> BoxFuture<'_, Result<reqwest::Request, BoxError>>;
}

/// Assemble the dispatch-ready wire request for a descriptor.
///
/// # Errors
///
/// [`QueueError::FailedToCreateRequest`] when the target URL does not
/// resolve or a header field is malformed;
/// [`QueueError::BodySerialization`] when the body parameters do not
/// serialize; [`QueueError::Transform`] carrying the first transformer
/// failure verbatim.
pub(crate) async fn build_wire_request(
    descriptor: &RequestDescriptor,
    base_url: &Url,
) -> Result<reqwest::Request, QueueError> {
    let mut url = resolve_target(descriptor, base_url)?;

    if !descriptor.query.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(descriptor.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    let mut request = reqwest::Request::new(descriptor.method.clone(), url);

    if let Some(body) = &descriptor.body {
        let data =
            serde_json::to_vec(body).map_err(|e| QueueError::BodySerialization(Arc::new(e)))?;
        *request.body_mut() = Some(data.into());
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    for (name, value) in &descriptor.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| QueueError::FailedToCreateRequest)?;
        let value =
            HeaderValue::from_str(value).map_err(|_| QueueError::FailedToCreateRequest)?;
        request.headers_mut().append(name, value);
    }

    apply_transformers(&descriptor.transformers, request).await
}

fn resolve_target(descriptor: &RequestDescriptor, base_url: &Url) -> Result<Url, QueueError> {
    match &descriptor.target {
        Target::Path(path) => base_url.join(path).map_err(|_| QueueError::FailedToCreateRequest),
        Target::Absolute(url) => Ok(url.clone()),
    }
}

async fn apply_transformers(
    transformers: &[Arc<dyn Transformer>],
    request: reqwest::Request,
) -> Result<reqwest::Request, QueueError> {
    let mut request = request;
    for transformer in transformers {
        request = transformer
            .transform(request)
            .await
            .map_err(QueueError::transform)?;
    }
    Ok(request)
}
