//! End-to-end tests driving a real `RequestQueue` over HTTP.

#![allow(clippy::unwrap_used)]

use request_queue::{
    BoxError, DataRequest, JsonArrayRequest, JsonRequest, Method, QueueConfig, QueueError,
    Request, RequestDescriptor, RequestQueue, Transformer, Url,
};
use bytes::Bytes;
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn queue_for(server: &MockServer) -> RequestQueue {
    let base = Url::parse(&server.uri()).unwrap();
    RequestQueue::new(QueueConfig::new(base))
}

struct GetA {
    mapped: Arc<AtomicBool>,
}

impl GetA {
    fn new() -> Self {
        Self { mapped: Arc::new(AtomicBool::new(false)) }
    }
}

impl Request for GetA {
    type Output = i64;

    fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::builder("A").path("a").build()
    }
}

impl JsonRequest for GetA {
    fn parse(&self, json: Map<String, Value>) -> Result<i64, BoxError> {
        self.mapped.store(true, Ordering::SeqCst);
        json.get("value")
            .and_then(Value::as_i64)
            .ok_or_else(|| "missing value".into())
    }
}

#[tokio::test]
async fn coalesced_get_issues_one_transport_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"value": 11}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let queue = queue_for(&server);
    let first = tokio::spawn({
        let queue = queue.clone();
        async move { queue.perform_json(GetA::new()).await }
    });
    let second = queue.perform_json(GetA::new());

    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.unwrap().unwrap(), 11);
    assert_eq!(second.unwrap(), 11);
}

struct CreateItem;

impl Request for CreateItem {
    type Output = bool;

    fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::builder("create-item")
            .path("items")
            .method(Method::POST)
            .query("q", "x")
            .body_param("n", "1")
            .build()
    }
}

impl JsonRequest for CreateItem {
    fn parse(&self, json: Map<String, Value>) -> Result<bool, BoxError> {
        json.get("ok")
            .and_then(Value::as_bool)
            .ok_or_else(|| "missing ok".into())
    }
}

#[tokio::test]
async fn builder_produces_method_query_and_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/items"))
        .and(query_param("q", "x"))
        .and(body_json(json!({"n": "1"})))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let queue = queue_for(&server);
    assert!(queue.perform_json(CreateItem).await.unwrap());
}

#[tokio::test]
async fn unacceptable_status_rejects_even_a_well_formed_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"value": 11})))
        .mount(&server)
        .await;

    let queue = queue_for(&server);
    let request = GetA::new();
    let mapped = request.mapped.clone();
    let err = queue.perform_json(request).await.unwrap_err();

    assert!(matches!(err, QueueError::InvalidStatusCode(404)));
    assert!(!mapped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn wrong_json_shape_never_reaches_the_mapper() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2, 3])))
        .mount(&server)
        .await;

    let queue = queue_for(&server);
    let request = GetA::new();
    let mapped = request.mapped.clone();
    let err = queue.perform_json(request).await.unwrap_err();

    assert!(matches!(err, QueueError::JsonDeserializationFailed));
    assert!(!mapped.load(Ordering::SeqCst));
}

struct SumNumbers;

impl Request for SumNumbers {
    type Output = i64;

    fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::builder("sum").path("numbers").build()
    }
}

impl JsonArrayRequest for SumNumbers {
    fn parse_array(&self, json: Vec<Value>) -> Result<i64, BoxError> {
        Ok(json.iter().filter_map(Value::as_i64).sum())
    }
}

#[tokio::test]
async fn json_array_variant_maps_the_array() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/numbers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2, 3])))
        .mount(&server)
        .await;

    let queue = queue_for(&server);
    assert_eq!(queue.perform_json_array(SumNumbers).await.unwrap(), 6);
}

struct DeleteItem;

impl Request for DeleteItem {
    type Output = ();

    fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::builder("delete-item")
            .path("items/1")
            .method(Method::DELETE)
            .acceptable_statuses([204])
            .build()
    }
}

#[tokio::test]
async fn no_content_variant_ignores_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/items/1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let queue = queue_for(&server);
    queue.perform_no_content(DeleteItem).await.unwrap();
}

struct Upper;

impl Request for Upper {
    type Output = String;

    fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::builder("upper").path("raw").build()
    }
}

impl DataRequest for Upper {
    fn process(&self, data: Bytes) -> Result<String, BoxError> {
        Ok(String::from_utf8_lossy(&data).to_uppercase())
    }
}

#[tokio::test]
async fn data_variant_hands_bytes_to_the_processor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/raw"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .mount(&server)
        .await;

    let queue = queue_for(&server);
    assert_eq!(queue.perform_data(Upper).await.unwrap(), "HELLO");
}

#[tokio::test]
async fn data_variant_requires_a_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/raw"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let queue = queue_for(&server);
    let err = queue.perform_data(Upper).await.unwrap_err();
    assert!(matches!(err, QueueError::DidNotReceiveData));
}

struct BearerStamp;

impl Transformer for BearerStamp {
    fn transform(
        &self,
        mut request: reqwest::Request,
    ) -> BoxFuture<'_, Result<reqwest::Request, BoxError>> {
        Box::pin(async move {
            request.headers_mut().insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_static("Bearer token"),
            );
            Ok(request)
        })
    }
}

struct Authed;

impl Request for Authed {
    type Output = ();

    fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::builder("authed")
            .path("private")
            .transformer(Arc::new(BearerStamp))
            .build()
    }
}

#[tokio::test]
async fn transformers_decorate_the_dispatched_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("authorization", "Bearer token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let queue = queue_for(&server);
    queue.perform_no_content(Authed).await.unwrap();
}

#[tokio::test]
async fn cancelling_a_ready_operation_issues_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": 1})))
        .expect(0)
        .mount(&server)
        .await;

    let base = Url::parse(&server.uri()).unwrap();
    let queue = RequestQueue::new(QueueConfig::new(base).start_suspended());

    let (tx, rx) = tokio::sync::oneshot::channel();
    let handle = queue.submit_json(GetA::new(), move |result| {
        let _ = tx.send(result);
    });
    handle.cancel();

    assert!(matches!(rx.await.unwrap(), Err(QueueError::Cancelled)));
    queue.set_suspended(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    // MockServer verifies expect(0) on drop.
}
