//! Handler tests for the listener and the operational API
//!
//! Routers are driven in-process with `oneshot`; sources are backed by
//! in-memory producers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use dqd::{api, listener};
use http_body_util::BodyExt;
use pipe_worker::{
    Consumer, ConsumerFactory, HealthChecker, HealthRegistry, HealthState, HealthStatus,
    Producer, ProducerFactory, RawMessage, Source, SourceError,
};
use tower::ServiceExt; // For oneshot()

#[derive(Default)]
struct MemoryProducer {
    produced: Mutex<Vec<String>>,
    fail: bool,
}

impl HealthChecker for MemoryProducer {
    fn health_status(&self) -> HealthStatus {
        HealthStatus::single("memory", HealthState::Healthy)
    }
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn produce(&self, message: &RawMessage) -> Result<(), SourceError> {
        if self.fail {
            return Err(SourceError::provider("queue full"));
        }
        self.produced.lock().unwrap().push(message.data.clone());
        Ok(())
    }
}

struct MemoryProvider {
    producer: Option<Arc<MemoryProducer>>,
}

#[async_trait]
impl ConsumerFactory for MemoryProvider {
    async fn create_consumer(&self, source_name: &str) -> Result<Arc<dyn Consumer>, SourceError> {
        Err(SourceError::unsupported(source_name, "consuming"))
    }
}

#[async_trait]
impl ProducerFactory for MemoryProvider {
    async fn create_producer(&self, source_name: &str) -> Result<Arc<dyn Producer>, SourceError> {
        match &self.producer {
            Some(producer) => Ok(producer.clone()),
            None => Err(SourceError::unsupported(source_name, "producing")),
        }
    }
}

fn source(name: &str, producer: Option<Arc<MemoryProducer>>) -> (String, Arc<Source>) {
    (
        name.to_string(),
        Arc::new(Source::from_provider(name, MemoryProvider { producer })),
    )
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(body: Body) -> serde_json::Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_listener_produces_body_to_source() {
    let producer = Arc::new(MemoryProducer::default());
    let sources: BTreeMap<_, _> = [source("orders", Some(producer.clone()))].into();
    let app = listener::router(&sources).await;

    let response = app.oneshot(post("/orders", "hello")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(*producer.produced.lock().unwrap(), vec!["hello".to_string()]);
}

#[tokio::test]
async fn test_listener_returns_500_when_produce_fails() {
    let producer = Arc::new(MemoryProducer {
        fail: true,
        ..Default::default()
    });
    let sources: BTreeMap<_, _> = [source("orders", Some(producer))].into();
    let app = listener::router(&sources).await;

    let response = app.oneshot(post("/orders", "hello")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_listener_skips_sources_without_producer() {
    let producer = Arc::new(MemoryProducer::default());
    let sources: BTreeMap<_, _> = [
        source("orders", Some(producer.clone())),
        source("readonly", None),
    ]
    .into();
    let app = listener::router(&sources).await;

    let response = app
        .clone()
        .oneshot(post("/readonly", "hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(get("/orders")).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(producer.produced.lock().unwrap().is_empty());
}

struct StaticHealth(HealthStatus);

impl HealthChecker for StaticHealth {
    fn health_status(&self) -> HealthStatus {
        self.0.clone()
    }
}

#[tokio::test]
async fn test_health_reports_all_pipes() {
    let registry = HealthRegistry::new();
    registry.register(
        "orders",
        Arc::new(StaticHealth(
            HealthStatus::single("orders.intake", HealthState::Healthy),
        )),
    );
    registry.register(
        "billing",
        Arc::new(StaticHealth(
            HealthStatus::single("invoices.intake", HealthState::Healthy),
        )),
    );

    let response = api::router(registry).oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.into_body()).await;
    assert_eq!(body["orders.orders.intake"], "Healthy");
    assert_eq!(body["billing.invoices.intake"], "Healthy");
}

#[tokio::test]
async fn test_health_is_503_when_any_component_fails() {
    let registry = HealthRegistry::new();
    registry.register(
        "orders",
        Arc::new(StaticHealth(
            HealthStatus::single("orders.intake", HealthState::Healthy)
                .with("orders.redis", HealthState::error("connection refused")),
        )),
    );

    let response = api::router(registry).oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response.into_body()).await;
    assert_eq!(body["orders.orders.redis"], "Error - connection refused");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    pipe_worker::init_metrics().unwrap();
    pipe_worker::PipeMetrics::new("api-test").concurrency_limit(7);

    let response = api::router(HealthRegistry::new())
        .oneshot(get("/metrics"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("worker_concurrent_max"));
}
