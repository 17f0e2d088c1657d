//! Integration tests for the HTTP API

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt; // for .collect().await
use receipt_rs::hardware::simulated::{SimulatedFactory, SimulatedPrinter};
use receipt_rs::web::api::create_router;
use receipt_rs::{PrinterService, SessionCoordinator};
use receipt_shared::api_models::{Availability, PrintRequest};
use receipt_shared::config::Config;
use receipt_shared::{DeviceFactory, ErrorCode, ErrorInfo, JobId, JobPhase, JobResult, ResultSink};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::util::ServiceExt; // for `oneshot`

/// Answers every request with a fixed outcome.
struct FixedService {
    print: JobResult,
    availability: Result<Availability, ErrorInfo>,
}

#[async_trait]
impl PrinterService for FixedService {
    fn submit_print_job(&self, _request: PrintRequest, sink: ResultSink) -> JobId {
        sink.deliver(self.print.clone());
        JobId::new()
    }

    async fn query_availability(&self) -> Result<Availability, ErrorInfo> {
        self.availability.clone()
    }
}

fn fixed(print: JobResult) -> Arc<dyn PrinterService> {
    Arc::new(FixedService { print, availability: Ok(Availability::Busy) })
}

fn simulated() -> Arc<dyn PrinterService> {
    let factory: Arc<dyn DeviceFactory> = SimulatedFactory::new(SimulatedPrinter::new());
    Arc::new(SessionCoordinator::new(Config::default(), factory).unwrap())
}

async fn post_print(service: Arc<dyn PrinterService>, text: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/print")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "text": text }).to_string()))
        .unwrap();
    let response = create_router(service).oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn get_availability(service: Arc<dyn PrinterService>) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri("/api/v1/availability")
        .body(Body::empty())
        .unwrap();
    let response = create_router(service).oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn print_returns_the_receipt() {
    let (status, body) = post_print(simulated(), "Table 4").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "printed");
    assert!(body["jobId"].is_string());
}

#[tokio::test]
async fn busy_maps_to_conflict() {
    let (status, body) = post_print(fixed(Err(ErrorInfo::busy())), "x").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["context"], "acquireLock");
    assert_eq!(body["code"], json!(ErrorCode::Processing.code()));
}

#[tokio::test]
async fn completion_timeout_maps_to_gateway_timeout() {
    let error = ErrorInfo::new(ErrorCode::Timeout, JobPhase::CallbackTimeout);
    let (status, body) = post_print(fixed(Err(error)), "x").await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["context"], "callbackTimeout");
}

#[tokio::test]
async fn other_failures_map_to_bad_gateway_with_diagnostics() {
    let mut diagnostics = serde_json::Map::new();
    diagnostics.insert("portPresent".to_string(), json!(false));
    let error = ErrorInfo::new(ErrorCode::Connect, JobPhase::Connect).with_diagnostics(diagnostics);
    let (status, body) = post_print(fixed(Err(error)), "x").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["context"], "connect");
    assert_eq!(body["portPresent"], json!(false));
}

#[tokio::test]
async fn availability_reports_status() {
    let (status, body) = get_availability(simulated()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "online" }));

    let (status, body) = get_availability(fixed(Err(ErrorInfo::busy()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "busy" }));
}

#[tokio::test]
async fn availability_fault_maps_to_service_unavailable() {
    let service: Arc<dyn PrinterService> = Arc::new(FixedService {
        print: Err(ErrorInfo::busy()),
        availability: Err(ErrorInfo::not_ready(JobPhase::CheckStatus)),
    });
    let (status, body) = get_availability(service).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], json!(-1));
}
