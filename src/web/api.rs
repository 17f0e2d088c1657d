//! Defines the Axum API routes and handlers.

use crate::coordinator::PrinterService;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use receipt_shared::api_models::{AvailabilityResponse, PrintRequest};
use receipt_shared::{ErrorInfo, ResultSink};
use std::sync::Arc;

pub type AppState = Arc<dyn PrinterService>;

/// Creates the Axum router with all the API endpoints.
pub fn create_router(service: AppState) -> Router {
    Router::new()
        .route("/api/v1/print", post(print))
        .route("/api/v1/availability", get(availability))
        .with_state(service)
}

fn print_error_status(error: &ErrorInfo) -> StatusCode {
    if error.is_busy() {
        StatusCode::CONFLICT
    } else if error.is_completion_timeout() {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::BAD_GATEWAY
    }
}

/// Handler to submit a print job and wait for its terminal result.
async fn print(State(service): State<AppState>, Json(request): Json<PrintRequest>) -> Response {
    let (sink, result) = ResultSink::channel();
    let job_id = service.submit_print_job(request, sink);
    tracing::debug!(%job_id, "Print request accepted");
    match result.await {
        Ok(Ok(receipt)) => (StatusCode::OK, Json(receipt)).into_response(),
        Ok(Err(error)) => (print_error_status(&error), Json(error)).into_response(),
        Err(_) => {
            tracing::error!(%job_id, "Job finished without a result");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Handler to probe whether the printer can take a job right now.
async fn availability(State(service): State<AppState>) -> Response {
    match service.query_availability().await {
        Ok(status) => (StatusCode::OK, Json(AvailabilityResponse::from(status))).into_response(),
        Err(error) => (StatusCode::SERVICE_UNAVAILABLE, Json(error)).into_response(),
    }
}
