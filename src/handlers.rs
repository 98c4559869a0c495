use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::HeaderMap,
    Extension, Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::audit::{AuditPage, AuditStats};
use crate::circuit_breaker::CircuitStatus;
use crate::error::GatewayError;
use crate::gateway::{Gateway, Guarded};
use crate::health::{DetailedHealth, HealthChecker, HealthStatus};
use crate::key_generator::KeyGenerator;
use crate::middleware::RequestContext;
use crate::response::ApiResponse;
use crate::sheets::SheetsBackend;
use crate::validation::{AuditSearchParams, RequestValidator};

pub const ORDERS_APPEND: &str = "orders.append";
pub const REQUESTS_APPEND: &str = "requests.append";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub sheets: Arc<dyn SheetsBackend>,
    pub health: Arc<HealthChecker>,
    pub keys: KeyGenerator,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, sheets: Arc<dyn SheetsBackend>, keys: KeyGenerator) -> Self {
        Self {
            health: Arc::new(HealthChecker::new(gateway.clone())),
            gateway,
            sheets,
            keys,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CircuitBreakerStatusResponse {
    pub sheets: CircuitStatus,
    pub timestamp: DateTime<Utc>,
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, GatewayError>;

fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, GatewayError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| GatewayError::Validation(rejection.body_text()))
}

/// Unwrap a guarded outcome. Audit failures were already logged by the
/// gateway and do not change the response.
fn respond(guarded: Guarded<Value>) -> ApiResult<Value> {
    guarded.into_result().map(|data| Json(ApiResponse::ok(data)))
}

/// Append an order row to the orders sheet
pub async fn append_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let request = RequestValidator::validate_order_request(json_body(body)?)?;
    let payload = request.audit_payload();
    let order = request.order.unwrap_or_default();
    let staff = request.staff.unwrap_or_default();
    let (sheets, order, staff) = (&state.sheets, &order, &staff);

    let guarded = state
        .gateway
        .execute(ORDERS_APPEND, payload, ctx.audit_metadata(&headers), move || {
            sheets.append_order_row(order, staff)
        })
        .await;
    respond(guarded)
}

/// Append a service request row to the requests sheet
pub async fn append_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let request = RequestValidator::validate_sheet_request(json_body(body)?)?;
    let created_at = request
        .created_at
        .clone()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| {
            state
                .gateway
                .clock()
                .now()
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        });
    let payload = request.audit_payload(&created_at);
    let staff = request.staff.unwrap_or_default();
    let text = request.request_text;
    let (sheets, text, staff, created_at) = (&state.sheets, &text, &staff, &created_at);

    let guarded = state
        .gateway
        .execute(REQUESTS_APPEND, payload, ctx.audit_metadata(&headers), move || {
            sheets.append_request_row(text, staff, created_at)
        })
        .await;
    respond(guarded)
}

pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    Json(ApiResponse::ok(state.health.check_health()))
}

pub async fn detailed_health_check(
    State(state): State<AppState>,
) -> Json<ApiResponse<DetailedHealth>> {
    Json(ApiResponse::ok(state.health.check_detailed().await))
}

pub async fn circuit_breaker_status(
    State(state): State<AppState>,
) -> Json<ApiResponse<CircuitBreakerStatusResponse>> {
    Json(ApiResponse::ok(CircuitBreakerStatusResponse {
        sheets: state.gateway.breaker_status(),
        timestamp: state.gateway.clock().now(),
    }))
}

/// Search the audit log. Read failures are reported in the page's `error`
/// field rather than as an error response.
pub async fn search_audit_logs(
    State(state): State<AppState>,
    Query(params): Query<AuditSearchParams>,
) -> ApiResult<AuditPage> {
    let query = RequestValidator::validate_audit_search(params)?;
    Ok(Json(ApiResponse::ok(state.gateway.audit().search(&query).await)))
}

pub async fn audit_stats(State(state): State<AppState>) -> Json<ApiResponse<AuditStats>> {
    Json(ApiResponse::ok(state.gateway.audit().stats().await))
}
