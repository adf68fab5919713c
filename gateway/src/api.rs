//! # Client HTTP API
//!
//! Builds the axum router that exposes the gateway's HTTP interface. All
//! endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                                | Description                     |
//! |--------|-------------------------------------|---------------------------------|
//! | GET    | `/health`                           | Liveness probe                  |
//! | POST   | `/api/clients/get-url`              | Create a transaction            |
//! | POST   | `/api/clients/exchange-keys`        | Per-transaction key exchange    |
//! | POST   | `/api/clients/get-token`            | Fetch payment token (sealed)    |
//! | POST   | `/api/clients/payment-request`      | Initiate payment (sealed)       |
//! | POST   | `/api/clients/payment-confirmation` | Confirm with OTP (sealed)       |
//! | POST   | `/api/clients/resend-otp`           | Resend passcode (sealed)        |
//! | POST   | `/api/clients/get-redirect-url`     | Post-payment redirect (sealed)  |
//! | GET    | `/api/clients/page-data/:page_id`   | Display fields for client pages |
//! | GET    | `/api/transactions`                 | Operator listing                |
//!
//! The HTTP layer is a thin shell: the orchestrator decides everything,
//! including whether a reply travels sealed or clear. The one policy that
//! lives here is creation's failure shape: invalid creation fields answer
//! `204 No Content` so probing bots learn nothing, unless the caller sends
//! `x-dev-request: true` to get the validation message during integration.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use vela_protocol::error::SessionError;
use vela_protocol::session::{
    CreateRequest, ExchangeKeysRequest, Orchestrator, Reply, SealedRequest,
};

use crate::metrics::SharedMetrics;

/// Header a merchant integrator sends to see creation validation messages
/// instead of the silent 204.
const DEV_REQUEST_HEADER: &str = "x-dev-request";

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone; everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The gateway's reported version string.
    pub version: String,
    /// The transaction protocol orchestrator.
    pub orchestrator: Arc<Orchestrator>,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
///
/// The returned router is ready to be served on the configured HTTP port.
/// The `/metrics` endpoint is not here; it serves on its own port.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/clients/get-url", post(create_handler))
        .route("/api/clients/exchange-keys", post(exchange_keys_handler))
        .route("/api/clients/get-token", post(get_token_handler))
        .route("/api/clients/payment-request", post(payment_request_handler))
        .route(
            "/api/clients/payment-confirmation",
            post(payment_confirmation_handler),
        )
        .route("/api/clients/resend-otp", post(resend_otp_handler))
        .route("/api/clients/get-redirect-url", post(get_redirect_url_handler))
        .route("/api/clients/page-data/:page_id", get(page_data_handler))
        .route("/api/transactions", get(transactions_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Mapping
// ---------------------------------------------------------------------------

fn to_status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Map an orchestrator error to a clear JSON response. Internal detail is
/// already collapsed by `public_message`.
fn error_response(err: &SessionError) -> Response {
    (
        to_status(err.http_status()),
        Json(json!({ "message": err.public_message() })),
    )
        .into_response()
}

/// Render a [`Reply`] as HTTP: sealed replies carry the envelope as their
/// JSON body, clear replies carry plain JSON. Either way the status is the
/// one the orchestrator chose.
fn reply_response(state: &AppState, reply: Reply) -> Response {
    match reply {
        Reply::Sealed { status, envelope } => {
            state.metrics.sealed_replies_total.inc();
            (to_status(status), Json(envelope)).into_response()
        }
        Reply::Clear { status, body } => {
            state.metrics.clear_errors_total.inc();
            (to_status(status), Json(body)).into_response()
        }
    }
}

fn is_dev_request(headers: &HeaderMap) -> bool {
    headers
        .get(DEV_REQUEST_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the gateway is alive.
///
/// This is the liveness probe for orchestrators (k8s, systemd, etc.).
/// It intentionally does not check the upstream processor; a dead
/// processor is a degraded gateway, not a dead one.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": state.version,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

/// `POST /api/clients/get-url`: create a transaction.
///
/// Success returns the customer-facing URL. Validation failures return
/// 204 with no body unless `x-dev-request: true` is present, in which
/// case the field-specific message comes back as a clear 400.
async fn create_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateRequest>,
) -> Response {
    state.metrics.requests_total.inc();
    match state.orchestrator.create(req) {
        Ok(resp) => {
            state.metrics.transactions_created_total.inc();
            (StatusCode::OK, Json(json!({ "url": resp.url }))).into_response()
        }
        Err(SessionError::Validation(message)) => {
            if is_dev_request(&headers) {
                (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
            } else {
                StatusCode::NO_CONTENT.into_response()
            }
        }
        Err(err) => error_response(&err),
    }
}

/// `POST /api/clients/exchange-keys`: per-transaction key exchange.
///
/// The last clear round trip of a transaction: everything after this
/// travels in envelopes.
async fn exchange_keys_handler(
    State(state): State<AppState>,
    Json(req): Json<ExchangeKeysRequest>,
) -> Response {
    state.metrics.requests_total.inc();
    match state.orchestrator.exchange_keys(req) {
        Ok(resp) => {
            state.metrics.key_exchanges_total.inc();
            (
                StatusCode::OK,
                Json(json!({ "serverPublicKey": resp.server_public_key })),
            )
                .into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// `POST /api/clients/get-token` (sealed).
async fn get_token_handler(
    State(state): State<AppState>,
    Json(req): Json<SealedRequest>,
) -> Response {
    state.metrics.requests_total.inc();
    state.metrics.upstream_calls_total.inc();
    let start = Instant::now();
    let reply = state.orchestrator.get_token(&req).await;
    state
        .metrics
        .upstream_latency_seconds
        .observe(start.elapsed().as_secs_f64());
    reply_response(&state, reply)
}

/// `POST /api/clients/payment-request` (sealed).
async fn payment_request_handler(
    State(state): State<AppState>,
    Json(req): Json<SealedRequest>,
) -> Response {
    state.metrics.requests_total.inc();
    state.metrics.upstream_calls_total.inc();
    let start = Instant::now();
    let reply = state.orchestrator.payment_request(&req).await;
    state
        .metrics
        .upstream_latency_seconds
        .observe(start.elapsed().as_secs_f64());
    reply_response(&state, reply)
}

/// `POST /api/clients/payment-confirmation` (sealed).
async fn payment_confirmation_handler(
    State(state): State<AppState>,
    Json(req): Json<SealedRequest>,
) -> Response {
    state.metrics.requests_total.inc();
    state.metrics.upstream_calls_total.inc();
    let start = Instant::now();
    let reply = state.orchestrator.payment_confirmation(&req).await;
    state
        .metrics
        .upstream_latency_seconds
        .observe(start.elapsed().as_secs_f64());

    if matches!(&reply, Reply::Sealed { status, .. } if (200..300).contains(status)) {
        state.metrics.payments_confirmed_total.inc();
    }
    reply_response(&state, reply)
}

/// `POST /api/clients/resend-otp` (sealed).
async fn resend_otp_handler(
    State(state): State<AppState>,
    Json(req): Json<SealedRequest>,
) -> Response {
    state.metrics.requests_total.inc();
    state.metrics.upstream_calls_total.inc();
    let start = Instant::now();
    let reply = state.orchestrator.resend_otp(&req).await;
    state
        .metrics
        .upstream_latency_seconds
        .observe(start.elapsed().as_secs_f64());
    reply_response(&state, reply)
}

/// `POST /api/clients/get-redirect-url` (sealed).
async fn get_redirect_url_handler(
    State(state): State<AppState>,
    Json(req): Json<SealedRequest>,
) -> Response {
    state.metrics.requests_total.inc();
    state.metrics.upstream_calls_total.inc();
    let start = Instant::now();
    let reply = state.orchestrator.get_redirect_url(&req).await;
    state
        .metrics
        .upstream_latency_seconds
        .observe(start.elapsed().as_secs_f64());
    reply_response(&state, reply)
}

/// `GET /api/clients/page-data/:page_id`: display fields for the
/// customer pages. Non-sensitive fields only.
async fn page_data_handler(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
) -> Response {
    state.metrics.requests_total.inc();
    match state.orchestrator.page_summary(&page_id) {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => error_response(&err),
    }
}

/// Query parameters for the operator listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    program_name: Option<String>,
}

/// `GET /api/transactions`: operator listing, optionally filtered with
/// `?programName=`.
async fn transactions_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    state.metrics.requests_total.inc();
    match state
        .orchestrator
        .list_transactions(query.program_name.as_deref())
    {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(err) => error_response(&err),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
