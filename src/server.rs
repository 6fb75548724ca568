//! HTTP server.
//!
//! Exposes the answering pipeline as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Answer a question: `{question, top_k?, mode?}` → `{answer, citations}` |
//! | `GET`  | `/health` | Per-service reachability and version |
//!
//! Refusals (unsafe input, injection, no evidence, ungrounded output) are
//! regular `200` answers carrying the refusal text and no citations.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `timeout` (408),
//! `completion_failed` (502), `internal` (500).
//!
//! # Cancellation
//!
//! Each request gets its own [`CancellationToken`]. It is cancelled when the
//! handler future is dropped (client disconnect) or when
//! `[completion].timeout_secs` elapses, whichever comes first.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use anyhow::Result;
use answer_harness_core::error::AnswerError;
use answer_harness_core::models::{QueryRequest, QueryResponse, RetrievalMode};
use answer_harness_core::orchestrator::Orchestrator;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::health::{check_health, HealthReport};
use crate::services::Services;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    services: Services,
    orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(config: &Config, services: Services) -> Result<Self> {
        let orchestrator = services.orchestrator(config)?;
        Ok(Self {
            config: Arc::new(config.clone()),
            services,
            orchestrator: Arc::new(orchestrator),
        })
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> Result<()> {
    let services = Services::from_config(config).await?;
    let state = AppState::new(config, services)?;
    let bind_addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "server listening");
    println!("Answer server listening on http://{}", bind_addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn timeout_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::REQUEST_TIMEOUT,
        code: "timeout".to_string(),
        message: message.into(),
    }
}

impl From<AnswerError> for AppError {
    fn from(err: AnswerError) -> Self {
        match err {
            AnswerError::InvalidRequest(msg) => bad_request(msg),
            AnswerError::Cancelled => timeout_error("request timed out before the answer completed"),
            AnswerError::UpstreamCompletion(_) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: err.code().to_string(),
                message: err.to_string(),
            },
            other => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal".to_string(),
                message: other.to_string(),
            },
        }
    }
}

// ============ POST /query ============

#[derive(Debug, Deserialize)]
struct QueryBody {
    question: String,
    #[serde(default, alias = "topK")]
    top_k: Option<usize>,
    #[serde(default)]
    mode: Option<String>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryResponse>, AppError> {
    let mode = match body.mode.as_deref() {
        Some(m) => m.parse::<RetrievalMode>().map_err(bad_request)?,
        None => RetrievalMode::default(),
    };
    let request = QueryRequest::new(body.question)
        .with_top_k(body.top_k.unwrap_or(state.config.retrieval.default_top_k))
        .with_mode(mode);

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    spawn_deadline(
        cancel.clone(),
        Duration::from_secs(state.config.completion.timeout_secs),
    );

    let answer = state
        .orchestrator
        .answer(&request, &cancel)
        .await
        .map_err(|e| {
            warn!(error = %e, code = e.code(), "query failed");
            AppError::from(e)
        })?;

    Ok(Json(answer.into_response()))
}

/// Cancel `token` after `timeout` unless it is cancelled first.
fn spawn_deadline(token: CancellationToken, timeout: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => token.cancel(),
            _ = token.cancelled() => {}
        }
    });
}

// ============ GET /health ============

async fn handle_health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(check_health(&state.config, &state.services).await)
}
