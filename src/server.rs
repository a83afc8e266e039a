//! HTTP server for ingestion and chat.
//!
//! Exposes the ingestion pipeline and single-turn generation as a small
//! JSON API for a browser (or terminal) chat front end.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/upload` | Run the ingestion pipeline, return the cache handle |
//! | `GET`  | `/api/upload-pdf` | Same as `/api/upload` |
//! | `POST` | `/api/chat` | One single-turn generation against a cache |
//! | `GET`  | `/api/suggestions` | Starter questions for an empty transcript |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Ingestion Contract
//!
//! ```json
//! { "success": true, "cacheId": "cachedContents/xyz", "cachedResult": { ... }, "fileUri": "https://..." }
//! { "success": false, "error": "file upload failed: ...", "stage": "upload" }
//! ```
//!
//! The first shape is returned with `200`, the second with `500`. Each
//! call runs the whole pipeline again; concurrent calls are not merged.
//!
//! # Error Contract
//!
//! `/api/chat` errors use the nested shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `generation` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients served from another origin.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::ChatError;
use crate::generate::{GenerationClient, Generator};
use crate::ingest::{IngestOutcome, Ingestor};
use crate::models::{ContextCache, Role};
use crate::progress::TracingProgress;
use crate::provider::{normalize_model, GeminiProvider, Provider};
use crate::session::{Suggestion, SUGGESTIONS};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    ingestor: Arc<Ingestor>,
}

/// Starts the HTTP server against the Gemini API.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let provider = GeminiProvider::new(&config.provider)?;
    run_server_with_provider(config, Arc::new(provider)).await
}

/// Starts the HTTP server with an explicit [`Provider`].
///
/// Used by [`run_server`] and by tests that point the server at a fake
/// provider.
pub async fn run_server_with_provider(
    config: &Config,
    provider: Arc<dyn Provider>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let ingestor = Arc::new(Ingestor::new(Arc::new(config.clone()), provider)?);
    let app = router(ingestor);

    tracing::info!("cache-chat server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router for `ingestor`.
pub fn router(ingestor: Arc<Ingestor>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/upload", get(handle_ingest))
        .route("/api/upload-pdf", get(handle_ingest))
        .route("/api/chat", post(handle_chat))
        .route("/api/suggestions", get(handle_suggestions))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { ingestor })
}

// ============ Error response ============

/// JSON error response body for `/api/chat`.
#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
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

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        let status = match err {
            ChatError::Generation(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/upload ============

/// JSON body returned by the ingestion endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_result: Option<ContextCache>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reused: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

impl IngestSummary {
    pub fn from_outcome(outcome: IngestOutcome) -> Self {
        Self {
            success: true,
            cache_id: Some(outcome.cache.name.clone()),
            file_uri: Some(outcome.file.uri),
            cached_result: Some(outcome.cache),
            reused: Some(outcome.reused),
            error: None,
            stage: None,
        }
    }

    pub fn from_error(err: &ChatError) -> Self {
        Self {
            success: false,
            cache_id: None,
            cached_result: None,
            file_uri: None,
            reused: None,
            error: Some(err.to_string()),
            stage: Some(err.code().to_string()),
        }
    }
}

/// Handler for `GET /api/upload` and `GET /api/upload-pdf`.
///
/// Runs the full pipeline. Every stage failure is caught here, once, and
/// rendered as `{ success: false, error }` with status 500.
async fn handle_ingest(State(state): State<AppState>) -> (StatusCode, Json<IngestSummary>) {
    match state.ingestor.run(&TracingProgress).await {
        Ok(outcome) => (StatusCode::OK, Json(IngestSummary::from_outcome(outcome))),
        Err(err) => {
            tracing::error!(stage = err.code(), error = %err, "ingestion failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(IngestSummary::from_error(&err)),
            )
        }
    }
}

// ============ POST /api/chat ============

/// Request body for `POST /api/chat`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Cache handle returned by `/api/upload` (`cacheId`).
    pub cache_name: String,
    /// Model the cache was created for; defaults to `provider.model`.
    #[serde(default)]
    pub model: Option<String>,
    pub message: String,
}

/// Response body for `POST /api/chat`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub role: Role,
    /// Raw model text; empty when the model returned nothing.
    pub content: String,
}

/// Handler for `POST /api/chat`.
///
/// Validates the message, then issues one single-turn generation bound to
/// `cacheName`. Returns `400` for invalid input and `502` when the
/// provider call fails.
async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    let max_chars = state.ingestor.config().chat.max_chars;
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    if req.message.chars().count() > max_chars {
        return Err(bad_request(format!(
            "message exceeds {} characters",
            max_chars
        )));
    }
    if req.cache_name.trim().is_empty() {
        return Err(bad_request("cacheName must not be empty"));
    }

    let model = req
        .model
        .as_deref()
        .unwrap_or(&state.ingestor.config().provider.model);
    let cache = ContextCache {
        name: req.cache_name.clone(),
        model: normalize_model(model),
        display_name: None,
        create_time: None,
        expire_time: None,
        usage_metadata: None,
    };

    let client = GenerationClient::new(state.ingestor.provider(), cache);
    let content = client.generate(&req.message).await.map_err(|err| {
        tracing::warn!(cache = %req.cache_name, error = %err, "generation failed");
        AppError::from(err)
    })?;

    Ok(Json(ChatReply {
        role: Role::Bot,
        content,
    }))
}

// ============ GET /api/suggestions ============

#[derive(Serialize)]
struct SuggestionsResponse {
    suggestions: &'static [Suggestion],
}

async fn handle_suggestions() -> Json<SuggestionsResponse> {
    Json(SuggestionsResponse {
        suggestions: SUGGESTIONS,
    })
}
