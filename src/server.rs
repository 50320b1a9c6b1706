//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/index/status` | Collection name, chunk count, fingerprinted files |
//! | `POST` | `/index/update` | Reconcile the source directory into the index |
//! | `POST` | `/index/upload` | Save uploaded documents into the source directory, then reconcile |
//! | `POST` | `/posts` | Generate posts from the indexed material |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "num_posts must be between 1 and 10, got 0" } }
//! ```
//!
//! Error codes: `bad_request` (400) for request validation, `internal` (500)
//! for everything that fails while serving the request. Internal errors
//! carry the full error message.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends
//! can call the API directly.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::error::GenerationError;
use crate::models::Post;
use crate::services::Services;

/// Uploaded PDFs are routinely larger than axum's 2 MB default.
const UPLOAD_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Starts the HTTP server on `[server].bind` and serves until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config)?;
    let app = router(services);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "post server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the router with CORS. Exposed so tests can drive it in-process.
pub fn router(services: Services) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/index/status", get(handle_status))
        .route("/index/update", post(handle_update))
        .route(
            "/index/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/posts", post(handle_generate))
        .layer(cors)
        .with_state(services)
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

/// Logs the failure and turns it into a generic 500.
fn internal(context: &str, err: impl std::fmt::Display) -> AppError {
    let message = format!("{}: {}", context, err);
    error!(error = %message, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message,
    }
}

// ============ GET /health ============

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

// ============ GET /index/status ============

#[derive(Serialize)]
struct StatusResponse {
    collection_name: String,
    total_chunks: i64,
    files_processed: BTreeMap<String, String>,
}

async fn handle_status(State(services): State<Services>) -> Result<Json<StatusResponse>, AppError> {
    let status = services
        .synchronizer
        .status()
        .await
        .map_err(|e| internal("Error reading index status", e))?;

    Ok(Json(StatusResponse {
        collection_name: status.collection,
        total_chunks: status.total_chunks,
        files_processed: status.files_processed,
    }))
}

// ============ POST /index/update ============

#[derive(Serialize)]
struct UpdateResponse {
    documents_processed: usize,
}

async fn handle_update(State(services): State<Services>) -> Result<Json<UpdateResponse>, AppError> {
    let reconciled = services
        .synchronizer
        .reconcile()
        .await
        .map_err(|e| internal("Error updating index", e))?;

    Ok(Json(UpdateResponse {
        documents_processed: reconciled.report.documents_processed(),
    }))
}

// ============ POST /index/upload ============

#[derive(Serialize)]
struct UploadResponse {
    files_saved: Vec<String>,
    documents_processed: usize,
}

async fn handle_upload(
    State(services): State<Services>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let dir = services.synchronizer.sources_dir().to_path_buf();
    let extension = services.synchronizer.extension().to_string();
    let mut files_saved = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        let Some(raw_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let name = upload_file_name(&raw_name, &extension).map_err(bad_request)?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload {}: {}", name, e)))?;

        // Write beside the target and rename, so a pass never hashes a half-written file.
        let partial = dir.join(format!(".{}.part", name));
        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|e| internal("Error saving upload", e))?;
        tokio::fs::rename(&partial, dir.join(&name))
            .await
            .map_err(|e| internal("Error saving upload", e))?;

        info!(file = %name, bytes = bytes.len(), "saved upload");
        files_saved.push(name);
    }

    if files_saved.is_empty() {
        return Err(bad_request("no files in upload"));
    }

    let reconciled = services
        .synchronizer
        .reconcile()
        .await
        .map_err(|e| internal("Error updating index", e))?;

    Ok(Json(UploadResponse {
        files_saved,
        documents_processed: reconciled.report.documents_processed(),
    }))
}

/// Reduces a client-supplied file name to its last path component and
/// checks the extension.
fn upload_file_name(raw: &str, extension: &str) -> Result<String, String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base.is_empty() || base.starts_with('.') || base.contains(['\n', '\r']) {
        return Err(format!("invalid file name: {:?}", raw));
    }
    let matches = Path::new(base)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false);
    if !matches {
        return Err(format!("only .{} files are accepted, got {:?}", extension, base));
    }
    Ok(base.to_string())
}

// ============ POST /posts ============

#[derive(Deserialize)]
struct GenerateRequest {
    num_posts: Option<usize>,
    custom_prompt: Option<String>,
}

#[derive(Serialize)]
struct GenerateResponse {
    posts: Vec<Post>,
}

async fn handle_generate(
    State(services): State<Services>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    let count = req
        .num_posts
        .unwrap_or_else(|| services.generator.default_posts());

    let posts = services
        .generator
        .generate(count, req.custom_prompt.as_deref())
        .await
        .map_err(|e| match e {
            GenerationError::InvalidCount { .. } => bad_request(e.to_string()),
            other => internal("Error generating posts", other),
        })?;

    Ok(Json(GenerateResponse { posts }))
}
