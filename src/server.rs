//! HTTP API for document processing.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `{prefix}/documents/process` | Upload a PDF (multipart field `file`) and start processing |
//! | `GET`  | `{prefix}/documents/{job_id}/status` | Backend status plus local workflow stage |
//! | `GET`  | `{prefix}/documents/{job_id}/results` | Raw analysis results once the job succeeded |
//! | `GET`  | `{prefix}/documents/{job_id}/narrative` | Persisted narrative groups |
//! | `GET`  | `/health` | Health check |
//!
//! `{prefix}` is `server.api_prefix` (default `/api/v1`).
//!
//! Uploads return as soon as the document is stored and its analysis job is
//! started; monitoring and persistence continue on the background
//! [`JobQueue`].
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Only PDF files are supported" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::analysis::TextractBackend;
use crate::config::Config;
use crate::error::{GatewayError, MonitorError, WorkflowError};
use crate::models::{AnalysisStatus, NarrativeGroup, WorkflowHandle};
use crate::object_store::S3ObjectStore;
use crate::records::JobRecords;
use crate::worker::JobQueue;
use crate::workflow::{validate_pdf_filename, DocumentWorkflow, JobResults, JobStatusView};
use crate::{db, migrate};

/// Largest accepted upload.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    workflow: Arc<DocumentWorkflow>,
    queue: JobQueue,
    api_prefix: String,
}

impl AppState {
    pub fn new(workflow: Arc<DocumentWorkflow>, queue: JobQueue, api_prefix: &str) -> Self {
        Self {
            workflow,
            queue,
            api_prefix: api_prefix.to_string(),
        }
    }
}

/// Build the router for `state`, with CORS and request tracing.
pub fn build_router(state: AppState) -> Router {
    let documents = Router::new()
        .route("/documents/process", post(handle_process))
        .route("/documents/{job_id}/status", get(handle_status))
        .route("/documents/{job_id}/results", get(handle_results))
        .route("/documents/{job_id}/narrative", get(handle_narrative));

    let prefix = state.api_prefix.trim_end_matches('/');
    let app = if prefix.is_empty() {
        Router::new().merge(documents)
    } else {
        Router::new().nest(prefix, documents)
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    app.route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Connect the gateways and database, start the job queue, and serve the
/// API on `server.bind` until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(&config.db.url).await?;
    migrate::run_migrations(&pool).await?;

    let store = S3ObjectStore::from_env(&config.storage).context("Failed to configure object store")?;
    let backend =
        TextractBackend::from_env(&config.analysis).context("Failed to configure analysis backend")?;

    let workflow = Arc::new(DocumentWorkflow::new(
        Arc::new(store),
        Arc::new(backend),
        JobRecords::new(pool),
        config,
    ));
    let (queue, dispatcher) = JobQueue::start(workflow.clone(), &config.workers);
    let resumed = workflow.resume_unfinished(&queue).await?;
    if resumed > 0 {
        info!("Resumed {} unfinished jobs", resumed);
    }
    let app = build_router(AppState::new(
        workflow,
        queue.clone(),
        &config.server.api_prefix,
    ));

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(
        "docrelay listening on http://{}{}",
        config.server.bind, config.server.api_prefix
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    queue.shutdown();
    if let Err(e) = dispatcher.await {
        error!("Job queue task failed: {}", e);
    }
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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map a workflow error to a response. Unknown job ids become 404; other
/// failures are reported as `"{context}: {error}"`.
fn classify(context: &str, err: WorkflowError) -> AppError {
    match err {
        WorkflowError::InvalidFile(msg) => bad_request(msg),
        WorkflowError::Gateway(e) | WorkflowError::Monitor(MonitorError::Backend(e))
            if is_unknown_job(&e) =>
        {
            not_found(e.to_string())
        }
        other => {
            error!("{}: {}", context, other);
            internal(format!("{}: {}", context, other))
        }
    }
}

fn is_unknown_job(err: &GatewayError) -> bool {
    match err {
        GatewayError::NotFound(_) => true,
        GatewayError::Status { code: Some(code), .. } => code == "InvalidJobIdException",
        _ => false,
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

// ============ POST {prefix}/documents/process ============

/// Accepts one PDF in the multipart field `file`. The filename is checked
/// before the body is read, so rejected uploads never reach storage.
async fn handle_process(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<WorkflowHandle>, AppError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        validate_pdf_filename(&filename).map_err(|e| bad_request(e.to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(e.to_string()))?;
        upload = Some((filename, bytes.to_vec()));
        break;
    }

    let (filename, bytes) =
        upload.ok_or_else(|| bad_request("multipart field 'file' is required"))?;

    let handle = state
        .workflow
        .submit(&state.queue, bytes, &filename)
        .await
        .map_err(|e| classify("Error processing document", e))?;
    Ok(Json(handle))
}

// ============ GET {prefix}/documents/{job_id}/status ============

async fn handle_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusView>, AppError> {
    let view = state
        .workflow
        .status(&job_id)
        .await
        .map_err(|e| classify("Error checking job status", e))?;
    Ok(Json(view))
}

// ============ GET {prefix}/documents/{job_id}/results ============

#[derive(Serialize)]
struct ResultsResponse {
    job_id: String,
    status: AnalysisStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pages: Option<Vec<serde_json::Value>>,
    message: String,
}

async fn handle_results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ResultsResponse>, AppError> {
    let results = state
        .workflow
        .results(&job_id)
        .await
        .map_err(|e| classify("Error getting document results", e))?;

    let response = match results {
        JobResults::Pending { status } => ResultsResponse {
            job_id,
            status,
            document_metadata: None,
            pages: None,
            message: format!("Job is not completed yet. Current status: {}", status),
        },
        JobResults::Ready(result) => ResultsResponse {
            job_id,
            status: result.job_status,
            document_metadata: result.document_metadata,
            pages: Some(result.pages),
            message: "Document analysis completed successfully".to_string(),
        },
    };
    Ok(Json(response))
}

// ============ GET {prefix}/documents/{job_id}/narrative ============

#[derive(Serialize)]
struct NarrativeResponse {
    job_id: String,
    groups: Vec<NarrativeGroup>,
}

async fn handle_narrative(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<NarrativeResponse>, AppError> {
    let groups = state
        .workflow
        .narrative(&job_id)
        .await
        .map_err(|e| classify("Error getting narrative groups", e))?
        .ok_or_else(|| not_found(format!("no narrative groups stored for job {}", job_id)))?;
    Ok(Json(NarrativeResponse { job_id, groups }))
}
