//! Error types for the gateway, monitor, and workflow layers.

use std::time::Duration;

use thiserror::Error;

use crate::models::AnalysisStatus;

/// Failure talking to the object store or the analysis backend.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("AWS credentials unavailable: {0}")]
    Credentials(String),

    #[error("{operation} request failed: {source}")]
    Http {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} failed (HTTP {status}){}: {body}", code_suffix(.code))]
    Status {
        operation: &'static str,
        status: u16,
        code: Option<String>,
        body: String,
    },

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("results for job {job_id} are not available (status {status})")]
    NotReady {
        job_id: String,
        status: AnalysisStatus,
    },

    #[error("malformed response: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|c| format!(" [{}]", c))
        .unwrap_or_default()
}

/// Why the job monitor stopped without observing a terminal status.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("job {job_id} did not reach a terminal status after {polls} polls ({}s)", .waited.as_secs())]
    TimedOut {
        job_id: String,
        polls: u32,
        waited: Duration,
    },

    #[error("monitoring of job {job_id} was cancelled")]
    Cancelled { job_id: String },

    #[error(transparent)]
    Backend(#[from] GatewayError),
}

/// Failure of a workflow step that has no job to report against, or of
/// local persistence.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    InvalidFile(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job queue is shut down")]
    QueueClosed,
}
