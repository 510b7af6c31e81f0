//! Document workflow orchestrator.
//!
//! Drives one uploaded PDF through the job lifecycle:
//!
//! ```text
//! SUBMITTED → ANALYSIS_STARTED → {SUCCEEDED | FAILED | PARTIAL_SUCCESS | TIMED_OUT}
//! SUCCEEDED → RESULTS_FETCHED → RESULTS_PERSISTED
//! ```
//!
//! [`DocumentWorkflow::begin`] stores the bytes and starts analysis. From
//! there the job is either handed to the background [`JobQueue`]
//! ([`submit`](DocumentWorkflow::submit)) or driven to the end on the
//! caller's task ([`run_synchronously`](DocumentWorkflow::run_synchronously)).
//!
//! Only `SUCCEEDED` leads to fetching and persisting results. Raw results go
//! to `<parent>/<stem>_results.json`; when grouping is enabled, the narrative
//! groups built from them go to `<parent>/<stem>_groups.json`. Every stage
//! transition is written to the job's `analysis_jobs` record.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::analysis::{AnalysisBackend, NotificationTarget};
use crate::chunk::chunk_by_title;
use crate::config::{Config, GroupingConfig};
use crate::error::{MonitorError, WorkflowError};
use crate::grouper::group_narrative;
use crate::layout::extract_elements;
use crate::models::{
    AnalysisJob, AnalysisResult, AnalysisStatus, Document, NarrativeGroup, TerminalStatus,
    WorkflowHandle, WorkflowOutcome, WorkflowResult, WorkflowStage,
};
use crate::monitor::JobMonitor;
use crate::object_store::{
    document_key, get_json, groups_key_for, put_json, results_key_for, sanitize_filename,
    ObjectStore, CONTENT_TYPE_PDF,
};
use crate::records::{JobRecords, StageUpdate};
use crate::worker::JobQueue;

/// Message returned for rejected uploads.
pub const PDF_ONLY_MESSAGE: &str = "Only PDF files are supported";

/// Reject anything whose name does not end in `.pdf` (any case).
pub fn validate_pdf_filename(filename: &str) -> Result<(), WorkflowError> {
    let name = sanitize_filename(filename);
    if name.to_ascii_lowercase().ends_with(".pdf") && name.len() > 4 {
        Ok(())
    } else {
        Err(WorkflowError::InvalidFile(PDF_ONLY_MESSAGE.to_string()))
    }
}

/// Extract layout elements from `result`, chunk them by title, and group
/// the chunks into narrative sections.
pub fn narrative_from_results(result: &AnalysisResult, max_characters: usize) -> Vec<NarrativeGroup> {
    let elements = extract_elements(result);
    let chunks = chunk_by_title(&elements, max_characters);
    group_narrative(&chunks)
}

/// Backend status of a job, plus the local workflow stage when the job was
/// started by this service.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: AnalysisStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<WorkflowStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Results of a job as seen by a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResults {
    /// The job has not succeeded (yet).
    Pending { status: AnalysisStatus },
    Ready(AnalysisResult),
}

/// Orchestrates storage, analysis, monitoring, and persistence.
pub struct DocumentWorkflow {
    store: Arc<dyn ObjectStore>,
    backend: Arc<dyn AnalysisBackend>,
    monitor: JobMonitor,
    records: JobRecords,
    upload_prefix: String,
    notification: Option<NotificationTarget>,
    grouping: GroupingConfig,
}

impl DocumentWorkflow {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        backend: Arc<dyn AnalysisBackend>,
        records: JobRecords,
        config: &Config,
    ) -> Self {
        let monitor = JobMonitor::from_config(backend.clone(), &config.monitor);
        Self {
            store,
            backend,
            monitor,
            records,
            upload_prefix: config.storage.upload_prefix.clone(),
            notification: NotificationTarget::from_config(&config.analysis),
            grouping: config.grouping.clone(),
        }
    }

    /// Replace the monitor built from configuration.
    pub fn with_monitor(mut self, monitor: JobMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn records(&self) -> &JobRecords {
        &self.records
    }

    /// Store `bytes` as a new document and start its analysis.
    ///
    /// The filename is validated before any storage or backend call.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn begin(&self, bytes: Vec<u8>, filename: &str) -> Result<AnalysisJob, WorkflowError> {
        validate_pdf_filename(filename)?;

        let key = document_key(&self.upload_prefix, filename);
        self.store
            .put_bytes(&key, bytes, CONTENT_TYPE_PDF)
            .await
            .inspect_err(|e| error!("Error storing {}: {}", key, e))?;
        info!("PDF uploaded to {}/{}", self.store.bucket(), key);

        let document = Document {
            id: Uuid::new_v4().to_string(),
            filename: sanitize_filename(filename).to_string(),
            storage_key: key.clone(),
            uploaded_at: Utc::now(),
        };
        self.records.insert_document(&document).await?;

        let job_id = self
            .backend
            .start_analysis(self.store.bucket(), &key, self.notification.as_ref())
            .await?;

        let now = Utc::now();
        let job = AnalysisJob {
            job_id,
            document_id: document.id,
            document_key: key,
            stage: WorkflowStage::AnalysisStarted,
            created_at: now,
            updated_at: now,
            results_key: None,
            groups_key: None,
            detail: None,
        };
        self.records.insert_job(&job).await?;
        info!("Started analysis job {} for {}", job.job_id, job.document_key);
        Ok(job)
    }

    /// Store and start analysis, then hand the rest of the workflow to
    /// `queue`. Returns as soon as the job is queued.
    pub async fn submit(
        &self,
        queue: &JobQueue,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<WorkflowHandle, WorkflowError> {
        let job = self.begin(bytes, filename).await?;
        let handle = WorkflowHandle {
            job_id: job.job_id.clone(),
            status: WorkflowStage::Submitted.to_string(),
            document_key: job.document_key.clone(),
            results_key: None,
            message: "Document submitted for processing".to_string(),
        };
        if !queue.enqueue(job).await? {
            warn!("Job {} is already being monitored", handle.job_id);
        }
        Ok(handle)
    }

    /// Re-queue jobs whose workflow was interrupted, e.g. by a restart.
    /// Returns how many were queued.
    pub async fn resume_unfinished(&self, queue: &JobQueue) -> Result<usize, WorkflowError> {
        let mut queued = 0;
        for job in self.records.unfinished_jobs().await? {
            info!("Resuming job {} at stage {}", job.job_id, job.stage);
            if queue.enqueue(job).await? {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Store, start, monitor, and (on success) persist, all on the calling
    /// task. Errors from any collaborator propagate; a monitor timeout is
    /// reported as [`WorkflowOutcome::TimedOut`].
    pub async fn run_synchronously(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<WorkflowResult, WorkflowError> {
        let job = self.begin(bytes, filename).await?;
        let outcome = self.drive(&job, None).await?;
        Ok(WorkflowResult {
            job_id: job.job_id,
            document_key: job.document_key,
            outcome,
        })
    }

    /// [`run_synchronously`](Self::run_synchronously) for a file on disk.
    pub async fn run_file(&self, path: &Path) -> Result<WorkflowResult, WorkflowError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        validate_pdf_filename(&filename)?;
        let bytes = tokio::fs::read(path).await?;
        self.run_synchronously(bytes, &filename).await
    }

    /// Finish a started job in the background. Never fails: errors are
    /// logged, recorded on the job, and returned as
    /// [`WorkflowOutcome::Errored`].
    pub async fn complete(
        &self,
        job: &AnalysisJob,
        cancel: Option<watch::Receiver<bool>>,
    ) -> WorkflowOutcome {
        match self.drive(job, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => WorkflowOutcome::Errored {
                detail: e.to_string(),
            },
        }
    }

    /// Monitor `job` to a terminal state and persist results on success.
    /// Failures are recorded as `ERRORED` before being returned.
    #[instrument(skip(self, job, cancel), fields(job_id = %job.job_id))]
    async fn drive(
        &self,
        job: &AnalysisJob,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let result = self.drive_inner(job, cancel).await;
        if let Err(ref e) = result {
            error!("Workflow for job {} failed: {}", job.job_id, e);
            let detail = e.to_string();
            let update = StageUpdate {
                detail: Some(&detail),
                ..StageUpdate::default()
            };
            if let Err(db_err) = self
                .records
                .set_stage(&job.job_id, WorkflowStage::Errored, update)
                .await
            {
                error!("Failed to record error for job {}: {}", job.job_id, db_err);
            }
        }
        result
    }

    async fn drive_inner(
        &self,
        job: &AnalysisJob,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let monitored = match cancel {
            Some(rx) => self.monitor.monitor_with_cancel(&job.job_id, rx).await,
            None => self.monitor.monitor(&job.job_id).await,
        };

        let terminal = match monitored {
            Ok(terminal) => terminal,
            Err(MonitorError::TimedOut { polls, waited, .. }) => {
                let detail = format!(
                    "no terminal status after {} polls ({}s)",
                    polls,
                    waited.as_secs()
                );
                warn!("Job {} timed out: {}", job.job_id, detail);
                self.records
                    .set_stage(
                        &job.job_id,
                        WorkflowStage::TimedOut,
                        StageUpdate {
                            detail: Some(&detail),
                            ..StageUpdate::default()
                        },
                    )
                    .await?;
                return Ok(WorkflowOutcome::TimedOut);
            }
            Err(MonitorError::Cancelled { .. }) => {
                info!("Job {} monitoring cancelled", job.job_id);
                self.records
                    .set_stage(&job.job_id, WorkflowStage::Cancelled, StageUpdate::default())
                    .await?;
                return Ok(WorkflowOutcome::Cancelled);
            }
            Err(e) => return Err(e.into()),
        };

        self.records
            .set_stage(&job.job_id, terminal.into(), StageUpdate::default())
            .await?;

        match terminal {
            TerminalStatus::Succeeded => self.persist_results(job).await,
            TerminalStatus::Failed => {
                warn!("Analysis job {} failed", job.job_id);
                Ok(WorkflowOutcome::Failed)
            }
            TerminalStatus::PartialSuccess => {
                warn!(
                    "Analysis job {} partially succeeded; results not persisted",
                    job.job_id
                );
                Ok(WorkflowOutcome::PartialSuccess)
            }
        }
    }

    async fn persist_results(&self, job: &AnalysisJob) -> Result<WorkflowOutcome, WorkflowError> {
        let result = self.backend.fetch_results(&job.job_id).await?;
        self.records
            .set_stage(&job.job_id, WorkflowStage::ResultsFetched, StageUpdate::default())
            .await?;

        let results_key = results_key_for(&job.document_key);
        put_json(self.store.as_ref(), &results_key, &result).await?;
        info!("Results uploaded to {}/{}", self.store.bucket(), results_key);

        let groups_key = if self.grouping.enabled {
            let groups = narrative_from_results(&result, self.grouping.max_characters);
            let key = groups_key_for(&job.document_key);
            put_json(self.store.as_ref(), &key, &groups).await?;
            info!(
                "Stored {} narrative groups at {}/{}",
                groups.len(),
                self.store.bucket(),
                key
            );
            Some(key)
        } else {
            None
        };

        self.records
            .set_stage(
                &job.job_id,
                WorkflowStage::ResultsPersisted,
                StageUpdate {
                    results_key: Some(&results_key),
                    groups_key: groups_key.as_deref(),
                    ..StageUpdate::default()
                },
            )
            .await?;

        Ok(WorkflowOutcome::Succeeded {
            results_key,
            groups_key,
        })
    }

    /// Current backend status of `job_id`, with the local record if any.
    pub async fn status(&self, job_id: &str) -> Result<JobStatusView, WorkflowError> {
        let status = self.backend.check_status(job_id).await?;
        let record = self.records.get_job(job_id).await?;
        Ok(JobStatusView {
            job_id: job_id.to_string(),
            status,
            stage: record.as_ref().map(|r| r.stage),
            results_key: record.as_ref().and_then(|r| r.results_key.clone()),
            detail: record.and_then(|r| r.detail),
        })
    }

    /// Full results of `job_id`, or its status while it has not succeeded.
    pub async fn results(&self, job_id: &str) -> Result<JobResults, WorkflowError> {
        let status = self.backend.check_status(job_id).await?;
        if status != AnalysisStatus::Succeeded {
            return Ok(JobResults::Pending { status });
        }
        let result = self.backend.fetch_results(job_id).await?;
        Ok(JobResults::Ready(result))
    }

    /// Persisted narrative groups of `job_id`; `None` until they are stored.
    pub async fn narrative(&self, job_id: &str) -> Result<Option<Vec<NarrativeGroup>>, WorkflowError> {
        let Some(job) = self.records.get_job(job_id).await? else {
            return Ok(None);
        };
        match job.groups_key {
            Some(key) => Ok(Some(get_json(self.store.as_ref(), &key).await?)),
            None => Ok(None),
        }
    }
}
