//! Background job queue.
//!
//! Started jobs are sent over a bounded channel to a dispatcher task that
//! runs each one through [`DocumentWorkflow::complete`] on its own task,
//! with at most `workers.concurrency` jobs in flight. A job id that is
//! already queued or running is refused, so a job never has more than one
//! poller.
//!
//! Outcomes are only logged and written to the job record; nothing is
//! reported back to the submitter. [`JobQueue::shutdown`] cancels every
//! monitor at its next poll or sleep.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkflowError;
use crate::models::{AnalysisJob, WorkflowOutcome};
use crate::workflow::DocumentWorkflow;

type ActiveSet = Arc<Mutex<HashSet<String>>>;

/// Handle for submitting started jobs to the background workers.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<AnalysisJob>,
    active: ActiveSet,
    shutdown: Arc<watch::Sender<bool>>,
}

impl JobQueue {
    /// Spawn the dispatcher. The returned handle resolves once the queue has
    /// shut down and every running job has finished.
    pub fn start(workflow: Arc<DocumentWorkflow>, config: &WorkerConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let active: ActiveSet = Arc::new(Mutex::new(HashSet::new()));

        let dispatcher = tokio::spawn(dispatch(
            workflow,
            rx,
            shutdown_rx,
            active.clone(),
            config.concurrency.max(1),
        ));

        let queue = Self {
            tx,
            active,
            shutdown: Arc::new(shutdown_tx),
        };
        (queue, dispatcher)
    }

    /// Queue `job` for monitoring. Returns `false` when the job id is
    /// already queued or running.
    pub async fn enqueue(&self, job: AnalysisJob) -> Result<bool, WorkflowError> {
        if !lock(&self.active).insert(job.job_id.clone()) {
            return Ok(false);
        }
        let job_id = job.job_id.clone();
        if self.tx.send(job).await.is_err() {
            lock(&self.active).remove(&job_id);
            return Err(WorkflowError::QueueClosed);
        }
        Ok(true)
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        lock(&self.active).contains(job_id)
    }

    /// Number of jobs queued or running.
    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    /// Stop accepting work and cancel running monitors.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

fn lock(active: &ActiveSet) -> MutexGuard<'_, HashSet<String>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a job id from the active set when its task ends, even by panic.
struct ActiveGuard {
    active: ActiveSet,
    job_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.job_id);
    }
}

async fn dispatch(
    workflow: Arc<DocumentWorkflow>,
    mut rx: mpsc::Receiver<AnalysisJob>,
    mut shutdown: watch::Receiver<bool>,
    active: ActiveSet,
    concurrency: usize,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
            received = rx.recv() => {
                let Some(job) = received else { break };
                let permit = tokio::select! {
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    _ = stopped(&mut shutdown) => {
                        spawn_job(&mut tasks, &workflow, &active, job, shutdown.clone(), None);
                        break;
                    }
                };
                spawn_job(&mut tasks, &workflow, &active, job, shutdown.clone(), Some(permit));
            }
        }
    }

    // Jobs still queued observe the shutdown signal and end as cancelled.
    rx.close();
    while let Ok(job) = rx.try_recv() {
        spawn_job(&mut tasks, &workflow, &active, job, shutdown.clone(), None);
    }
    while let Some(joined) = tasks.join_next().await {
        log_join(joined);
    }
    info!("Job queue stopped");
}

/// Resolves once shutdown is signalled or every queue handle is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|s| *s).await;
}

fn spawn_job(
    tasks: &mut JoinSet<()>,
    workflow: &Arc<DocumentWorkflow>,
    active: &ActiveSet,
    job: AnalysisJob,
    cancel: watch::Receiver<bool>,
    permit: Option<tokio::sync::OwnedSemaphorePermit>,
) {
    let workflow = workflow.clone();
    let guard = ActiveGuard {
        active: active.clone(),
        job_id: job.job_id.clone(),
    };
    tasks.spawn(async move {
        let _guard = guard;
        let _permit = permit;
        let outcome = workflow.complete(&job, Some(cancel)).await;
        match &outcome {
            WorkflowOutcome::Succeeded { results_key, .. } => {
                info!("Job {} finished; results at {}", job.job_id, results_key)
            }
            WorkflowOutcome::Errored { detail } => {
                error!("Job {} errored: {}", job.job_id, detail)
            }
            other => warn!("Job {} ended as {}", job.job_id, other.status()),
        }
    });
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!("Background job task failed: {}", e);
    }
}
