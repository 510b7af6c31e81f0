//! Job monitor: polls an analysis job until it reaches a terminal status.
//!
//! The monitor checks status on a fixed interval and stops as soon as the
//! backend reports `SUCCEEDED`, `FAILED`, or `PARTIAL_SUCCESS`. Polling is
//! bounded either by wall-clock time or by a number of attempts; running
//! past the bound yields [`MonitorError::TimedOut`], never a false failure.
//!
//! An optional `watch` channel carries a shutdown signal. It is checked
//! before every poll and interrupts the sleep between polls.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::analysis::AnalysisBackend;
use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::models::TerminalStatus;

/// Limit on how long a job is monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollBound {
    /// Poll while less than this much time has elapsed since the first poll.
    Deadline(Duration),
    /// Poll at most this many times.
    Attempts(u32),
}

/// Polls an [`AnalysisBackend`] until a job finishes.
#[derive(Clone)]
pub struct JobMonitor {
    backend: Arc<dyn AnalysisBackend>,
    interval: Duration,
    bound: PollBound,
}

impl JobMonitor {
    pub fn new(backend: Arc<dyn AnalysisBackend>, interval: Duration, bound: PollBound) -> Self {
        Self {
            backend,
            interval,
            bound,
        }
    }

    /// Build from `[monitor]` settings; `max_attempts` selects the
    /// attempt-bounded variant.
    pub fn from_config(backend: Arc<dyn AnalysisBackend>, config: &MonitorConfig) -> Self {
        let bound = match config.max_attempts {
            Some(n) => PollBound::Attempts(n),
            None => PollBound::Deadline(Duration::from_secs(config.max_wait_secs)),
        };
        Self::new(backend, config.poll_interval(), bound)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn bound(&self) -> PollBound {
        self.bound
    }

    /// Poll `job_id` until it reaches a terminal status or the bound is hit.
    pub async fn monitor(&self, job_id: &str) -> Result<TerminalStatus, MonitorError> {
        self.run(job_id, None).await
    }

    /// Like [`monitor`](Self::monitor), but gives up with
    /// [`MonitorError::Cancelled`] once `cancel` carries `true`.
    pub async fn monitor_with_cancel(
        &self,
        job_id: &str,
        cancel: watch::Receiver<bool>,
    ) -> Result<TerminalStatus, MonitorError> {
        self.run(job_id, Some(cancel)).await
    }

    #[instrument(skip(self, cancel), fields(interval_secs = self.interval.as_secs()))]
    async fn run(
        &self,
        job_id: &str,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> Result<TerminalStatus, MonitorError> {
        let start = Instant::now();
        let mut polls: u32 = 0;

        loop {
            if is_cancelled(&cancel) {
                return Err(MonitorError::Cancelled {
                    job_id: job_id.to_string(),
                });
            }
            if self.exhausted(polls, start.elapsed()) {
                break;
            }

            let status = self.backend.check_status(job_id).await?;
            polls += 1;

            if let Some(terminal) = status.terminal() {
                info!("Job {} completed with status {} after {} polls", job_id, terminal, polls);
                return Ok(terminal);
            }

            // No point sleeping when the attempt budget is already spent.
            if matches!(self.bound, PollBound::Attempts(max) if polls >= max) {
                break;
            }

            let pause = self.next_pause(start.elapsed());
            debug!(
                "Job {} still {}; waiting {}s",
                job_id,
                status,
                pause.as_secs()
            );
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = wait_cancelled(&mut cancel) => {
                    return Err(MonitorError::Cancelled { job_id: job_id.to_string() });
                }
            }
        }

        let waited = start.elapsed();
        info!(
            "Job {} monitoring timed out after {} polls ({}s)",
            job_id,
            polls,
            waited.as_secs()
        );
        Err(MonitorError::TimedOut {
            job_id: job_id.to_string(),
            polls,
            waited,
        })
    }

    /// Sleep before the next poll, never past the deadline.
    fn next_pause(&self, elapsed: Duration) -> Duration {
        match self.bound {
            PollBound::Deadline(max) => self.interval.min(max.saturating_sub(elapsed)),
            PollBound::Attempts(_) => self.interval,
        }
    }

    fn exhausted(&self, polls: u32, elapsed: Duration) -> bool {
        match self.bound {
            PollBound::Deadline(max) => polls > 0 && elapsed >= max,
            PollBound::Attempts(max) => polls >= max,
        }
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

/// Resolves once the signal turns `true`; never resolves without a signal
/// or after the sender is dropped.
async fn wait_cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = cancel.as_mut() {
        if rx.wait_for(|c| *c).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::NotificationTarget;
    use crate::error::GatewayError;
    use crate::models::AnalysisStatus;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Returns scripted statuses; repeats the last one once the script runs out.
    struct ScriptedBackend {
        statuses: Mutex<VecDeque<AnalysisStatus>>,
        last: Mutex<AnalysisStatus>,
        polls: AtomicU32,
    }

    impl ScriptedBackend {
        fn new(statuses: &[AnalysisStatus]) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                last: Mutex::new(AnalysisStatus::InProgress),
                polls: AtomicU32::new(0),
            })
        }

        fn polls(&self) -> u32 {
            self.polls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnalysisBackend for ScriptedBackend {
        async fn start_analysis(
            &self,
            _bucket: &str,
            _key: &str,
            _notification: Option<&NotificationTarget>,
        ) -> Result<String, GatewayError> {
            Ok("job".to_string())
        }

        async fn check_status(&self, _job_id: &str) -> Result<AnalysisStatus, GatewayError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.statuses.lock().unwrap().pop_front() {
                *last = next;
            }
            Ok(*last)
        }

        async fn results_page(
            &self,
            _job_id: &str,
            _next_token: Option<&str>,
        ) -> Result<serde_json::Value, GatewayError> {
            Err(GatewayError::Protocol("not used".to_string()))
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_after_third_poll() {
        use AnalysisStatus::*;
        let backend = ScriptedBackend::new(&[InProgress, InProgress, Succeeded]);
        let monitor = JobMonitor::new(backend.clone(), secs(30), PollBound::Deadline(secs(3600)));

        let status = monitor.monitor("job").await.unwrap();
        assert_eq!(status, TerminalStatus::Succeeded);
        assert_eq!(backend.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_success_and_failed_are_terminal() {
        use AnalysisStatus::*;
        let backend = ScriptedBackend::new(&[Submitted, PartialSuccess]);
        let monitor = JobMonitor::new(backend.clone(), secs(10), PollBound::Attempts(60));
        assert_eq!(
            monitor.monitor("job").await.unwrap(),
            TerminalStatus::PartialSuccess
        );

        let backend = ScriptedBackend::new(&[Failed]);
        let monitor = JobMonitor::new(backend.clone(), secs(10), PollBound::Attempts(60));
        assert_eq!(monitor.monitor("job").await.unwrap(), TerminalStatus::Failed);
        assert_eq!(backend.polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_timeout_stops_polling() {
        let backend = ScriptedBackend::new(&[]);
        let monitor = JobMonitor::new(backend.clone(), secs(30), PollBound::Deadline(secs(90)));

        let err = monitor.monitor("job").await.unwrap_err();
        match err {
            MonitorError::TimedOut { polls, waited, .. } => {
                assert_eq!(polls, 3);
                assert!(waited >= secs(90));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(backend.polls(), 3);

        // No stray polls after the timeout was raised.
        tokio::time::sleep(secs(300)).await;
        assert_eq!(backend.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_timeout_is_not_late() {
        let backend = ScriptedBackend::new(&[]);
        let monitor = JobMonitor::new(backend.clone(), secs(30), PollBound::Deadline(secs(100)));

        let started = Instant::now();
        let err = monitor.monitor("job").await.unwrap_err();
        assert!(matches!(err, MonitorError::TimedOut { polls: 4, .. }));
        // Polls at 0, 30, 60, 90; the last pause is cut to 10s.
        assert_eq!(started.elapsed(), secs(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_bound_timeout() {
        let backend = ScriptedBackend::new(&[]);
        let monitor = JobMonitor::new(backend.clone(), secs(10), PollBound::Attempts(5));

        let started = Instant::now();
        let err = monitor.monitor("job").await.unwrap_err();
        assert!(matches!(err, MonitorError::TimedOut { polls: 5, .. }));
        assert_eq!(backend.polls(), 5);
        // Four sleeps between five polls; none after the last.
        assert_eq!(started.elapsed(), secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let backend = ScriptedBackend::new(&[]);
        let monitor = JobMonitor::new(backend.clone(), secs(30), PollBound::Deadline(secs(3600)));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { monitor.monitor_with_cancel("job", rx).await });
        tokio::time::sleep(secs(45)).await;
        tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, MonitorError::Cancelled { .. }));
        assert_eq!(backend.polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_cancel_sender_does_not_spin() {
        use AnalysisStatus::*;
        let backend = ScriptedBackend::new(&[InProgress, Succeeded]);
        let monitor = JobMonitor::new(backend.clone(), secs(30), PollBound::Deadline(secs(3600)));
        let (tx, rx) = watch::channel(false);
        drop(tx);

        let status = monitor.monitor_with_cancel("job", rx).await.unwrap();
        assert_eq!(status, TerminalStatus::Succeeded);
        assert_eq!(backend.polls(), 2);
    }

    #[test]
    fn test_from_config_selects_bound() {
        let backend = ScriptedBackend::new(&[]);
        let config = MonitorConfig::default();
        let monitor = JobMonitor::from_config(backend.clone(), &config);
        assert_eq!(monitor.bound(), PollBound::Deadline(secs(3600)));
        assert_eq!(monitor.interval(), secs(30));

        let config = MonitorConfig {
            poll_interval_secs: 10,
            max_attempts: Some(60),
            ..MonitorConfig::default()
        };
        let monitor = JobMonitor::from_config(backend, &config);
        assert_eq!(monitor.bound(), PollBound::Attempts(60));
    }
}
