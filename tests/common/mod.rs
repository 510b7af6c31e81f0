//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use docrelay::analysis::{AnalysisBackend, NotificationTarget};
use docrelay::config::Config;
use docrelay::error::GatewayError;
use docrelay::models::AnalysisStatus;
use docrelay::monitor::{JobMonitor, PollBound};
use docrelay::object_store::InMemoryObjectStore;
use docrelay::records::JobRecords;
use docrelay::workflow::DocumentWorkflow;
use docrelay::{db, migrate};

/// Analysis backend that replays a scripted status sequence (shared by all
/// jobs) and serves fixed result pages linked by index tokens.
pub struct FakeBackend {
    statuses: Mutex<VecDeque<AnalysisStatus>>,
    last: Mutex<AnalysisStatus>,
    pages: Vec<Value>,
    next_id: AtomicU32,
    pub polls: AtomicU32,
    pub started: Mutex<Vec<String>>,
    pub fail_status: bool,
}

impl FakeBackend {
    pub fn new(statuses: &[AnalysisStatus]) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            last: Mutex::new(AnalysisStatus::InProgress),
            pages: sample_pages(),
            next_id: AtomicU32::new(0),
            polls: AtomicU32::new(0),
            started: Mutex::new(Vec::new()),
            fail_status: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_status: true,
            ..Self::new(&[])
        }
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn started_keys(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisBackend for FakeBackend {
    async fn start_analysis(
        &self,
        _bucket: &str,
        key: &str,
        _notification: Option<&NotificationTarget>,
    ) -> Result<String, GatewayError> {
        self.started.lock().unwrap().push(key.to_string());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("job-{}", n))
    }

    async fn check_status(&self, _job_id: &str) -> Result<AnalysisStatus, GatewayError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.fail_status {
            return Err(GatewayError::Status {
                operation: "GetDocumentAnalysis",
                status: 500,
                code: Some("InternalServerError".to_string()),
                body: "boom".to_string(),
            });
        }
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.statuses.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(*last)
    }

    async fn results_page(
        &self,
        _job_id: &str,
        next_token: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let index: usize = next_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let status = *self.last.lock().unwrap();
        let mut page = self.pages[index].clone();
        page["JobStatus"] = json!(status.as_str());
        Ok(page)
    }
}

/// Two result pages: a title and a paragraph on page 1, then a second
/// section on page 2.
pub fn sample_pages() -> Vec<Value> {
    vec![
        json!({
            "DocumentMetadata": { "Pages": 2 },
            "NextToken": "1",
            "Blocks": [
                { "BlockType": "LAYOUT_TITLE", "Id": "t1", "Page": 1,
                  "Relationships": [{ "Type": "CHILD", "Ids": ["l1"] }] },
                { "BlockType": "LAYOUT_TEXT", "Id": "x1", "Page": 1,
                  "Relationships": [{ "Type": "CHILD", "Ids": ["l2"] }] },
                { "BlockType": "LINE", "Id": "l1", "Text": "Introduction", "Page": 1 },
                { "BlockType": "LINE", "Id": "l2", "Text": "This report covers the quarter.", "Page": 1 }
            ]
        }),
        json!({
            "Blocks": [
                { "BlockType": "LAYOUT_SECTION_HEADER", "Id": "t2", "Page": 2,
                  "Relationships": [{ "Type": "CHILD", "Ids": ["l3"] }] },
                { "BlockType": "LAYOUT_TEXT", "Id": "x2", "Page": 2,
                  "Relationships": [{ "Type": "CHILD", "Ids": ["l4"] }] },
                { "BlockType": "LINE", "Id": "l3", "Text": "Findings", "Page": 2 },
                { "BlockType": "LINE", "Id": "l4", "Text": "Revenue grew.", "Page": 2 }
            ]
        }),
    ]
}

pub async fn memory_records() -> JobRecords {
    let pool = db::connect("sqlite::memory:").await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    JobRecords::new(pool)
}

/// Workflow over an in-memory store with a fast attempt-bounded monitor.
pub async fn workflow_with(
    backend: Arc<FakeBackend>,
    config: &Config,
    attempts: u32,
) -> (Arc<InMemoryObjectStore>, DocumentWorkflow) {
    let store = Arc::new(InMemoryObjectStore::new("test-bucket"));
    let monitor = JobMonitor::new(
        backend.clone(),
        Duration::from_millis(5),
        PollBound::Attempts(attempts),
    );
    let workflow = DocumentWorkflow::new(store.clone(), backend, memory_records().await, config)
        .with_monitor(monitor);
    (store, workflow)
}

pub const PDF_BYTES: &[u8] = b"%PDF-1.4 fake document";
