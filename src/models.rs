//! Core data models used throughout docrelay.
//!
//! These types describe the documents, analysis jobs, extracted layout
//! elements, chunks, and narrative groups that flow through the
//! upload → analyze → group pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An uploaded PDF. Written once when the upload is stored; never updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub storage_key: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Status reported by the analysis backend for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    Submitted,
    InProgress,
    Succeeded,
    Failed,
    PartialSuccess,
}

impl AnalysisStatus {
    /// Returns the terminal form of this status, or `None` while the job is still running.
    pub fn terminal(self) -> Option<TerminalStatus> {
        match self {
            AnalysisStatus::Succeeded => Some(TerminalStatus::Succeeded),
            AnalysisStatus::Failed => Some(TerminalStatus::Failed),
            AnalysisStatus::PartialSuccess => Some(TerminalStatus::PartialSuccess),
            AnalysisStatus::Submitted | AnalysisStatus::InProgress => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.terminal().is_some()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Submitted => "SUBMITTED",
            AnalysisStatus::InProgress => "IN_PROGRESS",
            AnalysisStatus::Succeeded => "SUCCEEDED",
            AnalysisStatus::Failed => "FAILED",
            AnalysisStatus::PartialSuccess => "PARTIAL_SUCCESS",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(AnalysisStatus::Submitted),
            "IN_PROGRESS" => Ok(AnalysisStatus::InProgress),
            "SUCCEEDED" => Ok(AnalysisStatus::Succeeded),
            "FAILED" => Ok(AnalysisStatus::Failed),
            "PARTIAL_SUCCESS" => Ok(AnalysisStatus::PartialSuccess),
            other => Err(format!("unknown analysis status: '{}'", other)),
        }
    }
}

/// A status after which the backend makes no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalStatus {
    Succeeded,
    Failed,
    PartialSuccess,
}

impl From<TerminalStatus> for AnalysisStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Succeeded => AnalysisStatus::Succeeded,
            TerminalStatus::Failed => AnalysisStatus::Failed,
            TerminalStatus::PartialSuccess => AnalysisStatus::PartialSuccess,
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        AnalysisStatus::from(*self).fmt(f)
    }
}

/// Position of a job in the local workflow state machine.
///
/// ```text
/// SUBMITTED → ANALYSIS_STARTED → {SUCCEEDED | FAILED | PARTIAL_SUCCESS | TIMED_OUT}
/// SUCCEEDED → RESULTS_FETCHED → RESULTS_PERSISTED
/// ```
///
/// `CANCELLED` and `ERRORED` are reachable from any non-final stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStage {
    Submitted,
    AnalysisStarted,
    Succeeded,
    Failed,
    PartialSuccess,
    TimedOut,
    ResultsFetched,
    ResultsPersisted,
    Cancelled,
    Errored,
}

impl WorkflowStage {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStage::Submitted => "SUBMITTED",
            WorkflowStage::AnalysisStarted => "ANALYSIS_STARTED",
            WorkflowStage::Succeeded => "SUCCEEDED",
            WorkflowStage::Failed => "FAILED",
            WorkflowStage::PartialSuccess => "PARTIAL_SUCCESS",
            WorkflowStage::TimedOut => "TIMED_OUT",
            WorkflowStage::ResultsFetched => "RESULTS_FETCHED",
            WorkflowStage::ResultsPersisted => "RESULTS_PERSISTED",
            WorkflowStage::Cancelled => "CANCELLED",
            WorkflowStage::Errored => "ERRORED",
        }
    }

    /// True once the workflow for the job has stopped advancing.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            WorkflowStage::Failed
                | WorkflowStage::PartialSuccess
                | WorkflowStage::TimedOut
                | WorkflowStage::ResultsPersisted
                | WorkflowStage::Cancelled
                | WorkflowStage::Errored
        )
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stage = match s {
            "SUBMITTED" => WorkflowStage::Submitted,
            "ANALYSIS_STARTED" => WorkflowStage::AnalysisStarted,
            "SUCCEEDED" => WorkflowStage::Succeeded,
            "FAILED" => WorkflowStage::Failed,
            "PARTIAL_SUCCESS" => WorkflowStage::PartialSuccess,
            "TIMED_OUT" => WorkflowStage::TimedOut,
            "RESULTS_FETCHED" => WorkflowStage::ResultsFetched,
            "RESULTS_PERSISTED" => WorkflowStage::ResultsPersisted,
            "CANCELLED" => WorkflowStage::Cancelled,
            "ERRORED" => WorkflowStage::Errored,
            other => return Err(format!("unknown workflow stage: '{}'", other)),
        };
        Ok(stage)
    }
}

impl From<TerminalStatus> for WorkflowStage {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Succeeded => WorkflowStage::Succeeded,
            TerminalStatus::Failed => WorkflowStage::Failed,
            TerminalStatus::PartialSuccess => WorkflowStage::PartialSuccess,
        }
    }
}

/// One analysis request against the remote layout engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisJob {
    pub job_id: String,
    pub document_id: String,
    pub document_key: String,
    pub stage: WorkflowStage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub results_key: Option<String>,
    pub groups_key: Option<String>,
    /// Error or timeout detail for jobs that ended badly.
    pub detail: Option<String>,
}

/// Complete results of a succeeded analysis job.
///
/// `pages` holds every paginated backend response in arrival order, exactly
/// as returned. Field names match the backend's PascalCase payload so the
/// persisted JSON can be fed straight back into [`crate::layout`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    #[serde(rename = "JobId")]
    pub job_id: String,
    #[serde(rename = "JobStatus")]
    pub job_status: AnalysisStatus,
    #[serde(rename = "DocumentMetadata", default)]
    pub document_metadata: Option<serde_json::Value>,
    #[serde(rename = "Pages", default)]
    pub pages: Vec<serde_json::Value>,
}

impl AnalysisResult {
    /// Page count reported in the document metadata, if any.
    pub fn page_count(&self) -> Option<u64> {
        self.document_metadata
            .as_ref()
            .and_then(|m| m.get("Pages"))
            .and_then(|p| p.as_u64())
    }
}

/// Category of an extracted layout element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementCategory {
    Title,
    NarrativeText,
    ListItem,
    Table,
    Image,
    Header,
    Footer,
    PageNumber,
    Text,
}

/// A single layout element recovered from the analysis output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedElement {
    pub category: ElementCategory,
    pub text: String,
    pub page_number: Option<u32>,
}

impl ExtractedElement {
    pub fn new(category: ElementCategory, text: impl Into<String>, page_number: Option<u32>) -> Self {
        Self {
            category,
            text: text.into(),
            page_number,
        }
    }

    pub fn is_title(&self) -> bool {
        self.category == ElementCategory::Title
    }
}

/// A span of element text produced by title-based chunking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub page_number: Option<u32>,
    /// The elements this chunk was built from, in document order.
    pub orig_elements: Vec<ExtractedElement>,
}

impl Chunk {
    /// Trimmed, non-empty text of every title element this chunk was built from.
    pub fn titles(&self) -> Vec<String> {
        self.orig_elements
            .iter()
            .filter(|e| e.is_title())
            .map(|e| e.text.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// True when every element with text is a title.
    pub fn is_title_only(&self) -> bool {
        self.orig_elements
            .iter()
            .filter(|e| !e.text.trim().is_empty())
            .all(ExtractedElement::is_title)
    }
}

/// A titled, page-ranged section of narrative text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NarrativeGroup {
    pub title: String,
    pub content: String,
    pub page_numbers: Vec<u32>,
}

/// Returned to the caller as soon as a document has been stored and its
/// analysis job started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowHandle {
    pub job_id: String,
    pub status: String,
    pub document_key: String,
    pub results_key: Option<String>,
    pub message: String,
}

/// How a workflow that reached the analysis stage ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowOutcome {
    Succeeded {
        results_key: String,
        groups_key: Option<String>,
    },
    Failed,
    PartialSuccess,
    TimedOut,
    Cancelled,
    Errored {
        detail: String,
    },
}

impl WorkflowOutcome {
    /// The workflow stage this outcome leaves the job record in.
    pub fn stage(&self) -> WorkflowStage {
        match self {
            WorkflowOutcome::Succeeded { .. } => WorkflowStage::ResultsPersisted,
            WorkflowOutcome::Failed => WorkflowStage::Failed,
            WorkflowOutcome::PartialSuccess => WorkflowStage::PartialSuccess,
            WorkflowOutcome::TimedOut => WorkflowStage::TimedOut,
            WorkflowOutcome::Cancelled => WorkflowStage::Cancelled,
            WorkflowOutcome::Errored { .. } => WorkflowStage::Errored,
        }
    }

    /// Status string reported to callers.
    pub fn status(&self) -> &'static str {
        match self {
            WorkflowOutcome::Succeeded { .. } => "SUCCEEDED",
            other => other.stage().as_str(),
        }
    }
}

/// Result of a blocking end-to-end run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowResult {
    pub job_id: String,
    pub document_key: String,
    #[serde(flatten)]
    pub outcome: WorkflowOutcome,
}

impl WorkflowResult {
    pub fn status(&self) -> &'static str {
        self.outcome.status()
    }

    /// Key of the persisted results; only set when analysis fully succeeded.
    pub fn results_key(&self) -> Option<&str> {
        match &self.outcome {
            WorkflowOutcome::Succeeded { results_key, .. } => Some(results_key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_strings() {
        for s in ["SUBMITTED", "IN_PROGRESS", "SUCCEEDED", "FAILED", "PARTIAL_SUCCESS"] {
            let status: AnalysisStatus = s.parse().unwrap();
            assert_eq!(status.as_str(), s);
        }
        assert!("DONE".parse::<AnalysisStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(AnalysisStatus::Succeeded.is_terminal());
        assert!(AnalysisStatus::Failed.is_terminal());
        assert!(AnalysisStatus::PartialSuccess.is_terminal());
        assert!(!AnalysisStatus::InProgress.is_terminal());
        assert!(!AnalysisStatus::Submitted.is_terminal());
    }

    #[test]
    fn test_chunk_titles_skip_blank_and_non_title_elements() {
        let chunk = Chunk {
            text: "Intro body".to_string(),
            page_number: Some(1),
            orig_elements: vec![
                ExtractedElement::new(ElementCategory::Title, "  Intro ", Some(1)),
                ExtractedElement::new(ElementCategory::Title, "   ", Some(1)),
                ExtractedElement::new(ElementCategory::NarrativeText, "body", Some(1)),
            ],
        };
        assert_eq!(chunk.titles(), vec!["Intro".to_string()]);
        assert!(!chunk.is_title_only());

        let heading = Chunk {
            text: "Intro".to_string(),
            page_number: Some(1),
            orig_elements: vec![
                ExtractedElement::new(ElementCategory::Title, "Intro", Some(1)),
                ExtractedElement::new(ElementCategory::NarrativeText, " ", Some(1)),
            ],
        };
        assert!(heading.is_title_only());
    }

    #[test]
    fn test_result_serializes_with_backend_field_names() {
        let result = AnalysisResult {
            job_id: "job-1".to_string(),
            job_status: AnalysisStatus::Succeeded,
            document_metadata: Some(serde_json::json!({ "Pages": 3 })),
            pages: vec![serde_json::json!({ "Blocks": [] })],
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["JobId"], "job-1");
        assert_eq!(value["JobStatus"], "SUCCEEDED");
        assert_eq!(value["DocumentMetadata"]["Pages"], 3);
        assert_eq!(result.page_count(), Some(3));
    }

    #[test]
    fn test_outcome_status_and_results_key() {
        let ok = WorkflowResult {
            job_id: "j".to_string(),
            document_key: "uploads/x/a.pdf".to_string(),
            outcome: WorkflowOutcome::Succeeded {
                results_key: "uploads/x/a_results.json".to_string(),
                groups_key: None,
            },
        };
        assert_eq!(ok.status(), "SUCCEEDED");
        assert_eq!(ok.results_key(), Some("uploads/x/a_results.json"));

        let partial = WorkflowResult {
            outcome: WorkflowOutcome::PartialSuccess,
            ..ok
        };
        assert_eq!(partial.status(), "PARTIAL_SUCCESS");
        assert_eq!(partial.results_key(), None);
    }
}
