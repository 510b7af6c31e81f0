//! Analysis backend gateway.
//!
//! An [`AnalysisBackend`] runs asynchronous layout analysis over a document
//! that already lives in the object store. The workflow only needs three
//! operations: start a job, read its status, and page through its results.
//!
//! [`TextractBackend`] implements the trait against Amazon Textract's JSON
//! API (`StartDocumentAnalysis` / `GetDocumentAnalysis`) with the `LAYOUT`
//! feature, signed with SigV4.
//!
//! # Pagination
//!
//! `GetDocumentAnalysis` returns results in pages linked by `NextToken`.
//! [`AnalysisBackend::fetch_results`] follows the tokens until none is
//! returned and keeps every raw response page, in arrival order, in
//! [`AnalysisResult::pages`].

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::aws::{split_endpoint, AwsCredentials, SigV4Signer, SignableRequest};
use crate::config::AnalysisConfig;
use crate::error::GatewayError;
use crate::models::{AnalysisResult, AnalysisStatus};

/// Where completion events for a job are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTarget {
    pub topic_arn: String,
    pub role_arn: String,
}

impl NotificationTarget {
    /// A target exists only when both the topic and the role are configured.
    pub fn from_config(config: &AnalysisConfig) -> Option<Self> {
        match (&config.sns_topic_arn, &config.role_arn) {
            (Some(topic), Some(role)) if !topic.is_empty() && !role.is_empty() => Some(Self {
                topic_arn: topic.clone(),
                role_arn: role.clone(),
            }),
            _ => None,
        }
    }
}

/// A remote OCR/layout engine that analyzes stored documents asynchronously.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Submit an analysis job for `bucket`/`key`; returns the backend's job id.
    async fn start_analysis(
        &self,
        bucket: &str,
        key: &str,
        notification: Option<&NotificationTarget>,
    ) -> Result<String, GatewayError>;

    /// Read the current status of `job_id` once.
    async fn check_status(&self, job_id: &str) -> Result<AnalysisStatus, GatewayError>;

    /// Fetch one raw results page. `next_token` is `None` for the first page.
    async fn results_page(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<Value, GatewayError>;

    /// Fetch every results page of a succeeded job.
    ///
    /// Fails with [`GatewayError::NotReady`] when the job has not reached
    /// `SUCCEEDED`.
    async fn fetch_results(&self, job_id: &str) -> Result<AnalysisResult, GatewayError> {
        let mut pages: Vec<Value> = Vec::new();
        let mut next_token: Option<String> = None;
        let mut seen_tokens: HashSet<String> = HashSet::new();

        loop {
            let page = self.results_page(job_id, next_token.as_deref()).await?;
            next_token = page
                .get("NextToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            pages.push(page);
            match &next_token {
                None => break,
                Some(token) if !seen_tokens.insert(token.clone()) => {
                    error!("Job {} returned NextToken {} twice", job_id, token);
                    return Err(GatewayError::Protocol(format!(
                        "repeated NextToken after {} result pages",
                        pages.len()
                    )));
                }
                Some(_) => {}
            }
        }

        let first = &pages[0];
        let status = page_status(first)?;
        if status != AnalysisStatus::Succeeded {
            return Err(GatewayError::NotReady {
                job_id: job_id.to_string(),
                status,
            });
        }

        info!("Retrieved {} result pages for job {}", pages.len(), job_id);
        Ok(AnalysisResult {
            job_id: job_id.to_string(),
            job_status: status,
            document_metadata: first.get("DocumentMetadata").cloned(),
            pages,
        })
    }
}

/// Parse the `JobStatus` field of a raw results page.
pub fn page_status(page: &Value) -> Result<AnalysisStatus, GatewayError> {
    let raw = page
        .get("JobStatus")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Protocol("response has no JobStatus".to_string()))?;
    raw.parse().map_err(GatewayError::Protocol)
}

// ═══════════════════════════════════════════════════════════════════════
// Textract
// ═══════════════════════════════════════════════════════════════════════

const TEXTRACT_TARGET_PREFIX: &str = "Textract";
const MAX_RESULTS_PER_PAGE: u32 = 1000;

/// Amazon Textract client for asynchronous layout analysis.
pub struct TextractBackend {
    url: String,
    host: String,
    job_tag: String,
    signer: SigV4Signer,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct StartResponse {
    #[serde(rename = "JobId")]
    job_id: String,
}

#[derive(Deserialize)]
struct AwsJsonError {
    #[serde(rename = "__type", default)]
    error_type: Option<String>,
}

impl TextractBackend {
    pub fn new(config: &AnalysisConfig, credentials: AwsCredentials) -> Self {
        let (scheme, host) = match config.endpoint_url {
            Some(ref endpoint) => {
                let (scheme, host) = split_endpoint(endpoint);
                (scheme.to_string(), host.to_string())
            }
            None => (
                "https".to_string(),
                format!("textract.{}.amazonaws.com", config.region),
            ),
        };
        Self {
            url: format!("{}://{}/", scheme, host),
            host,
            job_tag: config.job_tag.clone(),
            signer: SigV4Signer::new(credentials, &config.region, "textract"),
            client: reqwest::Client::new(),
        }
    }

    /// Build a client with credentials from the environment.
    pub fn from_env(config: &AnalysisConfig) -> Result<Self, GatewayError> {
        Ok(Self::new(config, AwsCredentials::from_env()?))
    }

    /// Invoke a Textract JSON-protocol action.
    async fn call(&self, action: &'static str, body: &Value) -> Result<Value, GatewayError> {
        let payload = serde_json::to_vec(body)?;
        let headers = vec![
            (
                "content-type".to_string(),
                "application/x-amz-json-1.1".to_string(),
            ),
            (
                "x-amz-target".to_string(),
                format!("{}.{}", TEXTRACT_TARGET_PREFIX, action),
            ),
        ];
        let signed = self.signer.sign(&SignableRequest {
            method: "POST",
            host: &self.host,
            canonical_uri: "/",
            query: &[],
            headers: &headers,
            payload: &payload,
        });

        let mut req = self.client.post(&self.url);
        for (name, value) in &signed {
            req = req.header(name.as_str(), value.as_str());
        }
        let resp = req
            .body(payload)
            .send()
            .await
            .map_err(|source| GatewayError::Http {
                operation: action,
                source,
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|source| GatewayError::Http {
            operation: action,
            source,
        })?;

        if !status.is_success() {
            let code = serde_json::from_str::<AwsJsonError>(&text)
                .ok()
                .and_then(|e| e.error_type)
                .map(|t| t.rsplit('#').next().unwrap_or(&t).to_string());
            return Err(GatewayError::Status {
                operation: action,
                status: status.as_u16(),
                code,
                body: text.chars().take(500).collect(),
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}

/// Request body for `StartDocumentAnalysis`.
fn start_request(
    bucket: &str,
    key: &str,
    job_tag: &str,
    notification: Option<&NotificationTarget>,
) -> Value {
    let mut body = json!({
        "DocumentLocation": {
            "S3Object": { "Bucket": bucket, "Name": key }
        },
        "FeatureTypes": ["LAYOUT"],
        "JobTag": job_tag,
    });
    if let Some(target) = notification {
        body["NotificationChannel"] = json!({
            "SNSTopicArn": target.topic_arn,
            "RoleArn": target.role_arn,
        });
    }
    body
}

#[async_trait]
impl AnalysisBackend for TextractBackend {
    async fn start_analysis(
        &self,
        bucket: &str,
        key: &str,
        notification: Option<&NotificationTarget>,
    ) -> Result<String, GatewayError> {
        let body = start_request(bucket, key, &self.job_tag, notification);
        let resp = self
            .call("StartDocumentAnalysis", &body)
            .await
            .inspect_err(|e| error!("Error starting document analysis: {}", e))?;
        let started: StartResponse = serde_json::from_value(resp)?;
        info!(
            "Started document analysis job {} for {}/{}",
            started.job_id, bucket, key
        );
        Ok(started.job_id)
    }

    async fn check_status(&self, job_id: &str) -> Result<AnalysisStatus, GatewayError> {
        let resp = self
            .call(
                "GetDocumentAnalysis",
                &json!({ "JobId": job_id, "MaxResults": 1 }),
            )
            .await
            .inspect_err(|e| error!("Error checking status of job {}: {}", job_id, e))?;
        let status = page_status(&resp)?;
        info!("Job {} status: {}", job_id, status);
        Ok(status)
    }

    async fn results_page(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let mut body = json!({ "JobId": job_id, "MaxResults": MAX_RESULTS_PER_PAGE });
        if let Some(token) = next_token {
            body["NextToken"] = json!(token);
        }
        self.call("GetDocumentAnalysis", &body)
            .await
            .inspect_err(|e| error!("Error getting results for job {}: {}", job_id, e))
    }
}
