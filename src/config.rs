//! Configuration loading.
//!
//! Settings come from an optional TOML file; every section has defaults
//! suitable for local development. Environment variables (and a `.env`
//! file, loaded by the binary) override the file:
//!
//! | Variable | Setting |
//! |----------|---------|
//! | `AWS_S3_BUCKET_NAME` | `storage.bucket` |
//! | `AWS_REGION` | `storage.region`, `analysis.region` |
//! | `AWS_TEXTRACT_ROLE_ARN` | `analysis.role_arn` |
//! | `AWS_SNS_TOPIC_ARN` | `analysis.sns_topic_arn` |
//! | `DATABASE_URL` | `db.url` |
//! | `API_PREFIX` | `server.api_prefix` |
//! | `DOCRELAY_BIND` | `server.bind` |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub analysis: AnalysisConfig,
    pub monitor: MonitorConfig,
    pub grouping: GroupingConfig,
    pub db: DbConfig,
    pub server: ServerConfig,
    pub workers: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    pub endpoint_url: Option<String>,
    /// First path segment of uploaded document keys.
    pub upload_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "document-processing-bucket".to_string(),
            region: default_region(),
            endpoint_url: None,
            upload_prefix: "uploads".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnalysisConfig {
    pub region: String,
    pub endpoint_url: Option<String>,
    /// Role the backend assumes to publish completion notifications.
    pub role_arn: Option<String>,
    /// Topic receiving completion notifications; polling only when unset.
    pub sns_topic_arn: Option<String>,
    pub job_tag: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            role_arn: None,
            sns_topic_arn: None,
            job_tag: "DocumentLayoutAnalysis".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
    /// When set, the monitor is bounded by poll count instead of wall-clock time.
    pub max_attempts: Option<u32>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            max_wait_secs: 3600,
            max_attempts: None,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GroupingConfig {
    pub enabled: bool,
    pub max_characters: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_characters: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DbConfig {
    pub url: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/docrelay.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            api_prefix: "/api/v1".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum number of jobs monitored at the same time.
    pub concurrency: usize,
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_capacity: 64,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Load configuration from `path` (if it exists), apply environment
/// overrides, and validate.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) if p.exists() => {
            let content = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read config file: {}", p.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse config file")?
        }
        Some(p) => {
            tracing::debug!("config file {} not found, using defaults", p.display());
            Config::default()
        }
        None => Config::default(),
    };

    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Override settings from environment lookups. Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(bucket) = get("AWS_S3_BUCKET_NAME") {
            self.storage.bucket = bucket;
        }
        if let Some(region) = get("AWS_REGION") {
            self.storage.region = region.clone();
            self.analysis.region = region;
        }
        if let Some(role) = get("AWS_TEXTRACT_ROLE_ARN") {
            self.analysis.role_arn = Some(role);
        }
        if let Some(topic) = get("AWS_SNS_TOPIC_ARN") {
            self.analysis.sns_topic_arn = Some(topic);
        }
        if let Some(url) = get("DATABASE_URL") {
            self.db.url = url;
        }
        if let Some(prefix) = get("API_PREFIX") {
            self.server.api_prefix = prefix;
        }
        if let Some(bind) = get("DOCRELAY_BIND") {
            self.server.bind = bind;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.bucket.trim().is_empty() {
            bail!("storage.bucket must not be empty");
        }
        if self.monitor.poll_interval_secs == 0 {
            bail!("monitor.poll_interval_secs must be > 0");
        }
        if self.monitor.max_wait_secs == 0 {
            bail!("monitor.max_wait_secs must be > 0");
        }
        if self.monitor.max_attempts == Some(0) {
            bail!("monitor.max_attempts must be > 0 when set");
        }
        if self.grouping.max_characters == 0 {
            bail!("grouping.max_characters must be > 0");
        }
        if self.workers.concurrency == 0 {
            bail!("workers.concurrency must be > 0");
        }
        if self.workers.queue_capacity == 0 {
            bail!("workers.queue_capacity must be > 0");
        }
        let prefix = &self.server.api_prefix;
        if !prefix.is_empty() && !prefix.starts_with('/') {
            bail!("server.api_prefix must start with '/' (got '{}')", prefix);
        }
        Ok(())
    }
}
