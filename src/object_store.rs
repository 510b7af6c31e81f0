//! Object store gateway.
//!
//! The workflow stores uploaded PDFs and persists analysis output through the
//! [`ObjectStore`] trait. [`S3ObjectStore`] talks to Amazon S3 (or an
//! S3-compatible endpoint such as MinIO or LocalStack) using signed REST
//! calls; [`InMemoryObjectStore`] keeps objects in a `HashMap` for tests and
//! local experiments.
//!
//! # Key layout
//!
//! ```text
//! uploads/<uuid>/<filename>.pdf          uploaded document
//! uploads/<uuid>/<stem>_results.json     raw analysis pages
//! uploads/<uuid>/<stem>_groups.json      grouped narrative
//! ```

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use quick_xml::events::Event;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::aws::{encode_key_path, split_endpoint, AwsCredentials, SigV4Signer, SignableRequest};
use crate::config::StorageConfig;
use crate::error::GatewayError;

pub const CONTENT_TYPE_PDF: &str = "application/pdf";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Byte storage addressed by string keys within a single bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket (or namespace) holding every key of this store.
    fn bucket(&self) -> &str;

    /// Store `bytes` under `key`, replacing any existing object.
    async fn put_bytes(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), GatewayError>;

    /// Fetch the object at `key`. Missing objects yield [`GatewayError::NotFound`].
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, GatewayError>;

    /// Whether an object exists at `key`.
    async fn exists(&self, key: &str) -> Result<bool, GatewayError>;
}

/// Serialize `value` as JSON and store it under `key`.
pub async fn put_json<T>(store: &dyn ObjectStore, key: &str, value: &T) -> Result<(), GatewayError>
where
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(value)?;
    store.put_bytes(key, body, CONTENT_TYPE_JSON).await
}

/// Fetch the object at `key` and parse it as JSON.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<T, GatewayError> {
    let bytes = store.get_bytes(key).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

// ============ Key conventions ============

/// Strip any directory components a client may have sent with the filename.
pub fn sanitize_filename(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim()
}

/// Fresh key for an uploaded document: `<prefix>/<uuid>/<filename>`.
pub fn document_key(prefix: &str, filename: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let name = sanitize_filename(filename);
    if prefix.is_empty() {
        format!("{}/{}", Uuid::new_v4(), name)
    } else {
        format!("{}/{}/{}", prefix, Uuid::new_v4(), name)
    }
}

/// Key next to `key` built from its stem and `suffix`:
/// `a/b/c.pdf` + `_results.json` → `a/b/c_results.json`.
pub fn sibling_key(key: &str, suffix: &str) -> String {
    let (parent, name) = match key.rsplit_once('/') {
        Some((parent, name)) => (Some(parent), name),
        None => (None, key),
    };
    let stem = match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    };
    match parent {
        Some(parent) if !parent.is_empty() => format!("{}/{}{}", parent, stem, suffix),
        _ => format!("{}{}", stem, suffix),
    }
}

/// Where the raw analysis results of `document_key` are persisted.
pub fn results_key_for(document_key: &str) -> String {
    sibling_key(document_key, "_results.json")
}

/// Where the grouped narrative of `document_key` is persisted.
pub fn groups_key_for(document_key: &str) -> String {
    sibling_key(document_key, "_groups.json")
}

// ═══════════════════════════════════════════════════════════════════════
// S3
// ═══════════════════════════════════════════════════════════════════════

/// Amazon S3 object store using the REST API with SigV4 signing.
pub struct S3ObjectStore {
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    signer: SigV4Signer,
    client: reqwest::Client,
}

impl S3ObjectStore {
    pub fn new(config: &StorageConfig, credentials: AwsCredentials) -> Self {
        Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            signer: SigV4Signer::new(credentials, &config.region, "s3"),
            client: reqwest::Client::new(),
        }
    }

    /// Build a store with credentials from the environment.
    pub fn from_env(config: &StorageConfig) -> Result<Self, GatewayError> {
        Ok(Self::new(config, AwsCredentials::from_env()?))
    }

    /// `(url, host, canonical_uri)` for `key`.
    ///
    /// Custom endpoints use path-style addressing (`/<bucket>/<key>`);
    /// AWS uses virtual-hosted style.
    fn object_url(&self, key: &str) -> (String, String, String) {
        let encoded_key = encode_key_path(key);
        match self.endpoint_url {
            Some(ref endpoint) => {
                let (scheme, host) = split_endpoint(endpoint);
                let path = format!("/{}/{}", self.bucket, encoded_key);
                (format!("{}://{}{}", scheme, host, path), host.to_string(), path)
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let path = format!("/{}", encoded_key);
                (format!("https://{}{}", host, path), host, path)
            }
        }
    }

    async fn send(
        &self,
        method: reqwest::Method,
        key: &str,
        extra_headers: &[(String, String)],
        body: Vec<u8>,
        operation: &'static str,
    ) -> Result<reqwest::Response, GatewayError> {
        let (url, host, canonical_uri) = self.object_url(key);
        let signed = self.signer.sign(&SignableRequest {
            method: method.as_str(),
            host: &host,
            canonical_uri: &canonical_uri,
            query: &[],
            headers: extra_headers,
            payload: &body,
        });

        let mut req = self.client.request(method, &url);
        for (name, value) in &signed {
            req = req.header(name.as_str(), value.as_str());
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        req.send()
            .await
            .map_err(|source| GatewayError::Http { operation, source })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_bytes(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), GatewayError> {
        let size = bytes.len();
        let headers = vec![
            ("content-type".to_string(), content_type.to_string()),
            (
                "x-amz-acl".to_string(),
                "bucket-owner-full-control".to_string(),
            ),
        ];
        let resp = self
            .send(reqwest::Method::PUT, key, &headers, bytes, "S3 PutObject")
            .await?;
        check_response(resp, "S3 PutObject").await.inspect_err(|e| {
            error!("Error uploading s3://{}/{}: {}", self.bucket, key, e);
        })?;
        info!("Uploaded {} bytes to s3://{}/{}", size, self.bucket, key);
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, GatewayError> {
        let resp = self
            .send(reqwest::Method::GET, key, &[], Vec::new(), "S3 GetObject")
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(format!("s3://{}/{}", self.bucket, key)));
        }
        let resp = check_response(resp, "S3 GetObject").await?;
        let bytes = resp.bytes().await.map_err(|source| GatewayError::Http {
            operation: "S3 GetObject",
            source,
        })?;
        debug!("Downloaded s3://{}/{} ({} bytes)", self.bucket, key, bytes.len());
        Ok(bytes.to_vec())
    }

    async fn exists(&self, key: &str) -> Result<bool, GatewayError> {
        let resp = self
            .send(reqwest::Method::HEAD, key, &[], Vec::new(), "S3 HeadObject")
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_response(resp, "S3 HeadObject").await?;
        Ok(true)
    }
}

/// Turn a non-success response into [`GatewayError::Status`], extracting
/// the AWS error code from an XML body when present.
async fn check_response(
    resp: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, GatewayError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(GatewayError::Status {
        operation,
        status,
        code: parse_error_code(&body),
        body: body.chars().take(500).collect(),
    })
}

/// Extract `<Code>` from an S3 XML error document.
fn parse_error_code(xml: &str) -> Option<String> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut in_code = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => in_code = e.local_name().as_ref() == b"Code",
            Ok(Event::Text(t)) if in_code => {
                return t.unescape().ok().map(|c| c.trim().to_string());
            }
            Ok(Event::End(_)) => in_code = false,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// In-memory
// ═══════════════════════════════════════════════════════════════════════

struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// In-memory object store for tests and local experiments.
pub struct InMemoryObjectStore {
    bucket: String,
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|o| o.content_type.clone())
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_bytes(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), GatewayError> {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, GatewayError> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| GatewayError::NotFound(format!("memory://{}/{}", self.bucket, key)))
    }

    async fn exists(&self, key: &str) -> Result<bool, GatewayError> {
        Ok(self
            .objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_key_derivation() {
        assert_eq!(results_key_for("a/b/c.pdf"), "a/b/c_results.json");
        assert_eq!(groups_key_for("a/b/c.pdf"), "a/b/c_groups.json");
        assert_eq!(results_key_for("c.pdf"), "c_results.json");
        assert_eq!(results_key_for("a/report.final.pdf"), "a/report.final_results.json");
        assert_eq!(results_key_for("a/noext"), "a/noext_results.json");
        assert_eq!(results_key_for("a/.hidden"), "a/.hidden_results.json");
    }

    #[test]
    fn test_document_key_layout() {
        let key = document_key("uploads", "report.pdf");
        let parts: Vec<&str> = key.split('/').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "uploads");
        assert!(Uuid::parse_str(parts[1]).is_ok());
        assert_eq!(parts[2], "report.pdf");

        let key = document_key("/documents/", "../../etc/x.pdf");
        assert!(key.starts_with("documents/"));
        assert!(key.ends_with("/x.pdf"));
        assert!(!key.contains(".."));
    }

    #[test]
    fn test_parse_error_code() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist</Message></Error>"#;
        assert_eq!(parse_error_code(xml).as_deref(), Some("NoSuchBucket"));
        assert_eq!(parse_error_code("not xml at all"), None);
    }

    #[test]
    fn test_path_style_url_for_custom_endpoint() {
        let config = StorageConfig {
            endpoint_url: Some("http://localhost:9000/".to_string()),
            bucket: "docs".to_string(),
            ..StorageConfig::default()
        };
        let creds = AwsCredentials {
            access_key_id: "a".to_string(),
            secret_access_key: "b".to_string(),
            session_token: None,
        };
        let store = S3ObjectStore::new(&config, creds);
        let (url, host, path) = store.object_url("uploads/x/my file.pdf");
        assert_eq!(url, "http://localhost:9000/docs/uploads/x/my%20file.pdf");
        assert_eq!(host, "localhost:9000");
        assert_eq!(path, "/docs/uploads/x/my%20file.pdf");
    }

    #[tokio::test]
    async fn test_in_memory_json_round_trip() {
        let store = InMemoryObjectStore::new("test");
        let value = serde_json::json!({ "JobId": "1", "Pages": [1, 2] });
        put_json(&store, "a/b_results.json", &value).await.unwrap();

        assert!(store.exists("a/b_results.json").await.unwrap());
        assert!(!store.exists("missing").await.unwrap());
        assert_eq!(
            store.content_type("a/b_results.json").as_deref(),
            Some(CONTENT_TYPE_JSON)
        );

        let back: serde_json::Value = get_json(&store, "a/b_results.json").await.unwrap();
        assert_eq!(back, value);

        let err = store.get_bytes("missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }
}
