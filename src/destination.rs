//! Destination writes: the Strapi REST API.
//!
//! Two seams are consumed by the rest of the crate:
//!
//! * [`MediaStore`]: `POST /api/upload`, multipart, one file per call.
//! * [`RecordStore`]: record creation, natural-key existence checks and
//!   read-only `name → id` lookup maps for relation fields.
//!
//! [`StrapiClient`] implements both. Strapi 4 answers with numeric `id`s and
//! nests fields under `attributes`; Strapi 5 adds an opaque `documentId` and
//! flattens the fields. Both shapes are accepted.
//!
//! The API token is owned by the client for the lifetime of one run and is
//! never logged.

use crate::error::{DestinationError, MigrateError, UploadError};
use crate::pipeline::upload::{MediaStore, MediaUpload, StoredMedia};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Page size used when building lookup maps.
const LOOKUP_PAGE_SIZE: usize = 100;

/// Identifier the destination assigned to a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DestinationId {
    Number(u64),
    Document(String),
}

impl DestinationId {
    /// JSON form used in relation payloads.
    pub fn to_value(&self) -> Value {
        match self {
            DestinationId::Number(n) => json!(n),
            DestinationId::Document(s) => json!(s),
        }
    }

    /// Parse a stored id string, preferring the numeric form.
    pub fn parse(s: &str) -> Self {
        s.parse::<u64>()
            .map(DestinationId::Number)
            .unwrap_or_else(|_| DestinationId::Document(s.to_string()))
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationId::Number(n) => write!(f, "{n}"),
            DestinationId::Document(s) => f.write_str(s),
        }
    }
}

/// Record operations the migrator needs from the destination.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Id of the first record in `collection` whose `field` equals `value`.
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<DestinationId>, DestinationError>;

    /// Create a record and return its id.
    async fn create(
        &self,
        collection: &str,
        data: Value,
    ) -> Result<DestinationId, DestinationError>;

    /// Every record of `collection`, keyed by the string value of `key_field`.
    async fn lookup_map(
        &self,
        collection: &str,
        key_field: &str,
    ) -> Result<HashMap<String, DestinationId>, DestinationError>;
}

// ── Config ───────────────────────────────────────────────────────────────

/// Connection settings for the destination.
#[derive(Clone)]
pub struct StrapiConfig {
    /// Base URL without the `/api` suffix, e.g. `http://localhost:1337`.
    pub base_url: String,
    pub api_token: String,
}

impl fmt::Debug for StrapiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrapiConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

impl StrapiConfig {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: api_token.into(),
        }
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base(), path.trim_start_matches('/'))
    }

    /// Media URLs come back relative when stored on the local provider.
    pub fn absolute_media_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base(), url.trim_start_matches('/'))
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────────

pub struct StrapiClient {
    http: reqwest::Client,
    config: StrapiConfig,
    request_timeout: Duration,
}

impl StrapiClient {
    /// `timeout_secs` bounds record calls only; uploads are bounded by the
    /// pipeline's size-adaptive timeout.
    pub fn new(config: StrapiConfig, timeout_secs: u64) -> Result<Self, MigrateError> {
        if config.base_url.is_empty() || config.api_token.is_empty() {
            return Err(MigrateError::InvalidConfig(
                "Strapi URL and API token are required".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MigrateError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }

    async fn get_json(
        &self,
        operation: &str,
        url: &str,
        query: &[(String, String)],
    ) -> Result<Value, DestinationError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.config.api_token)
            .timeout(self.request_timeout)
            .query(query)
            .send()
            .await
            .map_err(|e| DestinationError::Transport {
                operation: operation.to_string(),
                reason: e.to_string(),
            })?;
        read_json(operation, response).await
    }
}

async fn read_json(
    operation: &str,
    response: reqwest::Response,
) -> Result<Value, DestinationError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DestinationError::Status {
            operation: operation.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| DestinationError::Decode {
            operation: operation.to_string(),
            reason: e.to_string(),
        })
}

#[async_trait]
impl MediaStore for StrapiClient {
    async fn upload_media(&self, upload: MediaUpload) -> Result<StoredMedia, UploadError> {
        let MediaUpload {
            file_name,
            content_type,
            bytes,
            field_hint,
        } = upload;

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(&content_type)
            .map_err(|e| UploadError::InvalidRequest(format!("'{content_type}': {e}")))?;
        let info = file_info(&file_name, field_hint.as_deref());
        let form = reqwest::multipart::Form::new()
            .part("files", part)
            .text("fileInfo", info.to_string());

        let response = self
            .http
            .post(self.config.api_url("upload"))
            .bearer_auth(&self.config.api_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    UploadError::InvalidRequest(e.to_string())
                } else {
                    UploadError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| UploadError::UnexpectedResponse(e.to_string()))?;
        let stored = parse_uploaded(&body, &self.config)?;
        debug!("Stored '{}' as media {}", file_name, stored.id);
        Ok(stored)
    }
}

#[async_trait]
impl RecordStore for StrapiClient {
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<DestinationId>, DestinationError> {
        let operation = format!("find {collection}");
        let query = vec![
            (format!("filters[{field}][$eq]"), value.to_string()),
            ("pagination[pageSize]".to_string(), "1".to_string()),
        ];
        let body = self
            .get_json(&operation, &self.config.api_url(collection), &query)
            .await?;
        let first = body
            .get("data")
            .and_then(Value::as_array)
            .and_then(|items| items.first());
        Ok(first.and_then(record_id))
    }

    async fn create(
        &self,
        collection: &str,
        data: Value,
    ) -> Result<DestinationId, DestinationError> {
        let operation = format!("create {collection}");
        let response = self
            .http
            .post(self.config.api_url(collection))
            .bearer_auth(&self.config.api_token)
            .timeout(self.request_timeout)
            .json(&json!({ "data": data }))
            .send()
            .await
            .map_err(|e| DestinationError::Transport {
                operation: operation.clone(),
                reason: e.to_string(),
            })?;
        let body = read_json(&operation, response).await?;
        body.get("data")
            .and_then(record_id)
            .ok_or_else(|| DestinationError::Decode {
                operation,
                reason: "response has no data.id".into(),
            })
    }

    async fn lookup_map(
        &self,
        collection: &str,
        key_field: &str,
    ) -> Result<HashMap<String, DestinationId>, DestinationError> {
        let operation = format!("list {collection}");
        let url = self.config.api_url(collection);
        let mut map = HashMap::new();
        let mut page = 1usize;

        loop {
            let query = vec![
                ("pagination[page]".to_string(), page.to_string()),
                (
                    "pagination[pageSize]".to_string(),
                    LOOKUP_PAGE_SIZE.to_string(),
                ),
            ];
            let body = self.get_json(&operation, &url, &query).await?;
            let items = body
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for item in &items {
                if let (Some(key), Some(id)) = (record_field(item, key_field), record_id(item)) {
                    map.insert(key, id);
                }
            }

            let page_count = body
                .pointer("/meta/pagination/pageCount")
                .and_then(Value::as_u64)
                .unwrap_or(1) as usize;
            if items.is_empty() || page >= page_count {
                break;
            }
            page += 1;
        }

        info!(
            "Loaded {} '{}' ids keyed by '{}'",
            map.len(),
            collection,
            key_field
        );
        Ok(map)
    }
}

// ── Response shapes ──────────────────────────────────────────────────────

/// `fileInfo` part of an upload: sanitised name plus the field hint as
/// alternative text.
fn file_info(file_name: &str, field_hint: Option<&str>) -> Value {
    let mut info = json!({ "name": file_name });
    if let Some(hint) = field_hint {
        info["alternativeText"] = json!(hint);
        info["caption"] = json!(hint);
    }
    info
}

/// First file of an upload response: `[{ "id": 1, "url": "/uploads/x.jpg" }]`.
fn parse_uploaded(body: &Value, config: &StrapiConfig) -> Result<StoredMedia, UploadError> {
    let file = body
        .as_array()
        .and_then(|files| files.first())
        .unwrap_or(body);
    let id = match file.get("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => {
            return Err(UploadError::UnexpectedResponse(
                "uploaded file has no id".into(),
            ))
        }
    };
    let url = file
        .get("url")
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| UploadError::UnexpectedResponse("uploaded file has no url".into()))?;
    Ok(StoredMedia {
        id,
        url: config.absolute_media_url(url),
    })
}

/// Relation id of a record, preferring `documentId` where present.
fn record_id(item: &Value) -> Option<DestinationId> {
    if let Some(doc) = item.get("documentId").and_then(Value::as_str) {
        return Some(DestinationId::Document(doc.to_string()));
    }
    match item.get("id")? {
        Value::Number(n) => n.as_u64().map(DestinationId::Number),
        Value::String(s) => Some(DestinationId::Document(s.clone())),
        _ => None,
    }
}

/// A record field as a string, from either the flat or the `attributes` shape.
fn record_field(item: &Value, field: &str) -> Option<String> {
    let value = item
        .get(field)
        .or_else(|| item.get("attributes").and_then(|a| a.get(field)))?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
