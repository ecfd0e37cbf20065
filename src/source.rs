//! Source content fetch: the Contentful Content Delivery API.
//!
//! Only one request shape is needed: list the entries of one content type,
//! page by page, with linked entries and assets inlined into the `includes`
//! side-table. Every page's side-table is merged into a single
//! [`InclusionIndex`] so the resolver never has to care which page an asset
//! arrived on.

use crate::error::MigrateError;
use crate::pipeline::resolve::InclusionIndex;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Default Content Delivery API host.
pub const DEFAULT_CDN_URL: &str = "https://cdn.contentful.com";

// ── Wire types ───────────────────────────────────────────────────────────

/// `sys` block of an entry or asset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sys {
    pub id: String,
    #[serde(default)]
    pub content_type: Option<ContentTypeLink>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentTypeLink {
    pub sys: LinkSys,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSys {
    pub id: String,
    #[serde(default)]
    pub link_type: Option<String>,
}

/// An entry: either a record being migrated or a linked entry from `includes`.
#[derive(Debug, Clone, Deserialize)]
pub struct Entry {
    pub sys: Sys,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Entry {
    /// Content type id, e.g. `"blogPost"`.
    pub fn content_type(&self) -> Option<&str> {
        self.sys.content_type.as_ref().map(|c| c.sys.id.as_str())
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// An asset from `includes.Asset`.
#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub sys: Sys,
    #[serde(default)]
    pub fields: AssetFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetFields {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub file: Option<AssetFile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFile {
    pub url: String,
    #[serde(default)]
    pub file_name: String,
    pub content_type: String,
    #[serde(default)]
    pub details: FileDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileDetails {
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub image: Option<ImageDetails>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ImageDetails {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Includes {
    #[serde(default, rename = "Asset")]
    pub assets: Vec<Asset>,
    #[serde(default, rename = "Entry")]
    pub entries: Vec<Entry>,
}

/// One page of `GET /entries`.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryCollection {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub items: Vec<Entry>,
    #[serde(default)]
    pub includes: Includes,
}

/// Every record of one content type plus the merged side-table.
#[derive(Debug, Default)]
pub struct EntryBatch {
    pub records: Vec<Entry>,
    pub includes: InclusionIndex,
}

impl EntryBatch {
    /// Append one page, merging its side-table.
    ///
    /// Items are indexed too: the API omits an entry from `includes` when it
    /// already appears in `items`, but other items may still link to it.
    pub fn extend(&mut self, page: EntryCollection) {
        self.includes.add_includes(page.includes);
        for item in &page.items {
            self.includes.add_entry(item.clone());
        }
        self.records.extend(page.items);
    }
}

impl From<EntryCollection> for EntryBatch {
    fn from(page: EntryCollection) -> Self {
        let mut batch = EntryBatch::default();
        batch.extend(page);
        batch
    }
}

/// Turn a protocol-relative asset URL (`//images.ctfassets.net/…`) into an
/// absolute `https:` URL. Absolute URLs pass through.
pub fn absolute_asset_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_string()
    }
}

// ── Client ───────────────────────────────────────────────────────────────

/// Anything that can list the records of one content model.
#[async_trait]
pub trait EntrySource: Send + Sync {
    /// Every entry of `content_type`, fetched `page_size` at a time, with
    /// links inlined `include` levels deep.
    async fn fetch_entries(
        &self,
        content_type: &str,
        page_size: usize,
        include: u8,
    ) -> Result<EntryBatch, MigrateError>;
}

/// Connection settings for one source space.
#[derive(Clone)]
pub struct ContentfulConfig {
    pub base_url: String,
    pub space_id: String,
    pub environment: String,
    pub access_token: String,
    /// Request a single locale so fields come back unwrapped.
    pub locale: Option<String>,
}

impl fmt::Debug for ContentfulConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentfulConfig")
            .field("base_url", &self.base_url)
            .field("space_id", &self.space_id)
            .field("environment", &self.environment)
            .field("access_token", &"<redacted>")
            .field("locale", &self.locale)
            .finish()
    }
}

impl ContentfulConfig {
    pub fn new(space_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_CDN_URL.to_string(),
            space_id: space_id.into(),
            environment: "master".to_string(),
            access_token: access_token.into(),
            locale: None,
        }
    }

    fn entries_url(&self) -> String {
        format!(
            "{}/spaces/{}/environments/{}/entries",
            self.base_url.trim_end_matches('/'),
            self.space_id,
            self.environment
        )
    }
}

/// Thin read-only client for the delivery API.
pub struct ContentfulClient {
    http: reqwest::Client,
    config: ContentfulConfig,
}

impl ContentfulClient {
    pub fn new(config: ContentfulConfig, timeout_secs: u64) -> Result<Self, MigrateError> {
        if config.space_id.is_empty() || config.access_token.is_empty() {
            return Err(MigrateError::InvalidConfig(
                "Contentful space id and access token are required".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| MigrateError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl EntrySource for ContentfulClient {
    async fn fetch_entries(
        &self,
        content_type: &str,
        page_size: usize,
        include: u8,
    ) -> Result<EntryBatch, MigrateError> {
        let mut batch = EntryBatch::default();
        let mut skip = 0usize;

        loop {
            let page = self
                .fetch_page(content_type, page_size, skip, include)
                .await?;
            let received = page.items.len();
            let total = page.total;
            batch.extend(page);
            skip += received;

            debug!(
                "Fetched {} '{}' entries ({}/{})",
                received, content_type, skip, total
            );
            if received == 0 || skip >= total {
                break;
            }
        }

        info!(
            "Fetched {} '{}' entries, {} included assets, {} included entries",
            batch.records.len(),
            content_type,
            batch.includes.asset_count(),
            batch.includes.entry_count()
        );
        Ok(batch)
    }
}

impl ContentfulClient {
    async fn fetch_page(
        &self,
        content_type: &str,
        limit: usize,
        skip: usize,
        include: u8,
    ) -> Result<EntryCollection, MigrateError> {
        let url = self.config.entries_url();
        let mut query = vec![
            ("content_type", content_type.to_string()),
            ("limit", limit.to_string()),
            ("skip", skip.to_string()),
            ("include", include.to_string()),
        ];
        if let Some(ref locale) = self.config.locale {
            query.push(("locale", locale.clone()));
        }

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.access_token)
            .query(&query)
            .send()
            .await
            .map_err(|e| MigrateError::SourceFetch {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(MigrateError::SourceFetch {
                url,
                reason: format!("HTTP {}", response.status()),
            });
        }

        response
            .json::<EntryCollection>()
            .await
            .map_err(|e| MigrateError::SourceDecode(e.to_string()))
    }
}
