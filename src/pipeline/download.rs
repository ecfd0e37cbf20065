//! Asset download into a scoped temporary directory.
//!
//! ## Why a temp dir and not just memory?
//!
//! The original and the transcoded copy both live on disk for the duration
//! of one upload, inside a `TempDir` owned by the pipeline. Dropping (or
//! closing) the dir removes both files whatever happened in between, so a
//! failed record never leaves multi-megabyte leftovers behind.
//!
//! Redirects are limited to a single hop: asset CDNs redirect once to a
//! regional host, anything longer is treated as a broken link.

use crate::error::UploadError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// A downloaded asset on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
}

/// Fetches a remote asset into a local file.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Download `url` and write it to `dest`.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<DownloadedFile, UploadError>;
}

/// `reqwest`-backed fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(1))
            .build()
            .map_err(|e| UploadError::InvalidRequest(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<DownloadedFile, UploadError> {
        info!("Downloading asset from: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_error(url, &e))?;

        if !response.status().is_success() {
            return Err(UploadError::DownloadStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| download_error(url, &e))?;

        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| UploadError::Io(format!("Failed to write temp file: {e}")))?;

        debug!("Downloaded {} bytes to {}", bytes.len(), dest.display());
        Ok(DownloadedFile {
            path: dest.to_path_buf(),
        })
    }
}

/// Network failures are worth another attempt; malformed URLs and redirect
/// loops are not.
fn download_error(url: &str, e: &reqwest::Error) -> UploadError {
    let retryable = !(e.is_builder() || e.is_redirect());
    UploadError::Download {
        url: url.to_string(),
        reason: e.to_string(),
        retryable,
    }
}

/// Last path segment of `url` if it looks like a file name.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if !last.is_empty() && last.contains('.') {
        Some(last.to_string())
    } else {
        None
    }
}
