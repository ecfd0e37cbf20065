//! Resilient media upload: download → transcode → upload, under retry.
//!
//! One call moves one asset. It never returns an error: a permanently
//! failed upload is `None`, and the caller decides whether the containing
//! record can live without it.
//!
//! ## Attempt loop
//!
//! Each attempt first makes sure the asset is prepared (downloaded and, for
//! raster images, transcoded) and then sends it to the [`MediaStore`] under
//! a size-adaptive timeout. A failed download fails the attempt like any
//! other transient error; once preparation has succeeded its result is
//! reused by later attempts so a flaky destination does not trigger repeated
//! downloads and re-encodes.
//!
//! Attempts are classified through [`UploadError::is_retryable`] and driven
//! by [`RetryState`]: at most `max_attempts`, exponential backoff between
//! them, immediate stop on terminal errors.
//!
//! ## Cleanup
//!
//! The original and transcoded files live in one `TempDir` that is closed
//! before returning, on every path. Cleanup failures are logged at debug
//! level and otherwise ignored.

use crate::config::MigrationConfig;
use crate::error::UploadError;
use crate::pipeline::download::MediaFetcher;
use crate::pipeline::retry::{AttemptState, NextStep, RetryPolicy, RetryState, UploadTimeoutPolicy};
use crate::pipeline::transcode::{
    decide, image_dimensions, transcode, RasterFormat, TranscodeOutcome, BYTES_PER_MB,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Longest file name sent to the destination.
pub const MAX_FILE_NAME_LEN: usize = 120;

/// Bytes and metadata for one destination upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    /// Destination field this media is destined for, passed along as
    /// descriptive metadata.
    pub field_hint: Option<String>,
}

/// What the destination returned for a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub id: String,
    /// Publicly resolvable URL.
    pub url: String,
}

/// The destination media store.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload_media(&self, upload: MediaUpload) -> Result<StoredMedia, UploadError>;
}

/// A successful upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResult {
    pub destination_id: String,
    pub url: String,
    /// Size of the bytes actually uploaded.
    pub size_mb: f64,
    pub file_name: String,
    pub content_type: String,
    pub transcoded: bool,
}

/// Full account of one [`UploadPipeline::upload_with_report`] call.
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub result: Option<UploadResult>,
    pub attempts: u32,
    /// Backoff delays slept between attempts.
    pub delays: Vec<Duration>,
    /// Timeout applied to each upload request actually sent.
    pub timeouts: Vec<Duration>,
    pub final_state: AttemptState,
    pub last_error: Option<UploadError>,
}

/// Asset ready to send.
struct PreparedMedia {
    bytes: Vec<u8>,
    file_name: String,
    content_type: String,
    transcoded: bool,
}

/// Moves single assets from a source URL into the destination store.
#[derive(Clone)]
pub struct UploadPipeline {
    fetcher: Arc<dyn MediaFetcher>,
    store: Arc<dyn MediaStore>,
    retry: RetryPolicy,
    timeouts: UploadTimeoutPolicy,
}

impl UploadPipeline {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        store: Arc<dyn MediaStore>,
        config: &MigrationConfig,
    ) -> Self {
        Self::with_policies(fetcher, store, config.retry, config.upload_timeout)
    }

    pub fn with_policies(
        fetcher: Arc<dyn MediaFetcher>,
        store: Arc<dyn MediaStore>,
        retry: RetryPolicy,
        timeouts: UploadTimeoutPolicy,
    ) -> Self {
        Self {
            fetcher,
            store,
            retry,
            timeouts,
        }
    }

    /// Upload one asset; `None` after a terminal failure or exhausted retries.
    pub async fn upload(
        &self,
        source_url: &str,
        file_name: &str,
        content_type: &str,
        field_hint: Option<&str>,
    ) -> Option<UploadResult> {
        self.upload_with_report(source_url, file_name, content_type, field_hint)
            .await
            .result
    }

    /// Like [`upload`](Self::upload) but also reports attempts, delays and
    /// timeouts.
    pub async fn upload_with_report(
        &self,
        source_url: &str,
        file_name: &str,
        content_type: &str,
        field_hint: Option<&str>,
    ) -> UploadReport {
        let mut retry = RetryState::new(self.retry);
        let mut timeouts = Vec::new();

        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Cannot create temp dir for '{}': {}", file_name, e);
                return UploadReport {
                    result: None,
                    attempts: 0,
                    delays: Vec::new(),
                    timeouts,
                    final_state: AttemptState::Idle,
                    last_error: Some(UploadError::Io(e.to_string())),
                };
            }
        };

        let mut prepared: Option<PreparedMedia> = None;
        let mut result = None;

        while let Some(attempt) = retry.begin_attempt() {
            let outcome = self
                .attempt(
                    temp_dir.path(),
                    &mut prepared,
                    source_url,
                    file_name,
                    content_type,
                    field_hint,
                    &mut timeouts,
                )
                .await;

            match outcome {
                Ok(uploaded) => {
                    info!(
                        "Uploaded '{}' as {} ({:.2} MB, attempt {})",
                        uploaded.file_name, uploaded.destination_id, uploaded.size_mb, attempt
                    );
                    retry.succeed();
                    result = Some(uploaded);
                    break;
                }
                Err(e) => {
                    warn!(
                        "Upload of '{}': attempt {}/{} failed: {}",
                        file_name, attempt, self.retry.max_attempts, e
                    );
                    match retry.fail(e) {
                        NextStep::Retry { delay } => {
                            warn!(
                                "Upload of '{}': retry {}/{} after {}ms",
                                file_name,
                                attempt + 1,
                                self.retry.max_attempts,
                                delay.as_millis()
                            );
                            sleep(delay).await;
                        }
                        NextStep::GiveUp => break,
                    }
                }
            }
        }

        if result.is_none() {
            warn!(
                "Giving up on '{}' after {} attempt(s)",
                file_name,
                retry.attempts()
            );
        }

        if let Err(e) = temp_dir.close() {
            debug!("Ignoring temp dir cleanup failure: {}", e);
        }

        UploadReport {
            result,
            attempts: retry.attempts(),
            delays: retry.delays().to_vec(),
            timeouts,
            final_state: retry.state().clone(),
            last_error: retry.last_error().cloned(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        dir: &Path,
        prepared: &mut Option<PreparedMedia>,
        source_url: &str,
        file_name: &str,
        content_type: &str,
        field_hint: Option<&str>,
        timeouts: &mut Vec<Duration>,
    ) -> Result<UploadResult, UploadError> {
        if prepared.is_none() {
            *prepared = Some(self.prepare(dir, source_url, file_name, content_type).await?);
        }
        let Some(media) = prepared.as_ref() else {
            return Err(UploadError::Io("prepared media missing".into()));
        };

        let size_mb = media.bytes.len() as f64 / BYTES_PER_MB;
        let timeout = self.timeouts.timeout_for(size_mb);
        timeouts.push(timeout);

        let request = MediaUpload {
            file_name: media.file_name.clone(),
            content_type: media.content_type.clone(),
            bytes: media.bytes.clone(),
            field_hint: field_hint.map(str::to_string),
        };

        // Dropping the future on timeout cancels the in-flight request.
        let stored = match tokio::time::timeout(timeout, self.store.upload_media(request)).await {
            Ok(stored) => stored?,
            Err(_) => {
                return Err(UploadError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                })
            }
        };

        Ok(UploadResult {
            destination_id: stored.id,
            url: stored.url,
            size_mb,
            file_name: media.file_name.clone(),
            content_type: media.content_type.clone(),
            transcoded: media.transcoded,
        })
    }

    /// Download the asset and, for raster images, run the transcoder.
    async fn prepare(
        &self,
        dir: &Path,
        source_url: &str,
        file_name: &str,
        content_type: &str,
    ) -> Result<PreparedMedia, UploadError> {
        let safe_name = sanitize_file_name(file_name);
        let original_path = dir.join(format!("original-{safe_name}"));

        let downloaded = self.fetcher.fetch(source_url, &original_path).await?;
        let bytes = tokio::fs::read(&downloaded.path)
            .await
            .map_err(|e| UploadError::Io(format!("Failed to read temp file: {e}")))?;

        let Some(format) = RasterFormat::from_content_type(content_type) else {
            debug!("'{}' is {}; no transcoding", safe_name, content_type);
            return Ok(PreparedMedia {
                bytes,
                file_name: safe_name,
                content_type: content_type.to_string(),
                transcoded: false,
            });
        };

        let size_mb = bytes.len() as f64 / BYTES_PER_MB;
        let (bytes, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = image_dimensions(&bytes)
                .and_then(|(w, h)| transcode(&bytes, &decide(size_mb, w, h, format)));
            (bytes, outcome)
        })
        .await
        .map_err(|e| UploadError::Io(format!("Transcode task panicked: {e}")))?;

        match outcome {
            Ok(TranscodeOutcome::Transcoded(img)) => {
                let final_name = replace_extension(&safe_name, img.extension);
                let transcoded_path = dir.join(format!("transcoded-{final_name}"));
                tokio::fs::write(&transcoded_path, &img.bytes)
                    .await
                    .map_err(|e| UploadError::Io(format!("Failed to write temp file: {e}")))?;
                info!(
                    "Transcoded '{}': {} → {} bytes",
                    safe_name,
                    bytes.len(),
                    img.bytes.len()
                );
                Ok(PreparedMedia {
                    bytes: img.bytes,
                    file_name: final_name,
                    content_type: img.content_type.to_string(),
                    transcoded: true,
                })
            }
            Ok(TranscodeOutcome::KeptOriginal { .. } | TranscodeOutcome::Skipped) => {
                Ok(PreparedMedia {
                    bytes,
                    file_name: safe_name,
                    content_type: content_type.to_string(),
                    transcoded: false,
                })
            }
            Err(e) => {
                // The original is still a valid file; upload it unchanged.
                warn!("Transcoding '{}' failed, uploading original: {}", safe_name, e);
                Ok(PreparedMedia {
                    bytes,
                    file_name: safe_name,
                    content_type: content_type.to_string(),
                    transcoded: false,
                })
            }
        }
    }
}

// ── File names ───────────────────────────────────────────────────────────

static RE_UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());
static RE_UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").unwrap());
static RE_DOTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}").unwrap());
static RE_UNDERSCORE_BEFORE_DOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+\.").unwrap());

/// Reduce `name` to `[A-Za-z0-9._-]`, without leading dots, dot runs or
/// stray underscores, at most [`MAX_FILE_NAME_LEN`] bytes. Never empty.
pub fn sanitize_file_name(name: &str) -> String {
    let s = RE_UNSAFE_CHARS.replace_all(name.trim(), "_");
    let s = RE_UNDERSCORES.replace_all(&s, "_");
    let s = RE_DOTS.replace_all(&s, ".");
    let s = RE_UNDERSCORE_BEFORE_DOT.replace_all(&s, ".");
    let s = s.trim_matches(|c| c == '.' || c == '_' || c == '-');

    if s.is_empty() {
        return "file".to_string();
    }
    truncate_keeping_extension(s, MAX_FILE_NAME_LEN)
}

/// Swap the extension of `name` for `ext`, or append it if there is none.
pub fn replace_extension(name: &str, ext: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{stem}.{ext}"),
        _ => format!("{name}.{ext}"),
    }
}

// Sanitised names are ASCII, so byte slicing is safe.
fn truncate_keeping_extension(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if ext.len() + 1 < max => {
            let keep = max - ext.len() - 1;
            format!("{}.{}", &stem[..keep.min(stem.len())], ext)
        }
        _ => name[..max].to_string(),
    }
}
