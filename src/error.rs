//! Error types for the contentful2strapi library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`MigrateError`]: **Fatal** to the call that returned it: bad
//!   configuration, the source API cannot be read, or the run exceeded its
//!   wall-clock budget. Returned as `Err(MigrateError)` from the top-level
//!   migration functions.
//!
//! * [`UploadError`]: a single **upload attempt** failed. The upload pipeline
//!   classifies it with [`UploadError::is_retryable`] and either retries or
//!   gives up; callers only ever see the final `Option<UploadResult>`.
//!
//! * [`DestinationError`]: a destination record write or lookup failed.
//!   When a record write fails it is stored in that record's
//!   [`crate::output::RecordResult`] and the run continues with the next
//!   record.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the contentful2strapi library.
#[derive(Debug, Error)]
pub enum MigrateError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The model mapping file could not be read or parsed.
    #[error("Failed to load mapping file '{path}': {reason}")]
    MappingLoad { path: PathBuf, reason: String },

    // ── Source errors ─────────────────────────────────────────────────────
    /// The source content API could not be reached or returned an error.
    #[error("Failed to fetch '{url}': {reason}\nCheck the space id, environment and access token.")]
    SourceFetch { url: String, reason: String },

    /// The source content API returned a body we could not decode.
    #[error("Unexpected response from source API: {0}")]
    SourceDecode(String),

    // ── Destination errors ────────────────────────────────────────────────
    /// A destination call that the whole step depends on failed
    /// (for example building a lookup map).
    #[error("Destination error: {0}")]
    Destination(#[from] DestinationError),

    // ── Run errors ────────────────────────────────────────────────────────
    /// The run exceeded its wall-clock budget. Carries the counts reached
    /// before it stopped.
    #[error(
        "Migration run exceeded its {budget_secs}s budget after {completed} records \
         ({created} created, {skipped} skipped, {failed} failed)"
    )]
    RunTimeout {
        budget_secs: u64,
        completed: usize,
        created: usize,
        skipped: usize,
        failed: usize,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// One failed upload attempt.
///
/// The variant decides whether the attempt loop may try again; see
/// [`UploadError::is_retryable`].
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// Network failure while downloading the source asset.
    #[error("Failed to download '{url}': {reason}")]
    Download {
        url: String,
        reason: String,
        retryable: bool,
    },

    /// The source asset host answered with a non-success status.
    #[error("Download of '{url}' failed with HTTP {status}")]
    DownloadStatus { url: String, status: u16 },

    /// The destination media endpoint answered with a non-success status.
    #[error("Upload rejected with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection reset, refused, or dropped mid-request.
    #[error("Connection error during upload: {0}")]
    Transport(String),

    /// The per-attempt timeout elapsed and the request was cancelled.
    #[error("Upload attempt timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The image could not be decoded or re-encoded.
    #[error("Transcoding failed: {0}")]
    Transcode(String),

    /// Scoped temp file handling failed.
    #[error("Temp file error: {0}")]
    Io(String),

    /// The request could not even be built (bad URL, bad MIME type).
    #[error("Invalid upload request: {0}")]
    InvalidRequest(String),

    /// The destination accepted the upload but its response was unusable.
    #[error("Unexpected upload response: {0}")]
    UnexpectedResponse(String),
}

impl UploadError {
    /// Whether another attempt may succeed.
    ///
    /// Server errors, request timeouts, connection resets and cancelled
    /// attempts are transient. Every other client error is terminal,
    /// including 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Download { retryable, .. } => *retryable,
            UploadError::DownloadStatus { status, .. } => *status >= 500,
            UploadError::Status { status, .. } => is_retryable_status(*status),
            UploadError::Transport(_) | UploadError::Timeout { .. } => true,
            UploadError::Transcode(_)
            | UploadError::Io(_)
            | UploadError::InvalidRequest(_)
            | UploadError::UnexpectedResponse(_) => false,
        }
    }
}

/// HTTP statuses treated as transient by the upload loop.
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408
}

/// A failed destination record write or lookup.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum DestinationError {
    /// Non-success HTTP status from the destination API.
    #[error("Destination returned HTTP {status} for {operation}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response.
    #[error("Destination request failed for {operation}: {reason}")]
    Transport { operation: String, reason: String },

    /// The response body did not have the expected shape.
    #[error("Could not decode destination response for {operation}: {reason}")]
    Decode { operation: String, reason: String },
}
