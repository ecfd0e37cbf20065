//! Configuration for a migration run.
//!
//! Every tunable of the upload pipeline and the runner lives in
//! [`MigrationConfig`], built via [`MigrationConfigBuilder`]. Connection
//! settings for the two systems stay with their clients
//! ([`crate::source::ContentfulConfig`], [`crate::destination::StrapiConfig`])
//! so a config can be logged without leaking credentials.
//!
//! # Design choice: builder over constructor
//! Most callers only change one or two knobs; the builder lets them rely on
//! documented defaults for the rest and validates the combination once.

use crate::error::MigrateError;
use crate::pipeline::retry::{PacingPolicy, RetryPolicy, UploadTimeoutPolicy};
use crate::progress::ProgressCallback;
use std::fmt;
use std::time::Duration;

/// Largest page the source delivery API accepts.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Deepest link inclusion the source delivery API accepts.
pub const MAX_INCLUDE_DEPTH: u8 = 10;

/// Configuration for one migration run.
///
/// # Example
/// ```rust
/// use contentful2strapi::MigrationConfig;
///
/// let config = MigrationConfig::builder()
///     .max_attempts(5)
///     .run_budget_secs(600)
///     .page_size(50)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct MigrationConfig {
    /// Upload attempt ceiling and backoff. Default: 3 attempts, 3 s base,
    /// 30 s cap.
    pub retry: RetryPolicy,

    /// Size-adaptive per-attempt upload timeout. Default: 30–120 s,
    /// +3 s per MB above 5 MB.
    pub upload_timeout: UploadTimeoutPolicy,

    /// Pause between consecutive uploads of one record.
    pub pacing: PacingPolicy,

    /// Wall-clock budget for a whole run in seconds. Default: 240.
    ///
    /// When it elapses the run stops with [`MigrateError::RunTimeout`]
    /// instead of hanging on a stuck destination.
    pub run_budget_secs: u64,

    /// Timeout for downloading one source asset, in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Timeout for source fetches and destination record calls, in seconds.
    /// Default: 30.
    pub api_timeout_secs: u64,

    /// Entries requested per source page. Range: 1–1000. Default: 100.
    pub page_size: usize,

    /// Link levels the source inlines into its side-table. Range: 0–10.
    /// Default: 2.
    pub include_depth: u8,

    /// Optional per-record event sink.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            upload_timeout: UploadTimeoutPolicy::default(),
            pacing: PacingPolicy::default(),
            run_budget_secs: 240,
            download_timeout_secs: 60,
            api_timeout_secs: 30,
            page_size: 100,
            include_depth: 2,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for MigrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationConfig")
            .field("retry", &self.retry)
            .field("upload_timeout", &self.upload_timeout)
            .field("pacing", &self.pacing)
            .field("run_budget_secs", &self.run_budget_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("page_size", &self.page_size)
            .field("include_depth", &self.include_depth)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn callback>"),
            )
            .finish()
    }
}

impl MigrationConfig {
    pub fn builder() -> MigrationConfigBuilder {
        MigrationConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn run_budget(&self) -> Duration {
        Duration::from_secs(self.run_budget_secs)
    }
}

/// Builder for [`MigrationConfig`].
#[derive(Debug)]
pub struct MigrationConfigBuilder {
    config: MigrationConfig,
}

impl MigrationConfigBuilder {
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.base_delay = Duration::from_millis(ms);
        self
    }

    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.max_delay = Duration::from_millis(ms);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn upload_timeout(mut self, policy: UploadTimeoutPolicy) -> Self {
        self.config.upload_timeout = policy;
        self
    }

    pub fn pacing(mut self, policy: PacingPolicy) -> Self {
        self.config.pacing = policy;
        self
    }

    pub fn run_budget_secs(mut self, secs: u64) -> Self {
        self.config.run_budget_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn page_size(mut self, n: usize) -> Self {
        self.config.page_size = n;
        self
    }

    pub fn include_depth(mut self, depth: u8) -> Self {
        self.config.include_depth = depth;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<MigrationConfig, MigrateError> {
        let c = &self.config;
        if c.retry.max_attempts == 0 {
            return Err(MigrateError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.retry.base_delay > c.retry.max_delay {
            return Err(MigrateError::InvalidConfig(format!(
                "base delay ({}ms) exceeds max delay ({}ms)",
                c.retry.base_delay.as_millis(),
                c.retry.max_delay.as_millis()
            )));
        }
        if c.upload_timeout.floor > c.upload_timeout.ceiling {
            return Err(MigrateError::InvalidConfig(
                "upload timeout floor exceeds its ceiling".into(),
            ));
        }
        if c.run_budget_secs == 0 {
            return Err(MigrateError::InvalidConfig(
                "run budget must be ≥ 1 second".into(),
            ));
        }
        if c.page_size == 0 || c.page_size > MAX_PAGE_SIZE {
            return Err(MigrateError::InvalidConfig(format!(
                "page size must be 1–{MAX_PAGE_SIZE}, got {}",
                c.page_size
            )));
        }
        if c.include_depth > MAX_INCLUDE_DEPTH {
            return Err(MigrateError::InvalidConfig(format!(
                "include depth must be 0–{MAX_INCLUDE_DEPTH}, got {}",
                c.include_depth
            )));
        }
        Ok(self.config)
    }
}
