//! Progress-callback trait for per-record migration events.
//!
//! Inject an [`Arc<dyn MigrationProgressCallback>`] via
//! [`crate::config::MigrationConfigBuilder::progress_callback`] to receive
//! events as each step fetches, uploads and writes its records.
//!
//! # Why callbacks instead of channels?
//!
//! The callback is the least-invasive integration point: the CLI drives an
//! `indicatif` bar from it, a service could forward events to a database or a
//! broadcast channel, and the library knows nothing about either.
//!
//! # Example
//!
//! ```rust
//! use contentful2strapi::{MigrationProgressCallback, MigrationConfig, RecordResult};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl MigrationProgressCallback for CountingCallback {
//!     fn on_record_complete(&self, index: usize, total: usize, result: &RecordResult) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {}", index, total, result.source_id);
//!     }
//! }
//!
//! let config = MigrationConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{RecordResult, StepSummary};
use std::sync::Arc;

/// Called by the migrator as it works through a step.
///
/// Records are processed strictly one after another, so calls never overlap
/// within one run. All methods default to no-ops.
pub trait MigrationProgressCallback: Send + Sync {
    /// Called once per step after the source records have been fetched.
    fn on_step_start(&self, content_type: &str, total_records: usize) {
        let _ = (content_type, total_records);
    }

    /// Called before a record's existence check.
    ///
    /// # Arguments
    /// * `index`    : 1-indexed position within the step
    /// * `total`    : records in the step
    /// * `source_id`: source entry id
    fn on_record_start(&self, index: usize, total: usize, source_id: &str) {
        let _ = (index, total, source_id);
    }

    /// Called after each media upload, successful or not.
    fn on_upload(&self, source_id: &str, file_name: &str, succeeded: bool) {
        let _ = (source_id, file_name, succeeded);
    }

    /// Called once the record is created, skipped or failed.
    fn on_record_complete(&self, index: usize, total: usize, result: &RecordResult) {
        let _ = (index, total, result);
    }

    /// Called once after every record of the step has been attempted.
    fn on_step_complete(&self, summary: &StepSummary) {
        let _ = summary;
    }
}

/// Default callback: ignores every event.
pub struct NoopProgressCallback;

impl MigrationProgressCallback for NoopProgressCallback {}

/// Type stored in [`crate::config::MigrationConfig`].
pub type ProgressCallback = Arc<dyn MigrationProgressCallback>;
