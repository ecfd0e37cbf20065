//! Per-record outcomes and run statistics.

use crate::destination::DestinationId;
use crate::error::DestinationError;
use serde::Serialize;

/// What happened to one source record.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    Created { destination_id: DestinationId },
    /// A record with the same natural key already existed.
    Skipped { existing_id: DestinationId },
    /// The record write (or its existence check) failed; the run went on.
    Failed { error: DestinationError },
}

/// Result of migrating one source record.
#[derive(Debug, Clone, Serialize)]
pub struct RecordResult {
    pub source_id: String,
    pub outcome: RecordOutcome,
    pub uploads_attempted: usize,
    pub uploads_failed: usize,
    /// Converter diagnostics plus unresolved references.
    pub diagnostics: usize,
    pub duration_ms: u64,
}

impl RecordResult {
    pub fn new(source_id: impl Into<String>, outcome: RecordOutcome) -> Self {
        Self {
            source_id: source_id.into(),
            outcome,
            uploads_attempted: 0,
            uploads_failed: 0,
            diagnostics: 0,
            duration_ms: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, RecordOutcome::Failed { .. })
    }
}

/// Counts for one mapped content model.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepSummary {
    pub content_type: String,
    pub collection: String,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub uploads_attempted: usize,
    pub uploads_failed: usize,
    pub diagnostics: usize,
}

impl StepSummary {
    pub fn new(content_type: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            collection: collection.into(),
            ..Self::default()
        }
    }

    pub fn processed(&self) -> usize {
        self.created + self.skipped + self.failed
    }

    pub fn record(&mut self, result: &RecordResult) {
        match result.outcome {
            RecordOutcome::Created { .. } => self.created += 1,
            RecordOutcome::Skipped { .. } => self.skipped += 1,
            RecordOutcome::Failed { .. } => self.failed += 1,
        }
        self.uploads_attempted += result.uploads_attempted;
        self.uploads_failed += result.uploads_failed;
        self.diagnostics += result.diagnostics;
    }
}

/// Statistics for a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationStats {
    pub steps: Vec<StepSummary>,
    /// Every record result, in processing order.
    pub records: Vec<RecordResult>,
    pub total_duration_ms: u64,
}

impl MigrationStats {
    pub fn created(&self) -> usize {
        self.steps.iter().map(|s| s.created).sum()
    }

    pub fn skipped(&self) -> usize {
        self.steps.iter().map(|s| s.skipped).sum()
    }

    pub fn failed(&self) -> usize {
        self.steps.iter().map(|s| s.failed).sum()
    }

    /// Records that reached a final outcome.
    pub fn processed(&self) -> usize {
        self.records.len()
    }

    pub fn uploads_failed(&self) -> usize {
        self.steps.iter().map(|s| s.uploads_failed).sum()
    }
}
