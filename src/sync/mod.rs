//! Sync orchestration
//!
//! One run: fetch schema, fetch snapshot, reconcile, apply creates, updates
//! and deletes, re-fetch, dedupe, re-fetch, report. See [`SyncRunner`].

mod runner;

pub use runner::SyncRunner;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::client::{BatchError, BatchOutcome};
use crate::coerce::CoercionWarning;
use crate::reconcile::{DroppedRow, ReconciliationPlan};

/// Sizes of the three plan sets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanCounts {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
}

impl From<&ReconciliationPlan> for PlanCounts {
    fn from(plan: &ReconciliationPlan) -> Self {
        Self {
            create: plan.to_create.len(),
            update: plan.to_update.len(),
            delete: plan.to_delete.len(),
        }
    }
}

/// Result of a dedupe pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupeOutcome {
    /// Records examined
    pub scanned: usize,
    /// Non-first records found per key
    pub duplicates: usize,
    /// Duplicates actually deleted
    pub removed: usize,
    pub errors: Vec<BatchError>,
}

/// Summary of one sync run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub table: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Local data rows considered
    pub rows: usize,
    /// Records in the initial snapshot
    pub fetched: usize,
    pub planned: PlanCounts,
    /// Records the remote accepted, per operation
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub duplicates_removed: usize,
    /// Count after applying the plan; `None` if the re-fetch failed
    pub total_after_sync: Option<usize>,
    /// Count after the dedupe pass; `None` if the re-fetch failed
    pub final_total: Option<usize>,
    pub dropped_rows: Vec<DroppedRow>,
    pub warnings: Vec<CoercionWarning>,
    pub batch_errors: Vec<BatchError>,
}

impl SyncReport {
    pub(crate) fn new(table: &str, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            table: table.to_string(),
            started_at: now,
            completed_at: now,
            dry_run,
            rows: 0,
            fetched: 0,
            planned: PlanCounts::default(),
            created: 0,
            updated: 0,
            deleted: 0,
            duplicates_removed: 0,
            total_after_sync: None,
            final_total: None,
            dropped_rows: Vec::new(),
            warnings: Vec::new(),
            batch_errors: Vec::new(),
        }
    }

    pub(crate) fn absorb(&mut self, outcome: BatchOutcome) {
        use crate::client::BatchOperation;
        match outcome.operation {
            BatchOperation::Create => self.created += outcome.succeeded,
            BatchOperation::Update => self.updated += outcome.succeeded,
            BatchOperation::Delete => self.deleted += outcome.succeeded,
        }
        self.batch_errors.extend(outcome.errors);
    }

    /// No batch chunk failed
    pub fn is_clean(&self) -> bool {
        self.batch_errors.is_empty()
    }

    pub fn summary(&self) -> String {
        let count = |n: Option<usize>| n.map_or_else(|| "unknown".to_string(), |n| n.to_string());
        if self.dry_run {
            return format!(
                "dry run on {}: {} rows, {} remote records; would create {}, update {}, delete {}",
                self.table,
                self.rows,
                self.fetched,
                self.planned.create,
                self.planned.update,
                self.planned.delete
            );
        }
        format!(
            "{}: created {}, updated {}, deleted {}, duplicates removed {}; {} records after sync, {} final ({} batch errors, {} warnings)",
            self.table,
            self.created,
            self.updated,
            self.deleted,
            self.duplicates_removed,
            count(self.total_after_sync),
            count(self.final_total),
            self.batch_errors.len(),
            self.warnings.len()
        )
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary())
    }
}
