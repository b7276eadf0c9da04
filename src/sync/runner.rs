//! The sync cycle over a [`TableApi`]

use chrono::Utc;
use tracing::{error, info, warn};

use super::{DedupeOutcome, PlanCounts, SyncReport};
use crate::client::{AirtableClient, RemoteTable, TableApi};
use crate::config::SyncConfig;
use crate::dedupe::find_duplicates;
use crate::error::{Result, SyncError};
use crate::reconcile::{reconcile, ReconcileOptions, ReconciliationPlan};
use crate::schema::FieldSchema;
use crate::types::{LocalRow, RemoteRecord};

/// Drives schema fetch, reconciliation and batch application for one table
pub struct SyncRunner<A> {
    remote: RemoteTable<A>,
    options: ReconcileOptions,
    dry_run: bool,
}

impl SyncRunner<AirtableClient> {
    /// Runner bound to the HTTP client described by `config`
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let client = AirtableClient::from_config(config)?;
        Ok(Self::new(client, config))
    }
}

impl<A: TableApi> SyncRunner<A> {
    pub fn new(api: A, config: &SyncConfig) -> Self {
        Self {
            remote: RemoteTable::new(api)
                .with_batch_size(config.batch_size)
                .with_batch_delay(config.batch_delay()),
            options: config.reconcile_options(),
            dry_run: false,
        }
    }

    /// Compute and report the plan without mutating the remote table
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn remote(&self) -> &RemoteTable<A> {
        &self.remote
    }

    fn table(&self) -> &str {
        self.remote.api().table_name()
    }

    /// Fetch schema and snapshot, then diff `rows` against them.
    ///
    /// Fails before any mutation if the schema cannot be fetched, declares
    /// no fields, or the snapshot fetch aborts.
    pub async fn plan(&self, rows: &[LocalRow]) -> Result<(Vec<RemoteRecord>, ReconciliationPlan)> {
        let schema = self.load_schema().await?;

        let snapshot = self.remote.fetch_all(None).await.map_err(|e| {
            error!("Aborting sync of {}: {}", self.table(), e);
            e
        })?;
        info!("Fetched {} records from {}", snapshot.len(), self.table());

        let plan = reconcile(rows, &snapshot, &schema, &self.options);
        info!("Plan for {}: {}", self.table(), plan.summary());
        Ok((snapshot, plan))
    }

    async fn load_schema(&self) -> Result<FieldSchema> {
        let schema = self.remote.fetch_schema().await.map_err(|e| {
            error!("Aborting sync of {}: {}", self.table(), e);
            e
        })?;
        if schema.is_empty() {
            error!("Aborting sync of {}: schema declares no fields", self.table());
            return Err(SyncError::SchemaFetch(format!(
                "no fields found for table {}",
                self.table()
            )));
        }
        info!("Loaded schema for {} ({} fields)", self.table(), schema.len());
        Ok(schema)
    }

    /// Run the full cycle for `rows`
    pub async fn run(&self, rows: &[LocalRow]) -> Result<SyncReport> {
        let mut report = SyncReport::new(self.table(), self.dry_run);
        report.rows = rows.len();

        let (snapshot, plan) = self.plan(rows).await?;
        report.fetched = snapshot.len();
        report.planned = PlanCounts::from(&plan);

        let ReconciliationPlan {
            to_create,
            to_update,
            to_delete,
            dropped_rows,
            warnings,
        } = plan;
        report.dropped_rows = dropped_rows;
        report.warnings = warnings;

        if self.dry_run {
            info!("Dry run, no changes sent to {}", self.table());
            report.completed_at = Utc::now();
            return Ok(report);
        }

        report.absorb(self.remote.create_batch(&to_create).await);
        report.absorb(self.remote.update_batch(&to_update).await);
        report.absorb(self.remote.delete_batch(&to_delete).await);

        match self.refetch("post-sync count").await {
            Some(records) => {
                report.total_after_sync = Some(records.len());
                let dedupe = self.remove_duplicates(&records).await;
                report.duplicates_removed = dedupe.removed;
                report.batch_errors.extend(dedupe.errors);
                report.final_total = self.refetch("final count").await.map(|r| r.len());
            }
            None => warn!("Skipping dedupe pass on {}: snapshot unavailable", self.table()),
        }

        report.completed_at = Utc::now();
        if report.is_clean() {
            info!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }
        Ok(report)
    }

    /// Fetch a fresh snapshot and delete every non-first record per key
    pub async fn dedupe_pass(&self) -> Result<DedupeOutcome> {
        let records = self.remote.fetch_all(None).await?;
        if self.dry_run {
            let duplicates = find_duplicates(&records, &self.options.key_field).len();
            info!(
                "Dry run: {} duplicates in {} ({} records)",
                duplicates,
                self.table(),
                records.len()
            );
            return Ok(DedupeOutcome {
                scanned: records.len(),
                duplicates,
                ..Default::default()
            });
        }
        Ok(self.remove_duplicates(&records).await)
    }

    async fn remove_duplicates(&self, records: &[RemoteRecord]) -> DedupeOutcome {
        let duplicates = find_duplicates(records, &self.options.key_field);
        if duplicates.is_empty() {
            info!("No duplicates in {}", self.table());
        } else {
            info!("Removing {} duplicates from {}", duplicates.len(), self.table());
        }

        let outcome = self.remote.delete_batch(&duplicates).await;
        DedupeOutcome {
            scanned: records.len(),
            duplicates: duplicates.len(),
            removed: outcome.succeeded,
            errors: outcome.errors,
        }
    }

    /// Re-fetch after mutation; failures are logged, not propagated
    async fn refetch(&self, purpose: &str) -> Option<Vec<RemoteRecord>> {
        match self.remote.fetch_all(None).await {
            Ok(records) => Some(records),
            Err(e) => {
                error!("Re-fetch for {} of {} failed: {}", purpose, self.table(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryTable;
    use crate::schema::FieldType;

    fn config() -> SyncConfig {
        SyncConfig {
            batch_delay_ms: 0,
            ..Default::default()
        }
    }

    fn table() -> MemoryTable {
        MemoryTable::new("db").with_schema(
            FieldSchema::new()
                .with_field("Email", FieldType::Email)
                .with_field("Name", FieldType::Name),
        )
    }

    #[tokio::test]
    async fn test_empty_schema_aborts() {
        let runner = SyncRunner::new(MemoryTable::new("db"), &config());
        let err = runner.run(&[]).await.unwrap_err();
        assert!(matches!(err, SyncError::SchemaFetch(_)));
    }

    #[tokio::test]
    async fn test_dry_run_does_not_mutate() {
        let api = table();
        api.insert(RemoteRecord::new("r1").with_field("Email", "old@x.com"));
        let runner = SyncRunner::new(api, &config()).dry_run(true);

        let rows = vec![LocalRow::new().with("Email", "new@x.com").with("Name", "N")];
        let report = runner.run(&rows).await.unwrap();

        assert_eq!(report.planned, PlanCounts { create: 1, update: 0, delete: 1 });
        assert_eq!(report.created, 0);
        assert_eq!(report.final_total, None);
        assert_eq!(runner.remote().api().len(), 1);
    }

    #[tokio::test]
    async fn test_dedupe_pass_dry_run_counts_only() {
        let api = table();
        api.insert(RemoteRecord::new("r1").with_field("Email", "a@x.com"));
        api.insert(RemoteRecord::new("r2").with_field("Email", "a@x.com"));
        let runner = SyncRunner::new(api, &config()).dry_run(true);

        let outcome = runner.dedupe_pass().await.unwrap();
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.removed, 0);
        assert_eq!(runner.remote().api().len(), 2);
    }
}
