//! Remote table client
//!
//! Two layers:
//! - [`TableApi`]: one request per call against a single remote table.
//!   [`AirtableClient`] speaks the HTTP wire contract, [`MemoryTable`] keeps
//!   records in memory for tests and rehearsals.
//! - [`RemoteTable`]: pagination, chunking and the fixed inter-chunk delay on
//!   top of any `TableApi`.
//!
//! Batches are best-effort: a failed chunk is logged and recorded in the
//! [`BatchOutcome`], and the remaining chunks still run. Nothing is retried.

mod airtable;
mod memory;

pub use airtable::{AirtableClient, DEFAULT_API_URL};
pub use memory::{MemoryTable, RequestKind, RequestLog};

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::{Result, SyncError};
use crate::schema::FieldSchema;
use crate::types::{NewRecord, RecordId, RecordUpdate, RemoteRecord};

/// Most records the remote accepts in one create/update/delete request
pub const MAX_BATCH_SIZE: usize = 10;

/// Pause after every batch request
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(200);

/// Parameters of one list request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    /// Pagination cursor from the previous page
    pub offset: Option<String>,
    /// Sort ascending by this field
    pub sort_field: Option<String>,
    /// Server-side filter formula
    pub filter_formula: Option<String>,
}

/// One page of the list endpoint: `{records: [...], offset?: string}`
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Page {
    #[serde(default)]
    pub records: Vec<RemoteRecord>,
    #[serde(default)]
    pub offset: Option<String>,
}

/// Single-request operations against one remote table
#[async_trait]
pub trait TableApi: Send + Sync {
    /// Fetch one page of records
    async fn list_page(&self, query: &ListQuery) -> Result<Page>;

    /// Fetch the declared field types of this table
    async fn fetch_schema(&self) -> Result<FieldSchema>;

    /// Create up to [`MAX_BATCH_SIZE`] records
    async fn create_records(&self, records: &[NewRecord]) -> Result<()>;

    /// Update up to [`MAX_BATCH_SIZE`] records
    async fn update_records(&self, records: &[RecordUpdate]) -> Result<()>;

    /// Delete up to [`MAX_BATCH_SIZE`] records
    async fn delete_records(&self, ids: &[RecordId]) -> Result<()>;

    /// Table name, for logs
    fn table_name(&self) -> &str;
}

/// Which batch endpoint an outcome refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOperation {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for BatchOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchOperation::Create => write!(f, "create"),
            BatchOperation::Update => write!(f, "update"),
            BatchOperation::Delete => write!(f, "delete"),
        }
    }
}

/// A chunk that the remote rejected
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchError {
    pub operation: BatchOperation,
    /// 0-based chunk number within the batch
    pub chunk_index: usize,
    /// Records in the chunk
    pub items: usize,
    pub status: Option<u16>,
    pub message: String,
}

/// Result of one batched operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub operation: BatchOperation,
    /// Requests issued (one per chunk)
    pub requests: usize,
    /// Records in chunks the remote accepted
    pub succeeded: usize,
    /// Records in chunks the remote rejected
    pub failed: usize,
    pub errors: Vec<BatchError>,
}

impl BatchOutcome {
    fn new(operation: BatchOperation) -> Self {
        Self {
            operation,
            requests: 0,
            succeeded: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

enum Chunk<'a> {
    Create(&'a [NewRecord]),
    Update(&'a [RecordUpdate]),
    Delete(&'a [RecordId]),
}

/// Paginated fetch and batched mutations over a [`TableApi`]
pub struct RemoteTable<A> {
    api: A,
    batch_size: usize,
    batch_delay: Duration,
}

impl<A: TableApi> RemoteTable<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            batch_size: MAX_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }

    /// Set chunk size, clamped to `1..=MAX_BATCH_SIZE`
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Fetch the table schema
    pub async fn fetch_schema(&self) -> Result<FieldSchema> {
        self.api.fetch_schema().await
    }

    /// Fetch every record, following the offset cursor to the end
    pub async fn fetch_all(&self, sort_field: Option<&str>) -> Result<Vec<RemoteRecord>> {
        self.fetch_pages(ListQuery {
            sort_field: sort_field.map(str::to_string),
            ..Default::default()
        })
        .await
    }

    /// Fetch every record matching a filter formula
    pub async fn fetch_filtered(&self, formula: &str) -> Result<Vec<RemoteRecord>> {
        self.fetch_pages(ListQuery {
            filter_formula: Some(formula.to_string()),
            ..Default::default()
        })
        .await
    }

    async fn fetch_pages(&self, mut query: ListQuery) -> Result<Vec<RemoteRecord>> {
        let mut records = Vec::new();
        let mut pages = 0usize;

        loop {
            let page = self.api.list_page(&query).await.map_err(|e| match e {
                SyncError::RecordFetch(_) => e,
                other => SyncError::RecordFetch(other.to_string()),
            })?;
            pages += 1;
            debug!(
                "Fetched page {} of {} ({} records)",
                pages,
                self.api.table_name(),
                page.records.len()
            );
            records.extend(page.records);

            match page.offset {
                Some(next) if query.offset.as_deref() == Some(next.as_str()) => {
                    return Err(SyncError::RecordFetch(format!(
                        "server repeated pagination offset {}",
                        next
                    )));
                }
                Some(next) => query.offset = Some(next),
                None => break,
            }
        }

        debug!(
            "Fetched {} records from {} in {} pages",
            records.len(),
            self.api.table_name(),
            pages
        );
        Ok(records)
    }

    /// Create records in chunks
    pub async fn create_batch(&self, records: &[NewRecord]) -> BatchOutcome {
        self.apply(BatchOperation::Create, records, Chunk::Create).await
    }

    /// Update records in chunks
    pub async fn update_batch(&self, records: &[RecordUpdate]) -> BatchOutcome {
        self.apply(BatchOperation::Update, records, Chunk::Update).await
    }

    /// Delete records in chunks
    pub async fn delete_batch(&self, ids: &[RecordId]) -> BatchOutcome {
        self.apply(BatchOperation::Delete, ids, Chunk::Delete).await
    }

    async fn apply<'a, T>(
        &self,
        operation: BatchOperation,
        items: &'a [T],
        wrap: fn(&'a [T]) -> Chunk<'a>,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::new(operation);

        for (chunk_index, chunk) in items.chunks(self.batch_size).enumerate() {
            outcome.requests += 1;
            match self.send(wrap(chunk)).await {
                Ok(()) => outcome.succeeded += chunk.len(),
                Err(e) => {
                    error!(
                        "Batch {} error on {} (chunk {}, {} records): {}",
                        operation,
                        self.api.table_name(),
                        chunk_index,
                        chunk.len(),
                        e
                    );
                    outcome.failed += chunk.len();
                    outcome.errors.push(BatchError {
                        operation,
                        chunk_index,
                        items: chunk.len(),
                        status: e.status(),
                        message: e.to_string(),
                    });
                }
            }
            tokio::time::sleep(self.batch_delay).await;
        }

        if outcome.requests > 0 {
            info!(
                "Batch {} on {}: {} ok, {} failed in {} requests",
                operation,
                self.api.table_name(),
                outcome.succeeded,
                outcome.failed,
                outcome.requests
            );
        }
        outcome
    }

    async fn send(&self, chunk: Chunk<'_>) -> Result<()> {
        match chunk {
            Chunk::Create(records) => self.api.create_records(records).await,
            Chunk::Update(records) => self.api.update_records(records).await,
            Chunk::Delete(ids) => self.api.delete_records(ids).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldMap;
    use std::time::Instant;

    fn new_records(n: usize) -> Vec<NewRecord> {
        (0..n)
            .map(|i| {
                let mut fields = FieldMap::new();
                fields.insert(
                    "Email".into(),
                    crate::types::FieldValue::Text(format!("user{}@x.com", i)),
                );
                NewRecord { fields }
            })
            .collect()
    }

    fn table(api: MemoryTable) -> RemoteTable<MemoryTable> {
        RemoteTable::new(api).with_batch_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_chunking_issues_ceil_requests() {
        let remote = table(MemoryTable::new("db"));
        let outcome = remote.create_batch(&new_records(23)).await;

        assert_eq!(outcome.requests, 3);
        assert_eq!(outcome.succeeded, 23);
        let sizes: Vec<usize> = remote.api().requests().iter().map(|r| r.items).collect();
        assert_eq!(sizes, vec![10, 10, 3]);
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let remote = table(MemoryTable::new("db"));
        let outcome = remote.delete_batch(&[]).await;

        assert_eq!(outcome.requests, 0);
        assert!(remote.api().requests().is_empty());
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_stop_batch() {
        let api = MemoryTable::new("db");
        api.fail_request(1, 429);
        let remote = table(api);

        let outcome = remote.create_batch(&new_records(25)).await;

        assert_eq!(outcome.requests, 3);
        assert_eq!(outcome.succeeded, 15);
        assert_eq!(outcome.failed, 10);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].chunk_index, 1);
        assert_eq!(outcome.errors[0].status, Some(429));
        assert_eq!(remote.api().len(), 15);
    }

    #[tokio::test]
    async fn test_delay_between_requests() {
        let remote = RemoteTable::new(MemoryTable::new("db"))
            .with_batch_delay(Duration::from_millis(20));
        let start = Instant::now();
        remote.create_batch(&new_records(30)).await;

        let times: Vec<Instant> = remote.api().requests().iter().map(|r| r.at).collect();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(20));
        }
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_batch_size_is_capped() {
        let remote = table(MemoryTable::new("db")).with_batch_size(50);
        assert_eq!(remote.batch_size(), MAX_BATCH_SIZE);

        let remote = table(MemoryTable::new("db")).with_batch_size(0);
        assert_eq!(remote.batch_size(), 1);
    }

    #[tokio::test]
    async fn test_fetch_all_follows_offsets() {
        let api = MemoryTable::new("db").with_page_size(4);
        for i in 0..10 {
            api.insert(RemoteRecord::new(format!("r{}", i)).with_field("Email", format!("{}@x.com", i)));
        }
        let remote = table(api);

        let records = remote.fetch_all(None).await.unwrap();
        assert_eq!(records.len(), 10);
        assert_eq!(records[0].id, "r0");
        assert_eq!(records[9].id, "r9");
        let lists = remote
            .api()
            .requests()
            .iter()
            .filter(|r| r.kind == RequestKind::List)
            .count();
        assert_eq!(lists, 3);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_record_fetch_error() {
        let api = MemoryTable::new("db");
        api.fail_lists(503);
        let remote = table(api);

        let err = remote.fetch_all(None).await.unwrap_err();
        assert!(matches!(err, SyncError::RecordFetch(_)));
        assert!(err.is_fatal_before_mutation());
    }
}
