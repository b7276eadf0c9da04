//! In-memory table backend
//!
//! Behaves like the remote list/create/update/delete endpoints closely
//! enough to rehearse a sync without network access: pages with an offset
//! cursor, assigns record ids, merges fields on update and rejects a whole
//! chunk that names an unknown id. Every request is logged, and failures can
//! be injected per request.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{ListQuery, Page, TableApi};
use crate::error::{Result, SyncError};
use crate::schema::FieldSchema;
use crate::types::{FieldMap, NewRecord, RecordId, RecordUpdate, RemoteRecord};

/// Request kinds seen by a [`MemoryTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    List,
    Schema,
    Create,
    Update,
    Delete,
}

/// One logged request
#[derive(Debug, Clone)]
pub struct RequestLog {
    pub kind: RequestKind,
    /// Records in the request body (records returned, for lists)
    pub items: usize,
    pub query: Option<ListQuery>,
    pub at: Instant,
}

#[derive(Default)]
struct State {
    records: Vec<RemoteRecord>,
    requests: Vec<RequestLog>,
    next_id: u64,
    mutations: usize,
    failing_mutations: HashMap<usize, u16>,
    lists: usize,
    list_failure: Option<(usize, u16)>,
    schema_failure: Option<u16>,
}

/// A remote table held in memory
pub struct MemoryTable {
    name: String,
    page_size: usize,
    schema: FieldSchema,
    state: Mutex<State>,
}

impl MemoryTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            page_size: 100,
            schema: FieldSchema::new(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_schema(mut self, schema: FieldSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Seed a record as if it already existed remotely
    pub fn insert(&self, record: RemoteRecord) {
        self.state.lock().records.push(record);
    }

    /// Current records, in table order
    pub fn records(&self) -> Vec<RemoteRecord> {
        self.state.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<RequestLog> {
        self.state.lock().requests.clone()
    }

    /// Reject the `index`-th mutating request (0-based, across create,
    /// update and delete) with `status`
    pub fn fail_request(&self, index: usize, status: u16) {
        self.state.lock().failing_mutations.insert(index, status);
    }

    /// Reject every list request with `status`
    pub fn fail_lists(&self, status: u16) {
        self.fail_lists_from(0, status);
    }

    /// Reject list requests from the `index`-th one on (0-based)
    pub fn fail_lists_from(&self, index: usize, status: u16) {
        self.state.lock().list_failure = Some((index, status));
    }

    /// Reject schema requests with `status`
    pub fn fail_schema(&self, status: u16) {
        self.state.lock().schema_failure = Some(status);
    }

    fn log(state: &mut State, kind: RequestKind, items: usize, query: Option<ListQuery>) {
        state.requests.push(RequestLog {
            kind,
            items,
            query,
            at: Instant::now(),
        });
    }

    /// Count a mutation and return the injected failure for it, if any
    fn next_mutation(state: &mut State, kind: RequestKind, items: usize) -> Result<()> {
        Self::log(state, kind, items, None);
        let index = state.mutations;
        state.mutations += 1;
        match state.failing_mutations.get(&index) {
            Some(&status) => Err(SyncError::Api {
                status,
                message: format!("injected failure on request {}", index),
            }),
            None => Ok(()),
        }
    }
}

fn sort_key(record: &RemoteRecord, field: &str) -> String {
    match record.fields.get(field) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn merge_fields(target: &mut serde_json::Map<String, serde_json::Value>, fields: &FieldMap) {
    for (name, value) in fields {
        match serde_json::to_value(value) {
            Ok(v) => {
                target.insert(name.clone(), v);
            }
            Err(e) => tracing::warn!("Dropping unserializable field {}: {}", name, e),
        }
    }
}

#[async_trait]
impl TableApi for MemoryTable {
    async fn list_page(&self, query: &ListQuery) -> Result<Page> {
        let mut state = self.state.lock();

        let index = state.lists;
        state.lists += 1;
        if let Some((from, status)) = state.list_failure {
            if index >= from {
                Self::log(&mut state, RequestKind::List, 0, Some(query.clone()));
                return Err(SyncError::RecordFetch(format!("HTTP {}", status)));
            }
        }

        let start = match &query.offset {
            Some(offset) => offset.parse::<usize>().map_err(|_| {
                SyncError::RecordFetch(format!("invalid offset {}", offset))
            })?,
            None => 0,
        };

        let mut ordered = state.records.clone();
        if let Some(field) = &query.sort_field {
            ordered.sort_by_key(|record| sort_key(record, field));
        }

        let end = (start + self.page_size).min(ordered.len());
        let records = ordered.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        let offset = (end < ordered.len()).then(|| end.to_string());

        Self::log(&mut state, RequestKind::List, records.len(), Some(query.clone()));
        Ok(Page { records, offset })
    }

    async fn fetch_schema(&self) -> Result<FieldSchema> {
        let mut state = self.state.lock();
        Self::log(&mut state, RequestKind::Schema, 0, None);
        match state.schema_failure {
            Some(status) => Err(SyncError::SchemaFetch(format!(
                "metadata endpoint returned HTTP {}",
                status
            ))),
            None => Ok(self.schema.clone()),
        }
    }

    async fn create_records(&self, records: &[NewRecord]) -> Result<()> {
        let mut state = self.state.lock();
        Self::next_mutation(&mut state, RequestKind::Create, records.len())?;

        for record in records {
            state.next_id += 1;
            let mut created = RemoteRecord::new(format!("rec{:014}", state.next_id));
            created.created_time = Some(Utc::now().to_rfc3339());
            merge_fields(&mut created.fields, &record.fields);
            state.records.push(created);
        }
        Ok(())
    }

    async fn update_records(&self, records: &[RecordUpdate]) -> Result<()> {
        let mut state = self.state.lock();
        Self::next_mutation(&mut state, RequestKind::Update, records.len())?;

        let known: HashSet<&str> = state.records.iter().map(|r| r.id.as_str()).collect();
        if let Some(missing) = records.iter().find(|u| !known.contains(u.id.as_str())) {
            return Err(SyncError::Api {
                status: 422,
                message: format!("Record ID {} does not exist in this table", missing.id),
            });
        }

        for update in records {
            if let Some(target) = state.records.iter_mut().find(|r| r.id == update.id) {
                merge_fields(&mut target.fields, &update.fields);
            }
        }
        Ok(())
    }

    async fn delete_records(&self, ids: &[RecordId]) -> Result<()> {
        let mut state = self.state.lock();
        Self::next_mutation(&mut state, RequestKind::Delete, ids.len())?;

        let known: HashSet<&str> = state.records.iter().map(|r| r.id.as_str()).collect();
        if let Some(missing) = ids.iter().find(|id| !known.contains(id.as_str())) {
            return Err(SyncError::Api {
                status: 404,
                message: format!("Could not find record {}", missing),
            });
        }

        state.records.retain(|r| !ids.contains(&r.id));
        Ok(())
    }

    fn table_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;

    fn update(id: &str, name: &str) -> RecordUpdate {
        let mut fields = FieldMap::new();
        fields.insert("Name".into(), FieldValue::Text(name.into()));
        RecordUpdate {
            id: id.into(),
            fields,
        }
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let table = MemoryTable::new("db");
        table.insert(
            RemoteRecord::new("r1")
                .with_field("Email", "a@x.com")
                .with_field("Name", "Old"),
        );

        table.update_records(&[update("r1", "New")]).await.unwrap();

        let record = &table.records()[0];
        assert_eq!(record.fields["Name"], "New");
        assert_eq!(record.fields["Email"], "a@x.com");
    }

    #[tokio::test]
    async fn test_unknown_id_rejects_whole_chunk() {
        let table = MemoryTable::new("db");
        table.insert(RemoteRecord::new("r1").with_field("Name", "Old"));

        let err = table
            .update_records(&[update("r1", "New"), update("nope", "x")])
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(422));
        assert_eq!(table.records()[0].fields["Name"], "Old");
    }

    #[tokio::test]
    async fn test_sorted_pages() {
        let table = MemoryTable::new("db").with_page_size(2);
        for (id, stamp) in [("r1", "2024-03"), ("r2", "2024-01"), ("r3", "2024-02")] {
            table.insert(RemoteRecord::new(id).with_field("Date-stamp", stamp));
        }

        let query = ListQuery {
            sort_field: Some("Date-stamp".into()),
            ..Default::default()
        };
        let page = table.list_page(&query).await.unwrap();

        let ids: Vec<_> = page.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r3"]);
        assert_eq!(page.offset.as_deref(), Some("2"));
    }
}
