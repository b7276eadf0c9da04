//! Duplicate resolution by natural key
//!
//! One primitive serves both the inline resolution done during
//! reconciliation and the standalone cleanup pass run after a sync: group
//! remote records by key in snapshot order, keep the first id per key,
//! everything after it is a duplicate.

use std::collections::HashMap;

use crate::types::{RecordId, RemoteRecord};

/// Remote record ids grouped by natural key, first-seen order preserved
#[derive(Debug, Clone, Default)]
pub struct KeyIndex {
    order: Vec<String>,
    groups: HashMap<String, Vec<RecordId>>,
    keyless: Vec<RecordId>,
}

impl KeyIndex {
    /// Index a snapshot by `key_field`
    pub fn build(records: &[RemoteRecord], key_field: &str) -> Self {
        let mut index = Self::default();
        for record in records {
            match record.key(key_field) {
                Some(key) => index.insert(key, record.id.clone()),
                None => index.keyless.push(record.id.clone()),
            }
        }
        index
    }

    fn insert(&mut self, key: String, id: RecordId) {
        match self.groups.get_mut(&key) {
            Some(ids) => ids.push(id),
            None => {
                self.order.push(key.clone());
                self.groups.insert(key, vec![id]);
            }
        }
    }

    /// The record kept for `key`: the first one seen
    pub fn survivor(&self, key: &str) -> Option<&RecordId> {
        self.groups.get(key).and_then(|ids| ids.first())
    }

    /// Every id recorded under `key`, survivor first
    pub fn ids(&self, key: &str) -> &[RecordId] {
        self.groups.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Keys in first-seen order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Ids of records with a missing or blank key
    pub fn keyless(&self) -> &[RecordId] {
        &self.keyless
    }

    /// Every id that loses to an earlier record with the same key
    pub fn duplicates(&self) -> Vec<RecordId> {
        self.order
            .iter()
            .filter_map(|key| self.groups.get(key))
            .flat_map(|ids| ids.iter().skip(1).cloned())
            .collect()
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Ids to delete so that each key keeps exactly one record
pub fn find_duplicates(records: &[RemoteRecord], key_field: &str) -> Vec<RecordId> {
    KeyIndex::build(records, key_field).duplicates()
}
