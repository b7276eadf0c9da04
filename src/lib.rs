//! tablesync - spreadsheet to remote table synchronization
//!
//! A local sheet is the source of truth; a remote table behind an
//! Airtable-style REST API holds the mirror. Each run fetches the remote
//! schema and snapshot, diffs them against the sheet rows by natural key,
//! applies batched creates, updates and deletes, and removes remote
//! duplicates.

pub mod client;
pub mod coerce;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod link;
pub mod mirror;
pub mod reconcile;
pub mod schema;
pub mod sheet;
pub mod sync;
pub mod types;

pub use client::{AirtableClient, MemoryTable, RemoteTable, TableApi};
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use reconcile::{reconcile, ReconcileOptions, ReconciliationPlan};
pub use schema::{FieldSchema, FieldType};
pub use sync::{SyncReport, SyncRunner};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
