//! Run configuration
//!
//! The orchestrator receives a [`SyncConfig`] value at construction; nothing
//! below the CLI reads the environment. Values come from CLI flags (with env
//! fallbacks, see `src/bin/cli.rs`), a TOML file, or [`SyncConfig::from_env`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::client::{DEFAULT_API_URL, MAX_BATCH_SIZE};
use crate::error::{Result, SyncError};
use crate::reconcile::{ReconcileOptions, DEFAULT_NUMERIC_FIELDS};

/// Environment variable holding the API key
pub const API_KEY_VAR: &str = "AIRTABLE_API_KEY";
/// Environment variable holding the base identifier
pub const BASE_ID_VAR: &str = "AIRTABLE_BASE_ID";

/// Settings for one sync run
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Bearer token for the remote API
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Base identifier (e.g. "appXXXXXXXXXXXXXX")
    pub base_id: String,
    /// Remote table to sync into
    pub table_name: String,
    /// Sheet (tab) holding the source rows
    pub sheet_name: String,
    /// Column / field holding the natural key
    pub key_field: String,
    /// API root
    pub api_url: String,
    /// Records per batch request, at most 10
    pub batch_size: usize,
    /// Pause after every batch request
    pub batch_delay_ms: u64,
    /// Per-request timeout
    pub request_timeout_secs: u64,
    /// Fields re-parsed as plain numbers
    pub numeric_fields: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_id: String::new(),
            table_name: "db".to_string(),
            sheet_name: "db.a".to_string(),
            key_field: "Email".to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            batch_size: MAX_BATCH_SIZE,
            batch_delay_ms: 200,
            request_timeout_secs: 30,
            numeric_fields: DEFAULT_NUMERIC_FIELDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("base_id", &self.base_id)
            .field("table_name", &self.table_name)
            .field("sheet_name", &self.sheet_name)
            .field("key_field", &self.key_field)
            .field("api_url", &self.api_url)
            .field("batch_size", &self.batch_size)
            .field("batch_delay_ms", &self.batch_delay_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("numeric_fields", &self.numeric_fields)
            .finish()
    }
}

impl SyncConfig {
    /// Build from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(key) = lookup(API_KEY_VAR) {
            config.api_key = key;
        }
        if let Some(base) = lookup(BASE_ID_VAR) {
            config.base_id = base;
        }
        if let Some(table) = lookup("TABLESYNC_TABLE") {
            config.table_name = table;
        }
        if let Some(sheet) = lookup("TABLESYNC_SHEET") {
            config.sheet_name = sheet;
        }
        if let Some(key_field) = lookup("TABLESYNC_KEY_FIELD") {
            config.key_field = key_field;
        }
        if let Some(url) = lookup("TABLESYNC_API_URL") {
            config.api_url = url;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file. Credentials missing from the file may still be
    /// filled in afterwards, so this does not validate.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SyncError::Config(format!("invalid config: {}", e)))
    }

    /// Check that credentials are present and limits are sane
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(SyncError::Config(format!(
                "API key not set (expected {})",
                API_KEY_VAR
            )));
        }
        if self.base_id.trim().is_empty() {
            return Err(SyncError::Config(format!(
                "base id not set (expected {})",
                BASE_ID_VAR
            )));
        }
        if self.table_name.trim().is_empty() {
            return Err(SyncError::Config("table name is empty".to_string()));
        }
        if self.key_field.trim().is_empty() {
            return Err(SyncError::Config("key field is empty".to_string()));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(SyncError::Config(format!(
                "batch size must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }
        Ok(())
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            key_field: self.key_field.clone(),
            numeric_fields: self.numeric_fields.clone(),
        }
    }

    pub fn batch_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.batch_delay_ms)
    }
}
