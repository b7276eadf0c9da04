//! Core types for tablesync

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque identifier assigned by the remote table (e.g. "rec8Xk2...")
pub type RecordId = String;

/// Outgoing field map for a create or update request
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A raw spreadsheet cell
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    List(Vec<CellValue>),
}

impl CellValue {
    /// True for `Empty` and for the empty string
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Text representation, stringified the way spreadsheet scripts do it:
    /// whole numbers print without a fraction, lists join with ','.
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Bool(b) => b.to_string(),
            CellValue::List(items) => items
                .iter()
                .map(CellValue::to_text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl From<serde_json::Value> for CellValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Empty,
            serde_json::Value::Bool(b) => CellValue::Bool(b),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(CellValue::Number)
                .unwrap_or_else(|| CellValue::Text(n.to_string())),
            serde_json::Value::String(s) => CellValue::Text(s),
            serde_json::Value::Array(items) => {
                CellValue::List(items.into_iter().map(CellValue::from).collect())
            }
            other => CellValue::Text(other.to_string()),
        }
    }
}

/// Format a number like a script runtime would: `1234` not `1234.0`, and
/// exponent form (`1e+21`, `1e-7`) outside `1e-6 <= |n| < 1e21`
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.abs() >= 1e21 || n.abs() < 1e-6 {
        let exp = format!("{:e}", n);
        match exp.split_once('e') {
            Some((mantissa, power)) if !power.starts_with('-') => {
                format!("{}e+{}", mantissa, power)
            }
            _ => exp,
        }
    } else {
        n.to_string()
    }
}

/// One spreadsheet data row: column name -> cell, in column order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalRow {
    cells: Vec<(String, CellValue)>,
}

impl LocalRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and fixtures
    pub fn with(mut self, column: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<CellValue>) {
        self.cells.push((column.into(), value.into()));
    }

    /// First cell under `column`
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Natural key value: the trimmed text of the key column, if non-blank
    pub fn key(&self, key_field: &str) -> Option<String> {
        let text = self.get(key_field)?.to_text();
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.cells.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// A record as returned by the remote list endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: RecordId,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "createdTime", default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
}

impl RemoteRecord {
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: serde_json::Map::new(),
            created_time: None,
        }
    }

    /// Builder-style field insert
    pub fn with_field(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Natural key value of this record, trimmed; `None` when missing or blank
    pub fn key(&self, key_field: &str) -> Option<String> {
        let text = match self.fields.get(key_field)? {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

/// A coerced value ready to be sent to the remote table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

/// Body item for a create request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRecord {
    pub fields: FieldMap,
}

/// Body item for an update request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordUpdate {
    pub id: RecordId,
    pub fields: FieldMap,
}
