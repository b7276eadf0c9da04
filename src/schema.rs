//! Remote field schema and declared field types
//!
//! The schema is fetched fresh at the start of each run from the metadata
//! endpoint and decides which coercion rule applies to each column.

use serde::Deserialize;
use std::collections::HashMap;

use crate::types::FieldValue;

/// Declared type of a remote field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Text,
    Number,
    Currency,
    Percent,
    Checkbox,
    SingleSelect,
    MultipleSelects,
    Email,
    PhoneNumber,
    Name,
    /// Any other tag the remote reports (dates, links, attachments, ...)
    Other(String),
}

impl FieldType {
    /// Parse a remote type tag. Unknown tags land in `Other`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "singleLineText" | "multilineText" | "richText" | "text" => FieldType::Text,
            "number" => FieldType::Number,
            "currency" => FieldType::Currency,
            "percent" => FieldType::Percent,
            "checkbox" => FieldType::Checkbox,
            "singleSelect" => FieldType::SingleSelect,
            "multipleSelects" => FieldType::MultipleSelects,
            "email" => FieldType::Email,
            "phoneNumber" => FieldType::PhoneNumber,
            "Name" | "name" => FieldType::Name,
            other => FieldType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Text => "singleLineText",
            FieldType::Number => "number",
            FieldType::Currency => "currency",
            FieldType::Percent => "percent",
            FieldType::Checkbox => "checkbox",
            FieldType::SingleSelect => "singleSelect",
            FieldType::MultipleSelects => "multipleSelects",
            FieldType::Email => "email",
            FieldType::PhoneNumber => "phoneNumber",
            FieldType::Name => "Name",
            FieldType::Other(tag) => tag,
        }
    }

    /// The value kind a coerced value must have for this declared type
    pub fn expected_kind(&self) -> ValueKind {
        match self {
            FieldType::Number | FieldType::Currency | FieldType::Percent => ValueKind::Numeric,
            FieldType::Checkbox => ValueKind::Boolean,
            _ => ValueKind::Text,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime representation expected for a declared type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Numeric,
    Boolean,
    Text,
}

impl ValueKind {
    /// Whether a coerced value has this kind. Lists are text-like: a
    /// multi-select sends a list of option names.
    pub fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (ValueKind::Numeric, FieldValue::Number(_))
                | (ValueKind::Boolean, FieldValue::Bool(_))
                | (ValueKind::Text, FieldValue::Text(_))
                | (ValueKind::Text, FieldValue::List(_))
        )
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueKind::Numeric => write!(f, "number"),
            ValueKind::Boolean => write!(f, "boolean"),
            ValueKind::Text => write!(f, "string"),
        }
    }
}

/// Field name -> declared type for one table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSchema {
    fields: HashMap<String, FieldType>,
}

impl FieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldType> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldType)> {
        self.fields.iter().map(|(name, ty)| (name.as_str(), ty))
    }

    /// Pick `table_name` out of a metadata response. A missing table yields
    /// an empty schema.
    pub fn from_tables(response: &TablesResponse, table_name: &str) -> Self {
        let fields = response
            .tables
            .iter()
            .find(|t| t.name == table_name)
            .map(|table| {
                table
                    .fields
                    .iter()
                    .map(|f| (f.name.clone(), FieldType::from_tag(&f.field_type)))
                    .collect()
            })
            .unwrap_or_default();

        Self { fields }
    }
}

/// Body of `GET /meta/bases/{baseId}/tables`
#[derive(Debug, Clone, Deserialize)]
pub struct TablesResponse {
    #[serde(default)]
    pub tables: Vec<TableMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableMeta {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_parsing() {
        assert_eq!(FieldType::from_tag("currency"), FieldType::Currency);
        assert_eq!(FieldType::from_tag("Name"), FieldType::Name);
        assert_eq!(FieldType::from_tag("singleLineText"), FieldType::Text);
        assert_eq!(
            FieldType::from_tag("dateTime"),
            FieldType::Other("dateTime".to_string())
        );
        assert_eq!(FieldType::from_tag("dateTime").as_str(), "dateTime");
    }

    #[test]
    fn test_expected_kinds() {
        assert_eq!(FieldType::Percent.expected_kind(), ValueKind::Numeric);
        assert_eq!(FieldType::Checkbox.expected_kind(), ValueKind::Boolean);
        assert_eq!(FieldType::Email.expected_kind(), ValueKind::Text);
        assert_eq!(
            FieldType::Other("date".into()).expected_kind(),
            ValueKind::Text
        );
    }

    #[test]
    fn test_kind_accepts() {
        assert!(ValueKind::Numeric.accepts(&FieldValue::Number(1.0)));
        assert!(!ValueKind::Numeric.accepts(&FieldValue::Text("1".into())));
        assert!(ValueKind::Text.accepts(&FieldValue::List(vec![])));
        assert!(!ValueKind::Boolean.accepts(&FieldValue::Text("true".into())));
    }

    #[test]
    fn test_schema_from_tables() {
        let response: TablesResponse = serde_json::from_value(json!({
            "tables": [
                {"id": "tbl1", "name": "other", "fields": [{"name": "X", "type": "number"}]},
                {"id": "tbl2", "name": "db", "fields": [
                    {"name": "Email", "type": "email"},
                    {"name": "Customer_LTV", "type": "currency"}
                ]}
            ]
        }))
        .unwrap();

        let schema = FieldSchema::from_tables(&response, "db");
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.get("Customer_LTV"), Some(&FieldType::Currency));
        assert_eq!(schema.get("X"), None);

        assert!(FieldSchema::from_tables(&response, "missing").is_empty());
    }
}
