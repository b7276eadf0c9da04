//! HTTP client for the Airtable-style REST API
//!
//! Wire contract:
//! - `GET    {api}/{baseId}/{table}` lists records, `{records, offset?}`
//! - `POST`/`PATCH` on the same URL take `{records: [{id?, fields}]}`
//! - `DELETE` takes repeated `records=<id>` query parameters
//! - `GET    {api}/meta/bases/{baseId}/tables` returns the schema
//!
//! Every request carries `Authorization: Bearer <key>`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use tracing::{debug, warn};

use super::{ListQuery, Page, TableApi};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::schema::{FieldSchema, TablesResponse};
use crate::types::{NewRecord, RecordId, RecordUpdate};

/// Default API root
pub const DEFAULT_API_URL: &str = "https://api.airtable.com/v0";

/// Response bodies are cut to this many characters in error messages
const MAX_ERROR_BODY: usize = 500;

#[derive(Serialize)]
struct RecordsBody<'a, T> {
    records: &'a [T],
}

/// Client bound to one table of one base
#[derive(Clone)]
pub struct AirtableClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    base_id: String,
    table_name: String,
}

impl AirtableClient {
    /// Create a client for `table_name` with the default API root and a 30s timeout
    pub fn new(
        api_key: impl Into<String>,
        base_id: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Result<Self> {
        Self::with_options(
            DEFAULT_API_URL,
            api_key,
            base_id,
            table_name,
            Duration::from_secs(30),
        )
    }

    /// Create a client with an explicit API root and request timeout
    pub fn with_options(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        base_id: impl Into<String>,
        table_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            base_id: base_id.into(),
            table_name: table_name.into(),
        })
    }

    /// Create a client for the table named in `config`
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        Self::with_options(
            &config.api_url,
            &config.api_key,
            &config.base_id,
            &config.table_name,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Same credentials and connection pool, different table
    pub fn for_table(&self, table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..self.clone()
        }
    }

    /// `{api}/{baseId}/{table}`, with path segments escaped
    pub fn records_url(&self) -> Result<Url> {
        self.url_with_segments(&[self.base_id.as_str(), self.table_name.as_str()])
    }

    /// `{api}/meta/bases/{baseId}/tables`
    pub fn schema_url(&self) -> Result<Url> {
        self.url_with_segments(&["meta", "bases", self.base_id.as_str(), "tables"])
    }

    fn url_with_segments(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| SyncError::Config(format!("invalid API URL {}: {}", self.api_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::Config(format!("API URL cannot be a base: {}", self.api_url)))?
            .extend(segments);
        Ok(url)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    /// Read a response body, turning a non-success status into an error
    async fn read_body(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        check_status(status, &body)?;
        Ok(body)
    }

    /// Status and body of a GET, without judging either
    async fn get_raw(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> reqwest::Result<(StatusCode, String)> {
        let response = self
            .client
            .get(url)
            .header("Authorization", self.bearer())
            .query(query)
            .send()
            .await?;
        let status = response.status();
        Ok((status, response.text().await?))
    }

    async fn send_records<T: Serialize + Sync>(
        &self,
        method: reqwest::Method,
        records: &[T],
    ) -> Result<()> {
        let url = self.records_url()?;
        debug!("{} {} ({} records)", method, url, records.len());

        let response = self
            .client
            .request(method, url)
            .header("Authorization", self.bearer())
            .json(&RecordsBody { records })
            .send()
            .await?;

        Self::read_body(response).await.map(|_| ())
    }
}

/// Query pairs for a list request
pub fn list_params(query: &ListQuery) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(offset) = &query.offset {
        params.push(("offset", offset.clone()));
    }
    if let Some(field) = &query.sort_field {
        params.push(("sort[0][field]", field.clone()));
        params.push(("sort[0][direction]", "asc".to_string()));
    }
    if let Some(formula) = &query.filter_formula {
        params.push(("filterByFormula", formula.clone()));
    }
    params
}

/// Query pairs for a delete request: `records=<id>` once per id
pub fn delete_params(ids: &[RecordId]) -> Vec<(&'static str, &str)> {
    ids.iter().map(|id| ("records", id.as_str())).collect()
}

/// Payload-level `error` field, present on some failures even with HTTP 200
fn payload_error(value: &serde_json::Value) -> Option<String> {
    value.get("error").map(|e| e.to_string())
}

fn check_status(status: StatusCode, body: &str) -> Result<()> {
    if status != StatusCode::OK {
        return Err(SyncError::Api {
            status: status.as_u16(),
            message: truncate(body, MAX_ERROR_BODY),
        });
    }
    Ok(())
}

/// Status check, JSON parse and payload `error` check shared by both reads
fn parse_json(status: StatusCode, body: &str) -> std::result::Result<serde_json::Value, String> {
    check_status(status, body).map_err(|e| e.to_string())?;
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| format!("invalid JSON: {}", e))?;
    if let Some(error) = payload_error(&value) {
        return Err(format!("remote error: {}", error));
    }
    Ok(value)
}

/// Interpret a list response
pub(crate) fn parse_page(status: StatusCode, body: &str) -> Result<Page> {
    let value = parse_json(status, body).map_err(SyncError::RecordFetch)?;
    serde_json::from_value(value)
        .map_err(|e| SyncError::RecordFetch(format!("unexpected page shape: {}", e)))
}

/// Interpret a metadata response, keeping the fields of `table_name`
pub(crate) fn parse_schema(
    status: StatusCode,
    body: &str,
    table_name: &str,
) -> Result<FieldSchema> {
    let value = parse_json(status, body).map_err(SyncError::SchemaFetch)?;
    let tables: TablesResponse = serde_json::from_value(value)
        .map_err(|e| SyncError::SchemaFetch(format!("unexpected schema shape: {}", e)))?;
    Ok(FieldSchema::from_tables(&tables, table_name))
}

fn truncate(body: &str, max: usize) -> String {
    if body.chars().count() > max {
        let cut: String = body.chars().take(max).collect();
        format!("{}... (truncated)", cut)
    } else {
        body.to_string()
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timeout: {}", e)
    } else if e.is_connect() {
        format!("connection error: {}", e)
    } else if e.is_decode() {
        format!("unexpected response format: {}", e)
    } else {
        e.to_string()
    }
}

#[async_trait]
impl TableApi for AirtableClient {
    async fn list_page(&self, query: &ListQuery) -> Result<Page> {
        let url = self.records_url()?;
        debug!("GET {} {:?}", url, query);

        let (status, body) = self
            .get_raw(url, &list_params(query))
            .await
            .map_err(|e| SyncError::RecordFetch(describe_transport_error(&e)))?;
        parse_page(status, &body)
    }

    async fn fetch_schema(&self) -> Result<FieldSchema> {
        let url = self.schema_url()?;
        debug!("GET {}", url);

        let (status, body) = self
            .get_raw(url, &[])
            .await
            .map_err(|e| SyncError::SchemaFetch(describe_transport_error(&e)))?;
        let schema = parse_schema(status, &body, &self.table_name)?;
        if schema.is_empty() {
            warn!("Table {} not found in base metadata", self.table_name);
        }
        Ok(schema)
    }

    async fn create_records(&self, records: &[NewRecord]) -> Result<()> {
        self.send_records(reqwest::Method::POST, records).await
    }

    async fn update_records(&self, records: &[RecordUpdate]) -> Result<()> {
        self.send_records(reqwest::Method::PATCH, records).await
    }

    async fn delete_records(&self, ids: &[RecordId]) -> Result<()> {
        let url = self.records_url()?;
        debug!("DELETE {} ({} records)", url, ids.len());

        let response = self
            .client
            .delete(url)
            .header("Authorization", self.bearer())
            .query(&delete_params(ids))
            .send()
            .await?;

        Self::read_body(response).await.map(|_| ())
    }

    fn table_name(&self) -> &str {
        &self.table_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;

    fn client() -> AirtableClient {
        AirtableClient::new("key123", "appBase", "Table 1").unwrap()
    }

    #[test]
    fn test_records_url_escapes_table_name() {
        assert_eq!(
            client().records_url().unwrap().as_str(),
            "https://api.airtable.com/v0/appBase/Table%201"
        );
    }

    #[test]
    fn test_schema_url() {
        assert_eq!(
            client().schema_url().unwrap().as_str(),
            "https://api.airtable.com/v0/meta/bases/appBase/tables"
        );
    }

    #[test]
    fn test_for_table_keeps_credentials() {
        let other = client().for_table("db");
        assert_eq!(other.table_name(), "db");
        assert_eq!(other.bearer(), "Bearer key123");
    }

    #[test]
    fn test_list_params() {
        let query = ListQuery {
            offset: Some("itr1/rec2".into()),
            sort_field: Some("Date-stamp".into()),
            filter_formula: None,
        };
        assert_eq!(
            list_params(&query),
            vec![
                ("offset", "itr1/rec2".to_string()),
                ("sort[0][field]", "Date-stamp".to_string()),
                ("sort[0][direction]", "asc".to_string()),
            ]
        );
        assert!(list_params(&ListQuery::default()).is_empty());
    }

    #[test]
    fn test_delete_params_repeat_key() {
        let ids = vec!["rec1".to_string(), "rec2".to_string()];
        let url = Url::parse_with_params("https://x/v0/b/t", delete_params(&ids)).unwrap();
        assert_eq!(url.query(), Some("records=rec1&records=rec2"));
    }

    #[test]
    fn test_truncate_long_bodies() {
        let body = "x".repeat(600);
        let cut = truncate(&body, MAX_ERROR_BODY);
        assert!(cut.starts_with(&"x".repeat(500)));
        assert!(cut.ends_with("(truncated)"));
        assert_eq!(truncate("short", MAX_ERROR_BODY), "short");
    }

    #[test]
    fn test_parse_page_with_offset() {
        let body = r#"{"records":[{"id":"rec1","createdTime":"2024-01-01T00:00:00.000Z","fields":{"Email":"a@x.com"}}],"offset":"itr1/rec1"}"#;
        let page = parse_page(StatusCode::OK, body).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].id, "rec1");
        assert_eq!(page.offset.as_deref(), Some("itr1/rec1"));

        let last = parse_page(StatusCode::OK, r#"{"records":[]}"#).unwrap();
        assert!(last.records.is_empty());
        assert!(last.offset.is_none());
    }

    #[test]
    fn test_parse_page_payload_error() {
        let body = r#"{"error":{"type":"INVALID_PERMISSIONS","message":"denied"}}"#;
        let err = parse_page(StatusCode::OK, body).unwrap_err();
        assert!(matches!(err, SyncError::RecordFetch(_)));
        assert!(err.to_string().contains("INVALID_PERMISSIONS"));
    }

    #[test]
    fn test_parse_page_bad_status_keeps_truncated_body() {
        let body = format!("{{\"error\":\"{}\"}}", "y".repeat(700));
        let err = parse_page(StatusCode::UNPROCESSABLE_ENTITY, &body).unwrap_err();
        let SyncError::RecordFetch(message) = &err else {
            panic!("expected RecordFetch, got {:?}", err);
        };
        assert!(message.contains("422"));
        assert!(message.contains(&"y".repeat(100)));
        assert!(message.ends_with("(truncated)"));
    }

    #[test]
    fn test_parse_page_invalid_json() {
        let err = parse_page(StatusCode::OK, "<html>oops</html>").unwrap_err();
        assert!(matches!(err, SyncError::RecordFetch(ref m) if m.starts_with("invalid JSON")));

        let err = parse_page(StatusCode::OK, r#"{"records":"nope"}"#).unwrap_err();
        assert!(matches!(err, SyncError::RecordFetch(ref m) if m.starts_with("unexpected page shape")));
    }

    #[test]
    fn test_parse_schema_picks_table() {
        let body = r#"{"tables":[
            {"id":"tbl1","name":"db","fields":[{"id":"f1","name":"Email","type":"email"},{"id":"f2","name":"Customer_LTV","type":"currency"}]},
            {"id":"tbl2","name":"Other","fields":[{"id":"f3","name":"Notes","type":"multilineText"}]}
        ]}"#;
        let schema = parse_schema(StatusCode::OK, body, "db").unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.get("Customer_LTV"), Some(&FieldType::Currency));
        assert!(schema.get("Notes").is_none());

        assert!(parse_schema(StatusCode::OK, body, "missing").unwrap().is_empty());
    }

    #[test]
    fn test_parse_schema_errors() {
        let err = parse_schema(StatusCode::OK, r#"{"error":"NOT_FOUND"}"#, "db").unwrap_err();
        assert!(matches!(err, SyncError::SchemaFetch(ref m) if m.contains("NOT_FOUND")));

        let err = parse_schema(StatusCode::UNAUTHORIZED, "unauthorized", "db").unwrap_err();
        assert!(matches!(err, SyncError::SchemaFetch(ref m) if m.contains("401") && m.contains("unauthorized")));

        let err = parse_schema(StatusCode::OK, "{", "db").unwrap_err();
        assert!(matches!(err, SyncError::SchemaFetch(ref m) if m.starts_with("invalid JSON")));
    }

    #[test]
    fn test_payload_error_detection() {
        let value = serde_json::json!({"error": {"type": "NOT_FOUND"}});
        assert!(payload_error(&value).is_some());
        assert!(payload_error(&serde_json::json!({"records": []})).is_none());
    }
}
