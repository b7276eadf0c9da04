//! Link records across two tables by a shared email
//!
//! Records in the source table (e.g. stories) whose match field equals the
//! `Email` of a record in the target table (e.g. users) get their link field
//! set to `[target_id]`. Only unlinked source records are considered.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::client::{BatchError, RemoteTable, TableApi};
use crate::error::{Result, SyncError};
use crate::types::{FieldMap, FieldValue, RecordId, RecordUpdate, RemoteRecord};

/// Field names and filter used for linking
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Source field holding the email to match
    pub match_field: String,
    /// Target field holding the email
    pub target_key_field: String,
    /// Source link field to set
    pub link_field: String,
    /// Server-side filter for source records
    pub filter_formula: String,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self::new("Customer Email", "Email", "User")
    }
}

impl LinkOptions {
    pub fn new(match_field: &str, target_key_field: &str, link_field: &str) -> Self {
        Self {
            match_field: match_field.to_string(),
            target_key_field: target_key_field.to_string(),
            link_field: link_field.to_string(),
            filter_formula: format!(
                "AND({{{}}} != \"\", NOT({}))",
                match_field,
                formula_ref(link_field)
            ),
        }
    }
}

/// Field reference in a formula; braces are only needed for names with
/// characters outside `[A-Za-z0-9_]`
fn formula_ref(field: &str) -> String {
    if !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        field.to_string()
    } else {
        format!("{{{}}}", field)
    }
}

/// Counts from one linking run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkReport {
    pub targets: usize,
    pub candidates: usize,
    pub linked: usize,
    pub unmatched: usize,
    pub errors: Vec<BatchError>,
}

fn is_unlinked(record: &RemoteRecord, link_field: &str) -> bool {
    match record.fields.get(link_field) {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::Array(items)) => items.is_empty(),
        Some(serde_json::Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Compute link updates. Returns the updates and the number of candidate
/// source records without a matching target.
pub fn plan_links(
    targets: &[RemoteRecord],
    sources: &[RemoteRecord],
    options: &LinkOptions,
) -> (Vec<RecordUpdate>, usize) {
    let mut by_email: HashMap<String, &RecordId> = HashMap::new();
    for target in targets {
        if let Some(email) = target.key(&options.target_key_field) {
            by_email.entry(email).or_insert(&target.id);
        }
    }

    let mut updates = Vec::new();
    let mut unmatched = 0;
    for source in sources {
        if !is_unlinked(source, &options.link_field) {
            continue;
        }
        let Some(email) = source.key(&options.match_field) else {
            continue;
        };
        match by_email.get(&email) {
            Some(target_id) => {
                debug!("Linking {} {} to {}", options.match_field, email, target_id);
                let mut fields = FieldMap::new();
                fields.insert(
                    options.link_field.clone(),
                    FieldValue::List(vec![(*target_id).clone()]),
                );
                updates.push(RecordUpdate {
                    id: source.id.clone(),
                    fields,
                });
            }
            None => unmatched += 1,
        }
    }
    (updates, unmatched)
}

/// Fetch both tables and apply the link updates to `source`
pub async fn run_link<S: TableApi, T: TableApi>(
    source: &RemoteTable<S>,
    target: &RemoteTable<T>,
    options: &LinkOptions,
) -> Result<LinkReport> {
    for (name, value) in [
        ("match field", &options.match_field),
        ("target key field", &options.target_key_field),
        ("link field", &options.link_field),
    ] {
        if value.trim().is_empty() {
            return Err(SyncError::InvalidInput(format!("{} is empty", name)));
        }
    }

    let targets = target.fetch_all(None).await?;
    info!("Fetched {} records from {}", targets.len(), target.api().table_name());

    let candidates = source.fetch_filtered(&options.filter_formula).await?;
    info!(
        "Fetched {} unlinked records from {}",
        candidates.len(),
        source.api().table_name()
    );

    let (updates, unmatched) = plan_links(&targets, &candidates, options);
    let mut report = LinkReport {
        targets: targets.len(),
        candidates: candidates.len(),
        unmatched,
        ..Default::default()
    };

    if updates.is_empty() {
        info!("No links needed in {}", source.api().table_name());
        return Ok(report);
    }

    let outcome = source.update_batch(&updates).await;
    report.linked = outcome.succeeded;
    report.errors = outcome.errors;
    info!(
        "Linked {} of {} records in {}",
        report.linked,
        updates.len(),
        source.api().table_name()
    );
    Ok(report)
}
