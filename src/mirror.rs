//! Remote table to CSV export
//!
//! The header is taken from the first record's fields in response order,
//! minus omitted fields. Later records contribute only those columns.

use std::path::Path;

use tracing::info;

use crate::client::{RemoteTable, TableApi};
use crate::error::Result;
use crate::sheet::csv::write_rows;
use crate::types::{CellValue, RemoteRecord};

/// What to export and how
#[derive(Debug, Clone, Default)]
pub struct MirrorOptions {
    /// Sort ascending by this field when fetching
    pub sort_field: Option<String>,
    /// Fields left out of the export
    pub omit_fields: Vec<String>,
}

/// Render a field value as sheet text
fn cell_text(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(v @ serde_json::Value::Object(_)) => v.to_string(),
        Some(v) => CellValue::from(v.clone()).to_text(),
    }
}

/// Header row plus one row per record
pub fn records_to_grid(records: &[RemoteRecord], omit_fields: &[String]) -> Vec<Vec<String>> {
    let Some(first) = records.first() else {
        return Vec::new();
    };

    let header: Vec<String> = first
        .fields
        .keys()
        .filter(|name| !omit_fields.contains(*name))
        .cloned()
        .collect();

    let mut grid = Vec::with_capacity(records.len() + 1);
    grid.push(header.clone());
    for record in records {
        grid.push(
            header
                .iter()
                .map(|name| cell_text(record.fields.get(name)))
                .collect(),
        );
    }
    grid
}

/// Fetch every record and write it to `path` as CSV.
///
/// Returns the number of records written. An empty table writes nothing.
pub async fn export<A: TableApi>(
    remote: &RemoteTable<A>,
    options: &MirrorOptions,
    path: &Path,
) -> Result<usize> {
    let records = remote.fetch_all(options.sort_field.as_deref()).await?;
    if records.is_empty() {
        info!("No records found in {}", remote.api().table_name());
        return Ok(0);
    }

    let grid = records_to_grid(&records, &options.omit_fields);
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    write_rows(&mut file, &grid)?;

    info!(
        "Exported {} records ({} columns) from {} to {}",
        records.len(),
        grid.first().map_or(0, Vec::len),
        remote.api().table_name(),
        path.display()
    );
    Ok(records.len())
}
