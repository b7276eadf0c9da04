//! Spreadsheet sources
//!
//! A [`Workbook`] is an ordered set of named sheets, each a rectangular grid
//! whose first row is the header. Two on-disk forms are read:
//!
//! - JSON: `{ "<sheet>": [[header...], [row...], ...], ... }`
//! - CSV: a single sheet, named after the file stem

pub mod csv;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SyncError};
use crate::types::{CellValue, LocalRow};

/// One named grid
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    name: String,
    grid: Vec<Vec<CellValue>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, grid: Vec<Vec<CellValue>>) -> Self {
        Self {
            name: name.into(),
            grid,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Header cells as text, empty if the sheet has no rows
    pub fn header(&self) -> Vec<String> {
        self.grid
            .first()
            .map(|row| row.iter().map(CellValue::to_text).collect())
            .unwrap_or_default()
    }

    /// Data rows, header excluded
    pub fn data_len(&self) -> usize {
        self.grid.len().saturating_sub(1)
    }

    /// Data rows keyed by header name.
    ///
    /// Cells past the header width are ignored; short rows are padded with
    /// `Empty`. Columns with a blank header are skipped.
    pub fn rows(&self) -> Vec<LocalRow> {
        let header = self.header();
        self.grid
            .iter()
            .skip(1)
            .map(|cells| {
                let mut row = LocalRow::new();
                for (i, column) in header.iter().enumerate() {
                    if column.trim().is_empty() {
                        continue;
                    }
                    row.push(column.clone(), cells.get(i).cloned().unwrap_or_default());
                }
                row
            })
            .collect()
    }
}

/// Named sheets, in file order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new(sheets: Vec<Sheet>) -> Self {
        Self { sheets }
    }

    /// Load a workbook; `~` and `$VARS` in the path are expanded
    pub fn load(path: &str) -> Result<Self> {
        let path = expand_path(path)?;
        let content = std::fs::read_to_string(&path).map_err(|e| {
            SyncError::Sheet(format!("cannot read {}: {}", path.display(), e))
        })?;

        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"));

        let workbook = if is_csv {
            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("Sheet1");
            Self::from_csv_str(name, &content)
        } else {
            Self::from_json_str(&content)?
        };

        debug!(
            "Loaded {} sheets from {}",
            workbook.sheets.len(),
            path.display()
        );
        Ok(workbook)
    }

    pub fn from_csv_str(name: &str, content: &str) -> Self {
        let grid = csv::parse_csv(content)
            .into_iter()
            .map(|record| record.iter().map(|f| csv::parse_field(f)).collect())
            .collect();
        Self::new(vec![Sheet::new(name, grid)])
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| SyncError::Sheet(format!("invalid workbook JSON: {}", e)))?;

        let serde_json::Value::Object(map) = value else {
            return Err(SyncError::Sheet(
                "workbook must be an object of sheet name to rows".to_string(),
            ));
        };

        let mut sheets = Vec::with_capacity(map.len());
        for (name, rows) in map {
            let serde_json::Value::Array(rows) = rows else {
                return Err(SyncError::Sheet(format!("sheet {} is not a list of rows", name)));
            };
            let mut grid = Vec::with_capacity(rows.len());
            for (i, row) in rows.into_iter().enumerate() {
                let serde_json::Value::Array(cells) = row else {
                    return Err(SyncError::Sheet(format!(
                        "sheet {} row {} is not a list of cells",
                        name,
                        i + 1
                    )));
                };
                grid.push(cells.into_iter().map(CellValue::from).collect());
            }
            sheets.push(Sheet::new(name, grid));
        }
        Ok(Self::new(sheets))
    }

    /// Look up a sheet by exact name
    pub fn sheet(&self, name: &str) -> Result<&Sheet> {
        self.sheets.iter().find(|s| s.name == name).ok_or_else(|| {
            let names: Vec<&str> = self.sheets.iter().map(Sheet::name).collect();
            SyncError::Sheet(format!(
                "sheet {} not found (available: {})",
                name,
                names.join(", ")
            ))
        })
    }

    /// A CSV workbook holds a single sheet; return it regardless of name
    pub fn sheet_or_only(&self, name: &str) -> Result<&Sheet> {
        match self.sheets.as_slice() {
            [only] => Ok(only),
            _ => self.sheet(name),
        }
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path)
        .map_err(|e| SyncError::Config(format!("cannot expand path {}: {}", path, e)))?;
    Ok(Path::new(expanded.as_ref()).to_path_buf())
}
