//! Reconciliation of local rows against a remote snapshot
//!
//! Pure diff: given the desired rows, the observed remote records and the
//! schema, compute which records to create, update and delete. Nothing here
//! talks to the network.
//!
//! Rows are matched by natural key. The first row carrying a key wins; later
//! rows with the same key never produce a second create or update. Remote
//! duplicates are resolved with [`KeyIndex`]: the first record per key is the
//! one updated, the rest are deleted.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::coerce::{coerce, overlay_number, CoercionWarning};
use crate::dedupe::KeyIndex;
use crate::schema::FieldSchema;
use crate::types::{
    FieldMap, FieldValue, LocalRow, NewRecord, RecordId, RecordUpdate, RemoteRecord,
};

/// Fields re-parsed as plain numbers on top of the generic coercion rules
pub const DEFAULT_NUMERIC_FIELDS: [&str; 2] = ["Last_Payment_Amount", "Customer_LTV"];

/// Knobs for one reconciliation
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Column / field holding the natural key
    pub key_field: String,
    /// Fields that bypass the generic numeric path
    pub numeric_fields: Vec<String>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            key_field: "Email".to_string(),
            numeric_fields: DEFAULT_NUMERIC_FIELDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Why a local row produced no create or update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The key cell is missing or blank
    BlankKey,
    /// An earlier row already carries this key
    DuplicateKey,
}

/// A local row left out of the plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedRow {
    /// 1-based sheet row number, header included (first data row is 2)
    pub row: usize,
    pub key: Option<String>,
    pub reason: DropReason,
}

/// Create / update / delete sets for one run. The sets never share an id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationPlan {
    pub to_create: Vec<NewRecord>,
    pub to_update: Vec<RecordUpdate>,
    pub to_delete: Vec<RecordId>,
    pub dropped_rows: Vec<DroppedRow>,
    pub warnings: Vec<CoercionWarning>,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update, {} to delete, {} rows dropped, {} warnings",
            self.to_create.len(),
            self.to_update.len(),
            self.to_delete.len(),
            self.dropped_rows.len(),
            self.warnings.len()
        )
    }
}

/// Insertion-ordered id set
#[derive(Default)]
struct DeleteSet {
    ids: Vec<RecordId>,
    seen: HashSet<RecordId>,
}

impl DeleteSet {
    fn push(&mut self, id: &RecordId) {
        if self.seen.insert(id.clone()) {
            self.ids.push(id.clone());
        }
    }
}

/// Diff `rows` against `remote` and produce a plan
pub fn reconcile(
    rows: &[LocalRow],
    remote: &[RemoteRecord],
    schema: &FieldSchema,
    options: &ReconcileOptions,
) -> ReconciliationPlan {
    let key_field = options.key_field.as_str();
    let index = KeyIndex::build(remote, key_field);

    let mut plan = ReconciliationPlan::default();
    let mut deletes = DeleteSet::default();
    let mut builder = FieldBuilder::new(schema, &options.numeric_fields);

    // Remote duplicates go first; the survivor per key is what rows match.
    for id in index.duplicates() {
        debug!("Duplicate remote record {} marked for deletion", id);
        deletes.push(&id);
    }

    let mut claimed: HashSet<String> = HashSet::new();
    let mut pending_creates: HashSet<String> = HashSet::new();

    for (i, row) in rows.iter().enumerate() {
        let row_number = i + 2;

        let Some(key) = row.key(key_field) else {
            warn!("Row {} has no {}; skipping", row_number, key_field);
            plan.dropped_rows.push(DroppedRow {
                row: row_number,
                key: None,
                reason: DropReason::BlankKey,
            });
            continue;
        };

        if claimed.contains(&key) {
            warn!("Row {} repeats {} {}; skipping", row_number, key_field, key);
            plan.dropped_rows.push(DroppedRow {
                row: row_number,
                key: Some(key),
                reason: DropReason::DuplicateKey,
            });
            continue;
        }

        if let Some(id) = index.survivor(&key) {
            let fields = builder.build(row);
            plan.to_update.push(RecordUpdate {
                id: id.clone(),
                fields,
            });
            claimed.insert(key);
        } else if pending_creates.contains(&key) {
            // No survivor means no snapshot record carries this key.
            warn!("Row {} repeats {} {}; skipping", row_number, key_field, key);
            plan.dropped_rows.push(DroppedRow {
                row: row_number,
                key: Some(key),
                reason: DropReason::DuplicateKey,
            });
        } else {
            let fields = builder.build(row);
            plan.to_create.push(NewRecord { fields });
            pending_creates.insert(key);
        }
    }

    // Orphans: remote keys no row claimed, and records without a key.
    for key in index.keys() {
        if !claimed.contains(key) {
            for id in index.ids(key) {
                deletes.push(id);
            }
        }
    }
    for id in index.keyless() {
        deletes.push(id);
    }

    plan.to_delete = deletes.ids;
    plan.warnings = builder.warnings;
    plan
}

/// Builds outgoing field maps, collecting warnings as it goes
struct FieldBuilder<'a> {
    schema: &'a FieldSchema,
    numeric_fields: &'a [String],
    warnings: Vec<CoercionWarning>,
    unknown_columns: HashSet<String>,
}

impl<'a> FieldBuilder<'a> {
    fn new(schema: &'a FieldSchema, numeric_fields: &'a [String]) -> Self {
        Self {
            schema,
            numeric_fields,
            warnings: Vec::new(),
            unknown_columns: HashSet::new(),
        }
    }

    fn build(&mut self, row: &LocalRow) -> FieldMap {
        let mut fields = FieldMap::new();

        for (column, raw) in row.iter() {
            let Some(field_type) = self.schema.get(column) else {
                if self.unknown_columns.insert(column.to_string()) {
                    warn!("Field {:?} not found in remote table; skipping", column);
                    self.warnings.push(CoercionWarning {
                        field: Some(column.to_string()),
                        raw: raw.to_text(),
                        message: "field not found in remote schema".to_string(),
                    });
                }
                continue;
            };

            let coercion = coerce(raw, field_type);
            if let Some(warning) = coercion.warning {
                self.warn(warning.for_field(column));
            }
            let Some(value) = coercion.value else {
                continue;
            };

            let expected = field_type.expected_kind();
            if !expected.accepts(&value) {
                self.warn(CoercionWarning {
                    field: Some(column.to_string()),
                    raw: raw.to_text(),
                    message: format!("type mismatch: {} expects {}", field_type, expected),
                });
                continue;
            }

            if self.numeric_fields.iter().any(|f| f == column) {
                match overlay_number(raw) {
                    Some(n) => {
                        fields.insert(column.to_string(), FieldValue::Number(n));
                    }
                    None => self.warn(CoercionWarning {
                        field: Some(column.to_string()),
                        raw: raw.to_text(),
                        message: "could not convert to number".to_string(),
                    }),
                }
                continue;
            }

            fields.insert(column.to_string(), value);
        }

        fields
    }

    fn warn(&mut self, warning: CoercionWarning) {
        warn!("Coercion warning: {}", warning);
        self.warnings.push(warning);
    }
}
