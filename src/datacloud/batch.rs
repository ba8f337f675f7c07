//! Row batches, field descriptors, and defensive response parsing.
//!
//! The query API's response envelope is not uniform across deployments: the
//! query handle and the total row count each appear in more than one
//! documented location, counts arrive as numbers or numeric strings, and
//! field metadata comes back as either a name→descriptor map or an array.
//! Everything in this module parses those shapes into one strict model and
//! fails loudly (`ExportError::Planning`) instead of guessing.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ExportError;

// ─────────────────────────────────────────────────────────────────────────────
// Response field candidates
// ─────────────────────────────────────────────────────────────────────────────

/// Fields checked, in order, for the query handle.
pub const HANDLE_FIELDS: &[&str] = &["queryId", "id"];

/// Fields checked, in order, for the authoritative total row count.
pub const TOTAL_FIELDS: &[&str] = &["totalRowCount", "totalSize"];

// ─────────────────────────────────────────────────────────────────────────────
// Data model
// ─────────────────────────────────────────────────────────────────────────────

/// One column of a query's result set.
///
/// The ordered descriptor set is captured once per query, from the probe
/// response, and defines the output header. Later batches never reorder it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Column name as reported by the remote system.
    pub name: String,
    /// Declared position; establishes column order.
    pub place_in_order: u32,
    /// Remote type tag (`VARCHAR`, `DECIMAL`, ...); informational.
    pub field_type: String,
}

/// Identifier and total row count for one submitted query.
///
/// Immutable once obtained; scoped to a single export run.
#[derive(Debug, Clone)]
pub struct QueryHandle {
    /// Opaque identifier the remote system issued for the query.
    pub id: String,
    /// Authoritative total row count reported by the probe.
    pub total_rows: u64,
}

/// The rows of one batch, with their shape resolved once up front.
///
/// The remote system returns rows either as positional arrays or as
/// name-keyed objects. The shape is decided from the first row of each batch;
/// a batch mixing both shapes is an upstream contract violation.
#[derive(Debug, Clone, PartialEq)]
pub enum RowSet {
    /// Rows as positional value arrays, already in column order.
    Positional(Vec<Vec<Value>>),
    /// Rows as name-keyed mappings, projected into header order on write.
    Named(Vec<Map<String, Value>>),
}

impl RowSet {
    /// Number of rows in the set.
    pub fn len(&self) -> usize {
        match self {
            RowSet::Positional(rows) => rows.len(),
            RowSet::Named(rows) => rows.len(),
        }
    }

    /// True when the set holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Classifies a raw `data` array into a tagged row set.
    ///
    /// The first row decides the shape. An empty array yields an empty
    /// positional set.
    ///
    /// # Errors
    /// `ExportError::Planning` when a row is neither an array nor an object,
    /// or when rows of both shapes appear in the same batch.
    pub fn from_values(values: Vec<Value>) -> Result<Self, ExportError> {
        let first = match values.first() {
            Some(first) => first,
            None => return Ok(RowSet::Positional(Vec::new())),
        };

        match first {
            Value::Array(_) => {
                let mut rows = Vec::with_capacity(values.len());
                for value in values {
                    match value {
                        Value::Array(row) => rows.push(row),
                        other => return Err(mixed_shape_error(&other)),
                    }
                }
                Ok(RowSet::Positional(rows))
            }
            Value::Object(_) => {
                let mut rows = Vec::with_capacity(values.len());
                for value in values {
                    match value {
                        Value::Object(row) => rows.push(row),
                        other => return Err(mixed_shape_error(&other)),
                    }
                }
                Ok(RowSet::Named(rows))
            }
            other => Err(ExportError::Planning(format!(
                "row is neither an array nor an object (got {})",
                value_kind(other)
            ))),
        }
    }
}

fn mixed_shape_error(offending: &Value) -> ExportError {
    ExportError::Planning(format!(
        "batch mixes positional and named rows (unexpected {})",
        value_kind(offending)
    ))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One fetched page of rows plus its batch-level metadata.
///
/// Produced by one fetch, consumed immediately by the writer, then dropped;
/// batches are never retained across loop iterations.
#[derive(Debug, Clone)]
pub struct RowBatch {
    /// The rows themselves.
    pub rows: RowSet,
    /// Rows the remote system reports for this response; falls back to the
    /// observed row count when the field is absent.
    pub returned_rows: u64,
    /// True when the remote system reports no further data.
    pub done: bool,
    /// Continuation cursor for sequential paging, when one was issued.
    pub next_batch_id: Option<String>,
}

/// Everything a successful submit yields.
///
/// `handle` and `total_rows` stay optional here; enforcing their presence is
/// the planner's job, with its own error text.
#[derive(Debug)]
pub struct SubmitResponse {
    /// The probe's own rows (discarded by the pagination loop).
    pub batch: RowBatch,
    /// Ordered field descriptors; empty when the response carried none.
    pub fields: Vec<FieldDescriptor>,
    /// First handle candidate present in the response.
    pub handle: Option<String>,
    /// First total-row-count candidate present in the response.
    pub total_rows: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Raw response envelope shared by submit and both continuation fetches.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireQueryResponse {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub done: bool,
    /// Rows in this response (not the result-set total).
    #[serde(default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub next_batch_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Remaining fields; the handle and the total live here, in locations
    /// that vary by deployment.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WireQueryResponse {
    /// Converts the envelope into a typed batch, resolving the row shape.
    pub(crate) fn into_batch(self) -> Result<RowBatch, ExportError> {
        let row_count = self.row_count;
        let rows = RowSet::from_values(self.data)?;
        let returned_rows = row_count.unwrap_or(rows.len() as u64);
        Ok(RowBatch {
            rows,
            returned_rows,
            done: self.done,
            next_batch_id: self.next_batch_id,
        })
    }

    /// Converts a submit envelope, additionally extracting the handle, the
    /// total row count, and the field descriptors.
    pub(crate) fn into_submit_response(mut self) -> Result<SubmitResponse, ExportError> {
        let handle = extract_handle(&self.extra);
        let total_rows = extract_total(&self.extra);
        let fields = match self.metadata.take() {
            Some(metadata) => parse_field_descriptors(&metadata)?,
            None => Vec::new(),
        };
        let batch = self.into_batch()?;
        Ok(SubmitResponse {
            batch,
            fields,
            handle,
            total_rows,
        })
    }
}

/// Probes the handle candidates in documented order.
pub(crate) fn extract_handle(extra: &Map<String, Value>) -> Option<String> {
    HANDLE_FIELDS.iter().find_map(|field| {
        extra
            .get(*field)
            .and_then(Value::as_str)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Probes the total-row-count candidates in documented order.
///
/// Counts arrive as JSON numbers or as numeric strings depending on the
/// deployment; both parse. A present-but-unparseable candidate is skipped,
/// never coerced to zero.
pub(crate) fn extract_total(extra: &Map<String, Value>) -> Option<u64> {
    TOTAL_FIELDS
        .iter()
        .find_map(|field| extra.get(*field).and_then(parse_count))
}

/// Parses a count that may be a number, a float with no fraction, or a
/// numeric string.
fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => {
            if let Some(count) = n.as_u64() {
                Some(count)
            } else {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                    .map(|f| f as u64)
            }
        }
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

/// Parses the `metadata` collection into ordered field descriptors.
///
/// Two shapes are accepted:
/// - a name→descriptor map, each descriptor carrying `placeInOrder` and a
///   `type` (or numeric `typeCode`);
/// - an array of descriptors each carrying `name`, with `placeInOrder`
///   defaulting to the array index.
///
/// The result is sorted by `place_in_order`.
pub(crate) fn parse_field_descriptors(metadata: &Value) -> Result<Vec<FieldDescriptor>, ExportError> {
    let mut fields = match metadata {
        Value::Object(map) => {
            let mut fields = Vec::with_capacity(map.len());
            for (name, descriptor) in map {
                let place_in_order = descriptor
                    .get("placeInOrder")
                    .and_then(parse_count)
                    .ok_or_else(|| {
                        ExportError::Planning(format!(
                            "field descriptor for {:?} has no usable placeInOrder",
                            name
                        ))
                    })?;
                fields.push(FieldDescriptor {
                    name: name.clone(),
                    place_in_order: place_in_order as u32,
                    field_type: descriptor_type(descriptor),
                });
            }
            fields
        }
        Value::Array(entries) => {
            let mut fields = Vec::with_capacity(entries.len());
            for (index, descriptor) in entries.iter().enumerate() {
                let name = descriptor
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ExportError::Planning(format!(
                            "field descriptor at index {} has no name",
                            index
                        ))
                    })?;
                let place_in_order = descriptor
                    .get("placeInOrder")
                    .and_then(parse_count)
                    .unwrap_or(index as u64);
                fields.push(FieldDescriptor {
                    name: name.to_string(),
                    place_in_order: place_in_order as u32,
                    field_type: descriptor_type(descriptor),
                });
            }
            fields
        }
        other => {
            return Err(ExportError::Planning(format!(
                "metadata is neither a map nor an array (got {})",
                value_kind(other)
            )))
        }
    };

    fields.sort_by(|a, b| {
        a.place_in_order
            .cmp(&b.place_in_order)
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(fields)
}

/// Pulls the type tag out of one descriptor, preferring the string form.
fn descriptor_type(descriptor: &Value) -> String {
    if let Some(tag) = descriptor.get("type").and_then(Value::as_str) {
        return tag.to_string();
    }
    if let Some(code) = descriptor.get("typeCode").and_then(parse_count) {
        return format!("typeCode:{}", code);
    }
    "UNKNOWN".to_string()
}
