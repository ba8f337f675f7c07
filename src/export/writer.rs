//! Streaming CSV serialization of heterogeneous row shapes.
//!
//! Uses the `csv` crate so embedded commas, quotes and newlines are escaped
//! per RFC 4180. One pass, append-only: batches are written as they arrive
//! and never buffered whole-file. Output goes directly to the final path, so
//! a mid-run failure leaves a truncated partial file on disk rather than
//! nothing.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use csv::WriterBuilder;
use serde_json::{Map, Value};
use tracing::debug;

use crate::datacloud::batch::{FieldDescriptor, RowSet};
use crate::error::ExportError;

// ─────────────────────────────────────────────────────────────────────────────
// TabularWriter
// ─────────────────────────────────────────────────────────────────────────────

/// Writes an ordered stream of row batches to one CSV file.
///
/// Column order is fixed once by [`write_header`](Self::write_header) and
/// never re-derived from later batches, even when their field sets differ.
pub struct TabularWriter {
    inner: csv::Writer<BufWriter<File>>,
    /// Column names in output order; `Some` once the header is written.
    header: Option<Vec<String>>,
    rows_written: u64,
}

/// What one finished write pass produced.
#[derive(Debug, Clone)]
pub struct WriteSummary {
    /// Data rows written (the header line is not counted).
    pub rows_written: u64,
    /// Final size of the output file in bytes.
    pub bytes_written: u64,
}

impl TabularWriter {
    /// Creates the output file, including any missing parent directories.
    ///
    /// # Errors
    /// `ExportError::Write` when the path cannot be created.
    pub fn create(path: &Path) -> Result<Self, ExportError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        // Rows may legitimately be ragged relative to the header; the writer
        // passes them through rather than resolving the discrepancy.
        let inner = WriterBuilder::new()
            .flexible(true)
            .from_writer(BufWriter::new(file));
        Ok(Self {
            inner,
            header: None,
            rows_written: 0,
        })
    }

    /// Writes the header row from the field descriptors, fixing column order
    /// for the rest of the file.
    ///
    /// # Errors
    /// `ExportError::Write` when a header was already written.
    pub fn write_header(&mut self, fields: &[FieldDescriptor]) -> Result<(), ExportError> {
        if self.header.is_some() {
            return Err(ExportError::Write(
                "header already written; column order is fixed".into(),
            ));
        }
        let names: Vec<String> = fields.iter().map(|f| f.name.clone()).collect();
        self.inner.write_record(&names)?;
        debug!("[EXPORT] header written ({} columns)", names.len());
        self.header = Some(names);
        Ok(())
    }

    /// Appends one batch of rows. Positional rows are written in server
    /// order; named rows are projected into the fixed header order, with
    /// unknown keys dropped and missing keys serialized as empty fields.
    ///
    /// # Errors
    /// `ExportError::Write` when no header has been written yet or the file
    /// write fails.
    pub fn write_rows(&mut self, rows: &RowSet) -> Result<u64, ExportError> {
        let header = self.header.as_ref().ok_or_else(|| {
            ExportError::Write("rows arrived before a header was written".into())
        })?;

        let written = match rows {
            RowSet::Positional(rows) => {
                for row in rows {
                    let record = row.iter().map(render_value).collect::<Result<Vec<_>, _>>()?;
                    self.inner.write_record(&record)?;
                }
                rows.len() as u64
            }
            RowSet::Named(rows) => {
                for row in rows {
                    let record = project_row(row, header)?;
                    self.inner.write_record(&record)?;
                }
                rows.len() as u64
            }
        };

        self.rows_written += written;
        Ok(written)
    }

    /// Flushes and closes the file, reporting what was written.
    pub fn finish(mut self) -> Result<WriteSummary, ExportError> {
        self.inner.flush()?;
        let buffer = self
            .inner
            .into_inner()
            .map_err(|e| ExportError::Write(format!("failed to finish output file: {}", e)))?;
        let file = buffer
            .into_inner()
            .map_err(|e| ExportError::Write(format!("failed to flush output file: {}", e)))?;
        let bytes_written = file.metadata()?.len();
        Ok(WriteSummary {
            rows_written: self.rows_written,
            bytes_written,
        })
    }
}

/// Projects a name-keyed row into the fixed header order.
fn project_row(row: &Map<String, Value>, header: &[String]) -> Result<Vec<String>, ExportError> {
    header
        .iter()
        .map(|column| match row.get(column) {
            Some(value) => render_value(value),
            None => Ok(String::new()),
        })
        .collect()
}

/// Renders one cell. Nulls become empty fields; nested structures become
/// compact JSON text; everything else renders in its natural form.
fn render_value(value: &Value) -> Result<String, ExportError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value)
            .map_err(|e| ExportError::Write(format!("unserializable cell value: {}", e))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
