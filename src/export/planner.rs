//! Adaptive pagination: one cheap probe, then bounded offset fetches.
//!
//! The total row count of a query is unknown until the first response, so the
//! planner submits the query with a one-row limit to learn the handle, the
//! authoritative total, and the field order, then retrieves the actual data
//! as a sequence of offset fetches no larger than [`MAX_BATCH_SIZE`] rows.
//! Batches are handed to the consumer as they arrive and never accumulated.
//!
//! The loop advances by the rows each response actually carried, not by the
//! requested size, so partial pages self-correct instead of leaving gaps.

use std::time::Duration;

use tracing::{debug, info};

use crate::config::ExportConfig;
use crate::datacloud::batch::{
    FieldDescriptor, QueryHandle, RowBatch, HANDLE_FIELDS, TOTAL_FIELDS,
};
use crate::datacloud::transport::QueryTransport;
use crate::error::ExportError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Row limit for the probe submission; enough to obtain the handle, the
/// total, and the field metadata without transferring data.
pub const PROBE_ROW_LIMIT: u64 = 1;

/// Fixed per-request row ceiling; bounds payload size and writer memory.
pub const MAX_BATCH_SIZE: u64 = 25_000;

/// A pacing pause is taken after every this many fetches.
pub const PACE_EVERY_FETCHES: u64 = 10;

/// Length of the pacing pause.
pub const PACE_DELAY: Duration = Duration::from_millis(100);

// ─────────────────────────────────────────────────────────────────────────────
// PaginationPlan
// ─────────────────────────────────────────────────────────────────────────────

/// Forward-only fetch plan for one submitted query.
///
/// The offset cursor only ever increases; the plan is exhausted when it
/// reaches the effective total.
#[derive(Debug, Clone)]
pub struct PaginationPlan {
    /// Handle every offset fetch runs against.
    pub handle: QueryHandle,
    /// Ordered field descriptors from the probe; they define the header and
    /// are never re-derived from later batches.
    pub fields: Vec<FieldDescriptor>,
    /// Rows to retrieve after the optional export cap.
    effective_total: u64,
    /// Fixed per-request ceiling.
    batch_size: u64,
    /// Current position; advanced by actual rows returned.
    offset: u64,
}

impl PaginationPlan {
    fn new(handle: QueryHandle, fields: Vec<FieldDescriptor>, row_cap: Option<u64>) -> Self {
        let effective_total = match row_cap {
            Some(cap) => handle.total_rows.min(cap),
            None => handle.total_rows,
        };
        Self {
            handle,
            fields,
            effective_total,
            batch_size: MAX_BATCH_SIZE,
            offset: 0,
        }
    }

    /// Rows the plan will retrieve in total.
    pub fn effective_total(&self) -> u64 {
        self.effective_total
    }

    /// Current offset position.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The next `(offset, limit)` request, or `None` when the plan is done.
    fn next_request(&self) -> Option<(u64, u64)> {
        if self.offset >= self.effective_total {
            return None;
        }
        let limit = self.batch_size.min(self.effective_total - self.offset);
        Some((self.offset, limit))
    }

    /// Moves the cursor forward by the rows a fetch actually returned.
    fn advance(&mut self, returned_rows: u64) {
        self.offset += returned_rows;
    }
}

/// Counters for one completed fetch loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct FetchStats {
    /// Offset fetches issued after the probe.
    pub fetches: u64,
    /// Cumulative rows reported across those fetches.
    pub rows_fetched: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// PaginationPlanner
// ─────────────────────────────────────────────────────────────────────────────

/// Plans and drives the complete retrieval of one query's rows.
pub struct PaginationPlanner {
    transport: QueryTransport,
    row_cap: Option<u64>,
}

impl PaginationPlanner {
    pub fn new(transport: &QueryTransport, config: &ExportConfig) -> Self {
        Self {
            transport: transport.clone(),
            row_cap: config.row_cap,
        }
    }

    /// Submits the query with [`PROBE_ROW_LIMIT`] and builds the fetch plan.
    ///
    /// The probe's own row set is discarded; the loop re-fetches from offset
    /// zero, which keeps the offset arithmetic exact.
    ///
    /// # Errors
    ///
    /// `ExportError::Planning` when the response carries no handle, no total
    /// row count, or no field metadata. A missing total is fatal, never
    /// treated as zero rows.
    pub async fn probe(&self, sql: &str) -> Result<PaginationPlan, ExportError> {
        let submit = self.transport.submit(sql, Some(PROBE_ROW_LIMIT)).await?;

        let id = submit.handle.ok_or_else(|| {
            ExportError::Planning(format!(
                "query submission returned no handle (checked {})",
                HANDLE_FIELDS.join(", ")
            ))
        })?;
        let total_rows = submit.total_rows.ok_or_else(|| {
            ExportError::Planning(format!(
                "query submission returned no total row count (checked {})",
                TOTAL_FIELDS.join(", ")
            ))
        })?;
        if submit.fields.is_empty() {
            return Err(ExportError::Planning(
                "query submission returned no field metadata; header order cannot be established"
                    .into(),
            ));
        }

        info!(
            "[EXPORT] probe complete: handle={} total_rows={} columns={}",
            id,
            total_rows,
            submit.fields.len()
        );
        let handle = QueryHandle { id, total_rows };
        Ok(PaginationPlan::new(handle, submit.fields, self.row_cap))
    }

    /// Drives the offset loop to completion, handing each batch to `consume`
    /// before the next fetch is issued.
    ///
    /// A batch reporting `done` ends the loop immediately, even when the
    /// offset arithmetic has not caught up. Every
    /// [`PACE_EVERY_FETCHES`]th iteration pauses for [`PACE_DELAY`] first.
    ///
    /// # Errors
    ///
    /// Fetch and consumer failures propagate immediately; rows already handed
    /// to the consumer stay consumed. An empty, not-done batch with rows
    /// still outstanding is a `Planning` error (the loop would never
    /// terminate otherwise).
    pub async fn fetch_all<F>(
        &self,
        plan: &mut PaginationPlan,
        mut consume: F,
    ) -> Result<FetchStats, ExportError>
    where
        F: FnMut(&RowBatch) -> Result<(), ExportError>,
    {
        let mut stats = FetchStats::default();

        while let Some((offset, limit)) = plan.next_request() {
            if stats.fetches > 0 && stats.fetches % PACE_EVERY_FETCHES == 0 {
                debug!("[EXPORT] pacing pause after {} fetches", stats.fetches);
                tokio::time::sleep(PACE_DELAY).await;
            }

            let batch = self
                .transport
                .fetch_by_offset(&plan.handle.id, offset, limit)
                .await?;
            stats.fetches += 1;

            if batch.returned_rows == 0 && !batch.done {
                return Err(ExportError::Planning(format!(
                    "fetch at offset {} returned no rows with {} still outstanding",
                    offset,
                    plan.effective_total() - offset
                )));
            }

            consume(&batch)?;
            stats.rows_fetched += batch.returned_rows;
            plan.advance(batch.returned_rows);

            if batch.done {
                if plan.next_request().is_some() {
                    info!(
                        "[EXPORT] source reported done at offset {} of {}",
                        plan.offset(),
                        plan.effective_total()
                    );
                }
                break;
            }
        }

        debug!(
            "[EXPORT] fetch loop finished: {} fetches, {} rows",
            stats.fetches, stats.rows_fetched
        );
        Ok(stats)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
