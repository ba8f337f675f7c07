//! One export run, end to end: probe, fetch, write, optionally publish.
//!
//! The runner owns the component wiring and the one policy decision the
//! pipeline itself does not make: a storage-upload failure is logged and
//! swallowed, because the export is complete and valuable once the local
//! file is closed. Everything before that point is fatal on first failure,
//! leaving a truncated partial file on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::{ExportConfig, StorageConfig};
use crate::datacloud::auth::TokenCache;
use crate::datacloud::transport::{build_http_client, QueryTransport};
use crate::error::ExportError;
use crate::export::planner::PaginationPlanner;
use crate::export::writer::TabularWriter;
use crate::storage::{GcsClient, ObjectStorage, UploadOptions};

// ─────────────────────────────────────────────────────────────────────────────
// ExportOutcome
// ─────────────────────────────────────────────────────────────────────────────

/// Summary of a completed export run.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    /// Data rows written to the output file.
    pub rows_written: u64,
    /// Offset fetches issued after the probe.
    pub fetches: u64,
    /// Where the file landed locally.
    pub output_path: PathBuf,
    /// Final file size in bytes.
    pub bytes_written: u64,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Public object URL when the optional upload succeeded.
    pub storage_url: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ExportRunner
// ─────────────────────────────────────────────────────────────────────────────

/// Composes the credential cache, transport, planner, writer and storage
/// client into one run.
pub struct ExportRunner {
    config: ExportConfig,
    planner: PaginationPlanner,
    storage: Option<Arc<dyn ObjectStorage>>,
}

impl ExportRunner {
    /// Wires up a runner from validated configuration. One HTTP client is
    /// built here and shared by every component.
    ///
    /// # Errors
    /// `ExportError::Config` when the configuration fails validation.
    pub fn new(config: ExportConfig) -> Result<Self, ExportError> {
        config.validate()?;

        let http = build_http_client()?;
        let tokens = TokenCache::new(&http, &config.credentials);
        let transport = QueryTransport::new(&http, &tokens, &config);
        let planner = PaginationPlanner::new(&transport, &config);
        let storage: Option<Arc<dyn ObjectStorage>> = config
            .storage
            .as_ref()
            .map(|target| Arc::new(GcsClient::new(&http, target)) as Arc<dyn ObjectStorage>);

        Ok(Self {
            config,
            planner,
            storage,
        })
    }

    /// Replaces the storage collaborator. Tests install a recording fake;
    /// alternative backends fit the same seam.
    pub fn with_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Runs the export to completion.
    ///
    /// Sequencing: probe → create output file → header → fetch loop (each
    /// batch written before the next fetch) → close file → optional upload.
    /// The output file is not created until the probe has succeeded, so a
    /// rejected query leaves nothing on disk.
    ///
    /// # Errors
    /// The first failure aborts the run (see [`ExportError`]); a failed
    /// storage upload alone does not.
    pub async fn run(&self) -> Result<ExportOutcome, ExportError> {
        let started = Instant::now();
        info!(
            "[EXPORT] starting export to {}",
            self.config.output_path.display()
        );

        let mut plan = self.planner.probe(&self.config.sql).await?;

        let mut writer = TabularWriter::create(&self.config.output_path)?;
        writer.write_header(&plan.fields)?;

        let stats = self
            .planner
            .fetch_all(&mut plan, |batch| {
                writer.write_rows(&batch.rows)?;
                Ok(())
            })
            .await?;

        let summary = writer.finish()?;

        let mut outcome = ExportOutcome {
            rows_written: summary.rows_written,
            fetches: stats.fetches,
            output_path: self.config.output_path.clone(),
            bytes_written: summary.bytes_written,
            elapsed: started.elapsed(),
            storage_url: None,
        };

        if let (Some(storage), Some(target)) = (&self.storage, &self.config.storage) {
            match self.upload(storage.as_ref(), target, &outcome).await {
                Ok(url) => {
                    info!("[EXPORT] published to {}", url);
                    outcome.storage_url = Some(url);
                }
                Err(e) => {
                    warn!(
                        "[EXPORT] storage upload failed, export kept at {}: {}",
                        outcome.output_path.display(),
                        e
                    );
                }
            }
        }

        info!(
            "[EXPORT] complete: {} rows, {} fetches, {} bytes in {}ms",
            outcome.rows_written,
            outcome.fetches,
            outcome.bytes_written,
            outcome.elapsed.as_millis()
        );
        Ok(outcome)
    }

    /// Hands the finished file to the storage collaborator, tagged with run
    /// metadata.
    async fn upload(
        &self,
        storage: &dyn ObjectStorage,
        target: &StorageConfig,
        outcome: &ExportOutcome,
    ) -> Result<String, ExportError> {
        let mut metadata = HashMap::new();
        metadata.insert("rowCount".to_string(), outcome.rows_written.to_string());
        metadata.insert(
            "exportDurationMs".to_string(),
            outcome.elapsed.as_millis().to_string(),
        );
        let options = UploadOptions {
            make_public: target.make_public,
            metadata,
        };
        storage
            .upload(
                &target.bucket,
                &self.config.output_path,
                &target.destination,
                &options,
            )
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
