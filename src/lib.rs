//! Streaming exporter for large Data Cloud query result sets.
//!
//! Submits one SQL query, learns the authoritative total row count from a
//! one-row probe, then retrieves the full result set in bounded offset
//! batches and streams it to an RFC-4180 CSV file, optionally publishing
//! the finished file to object storage.

pub mod config;
pub mod datacloud;
pub mod error;
pub mod export;
pub mod storage;

pub use config::{CredentialConfig, ExportConfig, StorageConfig};
pub use datacloud::{QueryTransport, TokenCache};
pub use error::ExportError;
pub use export::{ExportOutcome, ExportRunner};
pub use storage::{GcsClient, ObjectStorage, UploadOptions};
