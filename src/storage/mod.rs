//! Object storage for completed exports.
//!
//! A narrow put/exists/delete surface behind the [`ObjectStorage`] trait, so
//! the export runner can be exercised against a recording fake. The
//! production implementation is the GCS JSON API client in [`gcs`].

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::error::ExportError;

pub mod gcs;

pub use gcs::GcsClient;

/// Per-upload behavior.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Request a public-read ACL on the uploaded object.
    pub make_public: bool,
    /// Custom object metadata, attached with a follow-up PATCH.
    pub metadata: HashMap<String, String>,
}

/// A bucket-scoped object store.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Uploads a local file to `bucket` under `remote_path` and returns the
    /// object's public URL.
    async fn upload(
        &self,
        bucket: &str,
        local_path: &Path,
        remote_path: &str,
        options: &UploadOptions,
    ) -> Result<String, ExportError>;

    /// True when an object exists at `remote_path`.
    async fn exists(&self, bucket: &str, remote_path: &str) -> Result<bool, ExportError>;

    /// Deletes the object at `remote_path`. Deleting an object that does not
    /// exist is not an error.
    async fn delete(&self, bucket: &str, remote_path: &str) -> Result<(), ExportError>;
}
