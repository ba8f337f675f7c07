//! GCS JSON API client: media upload, existence check, delete.
//!
//! Thin glue with no internal state machine: no resumable sessions, no retry
//! policy. Uploads stream from disk through `ReaderStream`, never loading the
//! file into memory. A media upload carries no custom metadata, so metadata
//! is attached with a follow-up object PATCH.
//!
//! # Security
//! The storage bearer token lives in `SecretString` and never appears in
//! logs; error bodies pass through [`sanitize_error_body`].

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use url::Url;

use crate::config::StorageConfig;
use crate::error::{sanitize_error_body, ExportError};

use super::{ObjectStorage, UploadOptions};

/// Production endpoint; tests point the client at a local stub instead.
const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com";

// ─────────────────────────────────────────────────────────────────────────────
// GcsClient
// ─────────────────────────────────────────────────────────────────────────────

/// Bearer-token client for the GCS JSON API.
pub struct GcsClient {
    http: reqwest::Client,
    access_token: SecretString,
    base_url: String,
}

impl GcsClient {
    pub fn new(http: &reqwest::Client, config: &StorageConfig) -> Self {
        Self {
            http: http.clone(),
            access_token: config.access_token.clone(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Redirects every request to a different host.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Media-upload URL: `/upload/storage/v1/b/{bucket}/o?uploadType=media`.
    fn upload_url(
        &self,
        bucket: &str,
        remote_path: &str,
        options: &UploadOptions,
    ) -> Result<Url, ExportError> {
        let mut url = parse_base(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| bad_base())?
            .extend(["upload", "storage", "v1", "b", bucket, "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", remote_path);
        if options.make_public {
            url.query_pairs_mut().append_pair("predefinedAcl", "publicRead");
        }
        Ok(url)
    }

    /// Object URL: `/storage/v1/b/{bucket}/o/{object}`. The object name is
    /// one path segment, so embedded slashes percent-encode.
    fn object_url(&self, bucket: &str, remote_path: &str) -> Result<Url, ExportError> {
        let mut url = parse_base(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| bad_base())?
            .extend(["storage", "v1", "b", bucket, "o", remote_path]);
        Ok(url)
    }

    /// Attaches custom metadata to an already-uploaded object.
    async fn patch_metadata(
        &self,
        bucket: &str,
        remote_path: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), ExportError> {
        let url = self.object_url(bucket, remote_path)?;
        debug!("[GCS] PATCH metadata for gs://{}/{}", bucket, remote_path);

        let response = self
            .http
            .patch(url)
            .bearer_auth(self.access_token.expose_secret())
            .json(&json!({ "metadata": metadata }))
            .send()
            .await
            .map_err(|e| ExportError::Storage(format!("metadata update failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ExportError::Storage(format!(
                "metadata update rejected with HTTP {}: {}",
                status.as_u16(),
                sanitize_error_body(&body)
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for GcsClient {
    /// Streams a local file into the bucket.
    ///
    /// # Errors
    /// `ExportError::Storage` on any failure: unreadable file, rejected
    /// upload, or a failed metadata PATCH (the object itself is uploaded by
    /// then; the caller decides whether that matters).
    async fn upload(
        &self,
        bucket: &str,
        local_path: &Path,
        remote_path: &str,
        options: &UploadOptions,
    ) -> Result<String, ExportError> {
        let url = self.upload_url(bucket, remote_path, options)?;

        let file = tokio::fs::File::open(local_path).await.map_err(|e| {
            ExportError::Storage(format!("failed to open {}: {}", local_path.display(), e))
        })?;
        let file_size = file
            .metadata()
            .await
            .map_err(|e| ExportError::Storage(format!("failed to stat upload source: {}", e)))?
            .len();

        let stream = ReaderStream::new(file);
        let body = reqwest::Body::wrap_stream(stream);

        info!(
            "[GCS] POST /upload/storage/v1/b/{}/o ({} bytes)",
            bucket, file_size
        );
        let start = Instant::now();

        let response = self
            .http
            .post(url)
            .bearer_auth(self.access_token.expose_secret())
            .header("Content-Type", "text/csv")
            .body(body)
            .send()
            .await
            .map_err(|e| ExportError::Storage(format!("upload request failed: {}", e)))?;

        let status = response.status();
        info!(
            "[GCS] upload gs://{}/{} -> {} in {}ms",
            bucket,
            remote_path,
            status.as_u16(),
            start.elapsed().as_millis()
        );

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ExportError::Storage(format!(
                "upload rejected with HTTP {}: {}",
                status.as_u16(),
                sanitize_error_body(&body)
            )));
        }

        if !options.metadata.is_empty() {
            self.patch_metadata(bucket, remote_path, &options.metadata)
                .await?;
        }

        Ok(format!("{}/{}/{}", self.base_url, bucket, remote_path))
    }

    async fn exists(&self, bucket: &str, remote_path: &str) -> Result<bool, ExportError> {
        let url = self.object_url(bucket, remote_path)?;
        let response = self
            .http
            .get(url)
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| ExportError::Storage(format!("existence check failed: {}", e)))?;

        let status = response.status();
        debug!(
            "[GCS] GET gs://{}/{} -> {}",
            bucket,
            remote_path,
            status.as_u16()
        );
        if status.is_success() {
            Ok(true)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(ExportError::Storage(format!(
                "existence check returned HTTP {}: {}",
                status.as_u16(),
                sanitize_error_body(&body)
            )))
        }
    }

    async fn delete(&self, bucket: &str, remote_path: &str) -> Result<(), ExportError> {
        let url = self.object_url(bucket, remote_path)?;
        let response = self
            .http
            .delete(url)
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| ExportError::Storage(format!("delete failed: {}", e)))?;

        let status = response.status();
        debug!(
            "[GCS] DELETE gs://{}/{} -> {}",
            bucket,
            remote_path,
            status.as_u16()
        );
        // A missing object is an acceptable delete outcome.
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(ExportError::Storage(format!(
                "delete returned HTTP {}: {}",
                status.as_u16(),
                sanitize_error_body(&body)
            )))
        }
    }
}

fn parse_base(base_url: &str) -> Result<Url, ExportError> {
    Url::parse(base_url)
        .map_err(|e| ExportError::Storage(format!("invalid storage base URL: {}", e)))
}

fn bad_base() -> ExportError {
    ExportError::Storage("storage base URL does not accept path segments".into())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn storage_config() -> StorageConfig {
        StorageConfig {
            bucket: "exports".into(),
            destination: "daily/run.csv".into(),
            make_public: false,
            access_token: SecretString::from("gcs-token".to_string()),
        }
    }

    fn client_for(server: &MockServer) -> GcsClient {
        GcsClient::new(&reqwest::Client::new(), &storage_config()).with_base_url(&server.uri())
    }

    fn temp_csv(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("export.csv");
        fs::write(&path, content).expect("write test file");
        path
    }

    #[tokio::test]
    async fn upload_streams_the_file_and_returns_the_public_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/exports/o"))
            .and(query_param("uploadType", "media"))
            .and(query_param("name", "daily/run.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "daily/run.csv",
                "bucket": "exports"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let file = temp_csv(&dir, "Id,Name\n001,Acme\n");

        let client = client_for(&server);
        let url = client
            .upload("exports", &file, "daily/run.csv", &UploadOptions::default())
            .await
            .expect("upload should succeed");

        assert_eq!(url, format!("{}/exports/daily/run.csv", server.uri()));

        // The request body must be the file bytes, streamed as-is.
        let requests = server.received_requests().await.expect("recording enabled");
        let upload = requests
            .iter()
            .find(|r| r.url.path().starts_with("/upload/"))
            .expect("upload request recorded");
        assert_eq!(upload.body, b"Id,Name\n001,Acme\n");
    }

    #[tokio::test]
    async fn make_public_requests_the_public_read_acl() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/exports/o"))
            .and(query_param("predefinedAcl", "publicRead"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let file = temp_csv(&dir, "Id\n001\n");

        let options = UploadOptions {
            make_public: true,
            ..Default::default()
        };
        client_for(&server)
            .upload("exports", &file, "run.csv", &options)
            .await
            .expect("upload should succeed");
    }

    #[tokio::test]
    async fn custom_metadata_follows_as_a_patch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/exports/o"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/storage/v1/b/exports/o/run.csv"))
            .and(body_string_contains("\"rowCount\":\"42\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let file = temp_csv(&dir, "Id\n001\n");

        let mut options = UploadOptions::default();
        options.metadata.insert("rowCount".into(), "42".into());
        client_for(&server)
            .upload("exports", &file, "run.csv", &options)
            .await
            .expect("upload should succeed");
    }

    #[tokio::test]
    async fn object_names_keep_slashes_in_one_encoded_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let found = client_for(&server)
            .exists("exports", "daily/run.csv")
            .await
            .expect("existence check should succeed");
        assert!(found);

        let requests = server.received_requests().await.expect("recording enabled");
        assert_eq!(
            requests[0].url.path(),
            "/storage/v1/b/exports/o/daily%2Frun.csv"
        );
    }

    #[tokio::test]
    async fn rejected_upload_is_a_storage_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/exports/o"))
            .respond_with(ResponseTemplate::new(403).set_body_string("access denied"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let file = temp_csv(&dir, "Id\n001\n");

        let err = client_for(&server)
            .upload("exports", &file, "run.csv", &UploadOptions::default())
            .await
            .expect_err("upload must fail");

        assert!(matches!(err, ExportError::Storage(_)), "got {:?}", err);
        assert!(err.to_string().contains("403"), "got: {}", err);
    }

    #[tokio::test]
    async fn missing_source_file_is_a_storage_error() {
        let server = MockServer::start().await;
        let err = client_for(&server)
            .upload(
                "exports",
                Path::new("/nonexistent/export.csv"),
                "run.csv",
                &UploadOptions::default(),
            )
            .await
            .expect_err("upload must fail");
        assert!(matches!(err, ExportError::Storage(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn exists_maps_success_and_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/exports/o/present.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        // Anything unmatched comes back 404, which is exactly "absent".

        let client = client_for(&server);
        assert!(client.exists("exports", "present.csv").await.expect("check"));
        assert!(!client.exists("exports", "missing.csv").await.expect("check"));
    }

    #[tokio::test]
    async fn delete_tolerates_a_missing_object() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/storage/v1/b/exports/o/present.csv"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.delete("exports", "present.csv").await.expect("delete");
        // Unmatched DELETE -> 404 -> still Ok.
        client.delete("exports", "already-gone.csv").await.expect("delete");
    }

    #[tokio::test]
    async fn delete_surfaces_other_failures() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(500).set_body_string("backend error"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .delete("exports", "run.csv")
            .await
            .expect_err("delete must fail");
        assert!(err.to_string().contains("500"), "got: {}", err);
    }
}
