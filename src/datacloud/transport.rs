//! The three remote query operations: submit, cursor fetch, offset fetch.
//!
//! Pure request/response: no buffering, no pagination logic, no retries. A
//! valid credential is obtained from the [`TokenCache`] immediately before
//! every call and never cached here. Non-success statuses map to
//! `ExportError::Query`; failures below HTTP map to `ExportError::Connection`.
//!
//! # Security
//! Request logs carry the path only, never the query string or headers.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::info;
use url::Url;

use crate::config::ExportConfig;
use crate::datacloud::auth::{Credential, TokenCache};
use crate::datacloud::batch::{RowBatch, SubmitResponse, WireQueryResponse};
use crate::error::ExportError;

/// User agent string for all remote API requests.
const CLIENT_USER_AGENT: &str = "datacloud-export/0.1.0";

/// Default request timeout in seconds; batches can be large.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Query API base path, relative to the credential's instance URL.
pub(crate) const QUERY_PATH: &str = "/api/v2/query";

/// Query parameter naming the logical namespace on submit.
pub(crate) const DATASPACE_PARAM: &str = "dataspace";

/// Builds the configured HTTP client shared by every component.
pub fn build_http_client() -> Result<reqwest::Client, ExportError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .map_err(|e| ExportError::Connection(format!("failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// QueryTransport
// ─────────────────────────────────────────────────────────────────────────────

/// Authenticated access to the remote query API.
#[derive(Clone)]
pub struct QueryTransport {
    /// Shared HTTP client.
    http: reqwest::Client,
    /// Credential policy object; consulted before every request.
    tokens: TokenCache,
    /// Logical namespace appended to submits, when configured.
    dataspace: Option<String>,
}

impl QueryTransport {
    /// Creates a transport over the shared HTTP client and token cache.
    pub fn new(http: &reqwest::Client, tokens: &TokenCache, config: &ExportConfig) -> Self {
        Self {
            http: http.clone(),
            tokens: tokens.clone(),
            dataspace: config.dataspace.clone(),
        }
    }

    /// Submits a query, optionally limited to `row_limit` rows.
    ///
    /// # Errors
    ///
    /// - `ExportError::Query` on any non-success status (no retry here)
    /// - `ExportError::Planning` when a success response fails to parse
    /// - `ExportError::Connection` when the request cannot complete
    pub async fn submit(
        &self,
        sql: &str,
        row_limit: Option<u64>,
    ) -> Result<SubmitResponse, ExportError> {
        let cred = self.tokens.acquire().await?;
        let mut url = endpoint(&cred, "")?;
        if let Some(dataspace) = &self.dataspace {
            url.query_pairs_mut().append_pair(DATASPACE_PARAM, dataspace);
        }

        let mut body = json!({ "sql": sql });
        if let Some(limit) = row_limit {
            body["rowLimit"] = json!(limit);
        }

        let request = self
            .http
            .post(url.clone())
            .bearer_auth(cred.access_token.expose_secret())
            .json(&body);
        let response = self.execute(request, "POST", &url).await?;
        decode(response).await?.into_submit_response()
    }

    /// Continues a prior query via its opaque continuation cursor.
    pub async fn fetch_by_cursor(&self, continuation: &str) -> Result<RowBatch, ExportError> {
        let cred = self.tokens.acquire().await?;
        let url = endpoint(&cred, &format!("/{}", continuation))?;

        let request = self
            .http
            .get(url.clone())
            .bearer_auth(cred.access_token.expose_secret());
        let response = self.execute(request, "GET", &url).await?;
        decode(response).await?.into_batch()
    }

    /// Fetches an explicit row range of a prior query.
    ///
    /// Offset and limit are passed through as-is; the remote system is the
    /// only bounds check.
    pub async fn fetch_by_offset(
        &self,
        handle: &str,
        offset: u64,
        limit: u64,
    ) -> Result<RowBatch, ExportError> {
        let cred = self.tokens.acquire().await?;
        let mut url = endpoint(&cred, &format!("/{}/rows", handle))?;
        url.query_pairs_mut()
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &limit.to_string());

        let request = self
            .http
            .get(url.clone())
            .bearer_auth(cred.access_token.expose_secret());
        let response = self.execute(request, "GET", &url).await?;
        decode(response).await?.into_batch()
    }

    /// Sends one request with timing and path-only logging.
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        method: &str,
        url: &Url,
    ) -> Result<reqwest::Response, ExportError> {
        let start = Instant::now();
        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                info!(
                    "[QUERY] {} {} {} {}ms",
                    method,
                    url.path(),
                    response.status().as_u16(),
                    duration_ms
                );
                Ok(response)
            }
            Err(e) => {
                info!("[QUERY] {} {} FAILED {}ms", method, url.path(), duration_ms);
                Err(ExportError::Connection(format!(
                    "query API request failed: {}",
                    e
                )))
            }
        }
    }
}

/// Builds a query API URL from the credential's instance base.
fn endpoint(cred: &Credential, suffix: &str) -> Result<Url, ExportError> {
    Url::parse(&format!("{}{}{}", cred.instance_url, QUERY_PATH, suffix)).map_err(|e| {
        ExportError::Config(format!(
            "instance URL does not form a valid endpoint: {}",
            e
        ))
    })
}

/// Fails non-success statuses and parses the success envelope.
async fn decode(response: reqwest::Response) -> Result<WireQueryResponse, ExportError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ExportError::query_status(status.as_u16(), &body));
    }

    response
        .json::<WireQueryResponse>()
        .await
        .map_err(|e| ExportError::Planning(format!("malformed query response: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
