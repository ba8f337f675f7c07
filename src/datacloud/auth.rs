//! Credential acquisition, caching, and validation.
//!
//! One [`TokenCache`] per process holds the bearer credential for the query
//! API. Every acquisition goes through the same policy: a cached credential
//! is returned only while it is unexpired AND its most recent validation
//! (cached up to [`VALIDATION_TTL`]) succeeded; anything else discards the
//! cache wholesale and obtains a replacement. There is no per-call-site way
//! to skip validation.
//!
//! # Security
//! Tokens and client secrets live in `SecretString`; `Debug` output redacts
//! them and log lines never carry credential material.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::CredentialConfig;
use crate::error::{sanitize_error_body, ExportError};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Documented lifetime of an exchanged token. Renewal is driven by this
/// local clock, never by an `expires_in` field in the response.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(2 * 60 * 60);

/// How long a validation result (positive or negative) is trusted before the
/// probe is repeated.
pub const VALIDATION_TTL: Duration = Duration::from_secs(5 * 60);

/// Length of the token prefix used to key validation entries.
const VALIDATION_KEY_LEN: usize = 16;

/// Token exchange endpoint, relative to the login host.
pub(crate) const TOKEN_EXCHANGE_PATH: &str = "/services/oauth2/token";

/// Cheap authenticated endpoint used as the validation probe. Any 2xx
/// response counts as a valid credential.
pub(crate) const VALIDATION_PROBE_PATH: &str = "/api/v1/metadata";

// ─────────────────────────────────────────────────────────────────────────────
// Credential
// ─────────────────────────────────────────────────────────────────────────────

/// A bearer credential for the query API.
///
/// Replaced wholesale on any failed validation or detected expiry; never
/// partially mutated.
#[derive(Clone)]
pub struct Credential {
    /// The bearer token (wrapped for security).
    pub access_token: SecretString,
    /// Instance base URL all query calls are made against.
    pub instance_url: String,
    /// Absolute expiry instant; issue time plus [`TOKEN_LIFETIME`].
    pub expires_at: Instant,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("instance_url", &self.instance_url)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    /// True once the expiry instant has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Stable token prefix keying this credential's validation entries.
    fn validation_key(&self) -> String {
        self.access_token
            .expose_secret()
            .chars()
            .take(VALIDATION_KEY_LEN)
            .collect()
    }
}

/// Outcome of one validation probe, cached under the token prefix.
#[derive(Debug, Clone, Copy)]
struct ValidationEntry {
    valid: bool,
    checked_at: Instant,
}

// ─────────────────────────────────────────────────────────────────────────────
// Token exchange wire types
// ─────────────────────────────────────────────────────────────────────────────

/// Response from the token exchange endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenExchangeResponse {
    pub access_token: String,
    pub instance_url: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub issued_at: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// TokenCache
// ─────────────────────────────────────────────────────────────────────────────

/// Thread-safe credential cache with single-flight refresh.
///
/// # Thread Safety
///
/// - `credential`: `RwLock` slot allowing concurrent reads but exclusive
///   replacement.
/// - `refresh_lock`: `Mutex` serializing refresh attempts with double-checked
///   reads, so concurrent callers never both hit the token endpoint for the
///   same expired credential.
#[derive(Clone)]
pub struct TokenCache {
    /// Shared HTTP client.
    http: reqwest::Client,
    /// Where replacement credentials come from.
    source: CredentialConfig,
    /// The current credential, if any.
    credential: Arc<RwLock<Option<Credential>>>,
    /// Validation results keyed by token prefix.
    validations: Arc<RwLock<HashMap<String, ValidationEntry>>>,
    /// Serializes refresh operations.
    refresh_lock: Arc<Mutex<()>>,
    /// How long validation results are trusted.
    validation_ttl: Duration,
}

impl TokenCache {
    /// Creates a cache over the given credential source. No network traffic
    /// happens until the first [`acquire`](Self::acquire).
    pub fn new(http: &reqwest::Client, source: &CredentialConfig) -> Self {
        Self {
            http: http.clone(),
            source: source.clone(),
            credential: Arc::new(RwLock::new(None)),
            validations: Arc::new(RwLock::new(HashMap::new())),
            refresh_lock: Arc::new(Mutex::new(())),
            validation_ttl: VALIDATION_TTL,
        }
    }

    /// Overrides the validation TTL.
    pub fn with_validation_ttl(mut self, ttl: Duration) -> Self {
        self.validation_ttl = ttl;
        self
    }

    /// Returns a usable credential, refreshing if necessary.
    ///
    /// # Errors
    ///
    /// `ExportError::Auth` when the token endpoint rejects the exchange, when
    /// the exchange cannot be reached, or when a fixed pre-issued credential
    /// fails validation (there is no fallback for that case).
    pub async fn acquire(&self) -> Result<Credential, ExportError> {
        // Fast path: cached credential that still validates.
        if let Some(cred) = self.cached_usable().await {
            return Ok(cred);
        }

        // Slow path: serialize refresh attempts.
        let _refresh_guard = self.refresh_lock.lock().await;

        // Double-check: another task may have refreshed while we waited.
        if let Some(cred) = self.cached_usable().await {
            debug!("[AUTH] credential already refreshed by another task");
            return Ok(cred);
        }

        self.discard().await;

        let cred = match &self.source {
            CredentialConfig::ClientCredentials {
                login_url,
                client_id,
                client_secret,
            } => {
                let response =
                    exchange_token(&self.http, login_url, client_id, client_secret).await?;
                info!("[AUTH] token exchange complete");
                Credential {
                    access_token: SecretString::from(response.access_token),
                    instance_url: response.instance_url.trim_end_matches('/').to_string(),
                    expires_at: Instant::now() + TOKEN_LIFETIME,
                }
            }
            CredentialConfig::PreIssued {
                access_token,
                instance_url,
            } => {
                let cred = Credential {
                    access_token: access_token.clone(),
                    instance_url: instance_url.clone(),
                    expires_at: Instant::now() + TOKEN_LIFETIME,
                };
                // Pre-issued credentials cannot be replaced; an invalid one
                // is fatal rather than a trigger for another source.
                if !self.validate(&cred).await {
                    return Err(ExportError::Auth(
                        "pre-issued credential failed validation and no exchange credentials are configured".into(),
                    ));
                }
                debug!("[AUTH] pre-issued credential validated");
                cred
            }
        };

        let mut slot = self.credential.write().await;
        *slot = Some(cred.clone());
        Ok(cred)
    }

    /// Returns the cached credential when it is unexpired and validates.
    async fn cached_usable(&self) -> Option<Credential> {
        let cred = { self.credential.read().await.clone() }?;
        if cred.is_expired() {
            debug!("[AUTH] cached credential passed its expiry");
            return None;
        }
        if self.validate(&cred).await {
            Some(cred)
        } else {
            warn!("[AUTH] cached credential failed validation");
            None
        }
    }

    /// Validates a credential, consulting the TTL cache before probing.
    async fn validate(&self, cred: &Credential) -> bool {
        let key = cred.validation_key();

        if let Some(entry) = self.validations.read().await.get(&key) {
            if entry.checked_at.elapsed() < self.validation_ttl {
                debug!("[AUTH] validation cache hit (valid={})", entry.valid);
                return entry.valid;
            }
        }

        let valid = probe_credential(&self.http, cred).await;
        debug!("[AUTH] validation probe result: valid={}", valid);

        let mut validations = self.validations.write().await;
        validations.insert(
            key,
            ValidationEntry {
                valid,
                checked_at: Instant::now(),
            },
        );
        valid
    }

    /// Drops the credential and every validation entry.
    async fn discard(&self) {
        let mut slot = self.credential.write().await;
        let mut validations = self.validations.write().await;
        *slot = None;
        validations.clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote calls
// ─────────────────────────────────────────────────────────────────────────────

/// Exchanges the configured client identity for a token.
///
/// # Errors
///
/// Everything maps to `ExportError::Auth`: a rejected exchange, an
/// unreachable endpoint, and a malformed response body alike.
async fn exchange_token(
    http: &reqwest::Client,
    login_url: &str,
    client_id: &str,
    client_secret: &SecretString,
) -> Result<TokenExchangeResponse, ExportError> {
    let url = format!("{}{}", login_url, TOKEN_EXCHANGE_PATH);
    let params = [
        ("grant_type", "client_credentials"),
        ("client_id", client_id),
        ("client_secret", client_secret.expose_secret()),
    ];

    let response = http
        .post(&url)
        .form(&params)
        .send()
        .await
        .map_err(|e| ExportError::Auth(format!("token exchange request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ExportError::Auth(format!(
            "token endpoint returned HTTP {}: {}",
            status.as_u16(),
            sanitize_error_body(&body)
        )));
    }

    let token = response
        .json::<TokenExchangeResponse>()
        .await
        .map_err(|e| ExportError::Auth(format!("malformed token response: {}", e)))?;

    debug!(
        "[AUTH] exchange response: token_type={} scope={} issued_at={}",
        token.token_type, token.scope, token.issued_at
    );
    Ok(token)
}

/// Probes the credential against the metadata endpoint. Any 2xx is valid;
/// every other outcome, including a network failure, is invalid.
async fn probe_credential(http: &reqwest::Client, cred: &Credential) -> bool {
    let url = format!("{}{}", cred.instance_url, VALIDATION_PROBE_PATH);
    match http
        .get(&url)
        .bearer_auth(cred.access_token.expose_secret())
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            warn!("[AUTH] validation probe could not be sent: {}", e);
            false
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
