//! Export run configuration.
//!
//! One explicit configuration value, assembled at startup from CLI flags and
//! environment variables, then passed by reference into every component
//! constructor. Nothing in this crate reads configuration through globals.
//!
//! # Security
//! Client secrets and pre-issued tokens are held as `SecretString` and every
//! type carrying one implements a redacting `Debug`.

use std::fmt;
use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ExportError;

// ─────────────────────────────────────────────────────────────────────────────
// Environment variable names
// ─────────────────────────────────────────────────────────────────────────────

/// Login host for the client-credentials token exchange.
pub const ENV_LOGIN_URL: &str = "DC_LOGIN_URL";
/// OAuth client id for the token exchange.
pub const ENV_CLIENT_ID: &str = "DC_CLIENT_ID";
/// OAuth client secret for the token exchange.
pub const ENV_CLIENT_SECRET: &str = "DC_CLIENT_SECRET";
/// Fixed pre-issued bearer token (skips the exchange entirely).
pub const ENV_ACCESS_TOKEN: &str = "DC_ACCESS_TOKEN";
/// Instance base URL; required alongside a pre-issued token.
pub const ENV_INSTANCE_URL: &str = "DC_INSTANCE_URL";
/// Default logical namespace for submitted queries.
pub const ENV_DATASPACE: &str = "DC_DATASPACE";
/// Bearer token for the object-storage API.
pub const ENV_STORAGE_TOKEN: &str = "GCS_ACCESS_TOKEN";

// ─────────────────────────────────────────────────────────────────────────────
// Credential source
// ─────────────────────────────────────────────────────────────────────────────

/// How the exporter obtains its bearer credential.
#[derive(Clone)]
pub enum CredentialConfig {
    /// Exchange a statically configured client identity for a token via the
    /// `client_credentials` grant. The credential can be refreshed at will.
    ClientCredentials {
        login_url: String,
        client_id: String,
        client_secret: SecretString,
    },
    /// A fixed, pre-issued token. Still validated before each use, but there
    /// is no way to obtain a replacement if it stops validating.
    PreIssued {
        access_token: SecretString,
        instance_url: String,
    },
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialConfig::ClientCredentials {
                login_url,
                client_id,
                ..
            } => f
                .debug_struct("ClientCredentials")
                .field("login_url", login_url)
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .finish(),
            CredentialConfig::PreIssued { instance_url, .. } => f
                .debug_struct("PreIssued")
                .field("access_token", &"[REDACTED]")
                .field("instance_url", instance_url)
                .finish(),
        }
    }
}

impl CredentialConfig {
    /// Resolves the credential source from environment variables.
    ///
    /// A pre-issued token (`DC_ACCESS_TOKEN`) takes precedence over exchange
    /// credentials when both are present; it must be accompanied by
    /// `DC_INSTANCE_URL`. With neither source configured this is a `Config`
    /// error, not a deferred auth failure.
    pub fn from_env() -> Result<Self, ExportError> {
        Self::from_lookup(env_var)
    }

    /// Same as [`from_env`](Self::from_env) but with an injectable variable
    /// lookup, so resolution is testable without touching process state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ExportError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(ENV_ACCESS_TOKEN) {
            let instance_url = lookup(ENV_INSTANCE_URL).ok_or_else(|| {
                ExportError::Config(format!(
                    "{} requires {} to be set",
                    ENV_ACCESS_TOKEN, ENV_INSTANCE_URL
                ))
            })?;
            return Ok(CredentialConfig::PreIssued {
                access_token: SecretString::from(token),
                instance_url: trim_trailing_slash(&instance_url),
            });
        }

        match (
            lookup(ENV_LOGIN_URL),
            lookup(ENV_CLIENT_ID),
            lookup(ENV_CLIENT_SECRET),
        ) {
            (Some(login_url), Some(client_id), Some(client_secret)) => {
                Ok(CredentialConfig::ClientCredentials {
                    login_url: trim_trailing_slash(&login_url),
                    client_id,
                    client_secret: SecretString::from(client_secret),
                })
            }
            (None, None, None) => Err(ExportError::Config(format!(
                "no credential source configured: set {} (+ {}) or {}/{}/{}",
                ENV_ACCESS_TOKEN, ENV_INSTANCE_URL, ENV_LOGIN_URL, ENV_CLIENT_ID, ENV_CLIENT_SECRET
            ))),
            _ => Err(ExportError::Config(format!(
                "incomplete exchange credentials: {}, {} and {} must all be set",
                ENV_LOGIN_URL, ENV_CLIENT_ID, ENV_CLIENT_SECRET
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage target
// ─────────────────────────────────────────────────────────────────────────────

/// Destination for the optional post-export upload.
#[derive(Clone)]
pub struct StorageConfig {
    /// Bucket name.
    pub bucket: String,
    /// Object path within the bucket.
    pub destination: String,
    /// Request a public-read ACL on the uploaded object.
    pub make_public: bool,
    /// Bearer token for the storage API.
    pub access_token: SecretString,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("bucket", &self.bucket)
            .field("destination", &self.destination)
            .field("make_public", &self.make_public)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl StorageConfig {
    /// Builds a storage target, pulling the storage bearer token from the
    /// environment (`GCS_ACCESS_TOKEN`).
    pub fn from_env(bucket: String, destination: String, make_public: bool) -> Result<Self, ExportError> {
        Self::from_lookup(bucket, destination, make_public, env_var)
    }

    /// Lookup-injectable variant of [`from_env`](Self::from_env).
    pub fn from_lookup<F>(
        bucket: String,
        destination: String,
        make_public: bool,
        lookup: F,
    ) -> Result<Self, ExportError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if bucket.trim().is_empty() {
            return Err(ExportError::Config("storage bucket must not be empty".into()));
        }
        if destination.trim().is_empty() {
            return Err(ExportError::Config(
                "storage destination path must not be empty".into(),
            ));
        }
        let token = lookup(ENV_STORAGE_TOKEN).ok_or_else(|| {
            ExportError::Config(format!(
                "storage upload requested but {} is not set",
                ENV_STORAGE_TOKEN
            ))
        })?;
        Ok(StorageConfig {
            bucket,
            destination,
            make_public,
            access_token: SecretString::from(token),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ExportConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Everything one export run needs, resolved up front.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Credential source for the query API.
    pub credentials: CredentialConfig,
    /// Query text, passed through to the remote system unmodified.
    pub sql: String,
    /// Logical namespace the query runs against, when the org uses one.
    pub dataspace: Option<String>,
    /// Local path the CSV is written to.
    pub output_path: PathBuf,
    /// Optional cap on exported rows; clamps the planner's effective total.
    pub row_cap: Option<u64>,
    /// Optional post-export upload target.
    pub storage: Option<StorageConfig>,
}

impl ExportConfig {
    /// Validates cross-field constraints not enforceable at construction.
    ///
    /// # Errors
    /// Returns `ExportError::Config` on an empty query, an empty output path,
    /// or a zero row cap.
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.sql.trim().is_empty() {
            return Err(ExportError::Config("query text must not be empty".into()));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(ExportError::Config("output path must not be empty".into()));
        }
        if self.row_cap == Some(0) {
            return Err(ExportError::Config(
                "row cap must be greater than zero when set".into(),
            ));
        }
        if let Some(dataspace) = &self.dataspace {
            if dataspace.trim().is_empty() {
                return Err(ExportError::Config(
                    "dataspace must not be blank when set".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Reads one environment variable, treating blank values as unset.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Normalizes configured base URLs so path joins never double a slash.
fn trim_trailing_slash(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn sample_config() -> ExportConfig {
        ExportConfig {
            credentials: CredentialConfig::PreIssued {
                access_token: SecretString::from("token-123".to_string()),
                instance_url: "https://org.example.com".into(),
            },
            sql: "SELECT Id FROM Account__dlm".into(),
            dataspace: None,
            output_path: PathBuf::from("out.csv"),
            row_cap: None,
            storage: None,
        }
    }

    #[test]
    fn resolves_client_credentials() {
        let creds = CredentialConfig::from_lookup(lookup_from(&[
            (ENV_LOGIN_URL, "https://login.example.com/"),
            (ENV_CLIENT_ID, "client-abc"),
            (ENV_CLIENT_SECRET, "s3cret"),
        ]))
        .expect("should resolve");

        match creds {
            CredentialConfig::ClientCredentials {
                login_url,
                client_id,
                client_secret,
            } => {
                // Trailing slash trimmed so later joins stay clean
                assert_eq!(login_url, "https://login.example.com");
                assert_eq!(client_id, "client-abc");
                assert_eq!(client_secret.expose_secret(), "s3cret");
            }
            other => panic!("expected ClientCredentials, got {:?}", other),
        }
    }

    #[test]
    fn pre_issued_token_takes_precedence() {
        let creds = CredentialConfig::from_lookup(lookup_from(&[
            (ENV_ACCESS_TOKEN, "fixed-token"),
            (ENV_INSTANCE_URL, "https://org.example.com"),
            (ENV_LOGIN_URL, "https://login.example.com"),
            (ENV_CLIENT_ID, "client-abc"),
            (ENV_CLIENT_SECRET, "s3cret"),
        ]))
        .expect("should resolve");

        assert!(
            matches!(creds, CredentialConfig::PreIssued { .. }),
            "expected PreIssued, got {:?}",
            creds
        );
    }

    #[test]
    fn pre_issued_token_requires_instance_url() {
        let err = CredentialConfig::from_lookup(lookup_from(&[(ENV_ACCESS_TOKEN, "fixed-token")]))
            .expect_err("should fail");
        assert!(matches!(err, ExportError::Config(_)), "got {:?}", err);
        assert!(err.to_string().contains(ENV_INSTANCE_URL));
    }

    #[test]
    fn missing_everything_is_a_config_error() {
        let err = CredentialConfig::from_lookup(|_| None).expect_err("should fail");
        assert!(matches!(err, ExportError::Config(_)), "got {:?}", err);
        assert!(err.to_string().contains("no credential source"));
    }

    #[test]
    fn partial_exchange_credentials_are_rejected() {
        let err = CredentialConfig::from_lookup(lookup_from(&[
            (ENV_LOGIN_URL, "https://login.example.com"),
            (ENV_CLIENT_ID, "client-abc"),
        ]))
        .expect_err("should fail");
        assert!(err.to_string().contains("incomplete"), "got: {}", err);
    }

    #[test]
    fn storage_config_requires_token() {
        let err = StorageConfig::from_lookup("exports".into(), "daily/run.csv".into(), false, |_| None)
            .expect_err("should fail");
        assert!(err.to_string().contains(ENV_STORAGE_TOKEN), "got: {}", err);
    }

    #[test]
    fn storage_config_rejects_blank_bucket_and_path() {
        let lookup = lookup_from(&[(ENV_STORAGE_TOKEN, "gcs-token")]);
        assert!(StorageConfig::from_lookup("  ".into(), "x".into(), false, &lookup).is_err());
        assert!(StorageConfig::from_lookup("bucket".into(), "".into(), false, &lookup).is_err());
    }

    #[test]
    fn validate_rejects_empty_query() {
        let mut config = sample_config();
        config.sql = "   ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_row_cap() {
        let mut config = sample_config();
        config.row_cap = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_blank_dataspace() {
        let mut config = sample_config();
        config.dataspace = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_complete_config() {
        let mut config = sample_config();
        config.row_cap = Some(1000);
        config.dataspace = Some("default".into());
        config.validate().expect("should validate");
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = CredentialConfig::ClientCredentials {
            login_url: "https://login.example.com".into(),
            client_id: "client-abc".into(),
            client_secret: SecretString::from("super_secret_value".to_string()),
        };
        let debug_output = format!("{:?}", creds);
        assert!(
            !debug_output.contains("super_secret_value"),
            "Debug output leaked client secret"
        );
        assert!(debug_output.contains("[REDACTED]"));

        let storage = StorageConfig {
            bucket: "exports".into(),
            destination: "run.csv".into(),
            make_public: false,
            access_token: SecretString::from("gcs_secret_token".to_string()),
        };
        let debug_output = format!("{:?}", storage);
        assert!(
            !debug_output.contains("gcs_secret_token"),
            "Debug output leaked storage token"
        );
        assert!(debug_output.contains("[REDACTED]"));
    }
}
