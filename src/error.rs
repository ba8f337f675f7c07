use thiserror::Error;

/// Patterns (lowercase) that indicate credential material not safe to echo
/// into error text or logs. Used by `contains_sensitive()` for
/// case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "access_token",
    "client_secret",
    "authorization:",
];

/// Upper bound on upstream response bodies carried inside an error.
const MAX_ERROR_BODY_LEN: usize = 2048;

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Prepares an upstream response body for inclusion in an error: bodies that
/// echo credential material are withheld entirely, and anything else is
/// clipped to a bounded length so a misbehaving endpoint cannot flood logs.
pub(crate) fn sanitize_error_body(body: &str) -> String {
    if contains_sensitive(body) {
        return "[response body withheld: contains credential material]".into();
    }
    let trimmed = body.trim();
    if trimmed.len() > MAX_ERROR_BODY_LEN {
        let mut end = MAX_ERROR_BODY_LEN;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{} [truncated]", &trimmed[..end])
    } else {
        trimmed.to_string()
    }
}

/// Application-wide error type.
///
/// Every variant is fatal to the run that produced it; no layer below the
/// orchestrator retries. Storage errors are the one variant the orchestrator
/// catches instead of propagating, since the local export file is complete
/// by the time an upload can fail.
#[derive(Debug, Error)]
pub enum ExportError {
    // ── Auth ──────────────────────────────────────────────────────────────────
    #[error("authentication failed: {0}")]
    Auth(String),

    // ── Query API ─────────────────────────────────────────────────────────────
    #[error("query failed with HTTP {status}: {body}")]
    Query { status: u16, body: String },

    #[error("pagination planning failed: {0}")]
    Planning(String),

    // ── Output ────────────────────────────────────────────────────────────────
    #[error("write failed: {0}")]
    Write(String),

    // ── Object storage ────────────────────────────────────────────────────────
    #[error("storage operation failed: {0}")]
    Storage(String),

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("connection failed: {0}")]
    Connection(String),

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ExportError {
    /// Builds a `Query` error from a non-success HTTP response, sanitizing
    /// and clipping the body before it is carried anywhere.
    pub(crate) fn query_status(status: u16, body: &str) -> Self {
        ExportError::Query {
            status,
            body: sanitize_error_body(body),
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Write(err.to_string())
    }
}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        ExportError::Write(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns one instance of every variant for exhaustive checks.
    fn all_variants() -> Vec<ExportError> {
        vec![
            ExportError::Auth("token endpoint rejected exchange".into()),
            ExportError::Query {
                status: 401,
                body: "session invalid".into(),
            },
            ExportError::Planning("no query handle in response".into()),
            ExportError::Write("disk full".into()),
            ExportError::Storage("bucket not found".into()),
            ExportError::Connection("timeout".into()),
            ExportError::Config("missing DC_CLIENT_ID".into()),
        ]
    }

    #[test]
    fn all_variants_have_nonempty_display() {
        for variant in all_variants() {
            let msg = variant.to_string();
            assert!(!msg.trim().is_empty(), "Empty display for {:?}", variant);
        }
    }

    #[test]
    fn query_display_includes_status_and_body() {
        let err = ExportError::Query {
            status: 503,
            body: "service unavailable".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("503"), "missing status in: {}", msg);
        assert!(msg.contains("service unavailable"), "missing body in: {}", msg);
    }

    #[test]
    fn query_status_sanitizes_body() {
        let err = ExportError::query_status(400, "Authorization: Bearer abc123");
        match err {
            ExportError::Query { status, body } => {
                assert_eq!(status, 400);
                assert!(
                    !body.to_ascii_lowercase().contains("bearer"),
                    "credential material leaked into: {}",
                    body
                );
            }
            other => panic!("expected Query, got {:?}", other),
        }
    }

    #[test]
    fn sanitize_clips_oversized_bodies() {
        let huge = "x".repeat(10_000);
        let sanitized = sanitize_error_body(&huge);
        assert!(sanitized.len() < huge.len());
        assert!(sanitized.ends_with("[truncated]"));
    }

    #[test]
    fn sanitize_passes_ordinary_bodies_through() {
        let body = r#"{"message":"Table not found","errorCode":"INVALID_TABLE"}"#;
        assert_eq!(sanitize_error_body(body), body);
    }

    #[test]
    fn sanitize_withholds_each_sensitive_pattern() {
        for pattern in SENSITIVE_PATTERNS {
            let body = format!("prefix {} suffix", pattern.to_ascii_uppercase());
            let sanitized = sanitize_error_body(&body);
            assert!(
                sanitized.contains("withheld"),
                "pattern {:?} not withheld: {}",
                pattern,
                sanitized
            );
        }
    }

    #[test]
    fn io_errors_map_to_write() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ExportError::from(io);
        assert!(matches!(err, ExportError::Write(_)), "got {:?}", err);
    }
}
