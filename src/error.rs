//! Error types for `ticket_migrate`.
//!
//! Library code returns [`MigrateError`]. Per-phase failures inside the push
//! pipeline and the link rebuilder are absorbed at the phase boundary and
//! recorded as [`PhaseFailure`](crate::pipeline::PhaseFailure) entries instead
//! of propagating; only configuration problems and failures to pull the
//! initial listings surface to the caller.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Errors raised by the migration engine and its backends.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// A backend answered with a non-success status code.
    #[error("{method} {url} failed with HTTP {status}: {body}")]
    Http {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    /// Connection, TLS or timeout failure below the HTTP layer.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing required configuration key: {key}")]
    MissingConfig { key: String },

    /// A backend response lacked a field the schema guarantees.
    #[error("malformed response from {context}: {detail}")]
    MalformedResponse { context: String, detail: String },

    #[error("unknown source system: {0} (expected one of: jira, youtrack)")]
    UnknownSource(String),
}

impl MigrateError {
    /// Build a [`MigrateError::MalformedResponse`].
    pub fn malformed(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MalformedResponse {
            context: context.into(),
            detail: detail.into(),
        }
    }

    pub fn missing(key: impl Into<String>) -> Self {
        Self::MissingConfig { key: key.into() }
    }

    /// True for failures that happened on the wire rather than in our own code.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Http { .. } | Self::Transport(_))
    }

    /// HTTP status code, when the failure was a non-success response.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_display_includes_context() {
        let err = MigrateError::Http {
            method: "POST".to_string(),
            url: "https://example.test/_apis/wit/workitems/$Bug".to_string(),
            status: 400,
            body: "TF401320".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("POST"));
        assert!(text.contains("HTTP 400"));
        assert!(text.contains("TF401320"));
        assert!(err.is_transport());
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn config_errors_are_not_transport() {
        let err = MigrateError::missing("target.token");
        assert!(!err.is_transport());
        assert_eq!(err.status(), None);
        assert_eq!(
            err.to_string(),
            "missing required configuration key: target.token"
        );
    }
}
