//! Error types for certificate issuance.
//!
//! Every failure surfaces to the immediate caller with the backend path that was
//! attempted and, where the backend supplied one, its literal error text. Policy
//! limits (TTL ceilings, SAN restrictions) live on the backend, so its message is
//! the only explanation of why a request was refused.

use thiserror::Error;

/// Result type for issuer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Issuer error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied request data violates an invariant. Never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transport, HTTP or backend-reported failure.
    #[error("backend error at '{path}'{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Backend {
        /// Backend path that was attempted.
        path: String,
        /// HTTP status, if a response was received.
        status: Option<u16>,
        /// Backend error text or transport failure description.
        message: String,
    },

    /// The backend refused (or would have truncated) the requested TTL.
    #[error("requested TTL exceeds backend limit at '{path}': {message}")]
    TtlExceeded {
        /// Backend path that was attempted.
        path: String,
        /// The backend's literal error or warning text.
        message: String,
    },

    /// The backend answered successfully but the payload is unusable.
    #[error("malformed response from '{path}': {message}")]
    MalformedResponse {
        /// Backend path that was attempted.
        path: String,
        /// What failed to parse or verify.
        message: String,
    },

    /// The caller cancelled the operation or its deadline passed.
    #[error("operation cancelled")]
    Cancelled,

    /// Trust or client configuration is unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A readiness probe never succeeded before its deadline.
    #[error("backend not ready after {attempts} attempt(s): {}", last_error.as_deref().unwrap_or("no attempt completed"))]
    NotReady {
        /// Number of probe attempts made.
        attempts: u32,
        /// Error text from the last failed attempt.
        last_error: Option<String>,
    },

    /// Local certificate or key material could not be parsed or verified.
    #[error("certificate error: {0}")]
    Certificate(String),
}

impl Error {
    /// Creates an `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Creates a `Backend` error.
    #[must_use]
    pub fn backend(path: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Backend {
            path: path.into(),
            status,
            message: message.into(),
        }
    }

    /// Creates a `TtlExceeded` error.
    #[must_use]
    pub fn ttl_exceeded(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TtlExceeded {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a `MalformedResponse` error.
    #[must_use]
    pub fn malformed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns the backend path involved, if any.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Backend { path, .. }
            | Self::TtlExceeded { path, .. }
            | Self::MalformedResponse { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Returns `true` if a caller may reasonably retry the same call later.
    ///
    /// Only transport-level and server-side (5xx) backend failures qualify;
    /// policy rejections and malformed payloads will fail the same way again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { status, .. } => status.is_none_or(|s| s >= 500),
            Self::NotReady { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this error indicates a configuration problem.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
