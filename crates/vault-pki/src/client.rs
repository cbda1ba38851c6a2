//! HTTP transport to the backend API.

use std::fmt::Write as _;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::trust::TrustConfig;

/// Header carrying the bearer token (`X-Vault-Token`).
pub const TOKEN_HEADER: HeaderName = HeaderName::from_static("x-vault-token");

/// A backend request or response field map.
pub type Fields = Map<String, Value>;

/// The parsed response envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendResponse {
    /// The `data` object, `None` when the backend returned no data.
    pub data: Option<Fields>,
    /// Warnings the backend attached to a successful response.
    pub warnings: Vec<String>,
}

impl BackendResponse {
    /// Returns `true` if the response carries no data.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<Fields>,
    #[serde(default)]
    warnings: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<String>,
}

/// Token-authenticated client for the backend API.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: Url,
}

impl BackendClient {
    /// Creates a client from a validated trust configuration.
    ///
    /// For `https` backends only the configured CA pool is trusted; the
    /// built-in web roots are disabled.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the TLS material cannot be loaded.
    pub fn new(trust: &TrustConfig) -> Result<Self> {
        let mut token = HeaderValue::from_str(trust.token().expose())
            .map_err(|e| Error::configuration(format!("invalid backend token: {e}")))?;
        token.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, token);

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(trust.timeout());

        if trust.is_tls() {
            builder = builder.use_rustls_tls().tls_built_in_root_certs(false);
            for cert in trust.ca_pool().map(|pool| pool.certificates()).unwrap_or_default() {
                let root = reqwest::Certificate::from_der(cert.der())
                    .map_err(|e| Error::configuration(format!("invalid CA certificate: {e}")))?;
                builder = builder.add_root_certificate(root);
            }
            if let Some(identity) = trust.client_identity() {
                let identity = reqwest::Identity::from_pem(identity.to_pem().as_bytes())
                    .map_err(|e| Error::configuration(format!("invalid client identity: {e}")))?;
                builder = builder.identity(identity);
            }
        }

        let http = builder
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {}", describe(&e))))?;

        Ok(Self {
            http,
            base_url: trust.base_url().clone(),
        })
    }

    /// Returns the backend base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Reads a path. A 404 yields an empty response.
    ///
    /// # Errors
    ///
    /// Returns `Backend` for transport failures, other non-2xx statuses and
    /// malformed bodies.
    pub async fn read(&self, path: &str) -> Result<BackendResponse> {
        self.send(Method::GET, path, None).await
    }

    /// Writes fields to a path. A 204 yields an empty response.
    ///
    /// # Errors
    ///
    /// Returns `Backend` for transport failures, non-2xx statuses and
    /// malformed bodies.
    pub async fn write(&self, path: &str, fields: &Fields) -> Result<BackendResponse> {
        self.send(Method::POST, path, Some(fields)).await
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Fields>) -> Result<BackendResponse> {
        debug!(%method, path, "backend request");

        let mut request = self.http.request(method.clone(), self.url(path));
        if let Some(fields) = body {
            request = request.json(fields);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::backend(path, None, describe(&e)))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::backend(path, Some(status.as_u16()), describe(&e)))?;

        debug!(%method, path, status = status.as_u16(), "backend response");

        if status == StatusCode::NOT_FOUND && method == Method::GET {
            return Ok(BackendResponse::default());
        }

        if !status.is_success() {
            return Err(Error::backend(path, Some(status.as_u16()), error_message(status, &bytes)));
        }

        if status == StatusCode::NO_CONTENT || bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BackendResponse::default());
        }

        let envelope: Envelope = serde_json::from_slice(&bytes).map_err(|e| {
            Error::backend(path, Some(status.as_u16()), format!("malformed response body: {e}"))
        })?;

        let warnings = envelope.warnings.unwrap_or_default();
        for warning in &warnings {
            warn!(path, warning = %warning, "backend warning");
        }

        Ok(BackendResponse {
            data: envelope.data,
            warnings,
        })
    }
}

/// Extracts the backend's error text from a non-2xx body.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body) {
        if !envelope.errors.is_empty() {
            return envelope.errors.join("; ");
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        text.to_string()
    }
}

/// Renders an error with its full source chain.
fn describe(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(message, ": {cause}");
        source = cause.source();
    }
    message
}
