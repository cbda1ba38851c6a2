//! Trust establishment for backend connections.
//!
//! A [`TrustConfig`] fixes everything a [`BackendClient`](crate::BackendClient)
//! needs to reach the backend: the base URL, the CA pool used to validate an
//! `https` listener, the bearer token, and an optional client identity for
//! mutual TLS. All checks happen at construction so a client built from a
//! valid configuration cannot fail for configuration reasons later.

use std::fmt;
use std::time::Duration;

use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::types::{Certificate, PrivateKey};

/// Default timeout for a single backend request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A bearer token for the backend.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Token(String);

impl Token {
    /// Wraps a token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token text.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token([REDACTED])")
    }
}

/// Trusted root certificates for validating the backend listener.
#[derive(Debug, Clone)]
pub struct CaPool {
    certificates: Vec<Certificate>,
}

impl CaPool {
    /// Builds a pool from certificates.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the pool is empty.
    pub fn from_certificates(certificates: Vec<Certificate>) -> Result<Self> {
        if certificates.is_empty() {
            return Err(Error::configuration("CA pool contains no certificates"));
        }
        Ok(Self { certificates })
    }

    /// Builds a pool from every `CERTIFICATE` block of a PEM bundle.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the bundle is unparseable or empty.
    pub fn from_pem(pem_text: &str) -> Result<Self> {
        let certificates = Certificate::all_from_pem(pem_text)
            .map_err(|e| Error::configuration(format!("invalid CA pool: {e}")))?;
        Self::from_certificates(certificates)
    }

    /// Returns the certificates in the pool.
    #[must_use]
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }
}

/// A client certificate and key presented for mutual TLS.
#[derive(Clone)]
pub struct ClientIdentity {
    certificate: Certificate,
    key: PrivateKey,
}

impl ClientIdentity {
    /// Creates an identity from a certificate and its private key.
    #[must_use]
    pub const fn new(certificate: Certificate, key: PrivateKey) -> Self {
        Self { certificate, key }
    }

    /// Parses an identity from a certificate PEM and a private key PEM.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if either part fails to parse.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let certificate = Certificate::from_pem(cert_pem)
            .map_err(|e| Error::configuration(format!("invalid client certificate: {e}")))?;
        let key = PrivateKey::from_pem(key_pem)
            .map_err(|e| Error::configuration(format!("invalid client key: {e}")))?;
        Ok(Self::new(certificate, key))
    }

    /// Returns the client certificate.
    #[must_use]
    pub const fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Returns the certificate and key as one PEM document.
    pub(crate) fn to_pem(&self) -> String {
        let mut pem_text = self.certificate.pem();
        pem_text.push_str(&self.key.pem());
        pem_text
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("subject", &self.certificate.subject())
            .field("key", &self.key)
            .finish()
    }
}

/// Validated connection settings for a backend.
#[derive(Debug, Clone)]
pub struct TrustConfig {
    base_url: Url,
    ca_pool: Option<CaPool>,
    token: Token,
    client_identity: Option<ClientIdentity>,
    timeout: Duration,
}

impl TrustConfig {
    /// Starts building a configuration for the given backend address and token.
    #[must_use]
    pub fn builder(address: impl Into<String>, token: Token) -> TrustConfigBuilder {
        TrustConfigBuilder {
            address: address.into(),
            token,
            ca_pool: None,
            client_identity: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Returns the backend base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns `true` if the backend is reached over TLS.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.base_url.scheme() == "https"
    }

    /// Returns the CA pool, if any.
    #[must_use]
    pub const fn ca_pool(&self) -> Option<&CaPool> {
        self.ca_pool.as_ref()
    }

    /// Returns the bearer token.
    #[must_use]
    pub const fn token(&self) -> &Token {
        &self.token
    }

    /// Returns the client identity, if any.
    #[must_use]
    pub const fn client_identity(&self) -> Option<&ClientIdentity> {
        self.client_identity.as_ref()
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Builder for [`TrustConfig`].
#[derive(Debug)]
pub struct TrustConfigBuilder {
    address: String,
    token: Token,
    ca_pool: Option<CaPool>,
    client_identity: Option<ClientIdentity>,
    timeout: Duration,
}

impl TrustConfigBuilder {
    /// Sets the CA pool used to validate an `https` listener.
    #[must_use]
    pub fn ca_pool(mut self, pool: CaPool) -> Self {
        self.ca_pool = Some(pool);
        self
    }

    /// Sets the CA pool from a PEM bundle.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the bundle is unparseable or empty.
    pub fn ca_pool_pem(self, pem_text: &str) -> Result<Self> {
        Ok(self.ca_pool(CaPool::from_pem(pem_text)?))
    }

    /// Sets the client identity presented for mutual TLS.
    #[must_use]
    pub fn client_identity(mut self, identity: ClientIdentity) -> Self {
        self.client_identity = Some(identity);
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an unparseable address, a scheme other than
    /// `http`/`https`, an empty or non-ASCII token, `https` without a CA pool,
    /// a client identity over `http`, or a zero timeout.
    pub fn build(self) -> Result<TrustConfig> {
        let base_url = Url::parse(self.address.trim())
            .map_err(|e| Error::configuration(format!("invalid backend address '{}': {e}", self.address)))?;

        match base_url.scheme() {
            "https" => {
                if self.ca_pool.is_none() {
                    return Err(Error::configuration(
                        "https backend requires a CA pool to validate its listener",
                    ));
                }
            }
            "http" => {
                if self.client_identity.is_some() {
                    return Err(Error::configuration(
                        "client identity requires an https backend",
                    ));
                }
            }
            other => {
                return Err(Error::configuration(format!(
                    "unsupported backend scheme '{other}'"
                )));
            }
        }

        if base_url.host_str().is_none_or(str::is_empty) {
            return Err(Error::configuration("backend address has no host"));
        }

        let token = self.token.expose();
        if token.trim().is_empty() {
            return Err(Error::configuration("backend token cannot be empty"));
        }
        if !token.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(Error::configuration(
                "backend token must be printable ASCII without whitespace",
            ));
        }

        if self.timeout.is_zero() {
            return Err(Error::configuration("request timeout must be positive"));
        }

        Ok(TrustConfig {
            base_url,
            ca_pool: self.ca_pool,
            token: self.token,
            client_identity: self.client_identity,
            timeout: self.timeout,
        })
    }
}
