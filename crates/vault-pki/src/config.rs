//! Issuer configuration.
//!
//! Configuration is loaded from a JSON file. Front ends overlay it with the
//! standard backend environment variables:
//!
//! | Variable            | Field         |
//! |---------------------|---------------|
//! | `VAULT_ADDR`        | `address`     |
//! | `VAULT_TOKEN`       | `token`       |
//! | `VAULT_CACERT`      | `ca_cert`     |
//! | `VAULT_CLIENT_CERT` | `client_cert` |
//! | `VAULT_CLIENT_KEY`  | `client_key`  |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::readiness::ReadinessGate;
use crate::trust::{ClientIdentity, Token, TrustConfig};
use crate::types::DEFAULT_MOUNT;

/// Environment variable holding the backend address.
pub const ENV_ADDR: &str = "VAULT_ADDR";
/// Environment variable holding the backend token.
pub const ENV_TOKEN: &str = "VAULT_TOKEN";
/// Environment variable holding the CA bundle path.
pub const ENV_CACERT: &str = "VAULT_CACERT";
/// Environment variable holding the client certificate path.
pub const ENV_CLIENT_CERT: &str = "VAULT_CLIENT_CERT";
/// Environment variable holding the client key path.
pub const ENV_CLIENT_KEY: &str = "VAULT_CLIENT_KEY";

/// Upper bound for `timeout_secs` and `readiness.timeout_secs`.
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Where the backend token comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenSource {
    /// Literal token value.
    Token {
        /// The token.
        token: String,
    },
    /// Token read from a file (trailing whitespace trimmed).
    TokenFile {
        /// Path to the token file.
        path: PathBuf,
    },
    /// Token read from an environment variable.
    TokenEnv {
        /// Name of the environment variable.
        var_name: String,
    },
}

impl Default for TokenSource {
    fn default() -> Self {
        Self::TokenEnv {
            var_name: ENV_TOKEN.to_string(),
        }
    }
}

impl TokenSource {
    /// Resolves the token using the process environment.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the token cannot be found or is empty.
    pub async fn resolve(&self) -> Result<Token> {
        self.resolve_with(|name| std::env::var(name).ok()).await
    }

    /// Resolves the token using `lookup` for environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the token cannot be found or is empty.
    pub async fn resolve_with<F>(&self, lookup: F) -> Result<Token>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = match self {
            Self::Token { token } => token.clone(),
            Self::TokenFile { path } => tokio::fs::read_to_string(path).await.map_err(|e| {
                Error::configuration(format!("failed to read token file {}: {e}", path.display()))
            })?,
            Self::TokenEnv { var_name } => lookup(var_name).ok_or_else(|| {
                Error::configuration(format!("environment variable '{var_name}' not set"))
            })?,
        };

        let value = value.trim();
        if value.is_empty() {
            return Err(Error::configuration("backend token is empty"));
        }
        Ok(Token::new(value))
    }
}

/// Readiness polling settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReadinessSettings {
    /// Overall deadline in seconds.
    pub timeout_secs: u64,
    /// Delay between attempts in milliseconds.
    pub interval_ms: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            interval_ms: 250,
        }
    }
}

impl ReadinessSettings {
    /// Builds the corresponding readiness gate.
    #[must_use]
    pub const fn gate(&self) -> ReadinessGate {
        ReadinessGate::new(
            Duration::from_secs(self.timeout_secs),
            Duration::from_millis(self.interval_ms),
        )
    }
}

/// Issuer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IssuerConfig {
    /// Backend base URL.
    pub address: String,
    /// Token source.
    pub token: TokenSource,
    /// CA bundle used to validate an `https` backend.
    pub ca_cert: Option<PathBuf>,
    /// Client certificate for mutual TLS.
    pub client_cert: Option<PathBuf>,
    /// Client private key for mutual TLS.
    pub client_key: Option<PathBuf>,
    /// Default PKI mount.
    pub mount: String,
    /// Default issuance role.
    pub role: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Readiness polling settings.
    pub readiness: ReadinessSettings,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8200".to_string(),
            token: TokenSource::default(),
            ca_cert: None,
            client_cert: None,
            client_key: None,
            mount: DEFAULT_MOUNT.to_string(),
            role: None,
            timeout_secs: 30,
            readiness: ReadinessSettings::default(),
        }
    }
}

impl IssuerConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::configuration(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parses configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| Error::configuration(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if any value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::configuration("address cannot be empty"));
        }
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(Error::configuration(
                "client_cert and client_key must be set together",
            ));
        }
        if self.mount.trim_matches('/').is_empty() {
            return Err(Error::configuration("mount cannot be empty"));
        }
        if self.role.as_deref().is_some_and(str::is_empty) {
            return Err(Error::configuration("role cannot be empty"));
        }
        if self.timeout_secs == 0 || self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(Error::configuration(format!(
                "timeout_secs must be between 1 and {MAX_TIMEOUT_SECS}"
            )));
        }
        if self.readiness.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(Error::configuration(format!(
                "readiness.timeout_secs cannot exceed {MAX_TIMEOUT_SECS}"
            )));
        }
        if self.readiness.interval_ms == 0 || self.readiness.interval_ms > MAX_TIMEOUT_SECS * 1000 {
            return Err(Error::configuration(format!(
                "readiness.interval_ms must be between 1 and {}",
                MAX_TIMEOUT_SECS * 1000
            )));
        }
        if let TokenSource::TokenEnv { var_name } = &self.token {
            if var_name.is_empty() {
                return Err(Error::configuration("token var_name cannot be empty"));
            }
        }
        Ok(())
    }

    /// Builds a trust configuration, reading token and TLS material.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if validation fails, a file cannot be read, or
    /// the resulting trust configuration is inconsistent.
    pub async fn to_trust_config(&self) -> Result<TrustConfig> {
        self.to_trust_config_with(|name| std::env::var(name).ok()).await
    }

    /// Like [`to_trust_config`](Self::to_trust_config), resolving environment
    /// token sources through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` as [`to_trust_config`](Self::to_trust_config).
    pub async fn to_trust_config_with<F>(&self, lookup: F) -> Result<TrustConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.validate()?;

        let token = self.token.resolve_with(lookup).await?;
        let mut builder = TrustConfig::builder(self.address.clone(), token)
            .timeout(Duration::from_secs(self.timeout_secs));

        if let Some(path) = &self.ca_cert {
            builder = builder.ca_pool_pem(&read_file("CA bundle", path).await?)?;
        }

        if let (Some(cert), Some(key)) = (&self.client_cert, &self.client_key) {
            let identity = ClientIdentity::from_pem(
                &read_file("client certificate", cert).await?,
                &read_file("client key", key).await?,
            )?;
            builder = builder.client_identity(identity);
        }

        builder.build()
    }

    /// Returns the readiness gate described by this configuration.
    #[must_use]
    pub const fn readiness_gate(&self) -> ReadinessGate {
        self.readiness.gate()
    }
}

async fn read_file(what: &str, path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::configuration(format!("failed to read {what} {}: {e}", path.display())))
}
