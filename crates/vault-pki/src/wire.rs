//! Typed request and response bodies for the PKI engine.
//!
//! This is the only module that knows backend field names. Everything else
//! works with the structs defined here and converts through
//! [`to_fields`](IssueRequest::to_fields) / `from_fields`.

use std::net::IpAddr;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::Fields;
use crate::duration::format_duration;
use crate::error::{Error, Result};
use crate::types::{CertificateRequest, OtherSan};

/// Body of `{mount}/issue/{role}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    /// Subject common name, omitted when empty.
    pub common_name: String,
    /// DNS SANs, sent comma-joined as `alt_names`.
    pub alt_names: Vec<String>,
    /// IP SANs, sent comma-joined.
    pub ip_sans: Vec<IpAddr>,
    /// Other SANs, sent semicolon-joined.
    pub other_sans: Vec<OtherSan>,
    /// Requested TTL; `None` defers to the backend default.
    pub ttl: Option<Duration>,
}

impl IssueRequest {
    /// Encoding requested for issued material.
    pub const FORMAT: &'static str = "pem";

    /// Renders the request as backend fields. Empty values are omitted.
    #[must_use]
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        if !self.common_name.is_empty() {
            insert_str(&mut fields, "common_name", self.common_name.clone());
        }
        if !self.alt_names.is_empty() {
            insert_str(&mut fields, "alt_names", self.alt_names.join(","));
        }
        if !self.ip_sans.is_empty() {
            insert_str(&mut fields, "ip_sans", join(&self.ip_sans, ","));
        }
        if !self.other_sans.is_empty() {
            insert_str(&mut fields, "other_sans", join(&self.other_sans, ";"));
        }
        if let Some(ttl) = self.ttl {
            insert_str(&mut fields, "ttl", format_duration(ttl));
        }
        insert_str(&mut fields, "format", Self::FORMAT.to_string());
        fields
    }
}

impl From<&CertificateRequest> for IssueRequest {
    fn from(request: &CertificateRequest) -> Self {
        Self {
            common_name: request.common_name.trim().to_string(),
            alt_names: request.dns_sans.clone(),
            ip_sans: request.ip_sans.clone(),
            other_sans: request.other_sans.clone(),
            ttl: request.has_ttl().then_some(request.ttl),
        }
    }
}

/// Data returned by `{mount}/issue/{role}`.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueResponse {
    /// Leaf certificate PEM.
    pub certificate: String,
    /// Issuing chain PEMs, nearest issuer first.
    #[serde(default)]
    pub ca_chain: Vec<String>,
    /// Direct issuer PEM.
    #[serde(default)]
    pub issuing_ca: Option<String>,
    /// Private key PEM.
    pub private_key: String,
    /// Key algorithm reported by the backend (`rsa`, `ec`, `ed25519`).
    #[serde(default)]
    pub private_key_type: Option<String>,
    /// Serial number in `xx:xx:..` form.
    pub serial_number: String,
    /// Expiry as a Unix timestamp.
    #[serde(default)]
    pub expiration: Option<i64>,
}

impl IssueResponse {
    /// Parses issuance data.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` if a required field is missing or mistyped.
    pub fn from_fields(path: &str, fields: &Fields) -> Result<Self> {
        from_fields(path, fields)
    }

    /// Returns the chain PEMs, falling back to `issuing_ca` when the backend
    /// sent no `ca_chain`.
    #[must_use]
    pub fn chain_pems(&self) -> Vec<&str> {
        if self.ca_chain.is_empty() {
            self.issuing_ca.iter().map(String::as_str).collect()
        } else {
            self.ca_chain.iter().map(String::as_str).collect()
        }
    }
}

/// Body of `{mount}/root/generate/internal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootGenerateRequest {
    /// Root subject common name.
    pub common_name: String,
    /// Root certificate TTL.
    pub ttl: Duration,
    /// IP SANs for the root.
    pub ip_sans: Vec<IpAddr>,
}

impl RootGenerateRequest {
    /// Encoding requested for the generated root.
    pub const FORMAT: &'static str = "der";

    /// Creates a request for a root with the given common name and TTL.
    #[must_use]
    pub fn new(common_name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            common_name: common_name.into(),
            ttl,
            ip_sans: Vec::new(),
        }
    }

    /// Adds an IP SAN.
    #[must_use]
    pub fn ip(mut self, ip: IpAddr) -> Self {
        self.ip_sans.push(ip);
        self
    }

    /// Renders the request as backend fields.
    #[must_use]
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        insert_str(&mut fields, "common_name", self.common_name.clone());
        insert_str(&mut fields, "ttl", format_duration(self.ttl));
        if !self.ip_sans.is_empty() {
            insert_str(&mut fields, "ip_sans", join(&self.ip_sans, ","));
        }
        insert_str(&mut fields, "format", Self::FORMAT.to_string());
        fields
    }
}

/// Data returned by `{mount}/root/generate/internal` with `format = "der"`.
#[derive(Debug, Clone, Deserialize)]
pub struct RootGenerateResponse {
    /// Base64-encoded DER root certificate.
    pub certificate: String,
    /// Serial number in `xx:xx:..` form.
    #[serde(default)]
    pub serial_number: Option<String>,
}

impl RootGenerateResponse {
    /// Parses root generation data.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` if the certificate field is missing.
    pub fn from_fields(path: &str, fields: &Fields) -> Result<Self> {
        from_fields(path, fields)
    }

    /// Decodes the base64 DER certificate.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` if the field is not valid base64.
    pub fn certificate_der(&self, path: &str) -> Result<Vec<u8>> {
        let compact: String = self.certificate.split_whitespace().collect();
        BASE64
            .decode(compact)
            .map_err(|e| Error::malformed(path, format!("root certificate is not base64 DER: {e}")))
    }
}

/// Lease settings applied to a mount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountConfig {
    /// Default lease TTL for the mount.
    pub default_lease_ttl: Option<Duration>,
    /// Maximum lease TTL for the mount.
    pub max_lease_ttl: Option<Duration>,
}

impl MountConfig {
    /// Creates a configuration with only a maximum lease TTL.
    #[must_use]
    pub const fn with_max_lease_ttl(max_lease_ttl: Duration) -> Self {
        Self {
            default_lease_ttl: None,
            max_lease_ttl: Some(max_lease_ttl),
        }
    }
}

/// Body of `sys/mounts/{mount}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInput {
    /// Secrets engine type.
    pub engine_type: String,
    /// Lease settings.
    pub config: MountConfig,
}

impl MountInput {
    /// Creates a PKI mount input.
    #[must_use]
    pub fn pki(config: MountConfig) -> Self {
        Self {
            engine_type: "pki".to_string(),
            config,
        }
    }

    /// Renders the input as backend fields.
    #[must_use]
    pub fn to_fields(&self) -> Fields {
        let mut config = Fields::new();
        if let Some(ttl) = self.config.default_lease_ttl {
            insert_str(&mut config, "default_lease_ttl", format_duration(ttl));
        }
        if let Some(ttl) = self.config.max_lease_ttl {
            insert_str(&mut config, "max_lease_ttl", format_duration(ttl));
        }

        let mut fields = Fields::new();
        insert_str(&mut fields, "type", self.engine_type.clone());
        fields.insert("config".into(), Value::Object(config));
        fields
    }
}

/// Issuance policy written to `{mount}/roles/{role}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleConfig {
    /// Domains the role may issue for.
    pub allowed_domains: Vec<String>,
    /// Whether subdomains of allowed domains are permitted.
    pub allow_subdomains: bool,
    /// Whether any common name is permitted.
    pub allow_any_name: bool,
    /// Key type (`rsa`, `ec`, `ed25519` or `any`).
    pub key_type: String,
    /// Other SAN patterns in `OID;type:pattern` form.
    pub allowed_other_sans: Vec<String>,
    /// Maximum TTL for certificates issued by the role.
    pub max_ttl: Option<Duration>,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            allow_subdomains: false,
            allow_any_name: false,
            key_type: "rsa".to_string(),
            allowed_other_sans: Vec::new(),
            max_ttl: None,
        }
    }
}

impl RoleConfig {
    /// Renders the role as backend fields.
    #[must_use]
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        if !self.allowed_domains.is_empty() {
            insert_str(&mut fields, "allowed_domains", self.allowed_domains.join(","));
        }
        fields.insert("allow_subdomains".into(), Value::Bool(self.allow_subdomains));
        fields.insert("allow_any_name".into(), Value::Bool(self.allow_any_name));
        insert_str(&mut fields, "key_type", self.key_type.clone());
        if !self.allowed_other_sans.is_empty() {
            insert_str(&mut fields, "allowed_other_sans", self.allowed_other_sans.join(","));
        }
        if let Some(ttl) = self.max_ttl {
            insert_str(&mut fields, "max_ttl", format_duration(ttl));
        }
        fields
    }
}

fn insert_str(fields: &mut Fields, key: &str, value: String) {
    fields.insert(key.to_string(), Value::String(value));
}

fn join<T: ToString>(items: &[T], separator: &str) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(separator)
}

fn from_fields<T: DeserializeOwned>(path: &str, fields: &Fields) -> Result<T> {
    serde_json::from_value(Value::Object(fields.clone()))
        .map_err(|e| Error::malformed(path, format!("unexpected response data: {e}")))
}
