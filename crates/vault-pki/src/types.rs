//! Core types for certificate issuance.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Mount path used when a request does not name one.
pub const DEFAULT_MOUNT: &str = "pki";

/// Subject Alternative Name types found in issued certificates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectAltName {
    /// DNS name.
    Dns(String),
    /// IP address.
    Ip(IpAddr),
    /// Email address.
    Email(String),
    /// URI.
    Uri(String),
}

/// An OID-typed subject alternative name, rendered as `OID;type:value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OtherSan {
    /// Dotted-decimal object identifier.
    pub oid: String,
    /// Value type understood by the backend (e.g. `utf8`).
    pub value_type: String,
    /// The value itself.
    pub value: String,
}

impl OtherSan {
    /// Creates a UTF-8 typed other SAN.
    #[must_use]
    pub fn utf8(oid: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            value_type: "utf8".into(),
            value: value.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        let oid_ok = !self.oid.is_empty()
            && self
                .oid
                .split('.')
                .all(|arc| !arc.is_empty() && arc.bytes().all(|b| b.is_ascii_digit()));
        if !oid_ok {
            return Err(Error::invalid_request(format!(
                "other SAN OID '{}' is not dotted-decimal",
                self.oid
            )));
        }
        if self.value_type.is_empty() || self.value_type.contains([':', ';']) {
            return Err(Error::invalid_request(format!(
                "other SAN type '{}' is invalid",
                self.value_type
            )));
        }
        if self.value.contains(';') {
            return Err(Error::invalid_request(format!(
                "other SAN value '{}' cannot contain ';'",
                self.value
            )));
        }
        Ok(())
    }
}

impl fmt::Display for OtherSan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}:{}", self.oid, self.value_type, self.value)
    }
}

impl FromStr for OtherSan {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (oid, rest) = s
            .split_once(';')
            .ok_or_else(|| Error::invalid_request(format!("other SAN '{s}' must be OID;type:value")))?;
        let (value_type, value) = rest
            .split_once(':')
            .ok_or_else(|| Error::invalid_request(format!("other SAN '{s}' must be OID;type:value")))?;
        let san = Self {
            oid: oid.to_string(),
            value_type: value_type.to_string(),
            value: value.to_string(),
        };
        san.validate()?;
        Ok(san)
    }
}

/// Request to issue a certificate from a backend role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRequest {
    /// Subject common name (may be empty when SANs identify the subject).
    pub common_name: String,
    /// DNS subject alternative names, in request order.
    pub dns_sans: Vec<String>,
    /// IP subject alternative names, in request order.
    pub ip_sans: Vec<IpAddr>,
    /// OID-typed subject alternative names, in request order.
    pub other_sans: Vec<OtherSan>,
    /// Requested TTL. Zero leaves the choice to the backend's default lease TTL.
    pub ttl: Duration,
    /// Backend role that governs issuance policy.
    pub role: String,
    /// Mount path of the PKI engine.
    pub mount: String,
}

impl CertificateRequest {
    /// Creates a new request builder for the given role.
    #[must_use]
    pub fn builder(role: impl Into<String>) -> CertificateRequestBuilder {
        CertificateRequestBuilder {
            request: Self {
                common_name: String::new(),
                dns_sans: Vec::new(),
                ip_sans: Vec::new(),
                other_sans: Vec::new(),
                ttl: Duration::ZERO,
                role: role.into(),
                mount: DEFAULT_MOUNT.to_string(),
            },
        }
    }

    /// Returns `true` if the request asks for a specific TTL.
    #[must_use]
    pub fn has_ttl(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Returns the mount path without surrounding slashes.
    #[must_use]
    pub fn mount_path(&self) -> &str {
        self.mount.trim_matches('/')
    }

    /// Returns the backend path this request is written to.
    #[must_use]
    pub fn issue_path(&self) -> String {
        format!("{}/issue/{}", self.mount_path(), self.role)
    }

    /// Validates the request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the request is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.common_name.trim().is_empty()
            && self.dns_sans.is_empty()
            && self.ip_sans.is_empty()
            && self.other_sans.is_empty()
        {
            return Err(Error::invalid_request(
                "at least one of common name, DNS, IP or other SANs is required",
            ));
        }

        if self.has_ttl() && self.ttl.as_secs() == 0 {
            return Err(Error::invalid_request("ttl must be at least one second"));
        }

        validate_segment("role", &self.role)?;

        let mount = self.mount_path();
        if mount.is_empty() {
            return Err(Error::invalid_request("mount cannot be empty"));
        }
        for segment in mount.split('/') {
            validate_segment("mount", segment)?;
        }

        for dns in &self.dns_sans {
            if dns.is_empty() || dns.contains(',') || dns.chars().any(char::is_whitespace) {
                return Err(Error::invalid_request(format!("invalid DNS SAN '{dns}'")));
            }
        }

        for san in &self.other_sans {
            san.validate()?;
        }

        Ok(())
    }
}

fn validate_segment(what: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::invalid_request(format!("{what} cannot be empty")));
    }
    if segment == ".." || segment == "." {
        return Err(Error::invalid_request(format!("{what} cannot contain '{segment}'")));
    }
    if segment.contains('/') || segment.chars().any(char::is_whitespace) {
        return Err(Error::invalid_request(format!("invalid {what} '{segment}'")));
    }
    Ok(())
}

/// Builder for certificate requests.
#[derive(Debug)]
pub struct CertificateRequestBuilder {
    request: CertificateRequest,
}

impl CertificateRequestBuilder {
    /// Sets the subject common name.
    #[must_use]
    pub fn common_name(mut self, cn: impl Into<String>) -> Self {
        self.request.common_name = cn.into();
        self
    }

    /// Adds a DNS subject alternative name.
    #[must_use]
    pub fn dns(mut self, dns: impl Into<String>) -> Self {
        self.request.dns_sans.push(dns.into());
        self
    }

    /// Adds an IP subject alternative name.
    #[must_use]
    pub fn ip(mut self, ip: IpAddr) -> Self {
        self.request.ip_sans.push(ip);
        self
    }

    /// Adds an OID-typed subject alternative name.
    #[must_use]
    pub fn other_san(mut self, san: OtherSan) -> Self {
        self.request.other_sans.push(san);
        self
    }

    /// Sets the requested TTL.
    #[must_use]
    pub const fn ttl(mut self, ttl: Duration) -> Self {
        self.request.ttl = ttl;
        self
    }

    /// Sets the PKI mount path.
    #[must_use]
    pub fn mount(mut self, mount: impl Into<String>) -> Self {
        self.request.mount = mount.into();
        self
    }

    /// Builds the certificate request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid.
    pub fn build(self) -> Result<CertificateRequest> {
        self.request.validate()?;
        Ok(self.request)
    }
}

/// A DER-encoded X.509 certificate with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    der: Vec<u8>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    /// Subject common name, empty if the subject has none.
    subject: String,
    /// Issuer common name, empty if the issuer has none.
    issuer: String,
    /// Serial number as colon-separated lowercase hex.
    serial: String,
    san: Vec<SubjectAltName>,
}

impl Certificate {
    /// Parses a certificate from DER-encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        use x509_parser::prelude::*;

        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Certificate(format!("failed to parse certificate: {e}")))?;

        let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)
            .ok_or_else(|| Error::Certificate("invalid not_before timestamp".into()))?;
        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| Error::Certificate("invalid not_after timestamp".into()))?;

        Ok(Self {
            der: der.to_vec(),
            not_before,
            not_after,
            subject: extract_common_name(cert.subject()),
            issuer: extract_common_name(cert.issuer()),
            serial: format_serial(cert.raw_serial()),
            san: extract_san(&cert),
        })
    }

    /// Parses the first `CERTIFICATE` block of a PEM document.
    ///
    /// # Errors
    ///
    /// Returns an error if no certificate block is present or it fails to parse.
    pub fn from_pem(pem_text: &str) -> Result<Self> {
        Self::all_from_pem(pem_text)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Certificate("no CERTIFICATE block found".into()))
    }

    /// Parses every `CERTIFICATE` block of a PEM document, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM is malformed or a certificate fails to parse.
    pub fn all_from_pem(pem_text: &str) -> Result<Vec<Self>> {
        pem::parse_many(pem_text)
            .map_err(|e| Error::Certificate(format!("invalid PEM: {e}")))?
            .iter()
            .filter(|block| block.tag() == "CERTIFICATE")
            .map(|block| Self::from_der(block.contents()))
            .collect()
    }

    /// Returns the DER-encoded certificate bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM-encoded certificate.
    #[must_use]
    pub fn pem(&self) -> String {
        encode_pem("CERTIFICATE", &self.der)
    }

    /// Returns the certificate validity start time.
    #[must_use]
    pub const fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// Returns the certificate validity end time.
    #[must_use]
    pub const fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Returns the subject common name.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the issuer common name.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the serial number as colon-separated lowercase hex.
    #[must_use]
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Returns the subject alternative names.
    #[must_use]
    pub fn san(&self) -> &[SubjectAltName] {
        &self.san
    }

    /// Returns the DNS subject alternative names.
    pub fn dns_names(&self) -> impl Iterator<Item = &str> {
        self.san.iter().filter_map(|san| match san {
            SubjectAltName::Dns(dns) => Some(dns.as_str()),
            _ => None,
        })
    }

    /// Returns the IP subject alternative names.
    pub fn ip_addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.san.iter().filter_map(|san| match san {
            SubjectAltName::Ip(ip) => Some(*ip),
            _ => None,
        })
    }
}

/// Extracts the common name from an X.509 name, or an empty string.
fn extract_common_name(name: &x509_parser::x509::X509Name) -> String {
    name.iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(String::from)
        .unwrap_or_default()
}

/// Extracts SANs from a certificate.
fn extract_san(cert: &x509_parser::certificate::X509Certificate) -> Vec<SubjectAltName> {
    let mut sans = Vec::new();

    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            match name {
                x509_parser::extensions::GeneralName::DNSName(dns) => {
                    sans.push(SubjectAltName::Dns((*dns).to_string()));
                }
                x509_parser::extensions::GeneralName::IPAddress(ip_bytes) => {
                    if let Some(ip) = parse_ip_bytes(ip_bytes) {
                        sans.push(SubjectAltName::Ip(ip));
                    }
                }
                x509_parser::extensions::GeneralName::RFC822Name(email) => {
                    sans.push(SubjectAltName::Email((*email).to_string()));
                }
                x509_parser::extensions::GeneralName::URI(uri) => {
                    sans.push(SubjectAltName::Uri((*uri).to_string()));
                }
                _ => {}
            }
        }
    }

    sans
}

/// Parses IP address bytes into an `IpAddr`.
fn parse_ip_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        _ => None,
    }
}

/// Formats serial bytes the way the backend reports them: big-endian,
/// no sign padding, colon-separated lowercase hex.
fn format_serial(raw: &[u8]) -> String {
    let start = raw.iter().position(|b| *b != 0).unwrap_or(raw.len().saturating_sub(1));
    raw[start..]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Normalizes a serial number string for comparison.
pub(crate) fn normalize_serial(serial: &str) -> String {
    let hex: String = serial
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() { "0".into() } else { trimmed.into() }
}

fn encode_pem(tag: &str, der: &[u8]) -> String {
    pem::encode_config(
        &pem::Pem::new(tag, der.to_vec()),
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    )
}

/// A private key with secure memory handling.
///
/// The PEM label is retained so the key can be written back in the encoding
/// the backend chose (`RSA PRIVATE KEY`, `EC PRIVATE KEY` or `PRIVATE KEY`).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    der: Vec<u8>,
    label: String,
}

impl PrivateKey {
    /// Creates a private key from DER bytes and their PEM label.
    #[must_use]
    pub fn new(der: Vec<u8>, label: impl Into<String>) -> Self {
        Self {
            der,
            label: label.into(),
        }
    }

    /// Parses the first private key block of a PEM document.
    ///
    /// # Errors
    ///
    /// Returns an error if no private key block is present.
    pub fn from_pem(pem_text: &str) -> Result<Self> {
        let blocks =
            pem::parse_many(pem_text).map_err(|e| Error::Certificate(format!("invalid PEM: {e}")))?;
        blocks
            .into_iter()
            .find(|block| block.tag().ends_with("PRIVATE KEY"))
            .map(|block| Self::new(block.contents().to_vec(), block.tag()))
            .ok_or_else(|| Error::Certificate("no PRIVATE KEY block found".into()))
    }

    /// Returns the DER-encoded private key bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM label of the key encoding.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the PEM-encoded private key.
    #[must_use]
    pub fn pem(&self) -> String {
        encode_pem(&self.label, &self.der)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("label", &self.label)
            .field("der", &"[REDACTED]")
            .finish()
    }
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        Self {
            der: self.der.clone(),
            label: self.label.clone(),
        }
    }
}

/// A verified issuance result.
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    leaf: Certificate,
    chain: Vec<Certificate>,
    private_key: PrivateKey,
    serial_number: String,
}

impl CertificateBundle {
    pub(crate) fn new(
        leaf: Certificate,
        chain: Vec<Certificate>,
        private_key: PrivateKey,
        serial_number: String,
    ) -> Self {
        Self {
            leaf,
            chain,
            private_key,
            serial_number,
        }
    }

    /// Returns the issued leaf certificate.
    #[must_use]
    pub const fn leaf(&self) -> &Certificate {
        &self.leaf
    }

    /// Returns the issuing chain, nearest issuer first.
    ///
    /// Empty when the backend returned neither `ca_chain` nor `issuing_ca`.
    #[must_use]
    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    /// Returns the leaf followed by its issuing chain.
    #[must_use]
    pub fn full_chain(&self) -> Vec<&Certificate> {
        std::iter::once(&self.leaf).chain(&self.chain).collect()
    }

    /// Returns the private key matching the leaf certificate.
    #[must_use]
    pub const fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Returns the serial number as reported by the backend.
    #[must_use]
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Returns the issuing chain as concatenated PEM.
    #[must_use]
    pub fn chain_pem(&self) -> String {
        self.chain.iter().map(Certificate::pem).collect()
    }
}
