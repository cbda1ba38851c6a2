//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use vault_pki::{CertificateBundle, format_duration, remaining_validity};

use crate::cli::Format;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> anyhow::Result<()>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .context("JSON serialization failed")?;
                writeln!(writer)?;
            }
            Format::Table => value.write_table(writer)?,
        }
        Ok(())
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value in human-readable form.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> anyhow::Result<()>;
}

/// An issued certificate.
///
/// PEM material is included only when it was not written to files.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCertificate {
    /// Serial number, colon-separated hex.
    pub serial_number: String,
    /// Subject common name.
    pub common_name: String,
    /// Issuer common name.
    pub issuer: String,
    /// DNS subject alternative names.
    pub dns_names: Vec<String>,
    /// IP subject alternative names.
    pub ip_addresses: Vec<String>,
    /// Start of validity.
    pub not_before: DateTime<Utc>,
    /// End of validity.
    pub not_after: DateTime<Utc>,
    /// Seconds of validity left; `None` once expired.
    pub valid_for_secs: Option<u64>,
    /// Files written, if any.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Leaf certificate PEM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    /// Issuing chain PEM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_chain: Option<String>,
    /// Private key PEM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl IssuedCertificate {
    /// Summarizes a bundle. With `include_pem`, the PEM material is carried too.
    #[must_use]
    pub fn from_bundle(bundle: &CertificateBundle, include_pem: bool) -> Self {
        let leaf = bundle.leaf();
        Self {
            serial_number: bundle.serial_number().to_string(),
            common_name: leaf.subject().to_string(),
            issuer: leaf.issuer().to_string(),
            dns_names: leaf.dns_names().map(String::from).collect(),
            ip_addresses: leaf.ip_addresses().map(|ip| ip.to_string()).collect(),
            not_before: leaf.not_before(),
            not_after: leaf.not_after(),
            valid_for_secs: remaining_validity(leaf)
                .and_then(|left| u64::try_from(left.num_seconds()).ok()),
            files: Vec::new(),
            certificate: include_pem.then(|| leaf.pem()),
            ca_chain: include_pem.then(|| bundle.chain_pem()),
            private_key: include_pem.then(|| bundle.private_key().pem()),
        }
    }
}

impl TableDisplay for IssuedCertificate {
    fn write_table<W: Write>(&self, writer: &mut W) -> anyhow::Result<()> {
        writeln!(writer, "Serial Number:  {}", self.serial_number)?;
        writeln!(writer, "Common Name:    {}", self.common_name)?;
        writeln!(writer, "Issuer:         {}", self.issuer)?;
        if !self.dns_names.is_empty() {
            writeln!(writer, "DNS Names:      {}", self.dns_names.join(", "))?;
        }
        if !self.ip_addresses.is_empty() {
            writeln!(writer, "IP Addresses:   {}", self.ip_addresses.join(", "))?;
        }
        writeln!(writer, "Not Before:     {}", self.not_before.to_rfc3339())?;
        writeln!(writer, "Not After:      {}", self.not_after.to_rfc3339())?;
        match self.valid_for_secs {
            Some(secs) => writeln!(
                writer,
                "Valid For:      {}",
                format_duration(Duration::from_secs(secs))
            )?,
            None => writeln!(writer, "Valid For:      expired")?,
        }
        for file in &self.files {
            writeln!(writer, "Wrote:          {file}")?;
        }
        for pem in [&self.certificate, &self.ca_chain, &self.private_key]
            .into_iter()
            .flatten()
        {
            writeln!(writer)?;
            write!(writer, "{pem}")?;
        }
        Ok(())
    }
}

/// A mount that answered the readiness probe.
#[derive(Debug, Clone, Serialize)]
pub struct MountReady {
    /// Mount path.
    pub mount: String,
    /// Number of certificates the mount lists.
    pub certificates: usize,
}

impl TableDisplay for MountReady {
    fn write_table<W: Write>(&self, writer: &mut W) -> anyhow::Result<()> {
        writeln!(
            writer,
            "Mount {} is ready ({} certificates)",
            self.mount, self.certificates
        )?;
        Ok(())
    }
}

/// Result of the setup command.
#[derive(Debug, Clone, Serialize)]
pub struct SetupSummary {
    /// Mount path.
    pub mount: String,
    /// Role written.
    pub role: String,
    /// Root common name.
    pub root_common_name: String,
    /// Root serial number.
    pub root_serial_number: String,
    /// Root expiry.
    pub root_not_after: DateTime<Utc>,
    /// Root certificate PEM.
    pub root_certificate: String,
}

impl TableDisplay for SetupSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> anyhow::Result<()> {
        writeln!(writer, "PKI Setup")?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Mount:          {}", self.mount)?;
        writeln!(writer, "Role:           {}", self.role)?;
        writeln!(writer, "Root CN:        {}", self.root_common_name)?;
        writeln!(writer, "Root Serial:    {}", self.root_serial_number)?;
        writeln!(writer, "Root Not After: {}", self.root_not_after.to_rfc3339())?;
        writeln!(writer)?;
        write!(writer, "{}", self.root_certificate)?;
        Ok(())
    }
}
