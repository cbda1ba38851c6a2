//! Certificate issuance command.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vault_pki::{CertificateBundle, CertificateRequest, IssuerConfig, PkiIssuer};

use crate::cli::IssueArgs;
use crate::output::{IssuedCertificate, OutputFormat};

/// Issue command executor.
pub struct IssueCommand {
    config: IssuerConfig,
}

impl IssueCommand {
    /// Create a new issue command.
    #[must_use]
    pub const fn new(config: IssuerConfig) -> Self {
        Self { config }
    }

    /// Builds the request from the arguments, falling back to the configured
    /// role and mount.
    ///
    /// # Errors
    ///
    /// Returns an error if no role is known or the request is invalid.
    pub fn request(&self, args: &IssueArgs) -> anyhow::Result<CertificateRequest> {
        let role = args
            .role
            .clone()
            .or_else(|| self.config.role.clone())
            .context("no role given; pass --role or set `role` in the config file")?;
        let mount = args.mount.clone().unwrap_or_else(|| self.config.mount.clone());

        let mut builder = CertificateRequest::builder(role).mount(mount);
        if let Some(cn) = &args.common_name {
            builder = builder.common_name(cn.clone());
        }
        for dns in &args.dns {
            builder = builder.dns(dns.clone());
        }
        for ip in &args.ip {
            builder = builder.ip(*ip);
        }
        for san in &args.other_san {
            builder = builder.other_san(san.clone());
        }
        if let Some(ttl) = args.ttl {
            builder = builder.ttl(ttl);
        }
        Ok(builder.build()?)
    }

    /// Execute the issue command.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid, issuance fails or the
    /// bundle cannot be written.
    pub async fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        args: &IssueArgs,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let request = self.request(args)?;
        let trust = self.config.to_trust_config().await?;
        let issuer = PkiIssuer::from_trust(&trust)?;

        let bundle = issuer.issue_with_cancel(&request, cancel).await?;

        let mut output = IssuedCertificate::from_bundle(&bundle, args.out_dir.is_none());
        if let Some(dir) = &args.out_dir {
            output.files = write_bundle(dir, &bundle).await?;
        }
        format.write(writer, &output)
    }
}

/// Writes `cert.pem`, `chain.pem` and `key.pem` into `dir`.
async fn write_bundle(dir: &Path, bundle: &CertificateBundle) -> anyhow::Result<Vec<String>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let cert = dir.join("cert.pem");
    let chain = dir.join("chain.pem");
    let key = dir.join("key.pem");

    write_file(&cert, bundle.leaf().pem().as_bytes(), false).await?;
    write_file(&chain, bundle.chain_pem().as_bytes(), false).await?;
    write_file(&key, bundle.private_key().pem().as_bytes(), true).await?;

    info!(dir = %dir.display(), serial = %bundle.serial_number(), "wrote certificate bundle");
    Ok([cert, chain, key]
        .iter()
        .map(|p| p.display().to_string())
        .collect())
}

async fn write_file(path: &Path, contents: &[u8], private: bool) -> anyhow::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    if private {
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options
        .open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    // `mode` only applies on create; an existing file keeps its old bits.
    #[cfg(unix)]
    if private {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await
            .with_context(|| format!("failed to restrict {}", path.display()))?;
    }
    file.write_all(contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.flush().await?;
    Ok(())
}
