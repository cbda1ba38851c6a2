//! Setup command: mount a PKI engine, generate its root, write a role.

use std::io::Write;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vault_pki::{
    BackendClient, IssuerConfig, MountConfig, PkiAdmin, RoleConfig, RootGenerateRequest,
};

use crate::cli::SetupArgs;
use crate::output::{OutputFormat, SetupSummary};

/// Setup command executor.
pub struct SetupCommand {
    config: IssuerConfig,
}

impl SetupCommand {
    /// Create a new setup command.
    #[must_use]
    pub const fn new(config: IssuerConfig) -> Self {
        Self { config }
    }

    /// Builds the role written by this command.
    #[must_use]
    pub fn role(args: &SetupArgs) -> RoleConfig {
        RoleConfig {
            allowed_domains: args.allowed_domains.clone(),
            allow_subdomains: args.allow_subdomains,
            allow_any_name: args.allow_any_name,
            key_type: args.key_type.clone(),
            allowed_other_sans: args.allowed_other_san.clone(),
            max_ttl: args.role_max_ttl,
        }
    }

    /// Execute the setup command.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is not ready or rejects any step.
    pub async fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        args: &SetupArgs,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let mount = args.mount.clone().unwrap_or_else(|| self.config.mount.clone());
        let role = args
            .role
            .clone()
            .or_else(|| self.config.role.clone())
            .context("no role given; pass --role or set `role` in the config file")?;

        let trust = self.config.to_trust_config().await?;
        let admin = PkiAdmin::new(BackendClient::new(&trust)?);

        if args.wait {
            // The mount does not exist yet; a 404 still proves the backend is serving.
            admin
                .wait_for_mount_with_cancel(&self.config.readiness_gate(), &mount, cancel)
                .await?;
        }

        admin
            .mount_pki(&mount, MountConfig::with_max_lease_ttl(args.max_lease_ttl))
            .await
            .with_context(|| format!("failed to mount {mount}"))?;

        let mut root_request = RootGenerateRequest::new(&args.root_common_name, args.max_lease_ttl);
        for ip in &args.root_ip {
            root_request = root_request.ip(*ip);
        }
        let root = admin
            .generate_root(&mount, &root_request)
            .await
            .with_context(|| format!("failed to generate root on {mount}"))?;

        admin
            .write_role(&mount, &role, &Self::role(args))
            .await
            .with_context(|| format!("failed to write role {role}"))?;

        info!(mount = %mount, role = %role, "PKI mount ready for issuance");
        format.write(writer, &SetupSummary {
            mount,
            role,
            root_common_name: root.subject().to_string(),
            root_serial_number: root.serial().to_string(),
            root_not_after: root.not_after(),
            root_certificate: root.pem(),
        })
    }
}
