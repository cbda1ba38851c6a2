//! Readiness command: polls a mount until it answers.

use std::io::Write;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use vault_pki::{BackendClient, IssuerConfig, PkiAdmin, ReadinessGate};

use crate::cli::WaitArgs;
use crate::output::{MountReady, OutputFormat};

/// Wait command executor.
pub struct WaitCommand {
    config: IssuerConfig,
}

impl WaitCommand {
    /// Create a new wait command.
    #[must_use]
    pub const fn new(config: IssuerConfig) -> Self {
        Self { config }
    }

    /// Returns the gate for these arguments, defaulting to the configured settings.
    #[must_use]
    pub fn gate(&self, args: &WaitArgs) -> ReadinessGate {
        let configured = self.config.readiness_gate();
        ReadinessGate::new(
            args.timeout.unwrap_or(configured.timeout()),
            args.interval.unwrap_or(configured.interval()),
        )
    }

    /// Execute the wait command.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` if the mount does not answer in time, or `Cancelled`.
    pub async fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        args: &WaitArgs,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let mount = args.mount.clone().unwrap_or_else(|| self.config.mount.clone());
        let trust = self.config.to_trust_config().await?;
        let admin = PkiAdmin::new(BackendClient::new(&trust)?);

        let response = admin
            .wait_for_mount_with_cancel(&self.gate(args), &mount, cancel)
            .await?;

        let certificates = response
            .data
            .as_ref()
            .and_then(|data| data.get("keys"))
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        format.write(writer, &MountReady {
            mount,
            certificates,
        })
    }
}
