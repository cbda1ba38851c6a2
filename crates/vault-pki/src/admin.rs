//! Administrative setup of PKI mounts, roots and roles.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::{BackendClient, BackendResponse};
use crate::error::{Error, Result};
use crate::readiness::ReadinessGate;
use crate::types::Certificate;
use crate::wire::{MountConfig, MountInput, RoleConfig, RootGenerateRequest, RootGenerateResponse};

/// Prepares a backend for issuance.
#[derive(Debug, Clone)]
pub struct PkiAdmin {
    client: BackendClient,
}

impl PkiAdmin {
    /// Creates an admin on top of an existing client.
    #[must_use]
    pub const fn new(client: BackendClient) -> Self {
        Self { client }
    }

    /// Mounts a PKI engine at `mount`.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the backend rejects the mount.
    pub async fn mount_pki(&self, mount: &str, config: MountConfig) -> Result<()> {
        let mount = clean_mount(mount)?;
        let path = format!("sys/mounts/{mount}");
        self.client.write(&path, &MountInput::pki(config).to_fields()).await?;
        info!(mount, max_lease_ttl = ?config.max_lease_ttl, "mounted PKI engine");
        Ok(())
    }

    /// Generates an internal self-signed root on `mount` and returns it.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the backend refuses, or `MalformedResponse` if the
    /// returned certificate cannot be decoded.
    pub async fn generate_root(&self, mount: &str, request: &RootGenerateRequest) -> Result<Certificate> {
        let mount = clean_mount(mount)?;
        let path = format!("{mount}/root/generate/internal");
        let response = self.client.write(&path, &request.to_fields()).await?;
        let data = response
            .data
            .ok_or_else(|| Error::malformed(&path, "response carries no data"))?;

        let root = RootGenerateResponse::from_fields(&path, &data)?;
        let certificate = Certificate::from_der(&root.certificate_der(&path)?)
            .map_err(|e| Error::malformed(&path, e.to_string()))?;

        info!(
            mount,
            common_name = %certificate.subject(),
            not_after = %certificate.not_after(),
            "generated root certificate"
        );
        Ok(certificate)
    }

    /// Writes an issuance role.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an unusable role name, or `Backend` if the
    /// backend rejects the role.
    pub async fn write_role(&self, mount: &str, role: &str, config: &RoleConfig) -> Result<()> {
        let mount = clean_mount(mount)?;
        if role.is_empty() || role.contains('/') || role == ".." {
            return Err(Error::invalid_request(format!("invalid role '{role}'")));
        }
        let path = format!("{mount}/roles/{role}");
        self.client.write(&path, &config.to_fields()).await?;
        info!(mount, role, "wrote role");
        Ok(())
    }

    /// Waits until reading `{mount}/certs` succeeds.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` if the mount never answers before the gate's deadline.
    pub async fn wait_for_mount(&self, gate: &ReadinessGate, mount: &str) -> Result<BackendResponse> {
        let mount = clean_mount(mount)?;
        let path = format!("{mount}/certs");
        gate.wait(|| self.client.read(&path)).await
    }

    /// Like [`wait_for_mount`](Self::wait_for_mount), but returns `Cancelled`
    /// as soon as `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `NotReady`.
    pub async fn wait_for_mount_with_cancel(
        &self,
        gate: &ReadinessGate,
        mount: &str,
        cancel: &CancellationToken,
    ) -> Result<BackendResponse> {
        let mount = clean_mount(mount)?;
        let path = format!("{mount}/certs");
        gate.wait_with_cancel(cancel, || self.client.read(&path)).await
    }
}

fn clean_mount(mount: &str) -> Result<&str> {
    let mount = mount.trim_matches('/');
    if mount.is_empty() || mount.split('/').any(|s| s.is_empty() || s == "..") {
        return Err(Error::invalid_request(format!("invalid mount '{mount}'")));
    }
    Ok(mount)
}
