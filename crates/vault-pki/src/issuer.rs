//! Certificate issuance.

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{BackendClient, BackendResponse};
use crate::error::{Error, Result};
use crate::keys::key_matches_certificate;
use crate::trust::TrustConfig;
use crate::types::{Certificate, CertificateBundle, CertificateRequest, PrivateKey, normalize_serial};
use crate::validation::verify_chain;
use crate::wire::{IssueRequest, IssueResponse};

/// Issues certificates from a PKI engine.
///
/// Each call is a single round trip; there are no per-call retries. TTLs are
/// passed through unchanged and any limit is enforced by the backend.
#[derive(Debug, Clone)]
pub struct PkiIssuer {
    client: BackendClient,
}

impl PkiIssuer {
    /// Creates an issuer on top of an existing client.
    #[must_use]
    pub const fn new(client: BackendClient) -> Self {
        Self { client }
    }

    /// Creates an issuer with a fresh client for the given trust configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the client cannot be built.
    pub fn from_trust(trust: &TrustConfig) -> Result<Self> {
        Ok(Self::new(BackendClient::new(trust)?))
    }

    /// Returns the underlying backend client.
    #[must_use]
    pub const fn client(&self) -> &BackendClient {
        &self.client
    }

    /// Issues a certificate.
    ///
    /// The returned bundle has been verified: the private key matches the
    /// leaf, every chain link verifies, and the serial agrees with the leaf.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if the request fails validation (no backend call is made).
    /// - `TtlExceeded` if the backend refused or shortened the requested TTL.
    /// - `Backend` for transport failures and policy rejections.
    /// - `MalformedResponse` if the returned material is unusable.
    pub async fn issue(&self, request: &CertificateRequest) -> Result<CertificateBundle> {
        request.validate()?;

        let path = request.issue_path();
        let fields = IssueRequest::from(request).to_fields();
        info!(
            path = %path,
            common_name = %request.common_name,
            dns_sans = request.dns_sans.len(),
            ttl = ?request.has_ttl().then_some(request.ttl),
            "issuing certificate"
        );

        let response = self
            .client
            .write(&path, &fields)
            .await
            .map_err(classify_ttl_error)?;

        if request.has_ttl() {
            if let Some(warning) = response.warnings.iter().find(|w| reports_ttl_limit(w)) {
                return Err(Error::ttl_exceeded(&path, warning.clone()));
            }
        }

        let bundle = parse_bundle(&path, response)?;
        info!(
            path = %path,
            serial = %bundle.serial_number(),
            not_after = %bundle.leaf().not_after(),
            "certificate issued"
        );
        Ok(bundle)
    }

    /// Issues a certificate, aborting the in-flight call if `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the token fires first, otherwise as [`issue`](Self::issue).
    pub async fn issue_with_cancel(
        &self,
        request: &CertificateRequest,
        cancel: &CancellationToken,
    ) -> Result<CertificateBundle> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("issuance cancelled");
                Err(Error::Cancelled)
            }
            result = self.issue(request) => result,
        }
    }

    /// Issues a certificate, aborting the in-flight call at `deadline`.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the deadline passes first, otherwise as [`issue`](Self::issue).
    pub async fn issue_before(
        &self,
        request: &CertificateRequest,
        deadline: Instant,
    ) -> Result<CertificateBundle> {
        tokio::time::timeout_at(deadline, self.issue(request))
            .await
            .map_err(|_| Error::Cancelled)?
    }
}

/// Reclassifies a backend rejection that reports a TTL or `notAfter` limit.
fn classify_ttl_error(err: Error) -> Error {
    match err {
        Error::Backend {
            path,
            status: Some(status),
            message,
        } if (400..500).contains(&status) && reports_ttl_limit(&message) => {
            Error::TtlExceeded { path, message }
        }
        other => other,
    }
}

/// Returns `true` if backend text says a TTL was above what it permits.
fn reports_ttl_limit(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    let mentions_ttl = text.contains("ttl") || text.contains("notafter");
    let mentions_limit = [
        "longer than",
        "larger than",
        "greater than",
        "exceed",
        "beyond",
        "maxttl",
        "max_ttl",
    ]
    .iter()
    .any(|needle| text.contains(needle));
    mentions_ttl && mentions_limit
}

fn parse_bundle(path: &str, response: BackendResponse) -> Result<CertificateBundle> {
    let data = response
        .data
        .ok_or_else(|| Error::malformed(path, "response carries no data"))?;
    let issued = IssueResponse::from_fields(path, &data)?;

    let leaf = Certificate::from_pem(&issued.certificate)
        .map_err(|e| Error::malformed(path, format!("leaf certificate: {e}")))?;

    let mut chain = Vec::new();
    for pem_text in issued.chain_pems() {
        let certs = Certificate::all_from_pem(pem_text)
            .map_err(|e| Error::malformed(path, format!("chain certificate: {e}")))?;
        chain.extend(certs);
    }

    let private_key = PrivateKey::from_pem(&issued.private_key)
        .map_err(|e| Error::malformed(path, format!("private key: {e}")))?;

    let matches = key_matches_certificate(&private_key, &leaf)
        .map_err(|e| Error::malformed(path, format!("private key: {e}")))?;
    if !matches {
        return Err(Error::malformed(path, "private key does not match the leaf certificate"));
    }

    // A response without `ca_chain` or `issuing_ca` leaves nothing to verify.
    if !chain.is_empty() {
        verify_chain(&leaf, &chain).map_err(|e| Error::malformed(path, e.to_string()))?;
    }

    if normalize_serial(&issued.serial_number) != normalize_serial(leaf.serial()) {
        return Err(Error::malformed(
            path,
            format!(
                "serial number '{}' does not match leaf serial '{}'",
                issued.serial_number,
                leaf.serial()
            ),
        ));
    }

    Ok(CertificateBundle::new(leaf, chain, private_key, issued.serial_number))
}
