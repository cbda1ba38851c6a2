//! Certificate chain verification.

use chrono::Utc;
use tracing::debug;
use x509_parser::prelude::*;

use crate::error::{Error, Result};
use crate::types::Certificate;

/// Verifies an issuing chain for a leaf certificate.
///
/// The chain is ordered nearest issuer first. The leaf must be signed by
/// `chain[0]` and each `chain[i]` by `chain[i + 1]`. A self-signed last entry
/// must verify against its own key; a last entry issued by someone else is
/// accepted as an intermediate whose root the backend did not return.
///
/// # Errors
///
/// Returns `Certificate` if the chain is empty or any link fails to verify.
pub fn verify_chain(leaf: &Certificate, chain: &[Certificate]) -> Result<()> {
    let Some(last) = chain.last() else {
        return Err(Error::Certificate("empty issuing chain".into()));
    };

    debug!(subject = %leaf.subject(), chain_len = chain.len(), "verifying certificate chain");

    let mut child = leaf;
    for issuer in chain {
        verify_signature(child, issuer)?;
        child = issuer;
    }

    if is_self_issued(last)? {
        verify_signature(last, last)?;
    }

    Ok(())
}

/// Verifies that a certificate was signed by the given issuer.
///
/// The issuer's subject name must equal the certificate's issuer name and the
/// signature must verify under the issuer's public key.
///
/// # Errors
///
/// Returns `Certificate` if either certificate fails to parse, the names do
/// not link, or the signature is invalid.
pub fn verify_signature(cert: &Certificate, issuer: &Certificate) -> Result<()> {
    let (_, parsed_cert) = X509Certificate::from_der(cert.der())
        .map_err(|e| Error::Certificate(format!("failed to parse certificate: {e}")))?;
    let (_, parsed_issuer) = X509Certificate::from_der(issuer.der())
        .map_err(|e| Error::Certificate(format!("failed to parse issuer certificate: {e}")))?;

    if parsed_cert.issuer().as_raw() != parsed_issuer.subject().as_raw() {
        return Err(Error::Certificate(format!(
            "issuer of '{}' is '{}', not '{}'",
            cert.subject(),
            parsed_cert.issuer(),
            parsed_issuer.subject()
        )));
    }

    parsed_cert
        .verify_signature(Some(parsed_issuer.public_key()))
        .map_err(|e| {
            Error::Certificate(format!(
                "signature of '{}' does not verify under '{}': {e:?}",
                cert.subject(),
                issuer.subject()
            ))
        })
}

fn is_self_issued(cert: &Certificate) -> Result<bool> {
    let (_, parsed) = X509Certificate::from_der(cert.der())
        .map_err(|e| Error::Certificate(format!("failed to parse certificate: {e}")))?;
    Ok(parsed.issuer().as_raw() == parsed.subject().as_raw())
}

/// Calculates the remaining validity period.
///
/// Returns `None` if the certificate has already expired.
#[must_use]
pub fn remaining_validity(cert: &Certificate) -> Option<chrono::Duration> {
    let now = Utc::now();
    if cert.not_after() > now {
        Some(cert.not_after() - now)
    } else {
        None
    }
}
