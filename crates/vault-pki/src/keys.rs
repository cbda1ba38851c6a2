//! Private key inspection and key/certificate matching.
//!
//! The backend returns keys in whichever encoding suits the key type:
//! PKCS#1 (`RSA PRIVATE KEY`), SEC1 (`EC PRIVATE KEY`) or PKCS#8
//! (`PRIVATE KEY`). Matching derives the public key bits from the private key
//! and compares them with the certificate's `subjectPublicKey` BIT STRING.

use std::fmt;

use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPublicKey};
use x509_parser::prelude::*;

use crate::error::{Error, Result};
use crate::types::{Certificate, PrivateKey};

/// Supported private key algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// RSA of any modulus size.
    Rsa,
    /// ECDSA over NIST P-256.
    EcdsaP256,
    /// ECDSA over NIST P-384.
    EcdsaP384,
    /// Ed25519.
    Ed25519,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rsa => "rsa",
            Self::EcdsaP256 => "ec-p256",
            Self::EcdsaP384 => "ec-p384",
            Self::Ed25519 => "ed25519",
        };
        f.write_str(name)
    }
}

/// Derives the algorithm and raw public key bits of a private key.
///
/// The bits are encoded as they appear inside a certificate's
/// `subjectPublicKey`: a PKCS#1 `RSAPublicKey` for RSA, an uncompressed SEC1
/// point for ECDSA and the 32-byte key for Ed25519.
///
/// # Errors
///
/// Returns `Certificate` if the key cannot be decoded.
pub fn public_key_bits(key: &PrivateKey) -> Result<(KeyAlgorithm, Vec<u8>)> {
    let der = key.der();
    match key.label() {
        "RSA PRIVATE KEY" => {
            let key = rsa::RsaPrivateKey::from_pkcs1_der(der)
                .map_err(|e| Error::Certificate(format!("invalid PKCS#1 RSA key: {e}")))?;
            rsa_bits(&key)
        }
        "EC PRIVATE KEY" => {
            if let Ok(key) = p256::SecretKey::from_sec1_der(der) {
                return Ok((
                    KeyAlgorithm::EcdsaP256,
                    key.public_key().to_encoded_point(false).as_bytes().to_vec(),
                ));
            }
            let key = p384::SecretKey::from_sec1_der(der)
                .map_err(|e| Error::Certificate(format!("unsupported SEC1 EC key: {e}")))?;
            Ok((
                KeyAlgorithm::EcdsaP384,
                key.public_key().to_encoded_point(false).as_bytes().to_vec(),
            ))
        }
        "PRIVATE KEY" => pkcs8_bits(der),
        other => Err(Error::Certificate(format!("unsupported private key encoding '{other}'"))),
    }
}

fn rsa_bits(key: &rsa::RsaPrivateKey) -> Result<(KeyAlgorithm, Vec<u8>)> {
    let public = key
        .to_public_key()
        .to_pkcs1_der()
        .map_err(|e| Error::Certificate(format!("failed to encode RSA public key: {e}")))?;
    Ok((KeyAlgorithm::Rsa, public.as_bytes().to_vec()))
}

fn pkcs8_bits(der: &[u8]) -> Result<(KeyAlgorithm, Vec<u8>)> {
    if let Ok(key) = <rsa::RsaPrivateKey as rsa::pkcs8::DecodePrivateKey>::from_pkcs8_der(der) {
        return rsa_bits(&key);
    }
    if let Ok(key) = <p256::SecretKey as p256::pkcs8::DecodePrivateKey>::from_pkcs8_der(der) {
        return Ok((
            KeyAlgorithm::EcdsaP256,
            key.public_key().to_encoded_point(false).as_bytes().to_vec(),
        ));
    }
    if let Ok(key) = <p384::SecretKey as p384::pkcs8::DecodePrivateKey>::from_pkcs8_der(der) {
        return Ok((
            KeyAlgorithm::EcdsaP384,
            key.public_key().to_encoded_point(false).as_bytes().to_vec(),
        ));
    }
    if let Ok(key) =
        <ed25519_dalek::SigningKey as ed25519_dalek::pkcs8::DecodePrivateKey>::from_pkcs8_der(der)
    {
        return Ok((KeyAlgorithm::Ed25519, key.verifying_key().to_bytes().to_vec()));
    }
    Err(Error::Certificate("unsupported PKCS#8 private key".into()))
}

/// Returns `true` if the private key corresponds to the certificate's public key.
///
/// # Errors
///
/// Returns `Certificate` if either the key or the certificate cannot be decoded.
pub fn key_matches_certificate(key: &PrivateKey, cert: &Certificate) -> Result<bool> {
    let (_, key_bits) = public_key_bits(key)?;
    let (_, parsed) = X509Certificate::from_der(cert.der())
        .map_err(|e| Error::Certificate(format!("failed to parse certificate: {e}")))?;
    Ok(parsed.public_key().subject_public_key.data.as_ref() == key_bits.as_slice())
}
