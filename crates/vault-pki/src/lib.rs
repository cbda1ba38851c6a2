//! Certificate issuance against a Vault-style PKI secrets engine.
//!
//! This crate requests short-lived X.509 certificates from a remote PKI
//! backend over plain HTTP or (mutually authenticated) TLS, honoring the
//! backend's TTL ceilings, mount paths and role policy.
//!
//! # Overview
//!
//! The `vault-pki` crate provides:
//! - [`PkiIssuer`] to issue and verify certificates from a role
//! - [`TrustConfig`] to pin the backend's CA and present a client identity
//! - [`ReadinessGate`] to wait for a backend that is still starting
//! - [`PkiAdmin`] to mount engines, generate roots and write roles
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use vault_pki::{CertificateRequest, PkiIssuer, Token, TrustConfig};
//!
//! # async fn run() -> vault_pki::Result<()> {
//! let trust = TrustConfig::builder("http://127.0.0.1:8200", Token::new("mysecrettoken")).build()?;
//! let issuer = PkiIssuer::from_trust(&trust)?;
//!
//! let request = CertificateRequest::builder("test")
//!     .common_name("a.myserver.com")
//!     .ttl(Duration::from_secs(3600))
//!     .build()?;
//!
//! let bundle = issuer.issue(&request).await?;
//! println!("{}", bundle.leaf().pem());
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`issuer`] - Certificate issuance and response verification
//! - [`admin`] - Mount, root and role setup
//! - [`client`] - HTTP transport to the backend
//! - [`trust`] - CA pool, token and client identity
//! - [`readiness`] - Bounded retry-until-ready polling
//! - [`wire`] - Typed request and response bodies
//! - [`config`] - File and environment configuration
//! - [`types`] - Core types (`CertificateRequest`, `CertificateBundle`, etc.)
//! - [`error`] - Error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod client;
pub mod config;
pub mod duration;
pub mod error;
pub mod issuer;
pub mod keys;
pub mod readiness;
pub mod trust;
pub mod types;
pub mod validation;
pub mod wire;

// Re-export commonly used types at crate root
pub use admin::PkiAdmin;
pub use client::{BackendClient, BackendResponse, Fields};
pub use config::{IssuerConfig, MAX_TIMEOUT_SECS, ReadinessSettings, TokenSource};
pub use duration::{format_duration, parse_duration};
pub use error::{Error, Result};
pub use issuer::PkiIssuer;
pub use keys::{KeyAlgorithm, key_matches_certificate};
pub use readiness::ReadinessGate;
pub use trust::{CaPool, ClientIdentity, Token, TrustConfig};
pub use types::{
    Certificate, CertificateBundle, CertificateRequest, CertificateRequestBuilder, DEFAULT_MOUNT,
    OtherSan, PrivateKey, SubjectAltName,
};
pub use validation::{remaining_validity, verify_chain};
pub use wire::{MountConfig, RoleConfig, RootGenerateRequest};
