//! # vault-pki-cli
//!
//! Command-line front-end for the `vault-pki` library.
//!
//! Provides commands for:
//! - Issuing a certificate from a role (`issue`)
//! - Waiting until a PKI mount answers (`wait`)
//! - Mounting an engine, generating its root and writing a role (`setup`)
//!
//! Connection settings come from an optional JSON config file, overlaid by
//! flags and their `VAULT_*` environment fallbacks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod output;

pub use cli::{Cli, Commands, Format};
pub use output::OutputFormat;
