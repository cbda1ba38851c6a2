//! Command-line argument parsing with clap.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use vault_pki::config::{ENV_ADDR, ENV_CACERT, ENV_CLIENT_CERT, ENV_CLIENT_KEY, ENV_TOKEN};
use vault_pki::{IssuerConfig, MAX_TIMEOUT_SECS, OtherSan, TokenSource, parse_duration};

/// Environment variable naming a JSON config file.
pub const ENV_CONFIG: &str = "VAULT_PKI_CONFIG";

/// vault-pki - certificates from a Vault-style PKI backend.
#[derive(Parser, Debug, Clone)]
#[command(name = "vault-pki")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// JSON config file.
    #[arg(short, long, env = ENV_CONFIG, global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL.
    #[arg(short, long, env = ENV_ADDR, global = true)]
    pub address: Option<String>,

    /// Backend token.
    #[arg(short, long, env = ENV_TOKEN, hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// CA bundle used to validate an `https` backend.
    #[arg(long, env = ENV_CACERT, global = true)]
    pub ca_cert: Option<PathBuf>,

    /// Client certificate for mutual TLS.
    #[arg(long, env = ENV_CLIENT_CERT, global = true)]
    pub client_cert: Option<PathBuf>,

    /// Client private key for mutual TLS.
    #[arg(long, env = ENV_CLIENT_KEY, global = true)]
    pub client_key: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table, global = true)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Builds the issuer configuration: config file (or defaults) overlaid by
    /// whatever flags or environment variables were given.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the file cannot be loaded or the result is invalid.
    pub fn issuer_config(&self) -> vault_pki::Result<IssuerConfig> {
        let mut config = match &self.config {
            Some(path) => IssuerConfig::from_file(path)?,
            None => IssuerConfig::default(),
        };

        if let Some(address) = &self.address {
            config.address.clone_from(address);
        }
        if let Some(token) = &self.token {
            config.token = TokenSource::Token {
                token: token.clone(),
            };
        }
        if let Some(path) = &self.ca_cert {
            config.ca_cert = Some(path.clone());
        }
        if let Some(path) = &self.client_cert {
            config.client_cert = Some(path.clone());
        }
        if let Some(path) = &self.client_key {
            config.client_key = Some(path.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Format {
    /// Human-readable format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Issue a certificate from a role.
    Issue(IssueArgs),

    /// Wait until a PKI mount answers.
    Wait(WaitArgs),

    /// Mount a PKI engine, generate its root and write a role.
    ///
    /// Intended for development and test backends.
    Setup(SetupArgs),
}

/// Arguments for the issue command.
#[derive(Args, Debug, Clone)]
pub struct IssueArgs {
    /// Common name of the certificate.
    #[arg(short = 'n', long)]
    pub common_name: Option<String>,

    /// DNS subject alternative names (repeatable or comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub dns: Vec<String>,

    /// IP subject alternative names (repeatable or comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub ip: Vec<IpAddr>,

    /// Other subject alternative names as `OID;type:value`.
    #[arg(long, value_parser = parse_other_san)]
    pub other_san: Vec<OtherSan>,

    /// Requested lifetime, e.g. `1h` or `30m`. Omitted means the backend default.
    #[arg(long, value_parser = parse_ttl)]
    pub ttl: Option<Duration>,

    /// Issuance role. Defaults to the configured role.
    #[arg(short, long)]
    pub role: Option<String>,

    /// PKI mount path. Defaults to the configured mount.
    #[arg(short, long)]
    pub mount: Option<String>,

    /// Directory to write `cert.pem`, `chain.pem` and `key.pem` into.
    #[arg(short, long)]
    pub out_dir: Option<PathBuf>,
}

/// Arguments for the wait command.
#[derive(Args, Debug, Clone)]
pub struct WaitArgs {
    /// PKI mount path. Defaults to the configured mount.
    #[arg(short, long)]
    pub mount: Option<String>,

    /// Overall deadline, e.g. `10s`. Defaults to the configured readiness timeout.
    #[arg(long, value_parser = parse_wait_duration)]
    pub timeout: Option<Duration>,

    /// Delay between attempts, e.g. `250ms`. Defaults to the configured interval.
    #[arg(long, value_parser = parse_wait_duration)]
    pub interval: Option<Duration>,
}

/// Arguments for the setup command.
#[derive(Args, Debug, Clone)]
pub struct SetupArgs {
    /// PKI mount path. Defaults to the configured mount.
    #[arg(short, long)]
    pub mount: Option<String>,

    /// Maximum lease TTL of the mount.
    #[arg(long, value_parser = parse_ttl, default_value = "87600h")]
    pub max_lease_ttl: Duration,

    /// Common name of the generated root.
    #[arg(long, default_value = "my_vault")]
    pub root_common_name: String,

    /// IP subject alternative names of the root.
    #[arg(long, value_delimiter = ',')]
    pub root_ip: Vec<IpAddr>,

    /// Role to write. Defaults to the configured role.
    #[arg(short, long)]
    pub role: Option<String>,

    /// Domains the role may issue for.
    #[arg(long, value_delimiter = ',')]
    pub allowed_domains: Vec<String>,

    /// Permit subdomains of the allowed domains.
    #[arg(long)]
    pub allow_subdomains: bool,

    /// Permit any name.
    #[arg(long)]
    pub allow_any_name: bool,

    /// Key type for issued certificates (`rsa`, `ec`, `ed25519` or `any`).
    #[arg(long, default_value = "rsa")]
    pub key_type: String,

    /// Other SAN patterns the role permits, as `OID;type:pattern`.
    #[arg(long)]
    pub allowed_other_san: Vec<String>,

    /// Maximum TTL for certificates issued by the role.
    #[arg(long, value_parser = parse_ttl)]
    pub role_max_ttl: Option<Duration>,

    /// Wait for the backend to answer before configuring it.
    #[arg(long)]
    pub wait: bool,
}

fn parse_ttl(input: &str) -> Result<Duration, String> {
    parse_duration(input).map_err(|e| e.to_string())
}

/// Polling durations must be non-zero and no longer than the configuration allows.
fn parse_wait_duration(input: &str) -> Result<Duration, String> {
    let duration = parse_ttl(input)?;
    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    if duration > Duration::from_secs(MAX_TIMEOUT_SECS) {
        return Err(format!("duration cannot exceed {MAX_TIMEOUT_SECS}s"));
    }
    Ok(duration)
}

fn parse_other_san(input: &str) -> Result<OtherSan, String> {
    input.parse().map_err(|e: vault_pki::Error| e.to_string())
}
