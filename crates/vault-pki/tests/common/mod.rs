//! In-process fake PKI backend for integration tests.
//!
//! Implements the subset of the backend API the crate talks to: mounting,
//! root generation, roles, issuance and listing certificates. Issuance applies
//! role SAN policy and the backend's TTL rules (truncate above the mount
//! maximum with a warning, refuse past the CA's expiry).

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use vault_pki::{
    BackendClient, Certificate, ClientIdentity, MountConfig, PkiAdmin, RoleConfig,
    RootGenerateRequest, Token, TrustConfig, format_duration, parse_duration,
};

/// Root token accepted by the fake backend.
pub const TOKEN: &str = "mysecrettoken";
/// Role provisioned on every mount.
pub const ROLE: &str = "test";
/// Default mount path.
pub const DEFAULT_MOUNT: &str = "pki";
/// Directly provisioned custom mount path.
pub const CUSTOM_MOUNT: &str = "mount-test-pki";
/// System default lease TTL (168h).
pub const SYSTEM_DEFAULT_LEASE_TTL: Duration = Duration::from_secs(168 * 3600);
/// System maximum lease TTL (720h).
pub const SYSTEM_MAX_LEASE_TTL: Duration = Duration::from_secs(720 * 3600);
/// Maximum lease TTL of provisioned mounts and the TTL of their roots (87600h).
pub const MOUNT_MAX_LEASE_TTL: Duration = Duration::from_secs(87_600 * 3600);

// ============================================================================
// Options and recorded traffic
// ============================================================================

/// How the fake backend behaves.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeOptions {
    /// Number of initial requests answered with 503 "sealed".
    pub warmup_failures: u32,
    /// Serve HTTPS with a listener certificate from a private CA.
    pub tls: bool,
    /// Require a client certificate from the fake's client CA.
    pub require_client_cert: bool,
    /// Return a private key that does not belong to the issued leaf.
    pub foreign_key: bool,
}

/// A request as seen by the fake backend.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub token: Option<String>,
    pub body: Map<String, Value>,
}

// ============================================================================
// Backend state
// ============================================================================

struct Ca {
    cert: rcgen::Certificate,
    key: KeyPair,
    not_after: DateTime<Utc>,
}

#[derive(Default)]
struct Role {
    allowed_domains: Vec<String>,
    allow_subdomains: bool,
    allow_any_name: bool,
    allowed_other_sans: Vec<String>,
    key_type: String,
    max_ttl: Option<Duration>,
}

impl Role {
    fn allows_name(&self, name: &str) -> bool {
        self.allow_any_name
            || self
                .allowed_domains
                .iter()
                .any(|domain| self.allow_subdomains && name.ends_with(&format!(".{domain}")))
    }

    fn allows_other_san(&self, oid: &str) -> bool {
        self.allowed_other_sans
            .iter()
            .any(|pattern| pattern.split_once(';').is_some_and(|(allowed, _)| allowed == oid))
    }
}

#[derive(Default)]
struct Mount {
    default_lease_ttl: Option<Duration>,
    max_lease_ttl: Option<Duration>,
    ca: Option<Ca>,
    roles: HashMap<String, Role>,
    serials: Vec<String>,
}

impl Mount {
    fn max_ttl(&self) -> Duration {
        self.max_lease_ttl.unwrap_or(SYSTEM_MAX_LEASE_TTL)
    }

    fn default_ttl(&self) -> Duration {
        self.default_lease_ttl
            .unwrap_or(SYSTEM_DEFAULT_LEASE_TTL)
            .min(self.max_ttl())
    }
}

struct Backend {
    options: FakeOptions,
    warmup_remaining: AtomicU32,
    mounts: Mutex<HashMap<String, Mount>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

type Reply = Result<Response, Response>;

fn errors(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(json!({ "errors": [message] }))).into_response()
}

fn ok(data: Value, warnings: &[String]) -> Response {
    let warnings = if warnings.is_empty() { Value::Null } else { json!(warnings) };
    (
        StatusCode::OK,
        axum::Json(json!({
            "request_id": "00000000-0000-0000-0000-000000000000",
            "lease_id": "",
            "renewable": false,
            "lease_duration": 0,
            "data": data,
            "wrap_info": null,
            "warnings": warnings,
            "auth": null,
        })),
    )
        .into_response()
}

fn str_field<'a>(body: &'a Map<String, Value>, key: &str) -> &'a str {
    body.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn list_field(body: &Map<String, Value>, key: &str) -> Vec<String> {
    str_field(body, key)
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn ttl_field(body: &Map<String, Value>, key: &str) -> Result<Option<Duration>, Response> {
    match str_field(body, key) {
        "" => Ok(None),
        text => parse_duration(text)
            .map(Some)
            .map_err(|e| errors(StatusCode::BAD_REQUEST, &format!("invalid {key}: {e}"))),
    }
}

fn ip_field(body: &Map<String, Value>) -> Result<Vec<IpAddr>, Response> {
    list_field(body, "ip_sans")
        .iter()
        .map(|ip| {
            ip.parse().map_err(|_| {
                errors(
                    StatusCode::BAD_REQUEST,
                    &format!("the value '{ip}' is not a valid IP address"),
                )
            })
        })
        .collect()
}

fn to_rcgen_time(dt: DateTime<Utc>) -> time::OffsetDateTime {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp()).unwrap()
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap()
}

impl Backend {
    fn record(&self, method: &Method, path: &str, headers: &HeaderMap, body: &Map<String, Value>) {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: method.to_string(),
            path: path.to_string(),
            token: headers
                .get("x-vault-token")
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            body: body.clone(),
        });
    }

    fn dispatch(&self, method: &Method, path: &str, body: &Map<String, Value>) -> Reply {
        if let Some(mount) = path.strip_prefix("sys/mounts/") {
            if *method != Method::POST {
                return Err(errors(StatusCode::METHOD_NOT_ALLOWED, "unsupported operation"));
            }
            return self.mount(mount, body);
        }
        if let Some(mount) = path.strip_suffix("/certs") {
            return self.list_certs(mount);
        }
        if let Some(mount) = path.strip_suffix("/root/generate/internal") {
            return self.generate_root(mount, body);
        }
        if let Some((mount, role)) = path.rsplit_once("/roles/") {
            return self.write_role(mount, role, body);
        }
        if let Some((mount, role)) = path.rsplit_once("/issue/") {
            return self.issue(mount, role, body);
        }
        Err(errors(
            StatusCode::NOT_FOUND,
            &format!("no handler for route '{path}'"),
        ))
    }

    fn mount(&self, mount: &str, body: &Map<String, Value>) -> Reply {
        if str_field(body, "type") != "pki" {
            return Err(errors(StatusCode::BAD_REQUEST, "plugin not found in the catalog"));
        }
        let config = body.get("config").and_then(Value::as_object).cloned().unwrap_or_default();
        let default_lease_ttl = ttl_field(&config, "default_lease_ttl")?;
        let max_lease_ttl = ttl_field(&config, "max_lease_ttl")?;

        let mut mounts = self.mounts.lock().unwrap();
        if mounts.contains_key(mount) {
            return Err(errors(
                StatusCode::BAD_REQUEST,
                &format!("path is already in use at {mount}/"),
            ));
        }
        mounts.insert(
            mount.to_string(),
            Mount {
                default_lease_ttl,
                max_lease_ttl,
                ..Mount::default()
            },
        );
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    fn list_certs(&self, mount: &str) -> Reply {
        let mounts = self.mounts.lock().unwrap();
        let Some(mount) = mounts.get(mount) else {
            return Err(errors(StatusCode::NOT_FOUND, "no handler for route"));
        };
        Ok(ok(json!({ "keys": mount.serials }), &[]))
    }

    fn generate_root(&self, mount_path: &str, body: &Map<String, Value>) -> Reply {
        let mut mounts = self.mounts.lock().unwrap();
        let Some(mount) = mounts.get_mut(mount_path) else {
            return Err(errors(
                StatusCode::NOT_FOUND,
                &format!("no handler for route '{mount_path}/root/generate/internal'"),
            ));
        };

        let common_name = str_field(body, "common_name");
        if common_name.is_empty() {
            return Err(errors(StatusCode::BAD_REQUEST, "the common_name field is required"));
        }

        let mut warnings = Vec::new();
        let mut ttl = ttl_field(body, "ttl")?.unwrap_or_else(|| mount.max_ttl());
        if ttl > mount.max_ttl() {
            warnings.push(format!(
                "TTL {:?} is longer than permitted maxTTL {:?}, so maxTTL is being used",
                format_duration(ttl),
                format_duration(mount.max_ttl())
            ));
            ttl = mount.max_ttl();
        }

        let now = Utc::now();
        let not_after = now + to_chrono(ttl);
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.subject_alt_names = ip_field(body)?.into_iter().map(SanType::IpAddress).collect();
        params.not_before = to_rcgen_time(now - chrono::Duration::seconds(30));
        params.not_after = to_rcgen_time(not_after);
        let cert = params.self_signed(&key).unwrap();

        let parsed = Certificate::from_der(cert.der()).unwrap();
        let certificate = if str_field(body, "format") == "der" {
            BASE64.encode(cert.der())
        } else {
            cert.pem()
        };
        let data = json!({
            "certificate": certificate,
            "issuing_ca": certificate,
            "serial_number": parsed.serial(),
            "expiration": not_after.timestamp(),
        });

        mount.ca = Some(Ca {
            cert,
            key,
            not_after,
        });
        Ok(ok(data, &warnings))
    }

    fn write_role(&self, mount_path: &str, role: &str, body: &Map<String, Value>) -> Reply {
        let mut mounts = self.mounts.lock().unwrap();
        let Some(mount) = mounts.get_mut(mount_path) else {
            return Err(errors(
                StatusCode::NOT_FOUND,
                &format!("no handler for route '{mount_path}/roles/{role}'"),
            ));
        };

        let flag = |key: &str| body.get(key).and_then(Value::as_bool).unwrap_or(false);
        mount.roles.insert(
            role.to_string(),
            Role {
                allowed_domains: list_field(body, "allowed_domains"),
                allow_subdomains: flag("allow_subdomains"),
                allow_any_name: flag("allow_any_name"),
                allowed_other_sans: list_field(body, "allowed_other_sans"),
                key_type: str_field(body, "key_type").to_string(),
                max_ttl: ttl_field(body, "max_ttl")?,
            },
        );
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    fn issue(&self, mount_path: &str, role_name: &str, body: &Map<String, Value>) -> Reply {
        let mut mounts = self.mounts.lock().unwrap();
        let Some(mount) = mounts.get_mut(mount_path) else {
            return Err(errors(
                StatusCode::NOT_FOUND,
                &format!("no handler for route '{mount_path}/issue/{role_name}'"),
            ));
        };
        let Some(role) = mount.roles.get(role_name) else {
            return Err(errors(StatusCode::BAD_REQUEST, &format!("unknown role: {role_name}")));
        };
        let Some(ca) = &mount.ca else {
            return Err(errors(
                StatusCode::BAD_REQUEST,
                "backend must be configured with a CA certificate/key",
            ));
        };

        let common_name = str_field(body, "common_name").to_string();
        let alt_names = list_field(body, "alt_names");
        let ip_sans = ip_field(body)?;

        if common_name.is_empty() && alt_names.is_empty() && ip_sans.is_empty() {
            return Err(errors(StatusCode::BAD_REQUEST, "the common_name field is required"));
        }
        if !common_name.is_empty() && !role.allows_name(&common_name) {
            return Err(errors(
                StatusCode::BAD_REQUEST,
                &format!("common name {common_name} not allowed by this role"),
            ));
        }
        if let Some(name) = alt_names.iter().find(|name| !role.allows_name(name)) {
            return Err(errors(
                StatusCode::BAD_REQUEST,
                &format!("subject alternative name {name} not allowed by this role"),
            ));
        }

        let other_sans = str_field(body, "other_sans");
        if !other_sans.is_empty() {
            let parts: Vec<&str> = other_sans.split(';').collect();
            for pair in parts.chunks(2) {
                if pair.len() != 2 || !pair[1].contains(':') {
                    return Err(errors(
                        StatusCode::BAD_REQUEST,
                        &format!("could not parse other_sans '{other_sans}'"),
                    ));
                }
                if !role.allows_other_san(pair[0]) {
                    return Err(errors(
                        StatusCode::BAD_REQUEST,
                        &format!("other SAN OID {} not allowed by this role", pair[0]),
                    ));
                }
            }
        }

        let mut max_ttl = mount.max_ttl();
        if let Some(role_max) = role.max_ttl {
            max_ttl = max_ttl.min(role_max);
        }
        let mut warnings = Vec::new();
        let mut ttl = ttl_field(body, "ttl")?.unwrap_or_else(|| mount.default_ttl());
        if ttl > max_ttl {
            warnings.push(format!(
                "TTL {:?} is longer than permitted maxTTL {:?}, so maxTTL is being used",
                format_duration(ttl),
                format_duration(max_ttl)
            ));
            ttl = max_ttl;
        }

        let now = Utc::now();
        let mut not_after = now + to_chrono(ttl);
        if not_after > ca.not_after && !warnings.is_empty() {
            // Already cut down to the maximum; keep inside the CA's lifetime.
            not_after = ca.not_after;
        }
        if not_after > ca.not_after {
            return Err(errors(
                StatusCode::BAD_REQUEST,
                &format!(
                    "cannot satisfy request, as TTL would result in notAfter of {} that is beyond the expiration of the CA certificate at {}",
                    not_after.to_rfc3339(),
                    ca.not_after.to_rfc3339()
                ),
            ));
        }

        let mut dns_names = Vec::new();
        if !common_name.is_empty() {
            dns_names.push(common_name.clone());
        }
        for name in alt_names {
            if !dns_names.contains(&name) {
                dns_names.push(name);
            }
        }

        let leaf_key = LeafKey::generate(&role.key_type);
        let key = leaf_key.key_pair();
        let mut params = CertificateParams::new(dns_names).unwrap();
        params.distinguished_name = DistinguishedName::new();
        if !common_name.is_empty() {
            params.distinguished_name.push(DnType::CommonName, common_name);
        }
        params
            .subject_alt_names
            .extend(ip_sans.into_iter().map(SanType::IpAddress));
        params.not_before = to_rcgen_time(now - chrono::Duration::seconds(30));
        params.not_after = to_rcgen_time(not_after);
        let leaf = params.signed_by(key, &ca.cert, &ca.key).unwrap();

        let serial = Certificate::from_der(leaf.der()).unwrap().serial().to_string();
        let leaf_key = if self.options.foreign_key {
            LeafKey::generate(&role.key_type)
        } else {
            leaf_key
        };
        let ca_pem = ca.cert.pem();

        let data = json!({
            "certificate": leaf.pem(),
            "issuing_ca": ca_pem,
            "ca_chain": [ca_pem],
            "private_key": leaf_key.pem(),
            "private_key_type": leaf_key.type_name(),
            "serial_number": serial,
            "expiration": not_after.timestamp(),
        });
        mount.serials.push(serial);
        Ok(ok(data, &warnings))
    }
}

/// A freshly generated leaf key, encoded the way the backend returns it.
enum LeafKey {
    /// P-256, returned as SEC1 `EC PRIVATE KEY`.
    Ec(KeyPair),
    /// RSA-2048, returned as PKCS#1 `RSA PRIVATE KEY`.
    Rsa(rsa::RsaPrivateKey, KeyPair),
}

impl LeafKey {
    /// Roles with `key_type = "rsa"` get RSA keys; anything else gets P-256.
    fn generate(key_type: &str) -> Self {
        if key_type != "rsa" {
            return Self::Ec(KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap());
        }
        use rsa::pkcs8::{EncodePrivateKey, LineEnding};

        let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let pkcs8 = key.to_pkcs8_pem(LineEnding::LF).unwrap();
        let key_pair = KeyPair::from_pem_and_sign_algo(&pkcs8, &rcgen::PKCS_RSA_SHA256).unwrap();
        Self::Rsa(key, key_pair)
    }

    fn key_pair(&self) -> &KeyPair {
        match self {
            Self::Ec(key_pair) | Self::Rsa(_, key_pair) => key_pair,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Ec(_) => "ec",
            Self::Rsa(..) => "rsa",
        }
    }

    fn pem(&self) -> String {
        match self {
            Self::Ec(key_pair) => {
                use p256::pkcs8::DecodePrivateKey;

                let secret = p256::SecretKey::from_pkcs8_der(&key_pair.serialize_der()).unwrap();
                let sec1 = secret.to_sec1_der().unwrap();
                pem::encode(&pem::Pem::new("EC PRIVATE KEY", sec1.to_vec()))
            }
            Self::Rsa(key, _) => {
                use rsa::pkcs1::EncodeRsaPrivateKey;

                let pkcs1 = key.to_pkcs1_der().unwrap();
                pem::encode(&pem::Pem::new("RSA PRIVATE KEY", pkcs1.as_bytes().to_vec()))
            }
        }
    }
}

async fn handle(
    State(backend): State<Arc<Backend>>,
    method: Method,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let fields: Map<String, Value> = if body.is_empty() {
        Map::new()
    } else {
        match serde_json::from_slice(&body) {
            Ok(fields) => fields,
            Err(e) => {
                return errors(
                    StatusCode::BAD_REQUEST,
                    &format!("failed to parse JSON input: {e}"),
                );
            }
        }
    };
    backend.record(&method, &path, &headers, &fields);

    let token = headers.get("x-vault-token").and_then(|v| v.to_str().ok());
    if token != Some(TOKEN) {
        return errors(StatusCode::FORBIDDEN, "permission denied");
    }

    let warming = backend
        .warmup_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if warming {
        return errors(StatusCode::SERVICE_UNAVAILABLE, "Vault is sealed");
    }

    match backend.dispatch(&method, &path, &fields) {
        Ok(response) | Err(response) => response,
    }
}

// ============================================================================
// TLS material
// ============================================================================

/// A CA able to sign certificates for the test.
pub struct TestCa {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl TestCa {
    /// Creates a self-signed CA.
    pub fn new(common_name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    /// Returns the CA certificate as PEM.
    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    /// Returns the CA certificate as DER.
    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    /// Issues a leaf for `names`, returning the certificate DER and PKCS#8 key DER.
    pub fn issue(&self, names: &[&str]) -> (CertificateDer<'static>, Vec<u8>) {
        let key = KeyPair::generate().unwrap();
        let names: Vec<String> = names.iter().map(|n| (*n).to_string()).collect();
        let mut params = CertificateParams::new(names).unwrap();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, "vault-pki test peer");
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        (cert.der().clone(), key.serialize_der())
    }
}

fn server_tls_config(listener_ca: &TestCa, client_ca: Option<&TestCa>) -> rustls::ServerConfig {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .unwrap();

    let builder = match client_ca {
        Some(client_ca) => {
            let mut roots = rustls::RootCertStore::empty();
            roots.add(client_ca.der()).unwrap();
            let verifier =
                rustls::server::WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                    .build()
                    .unwrap();
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let (cert, key) = listener_ca.issue(&["localhost", "127.0.0.1"]);
    builder
        .with_single_cert(vec![cert], PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key)))
        .unwrap()
}

fn serve_tls(listener: TcpListener, app: Router, config: rustls::ServerConfig) -> JoinHandle<()> {
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let app = app.clone();
            tokio::spawn(async move {
                let Ok(tls) = acceptor.accept(stream).await else {
                    return;
                };
                let service = hyper_util::service::TowerToHyperService::new(app);
                let _ = hyper_util::server::conn::auto::Builder::new(
                    hyper_util::rt::TokioExecutor::new(),
                )
                .serve_connection(hyper_util::rt::TokioIo::new(tls), service)
                .await;
            });
        }
    })
}

// ============================================================================
// Fake backend handle
// ============================================================================

/// A running fake backend that stops when dropped.
pub struct FakeBackend {
    pub addr: SocketAddr,
    pub url: String,
    listener_ca: Option<TestCa>,
    client_ca: Option<TestCa>,
    state: Arc<Backend>,
    handle: JoinHandle<()>,
}

impl FakeBackend {
    /// Starts a plain HTTP backend on an ephemeral port.
    pub async fn start() -> Self {
        Self::start_with(FakeOptions::default()).await
    }

    /// Starts a backend with the given options.
    pub async fn start_with(options: FakeOptions) -> Self {
        let state = Arc::new(Backend {
            options,
            warmup_remaining: AtomicU32::new(options.warmup_failures),
            mounts: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/v1/{*path}", any(handle))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        if options.tls {
            let listener_ca = TestCa::new("listener CA");
            let client_ca = options.require_client_cert.then(|| TestCa::new("client CA"));
            let config = server_tls_config(&listener_ca, client_ca.as_ref());
            let handle = serve_tls(listener, app, config);
            Self {
                addr,
                url: format!("https://127.0.0.1:{}", addr.port()),
                listener_ca: Some(listener_ca),
                client_ca,
                state,
                handle,
            }
        } else {
            let handle = tokio::spawn(async move {
                let _ = axum::serve(listener, app).await;
            });
            Self {
                addr,
                url: format!("http://127.0.0.1:{}", addr.port()),
                listener_ca: None,
                client_ca: None,
                state,
                handle,
            }
        }
    }

    /// Returns the PEM of the CA that signed the listener certificate.
    pub fn listener_ca_pem(&self) -> String {
        self.listener_ca.as_ref().expect("backend is not serving TLS").pem()
    }

    /// Issues a client identity trusted by the backend's client verifier.
    pub fn client_identity(&self) -> ClientIdentity {
        let ca = self.client_ca.as_ref().expect("backend does not require client certificates");
        let (cert, key) = ca.issue(&["vault-pki-client"]);
        let cert = Certificate::from_der(&cert).unwrap();
        let key = vault_pki::PrivateKey::new(key, "PRIVATE KEY");
        ClientIdentity::new(cert, key)
    }

    /// Returns a trust configuration that reaches this backend.
    pub fn trust(&self) -> TrustConfig {
        let mut builder = TrustConfig::builder(self.url.clone(), Token::new(TOKEN));
        if self.listener_ca.is_some() {
            builder = builder.ca_pool_pem(&self.listener_ca_pem()).unwrap();
        }
        if self.client_ca.is_some() {
            builder = builder.client_identity(self.client_identity());
        }
        builder.build().unwrap()
    }

    /// Returns a client for this backend.
    pub fn client(&self) -> BackendClient {
        BackendClient::new(&self.trust()).unwrap()
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Provisions both reference mounts with a root and the `test` role.
    pub async fn provision(&self) {
        let admin = PkiAdmin::new(self.client());
        for mount in [DEFAULT_MOUNT, CUSTOM_MOUNT] {
            provision_mount(&admin, mount).await;
        }
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The reference role: `myserver.com` and its subdomains, key type `any`, the
/// UPN other SAN. Names outside the domain are refused.
pub fn reference_role() -> RoleConfig {
    RoleConfig {
        allowed_domains: vec!["myserver.com".to_string()],
        allow_subdomains: true,
        allow_any_name: false,
        key_type: "any".to_string(),
        allowed_other_sans: vec!["1.3.6.1.4.1.311.20.2.3;utf8:*".to_string()],
        max_ttl: None,
    }
}

/// Mounts a PKI engine, generates its root and writes the reference role.
pub async fn provision_mount(admin: &PkiAdmin, mount: &str) -> Certificate {
    admin
        .mount_pki(mount, MountConfig::with_max_lease_ttl(MOUNT_MAX_LEASE_TTL))
        .await
        .unwrap();
    let root = admin
        .generate_root(
            mount,
            &RootGenerateRequest::new("my_vault", MOUNT_MAX_LEASE_TTL)
                .ip("127.0.0.1".parse().unwrap()),
        )
        .await
        .unwrap();
    admin.write_role(mount, ROLE, &reference_role()).await.unwrap();
    root
}
