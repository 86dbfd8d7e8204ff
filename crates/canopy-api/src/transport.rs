// Shared transport configuration for building reqwest::Client instances.
//
// The REST client and the realtime socket share TLS, timeout, and
// credential headers through this module.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

const USER_AGENT: &str = concat!("canopy/", env!("CARGO_PKG_VERSION"));

/// TLS verification mode (api-level mirror of core's TlsVerification).
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// Use the system certificate store.
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (self-hosted backends with self-signed certs).
    DangerAcceptInvalid,
}

/// Credentials presented on every request.
///
/// The anon key identifies the project; the access token (when present)
/// identifies the user and scopes row-level security. Without a token the
/// anon key doubles as the bearer.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub anon_key: SecretString,
    pub access_token: Option<SecretString>,
}

impl ApiCredentials {
    pub fn new(anon_key: SecretString) -> Self {
        Self {
            anon_key,
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: SecretString) -> Self {
        self.access_token = Some(token);
        self
    }

    /// The bearer token value sent in `Authorization`.
    pub(crate) fn bearer(&self) -> &str {
        self.access_token
            .as_ref()
            .unwrap_or(&self.anon_key)
            .expose_secret()
    }

    /// Build the `apikey` + `Authorization` default headers.
    pub(crate) fn headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(self.anon_key.expose_secret())
            .map_err(|e| Error::Authentication {
                message: format!("anon key is not a valid header value: {e}"),
            })?;
        key.set_sensitive(true);
        headers.insert("apikey", key);

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", self.bearer()))
            .map_err(|e| Error::Authentication {
                message: format!("access token is not a valid header value: {e}"),
            })?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` with the given default headers.
    pub fn build_client(&self, headers: HeaderMap) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}
