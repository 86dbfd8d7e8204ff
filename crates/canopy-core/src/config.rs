// ── Runtime connection configuration ──
//
// These types describe how to reach a farm backend. They carry credential
// data and connection tuning, but never touch disk. The CLI builds a
// `FarmConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

pub use canopy_api::ReconnectConfig;

use crate::model::LayerMode;

/// Credentials for the backend.
#[derive(Debug, Clone)]
pub struct AuthCredentials {
    /// Project key sent on every request.
    pub anon_key: SecretString,
    /// User session token; scopes row-level access when present.
    pub access_token: Option<SecretString>,
}

impl AuthCredentials {
    pub fn anon(anon_key: SecretString) -> Self {
        Self {
            anon_key,
            access_token: None,
        }
    }
}

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-hosted backends with self-signed certs).
    DangerAcceptInvalid,
}

/// Configuration for one farm session.
#[derive(Debug, Clone)]
pub struct FarmConfig {
    /// Backend root URL (e.g. `https://xyz.example.co`).
    pub url: Url,
    pub auth: AuthCredentials,
    /// Farm whose topology is loaded.
    pub farm_id: String,
    /// Scopes realtime row filters to one user's records when set.
    pub user_id: Option<String>,
    pub tls: TlsVerification,
    /// Request timeout.
    pub timeout: Duration,
    /// Open the realtime change feed on connect.
    pub realtime_enabled: bool,
    /// How often to perform a full refresh (seconds). 0 = never.
    pub refresh_interval_secs: u64,
    pub layer_mode: LayerMode,
    pub reconnect: ReconnectConfig,
}

impl FarmConfig {
    pub fn new(url: Url, auth: AuthCredentials, farm_id: impl Into<String>) -> Self {
        Self {
            url,
            auth,
            farm_id: farm_id.into(),
            user_id: None,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            realtime_enabled: true,
            refresh_interval_secs: 300,
            layer_mode: LayerMode::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}
