use thiserror::Error;

/// Postgres error code for a unique-constraint violation.
pub const UNIQUE_VIOLATION: &str = "23505";

/// Top-level error type for the `canopy-api` crate.
///
/// Covers every failure mode across both API surfaces: the REST table
/// endpoints and the realtime websocket. `canopy-core` maps these into
/// user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The backend rejected the API key or access token.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── REST ────────────────────────────────────────────────────────
    /// Structured error body returned by the REST layer.
    #[error("API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        message: String,
        /// Postgres / PostgREST error code (e.g. `23505`, `PGRST116`).
        code: Option<String>,
        details: Option<String>,
        hint: Option<String>,
    },

    /// The addressed record does not exist (HTTP 404 or an empty
    /// `return=representation` result for a keyed mutation).
    #[error("No {table} record with id {id}")]
    NotFound { table: String, id: String },

    // ── Realtime ────────────────────────────────────────────────────
    /// Websocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// Websocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The server refused a channel join.
    #[error("Channel join rejected for {topic}: {reason}")]
    ChannelJoin { topic: String, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::Api { status: 404, .. } => true,
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            _ => false,
        }
    }

    /// Returns `true` if the backend rejected a write because it would
    /// violate a unique constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Api { status, code, .. } => {
                *status == 409 || code.as_deref() == Some(UNIQUE_VIOLATION)
            }
            _ => false,
        }
    }

    /// Extract the backend error code, if available.
    pub fn api_error_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, code: Option<&str>) -> Error {
        Error::Api {
            status,
            message: "boom".into(),
            code: code.map(String::from),
            details: None,
            hint: None,
        }
    }

    #[test]
    fn conflict_status_is_unique_violation() {
        assert!(api(409, None).is_unique_violation());
        assert!(api(400, Some(UNIQUE_VIOLATION)).is_unique_violation());
        assert!(!api(400, Some("22P02")).is_unique_violation());
    }

    #[test]
    fn not_found_variants() {
        assert!(api(404, None).is_not_found());
        assert!(
            Error::NotFound {
                table: "rows".into(),
                id: "x".into()
            }
            .is_not_found()
        );
        assert!(!api(500, None).is_not_found());
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(api(503, None).is_transient());
        assert!(!api(422, None).is_transient());
    }
}
