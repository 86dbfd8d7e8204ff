// ── Core error types ──
//
// User-facing errors from canopy-core. Consumers never see HTTP status
// codes or JSON parse failures directly; the `From<canopy_api::Error>`
// impl translates transport-layer errors into domain variants.

use thiserror::Error;

use canopy_api::tables;

/// Notification text used when an error carries no usable message.
pub const FALLBACK_MESSAGE: &str = "Something went wrong. Please try again.";

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to backend at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Not connected to the farm backend")]
    Disconnected,

    // ── Domain errors ────────────────────────────────────────────────
    /// Input rejected before any network call.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// The device already has an assignment somewhere in the farm.
    #[error("Device {entity_id} is already assigned to {target}")]
    DuplicateAssignment { entity_id: String, target: String },

    /// The record no longer exists, most likely removed concurrently.
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    /// The user declined a confirmation prompt.
    #[error("Cancelled: {action}")]
    Cancelled { action: String },

    // ── External call errors ─────────────────────────────────────────
    #[error("Request failed: {message}")]
    Network {
        message: String,
        /// Backend error code (e.g. `23505`), when one was returned.
        code: Option<String>,
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity_type: impl Into<String>, identifier: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            identifier: identifier.to_string(),
        }
    }

    /// Recoverable errors call for a refresh, not an abort.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Text for the notification sink: the underlying message when there
    /// is one, the generic fallback otherwise.
    pub fn user_message(&self) -> String {
        let message = match self {
            Self::Network { message, .. }
            | Self::Validation { message }
            | Self::AuthenticationFailed { message }
            | Self::Config { message } => message.trim().to_owned(),
            Self::Internal(_) => String::new(),
            other => other.to_string(),
        };
        if message.is_empty() {
            FALLBACK_MESSAGE.to_owned()
        } else {
            message
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<canopy_api::Error> for CoreError {
    fn from(err: canopy_api::Error) -> Self {
        match err {
            canopy_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            canopy_api::Error::Transport(ref e) => {
                if e.is_connect() || e.is_timeout() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map(|u| u.to_string())
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else if e.status().map(|s| s.as_u16()) == Some(404) {
                    CoreError::NotFound {
                        entity_type: "resource".into(),
                        identifier: e.url().map(|u| u.path().to_string()).unwrap_or_default(),
                    }
                } else {
                    CoreError::Network {
                        message: e.to_string(),
                        code: None,
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            canopy_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            canopy_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            canopy_api::Error::NotFound { table, id } => CoreError::NotFound {
                entity_type: entity_label(&table).into(),
                identifier: id,
            },
            canopy_api::Error::Api {
                status: 404,
                message,
                ..
            } => CoreError::NotFound {
                entity_type: "resource".into(),
                identifier: message,
            },
            canopy_api::Error::Api {
                status,
                message,
                code,
                details,
                ..
            } => {
                let unique = status == 409
                    || code.as_deref() == Some(canopy_api::error::UNIQUE_VIOLATION);
                let message = if unique {
                    match details {
                        Some(details) => format!("Conflict: {message} ({details})"),
                        None => format!("Conflict: {message}"),
                    }
                } else {
                    message
                };
                CoreError::Network {
                    message,
                    code,
                    status: Some(status),
                }
            }
            canopy_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            canopy_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            canopy_api::Error::ChannelJoin { topic, reason } => CoreError::ConnectionFailed {
                url: topic,
                reason: format!("channel join rejected: {reason}"),
            },
            canopy_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

fn entity_label(table: &str) -> &'static str {
    match table {
        tables::ROWS => "Row",
        tables::RACKS => "Rack",
        tables::SHELVES => "Shelf",
        tables::DEVICES => "Device",
        tables::DEVICE_ASSIGNMENTS => "Assignment",
        _ => "Record",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_result_maps_to_recoverable_not_found() {
        let err = CoreError::from(canopy_api::Error::NotFound {
            table: "device_assignments".into(),
            id: "a1".into(),
        });
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "Assignment not found: a1");
    }

    #[test]
    fn unique_violation_becomes_conflict_network_error() {
        let err = CoreError::from(canopy_api::Error::Api {
            status: 409,
            message: "duplicate key value".into(),
            code: Some("23505".into()),
            details: None,
            hint: None,
        });
        assert!(matches!(
            err,
            CoreError::Network { ref code, .. } if code.as_deref() == Some("23505")
        ));
        assert!(err.user_message().starts_with("Conflict"));
    }

    #[test]
    fn user_message_falls_back_when_empty() {
        let err = CoreError::Network {
            message: "  ".into(),
            code: None,
            status: None,
        };
        assert_eq!(err.user_message(), FALLBACK_MESSAGE);
        assert_eq!(CoreError::Internal("x".into()).user_message(), FALLBACK_MESSAGE);
    }

    #[test]
    fn duplicate_assignment_message_names_target() {
        let err = CoreError::DuplicateAssignment {
            entity_id: "light.a".into(),
            target: "shelf:s1".into(),
        };
        assert_eq!(err.user_message(), "Device light.a is already assigned to shelf:s1");
        assert!(!err.is_recoverable());
    }
}
