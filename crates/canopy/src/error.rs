//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use canopy_config::ConfigError;
use canopy_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
#[allow(dead_code, unused_assignments)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the farm backend at {url}")]
    #[diagnostic(
        code(canopy::connection_failed),
        help(
            "Check the URL and your network connection.\n\
             URL: {url}\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Lost the connection to the farm backend")]
    #[diagnostic(code(canopy::disconnected))]
    Disconnected,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(canopy::auth_failed),
        help("Verify the project key and session token.\nRun: canopy config set-token")
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(canopy::no_credentials),
        help(
            "Configure credentials with: canopy config init\n\
             Or set the CANOPY_ANON_KEY environment variable."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(canopy::not_found),
        help("Run: canopy {list_command} to see what exists")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("Device '{entity_id}' is already assigned to {target}")]
    #[diagnostic(
        code(canopy::duplicate_assignment),
        help("Unassign it first: canopy devices unassign {entity_id}")
    )]
    DuplicateAssignment { entity_id: String, target: String },

    // ── Backend ──────────────────────────────────────────────────────
    #[error("Request failed: {message}")]
    #[diagnostic(code(canopy::api_error))]
    ApiError {
        message: String,
        code: Option<String>,
        status: Option<u16>,
    },

    #[error("Internal error: {0}")]
    #[diagnostic(code(canopy::internal))]
    Internal(String),

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(canopy::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(canopy::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: canopy config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(canopy::no_config),
        help(
            "Create one with: canopy config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(canopy::config))]
    Config(Box<ConfigError>),

    // ── Interactive ──────────────────────────────────────────────────
    #[error("'{action}' was not confirmed")]
    #[diagnostic(
        code(canopy::cancelled),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    Cancelled { action: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(Box::new(other)),
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Disconnected => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::DuplicateAssignment { .. }
            | Self::ApiError {
                status: Some(409), ..
            } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::Cancelled { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

fn list_command(entity_type: &str) -> String {
    match entity_type.to_ascii_lowercase().as_str() {
        "row" | "farm" => "rows list".into(),
        "rack" => "racks list".into(),
        "shelf" => "shelves list".into(),
        "assignment" => "devices assigned".into(),
        _ => "topology show".into(),
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::Disconnected => Self::Disconnected,
            CoreError::Validation { message } => Self::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::DuplicateAssignment { entity_id, target } => {
                Self::DuplicateAssignment { entity_id, target }
            }
            CoreError::NotFound {
                entity_type,
                identifier,
            } => Self::NotFound {
                list_command: list_command(&entity_type),
                resource_type: entity_type,
                identifier,
            },
            CoreError::Cancelled { action } => Self::Cancelled { action },
            CoreError::Network {
                message,
                code,
                status,
            } => Self::ApiError {
                message,
                code,
                status,
            },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_assignment_exits_with_conflict() {
        let err = CliError::from(CoreError::DuplicateAssignment {
            entity_id: "light.a".into(),
            target: "shelf \"Shelf 1\"".into(),
        });
        assert_eq!(err.exit_code(), exit_code::CONFLICT);
    }

    #[test]
    fn missing_rack_points_at_rack_listing() {
        let err = CliError::from(CoreError::not_found("Rack", "k9"));
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
        assert!(matches!(
            err,
            CliError::NotFound { ref list_command, .. } if list_command == "racks list"
        ));
    }

    #[test]
    fn declined_prompt_is_a_usage_error() {
        let err = CliError::from(CoreError::Cancelled {
            action: "delete row".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}
