//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A route template placeholder had no matching argument
    #[error("Route {template} is missing argument {name}")]
    MissingRouteArg {
        template: &'static str,
        name: String,
    },

    /// A shard identity environment variable was missing or malformed
    #[error("Invalid shard environment variable {var}: {reason}")]
    InvalidShardEnv { var: &'static str, reason: String },

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for domain operations.
pub type CoreResult<T> = Result<T, CoreError>;
