//! Error types for the sandbox module.
//!
//! These are construction-time errors only. Anything that goes wrong while
//! code runs is reported inside the result string, never through this type.

/// Errors produced while building an executor or loading its configuration.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("invalid tool set: {0}")]
    InvalidTools(String),

    #[error("invalid executor configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid initial bindings: {0}")]
    InvalidBindings(String),
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
