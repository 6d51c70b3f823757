//! Common error types for the Krane lifecycle core.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`KraneError`].
pub type KraneResult<T> = Result<T, KraneError>;

/// Common errors across the Krane crates.
#[derive(Error, Diagnostic, Debug)]
pub enum KraneError {
    /// Container not found.
    #[error("Container not found: {id}")]
    #[diagnostic(code(krane::container::not_found))]
    ContainerNotFound {
        /// The container ID that was not found.
        id: String,
    },

    /// Exec process not found.
    #[error("Exec process not found: {id}")]
    #[diagnostic(code(krane::exec::not_found))]
    ExecNotFound {
        /// The exec process ID that was not found.
        id: String,
    },

    /// Invalid container ID format.
    #[error("Invalid container ID: {id}")]
    #[diagnostic(
        code(krane::container::invalid_id),
        help("Container IDs must be alphanumeric with hyphens and underscores, 1-64 characters")
    )]
    InvalidContainerId {
        /// The invalid container ID.
        id: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(krane::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(krane::serialization))]
    Serialization(String),

    /// Log driver error.
    #[error("Log driver error: {message}")]
    #[diagnostic(code(krane::logger))]
    LogDriver {
        /// The error message.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(krane::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Feature not supported on this platform.
    #[error("Feature not supported: {feature}")]
    #[diagnostic(code(krane::unsupported))]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(krane::internal),
        help("This is a bug, please report it at https://github.com/krane-runtime/krane/issues")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}

impl From<serde_json::Error> for KraneError {
    fn from(err: serde_json::Error) -> Self {
        KraneError::Serialization(err.to_string())
    }
}
