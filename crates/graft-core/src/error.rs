//! Error types shared by the Graft foundation crates.

use thiserror::Error;

/// Errors produced by the foundation types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Package name failed validation
    #[error("invalid package name '{name}': {reason}")]
    InvalidPackageName {
        /// The rejected name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Component name failed validation
    #[error("invalid component name '{name}': {reason}")]
    InvalidComponentName {
        /// The rejected name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// A plugin manifest could not be parsed
    #[error("failed to parse manifest at {path}: {message}")]
    ManifestParse {
        /// Manifest location (file path, or a placeholder for in-memory text)
        path: String,
        /// Parser diagnostic
        message: String,
    },

    /// Host configuration text could not be parsed
    #[error("failed to parse host configuration: {message}")]
    ConfigParse {
        /// Parser diagnostic
        message: String,
    },

    /// Host configuration was installed twice in one process
    #[error("host configuration is already set for this process")]
    ConfigAlreadySet,

    /// Operation attempted on a dead service channel
    #[error("service channel is dead")]
    ChannelDead,

    /// An intent extra could not be encoded
    #[error("failed to encode intent extra '{key}': {message}")]
    ExtraEncode {
        /// Extra key
        key: String,
        /// Encoder diagnostic
        message: String,
    },

    /// I/O error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for foundation operations.
pub type CoreResult<T> = Result<T, CoreError>;
