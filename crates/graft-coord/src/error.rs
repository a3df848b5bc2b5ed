//! Coordinator error types.

use graft_core::{ComponentKind, CoreError, PackageName};
use thiserror::Error;

/// Errors produced by the coordinator service and its client.
#[derive(Debug, Error)]
pub enum CoordError {
    /// The package is not in the install index
    #[error("plugin '{package}' is not installed")]
    NotInstalled {
        /// The missing package
        package: PackageName,
    },

    /// All stub slots for a component kind are taken
    #[error("stub pool exhausted for {kind} components")]
    StubPoolExhausted {
        /// The kind that ran out of slots
        kind: ComponentKind,
    },

    /// The connection to the coordinator failed
    #[error("coordinator transport failed: {message}")]
    Transport {
        /// What went wrong
        message: String,
    },

    /// The handshake with the coordinator failed
    #[error("coordinator handshake failed: {message}")]
    Handshake {
        /// What went wrong
        message: String,
    },

    /// The peer violated the wire protocol
    #[error("protocol violation: {message}")]
    Protocol {
        /// What went wrong
        message: String,
    },

    /// I/O error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Foundation type error
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result alias for coordinator operations.
pub type CoordResult<T> = Result<T, CoordError>;
