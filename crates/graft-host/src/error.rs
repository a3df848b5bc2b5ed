//! Hosting runtime error types.

use graft_core::{CoreError, PackageName};
use thiserror::Error;

/// Errors produced by the in-process hosting runtime.
#[derive(Debug, Error)]
pub enum HostError {
    /// The package has no install record at the coordinator
    #[error("plugin '{package}' is not installed")]
    PluginNotInstalled {
        /// The missing package
        package: PackageName,
    },

    /// An intent or lookup addressed no known plugin component
    #[error("no plugin component matches {request}")]
    PluginComponentNotFound {
        /// Description of the request that failed to resolve
        request: String,
    },

    /// The plugin's code bundle or application failed to initialize
    #[error("plugin '{package}' failed to initialize: {message}")]
    InitError {
        /// The plugin being loaded
        package: PackageName,
        /// What went wrong
        message: String,
    },

    /// The coordinator is unreachable and the operation needs it
    #[error("coordinator is unreachable")]
    RemoteUnavailable,

    /// A live component instance was registered twice
    #[error("component instance for '{component}' is already registered")]
    DuplicateComponentRegistration {
        /// The component whose instance was re-registered
        component: String,
    },

    /// A component tag resolved to nothing, or to the wrong kind
    #[error("no component class for tag '{tag}'")]
    ComponentClassNotFound {
        /// The tag that failed to resolve
        tag: String,
    },

    /// The hosting runtime was attached twice in one process
    #[error("plugin host is already attached in this process")]
    AlreadyAttached,

    /// The lifecycle executor (or the host owning it) is gone
    #[error("lifecycle executor is not available")]
    LifecycleGone,

    /// Foundation type error
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result alias for hosting runtime operations.
pub type HostResult<T> = Result<T, HostError>;
