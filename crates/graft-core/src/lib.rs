//! Graft Core - foundation types for the Graft plugin hosting framework.
//!
//! This crate provides:
//! - Validated package and component identities
//! - Plugin package manifests and coordinator install records
//! - Intents with JSON-typed extras and the stub routing keys
//! - Remote service channels with death notification
//! - Process-wide host configuration

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod channel;
pub mod config;
pub mod error;
pub mod intent;
pub mod manifest;
pub mod package;

pub use channel::{ServiceChannel, StubChannel, WatchId};
pub use config::{HostConfig, ProcessTopology};
pub use error::{CoreError, CoreResult};
pub use intent::{Intent, ServiceOp, extras};
pub use manifest::{
    ApplicationDescriptor, ComponentDescriptor, InstalledPluginInfo, MANIFEST_FILE,
    PackageManifest,
};
pub use package::{ComponentKind, ComponentName, PackageName};
