//! Wire protocol between hosting processes and the coordinator.
//!
//! Frames are a 4-byte big-endian length prefix followed by a JSON-encoded
//! [`Envelope`]. The first request on a connection must be
//! [`CoordRequest::Hello`]; the coordinator answers with
//! [`CoordResponse::Welcome`] and a session id. Every subsequent request is
//! answered with exactly one response carrying the same envelope id.

use graft_core::{
    ComponentDescriptor, ComponentKind, ComponentName, InstalledPluginInfo, Intent,
    PackageManifest, PackageName,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Upper bound on a single frame's payload, in bytes.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// A correlated wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Correlation id, chosen by the requester and echoed in the response.
    pub id: u64,
    /// The message payload.
    pub body: T,
}

/// Requests a hosting process can send to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CoordRequest {
    /// Connection handshake. Must be the first request on a connection.
    Hello {
        /// OS process id of the connecting process.
        pid: u32,
        /// Process name the connecting process reports for itself.
        process_name: String,
    },
    /// Install (or replace) the plugin bundle rooted at `bundle_path`.
    Install {
        /// Bundle root directory containing `graft.toml`.
        bundle_path: PathBuf,
    },
    /// Remove a package from the install index.
    Uninstall {
        /// Package to remove.
        package: PackageName,
    },
    /// Fetch the install record of one package.
    GetInstalledPlugin {
        /// Package to look up.
        package: PackageName,
    },
    /// Fetch all install records.
    GetAllInstalledPlugins,
    /// Rewrite a plugin intent into its stub form.
    RewriteIntent {
        /// Kind of component the intent addresses.
        kind: ComponentKind,
        /// The plugin intent.
        intent: Intent,
    },
    /// Resolve an intent to the best-matching component descriptor.
    ResolveComponent {
        /// Kind of component to resolve.
        kind: ComponentKind,
        /// The intent to resolve.
        intent: Intent,
    },
    /// List all components matching an intent.
    QueryComponents {
        /// Kind of component to query.
        kind: ComponentKind,
        /// The intent to match.
        intent: Intent,
    },
    /// Fetch the descriptor of one declared component.
    GetComponentDescriptor {
        /// Kind the component must have.
        kind: ComponentKind,
        /// Fully-qualified component name.
        component: ComponentName,
    },
    /// Fetch the parsed manifest of one package.
    GetPackageManifest {
        /// Package to look up.
        package: PackageName,
    },
    /// Map a stub component back to the target it was assigned to.
    GetStubTarget {
        /// The stub component.
        stub: ComponentName,
    },
    /// Select the stub process hosting a package's declared process.
    SelectStubProcess {
        /// Owning package.
        package: PackageName,
        /// Declared process (manifest syntax), or `None` for the default.
        process: Option<String>,
    },
    /// Name of the plugin process attached with `pid`, if any.
    GetPluginProcessName {
        /// OS process id.
        pid: u32,
    },
    /// Packages with running components or attached applications.
    GetAllRunningPlugins,
    /// Whether one package is currently running.
    IsPluginRunning {
        /// Package to check.
        package: PackageName,
    },
    /// Report a component lifecycle transition.
    ComponentEvent {
        /// The transition.
        event: LifecycleEvent,
    },
}

/// Component lifecycle transitions reported by hosting processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A plugin application finished attaching in some process.
    ApplicationAttached {
        /// The plugin package.
        package: PackageName,
        /// Process the application attached in.
        process_name: String,
    },
    /// An activity instance was created.
    ActivityCreated {
        /// Stub component carrying the instance.
        stub: ComponentName,
        /// Real plugin component.
        target: ComponentName,
    },
    /// An activity instance was destroyed.
    ActivityDestroyed {
        /// Stub component that carried the instance.
        stub: ComponentName,
        /// Real plugin component.
        target: ComponentName,
    },
    /// A service instance was created.
    ServiceCreated {
        /// Stub component carrying the instance.
        stub: ComponentName,
        /// Real plugin component.
        target: ComponentName,
    },
    /// A service instance was destroyed.
    ServiceDestroyed {
        /// Stub component that carried the instance.
        stub: ComponentName,
        /// Real plugin component.
        target: ComponentName,
    },
    /// A provider instance was created. Providers live until their process
    /// exits, so there is no destroy transition.
    ProviderCreated {
        /// Stub component carrying the instance.
        stub: ComponentName,
        /// Real plugin component.
        target: ComponentName,
    },
}

/// Responses from the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CoordResponse {
    /// Handshake accepted.
    Welcome {
        /// Session id assigned to this connection.
        session: Uuid,
    },
    /// Install succeeded.
    Installed {
        /// The new install record.
        info: Box<InstalledPluginInfo>,
    },
    /// An optional install record.
    MaybePlugin {
        /// The record, if the package is installed.
        info: Option<Box<InstalledPluginInfo>>,
    },
    /// A list of install records.
    Plugins {
        /// All install records.
        infos: Vec<InstalledPluginInfo>,
    },
    /// An optional rewritten intent.
    MaybeIntent {
        /// The stub intent, if the input resolved to a plugin component.
        intent: Option<Intent>,
    },
    /// An optional component descriptor.
    MaybeDescriptor {
        /// The descriptor, if resolution succeeded.
        descriptor: Option<ComponentDescriptor>,
    },
    /// A list of component descriptors.
    Descriptors {
        /// All matching descriptors.
        descriptors: Vec<ComponentDescriptor>,
    },
    /// An optional component name.
    MaybeComponent {
        /// The component, if the lookup succeeded.
        component: Option<ComponentName>,
    },
    /// An optional package manifest.
    MaybeManifest {
        /// The manifest, if the package is installed.
        manifest: Option<Box<PackageManifest>>,
    },
    /// An optional string value.
    MaybeString {
        /// The value, if the lookup succeeded.
        value: Option<String>,
    },
    /// A list of package names.
    Packages {
        /// The packages.
        packages: Vec<PackageName>,
    },
    /// A boolean answer.
    Bool {
        /// The answer.
        value: bool,
    },
    /// Fire-and-acknowledge requests completed.
    Ack,
    /// The request failed on the coordinator side.
    Error {
        /// Failure description.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_core::PackageName;

    /// Helper: serialize to JSON and back, asserting round-trip equality.
    fn round_trip<T>(value: &T)
    where
        T: Serialize + for<'de> Deserialize<'de> + PartialEq + std::fmt::Debug,
    {
        let json = serde_json::to_string(value).expect("serialize");
        let back: T = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(*value, back);
    }

    fn component(name: &str) -> ComponentName {
        ComponentName::new(PackageName::from_static("com.example.notes"), name).unwrap()
    }

    #[test]
    fn requests_round_trip() {
        round_trip(&Envelope {
            id: 1,
            body: CoordRequest::Hello {
                pid: 4242,
                process_name: "com.example.host".to_string(),
            },
        });
        round_trip(&CoordRequest::Install {
            bundle_path: PathBuf::from("/bundles/notes"),
        });
        round_trip(&CoordRequest::RewriteIntent {
            kind: ComponentKind::Service,
            intent: Intent::to(component("SyncService")),
        });
        round_trip(&CoordRequest::SelectStubProcess {
            package: PackageName::from_static("com.example.notes"),
            process: Some(":sync".to_string()),
        });
    }

    #[test]
    fn lifecycle_events_round_trip() {
        round_trip(&CoordRequest::ComponentEvent {
            event: LifecycleEvent::ServiceCreated {
                stub: component("StubServiceP0S0"),
                target: component("SyncService"),
            },
        });
        round_trip(&LifecycleEvent::ApplicationAttached {
            package: PackageName::from_static("com.example.notes"),
            process_name: "com.example.notes".to_string(),
        });
    }

    #[test]
    fn responses_round_trip() {
        round_trip(&Envelope {
            id: 7,
            body: CoordResponse::Welcome {
                session: Uuid::new_v4(),
            },
        });
        round_trip(&CoordResponse::MaybeIntent { intent: None });
        round_trip(&CoordResponse::Bool { value: true });
        round_trip(&CoordResponse::Error {
            message: "no such package".to_string(),
        });
    }

    #[test]
    fn tagged_encoding_is_stable() {
        let json = serde_json::to_string(&CoordRequest::GetAllRunningPlugins).unwrap();
        assert_eq!(json, "{\"op\":\"get_all_running_plugins\"}");
        let json = serde_json::to_string(&CoordResponse::Ack).unwrap();
        assert_eq!(json, "{\"result\":\"ack\"}");
    }
}
