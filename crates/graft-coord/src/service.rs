//! The coordinator service.
//!
//! [`CoordService`] is the transport-free core of the coordinator process:
//! install index, stub allocation, and running bookkeeping behind one
//! facade. The socket server calls [`CoordService::handle`] per request;
//! unit tests call the typed methods directly.

use graft_core::{
    ComponentDescriptor, ComponentKind, ComponentName, InstalledPluginInfo, Intent,
    PackageManifest, PackageName, ProcessTopology,
};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::CoordResult;
use crate::index::InstallIndex;
use crate::proto::{CoordRequest, CoordResponse, LifecycleEvent};
use crate::running::RunningRegistry;
use crate::stubs::StubPool;

/// Install, resolution and bookkeeping state of one coordinator.
pub struct CoordService {
    index: InstallIndex,
    stubs: StubPool,
    running: RunningRegistry,
}

impl CoordService {
    /// A service for `host_package` with default stub capacity.
    #[must_use]
    pub fn new(host_package: PackageName, topology: ProcessTopology) -> Self {
        Self {
            index: InstallIndex::new(),
            stubs: StubPool::new(host_package, topology),
            running: RunningRegistry::new(),
        }
    }

    /// A service with an explicit stub pool (tests, custom host layouts).
    #[must_use]
    pub fn with_stub_pool(stubs: StubPool) -> Self {
        Self {
            index: InstallIndex::new(),
            stubs,
            running: RunningRegistry::new(),
        }
    }

    /// Install the bundle rooted at `bundle_path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the bundle manifest cannot be read or parsed.
    pub fn install(&self, bundle_path: &Path) -> CoordResult<Arc<InstalledPluginInfo>> {
        self.index.install(bundle_path)
    }

    /// Uninstall `package`, releasing its stub assignments and running
    /// records.
    pub fn uninstall(&self, package: &PackageName) -> Option<Arc<InstalledPluginInfo>> {
        let removed = self.index.uninstall(package);
        if removed.is_some() {
            self.stubs.release_package(package);
            self.running.release_package(package);
        }
        removed
    }

    /// The install record of `package`, if installed.
    #[must_use]
    pub fn installed(&self, package: &PackageName) -> Option<Arc<InstalledPluginInfo>> {
        self.index.get(package)
    }

    /// All install records, ordered by package name.
    #[must_use]
    pub fn all_installed(&self) -> Vec<Arc<InstalledPluginInfo>> {
        self.index.all()
    }

    /// Resolve `intent` to the best-matching component of `kind`.
    #[must_use]
    pub fn resolve(&self, kind: ComponentKind, intent: &Intent) -> Option<ComponentDescriptor> {
        self.index.resolve(kind, intent)
    }

    /// All components of `kind` matching `intent`.
    #[must_use]
    pub fn query(&self, kind: ComponentKind, intent: &Intent) -> Vec<ComponentDescriptor> {
        self.index.query(kind, intent)
    }

    /// The descriptor of one declared component.
    #[must_use]
    pub fn descriptor_of(
        &self,
        kind: ComponentKind,
        component: &ComponentName,
    ) -> Option<ComponentDescriptor> {
        self.index
            .get(component.package())
            .and_then(|info| info.manifest.component_named(component, kind).cloned())
    }

    /// The parsed manifest of `package`, if installed.
    #[must_use]
    pub fn manifest_of(&self, package: &PackageName) -> Option<PackageManifest> {
        self.index.get(package).map(|info| info.manifest.clone())
    }

    /// Rewrite a plugin intent into its stub form.
    ///
    /// Resolution picks the target, the stub pool picks a stable stub, and
    /// the rewritten intent carries the target descriptor, the stub
    /// descriptor and the original intent in its extras. Returns `None`
    /// when the intent does not resolve to an installed plugin component or
    /// the pool is exhausted.
    #[must_use]
    pub fn rewrite_intent(&self, kind: ComponentKind, intent: &Intent) -> Option<Intent> {
        let target = self.resolve(kind, intent)?;
        let default_process = target.name.package().as_str().to_string();
        let stub = match self.stubs.assign(&target, &default_process) {
            Ok(stub) => stub,
            Err(e) => {
                warn!(error = %e, kind = %kind, "Intent rewrite failed");
                return None;
            }
        };
        let mut rewritten = Intent::to(stub.name.clone());
        let encoded = rewritten
            .set_target_descriptor(&target)
            .and_then(|()| rewritten.set_stub_descriptor(&stub))
            .and_then(|()| rewritten.set_origin_intent(intent));
        if let Err(e) = encoded {
            warn!(error = %e, "Failed to encode stub intent extras");
            return None;
        }
        Some(rewritten)
    }

    /// The target component a stub was assigned to.
    #[must_use]
    pub fn stub_target(&self, stub: &ComponentName) -> Option<ComponentName> {
        self.stubs.target_of(stub).map(|d| d.name)
    }

    /// The stub process for `package`'s declared process.
    ///
    /// `declared` uses manifest syntax (`None` or `:suffix` or a full
    /// name). Returns `None` when the package is not installed.
    #[must_use]
    pub fn select_stub_process(
        &self,
        package: &PackageName,
        declared: Option<&str>,
    ) -> Option<String> {
        let info = self.index.get(package)?;
        let default = info.manifest.default_process();
        let effective = match declared {
            None | Some("") => default.to_string(),
            Some(p) if p.starts_with(':') => format!("{default}{p}"),
            Some(p) => p.to_string(),
        };
        Some(self.stubs.select_process(package, &effective))
    }

    /// Register a connected hosting process.
    pub fn attach_session(&self, session: Uuid, pid: u32, process_name: impl Into<String>) {
        self.running.attach_session(session, pid, process_name);
    }

    /// Drop a disconnected session and its running records.
    pub fn drop_session(&self, session: Uuid) {
        self.running.drop_session(session);
    }

    /// Apply a lifecycle event reported by `session`.
    pub fn record_event(&self, session: Uuid, event: &LifecycleEvent) {
        self.running.record(session, event);
    }

    /// Packages currently running, sorted.
    #[must_use]
    pub fn running_packages(&self) -> Vec<PackageName> {
        self.running.running_packages()
    }

    /// Whether `package` is currently running.
    #[must_use]
    pub fn is_running(&self, package: &PackageName) -> bool {
        self.running.is_running(package)
    }

    /// The process name reported by the session attached with `pid`.
    #[must_use]
    pub fn plugin_process_name(&self, pid: u32) -> Option<String> {
        self.running.process_name_of(pid)
    }

    /// Dispatch one wire request from `session`.
    ///
    /// [`CoordRequest::Hello`] is handled by the connection layer before
    /// this point; receiving it here is a protocol error.
    #[must_use]
    pub fn handle(&self, session: Uuid, request: CoordRequest) -> CoordResponse {
        match request {
            CoordRequest::Hello { .. } => CoordResponse::Error {
                message: "unexpected hello on established session".to_string(),
            },
            CoordRequest::Install { bundle_path } => match self.install(&bundle_path) {
                Ok(info) => CoordResponse::Installed {
                    info: Box::new((*info).clone()),
                },
                Err(e) => CoordResponse::Error {
                    message: e.to_string(),
                },
            },
            CoordRequest::Uninstall { package } => CoordResponse::Bool {
                value: self.uninstall(&package).is_some(),
            },
            CoordRequest::GetInstalledPlugin { package } => CoordResponse::MaybePlugin {
                info: self
                    .installed(&package)
                    .map(|info| Box::new((*info).clone())),
            },
            CoordRequest::GetAllInstalledPlugins => CoordResponse::Plugins {
                infos: self
                    .all_installed()
                    .iter()
                    .map(|info| (**info).clone())
                    .collect(),
            },
            CoordRequest::RewriteIntent { kind, intent } => CoordResponse::MaybeIntent {
                intent: self.rewrite_intent(kind, &intent),
            },
            CoordRequest::ResolveComponent { kind, intent } => CoordResponse::MaybeDescriptor {
                descriptor: self.resolve(kind, &intent),
            },
            CoordRequest::QueryComponents { kind, intent } => CoordResponse::Descriptors {
                descriptors: self.query(kind, &intent),
            },
            CoordRequest::GetComponentDescriptor { kind, component } => {
                CoordResponse::MaybeDescriptor {
                    descriptor: self.descriptor_of(kind, &component),
                }
            }
            CoordRequest::GetPackageManifest { package } => CoordResponse::MaybeManifest {
                manifest: self.manifest_of(&package).map(Box::new),
            },
            CoordRequest::GetStubTarget { stub } => CoordResponse::MaybeComponent {
                component: self.stub_target(&stub),
            },
            CoordRequest::SelectStubProcess { package, process } => CoordResponse::MaybeString {
                value: self.select_stub_process(&package, process.as_deref()),
            },
            CoordRequest::GetPluginProcessName { pid } => CoordResponse::MaybeString {
                value: self.plugin_process_name(pid),
            },
            CoordRequest::GetAllRunningPlugins => CoordResponse::Packages {
                packages: self.running_packages(),
            },
            CoordRequest::IsPluginRunning { package } => CoordResponse::Bool {
                value: self.is_running(&package),
            },
            CoordRequest::ComponentEvent { event } => {
                self.record_event(session, &event);
                CoordResponse::Ack
            }
        }
    }
}

impl std::fmt::Debug for CoordService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordService")
            .field("index", &self.index)
            .field("stubs", &self.stubs)
            .finish()
    }
}
