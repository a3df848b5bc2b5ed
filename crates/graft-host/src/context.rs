//! Per-plugin contexts and process identity.
//!
//! An [`AppContext`] is handed to a plugin application when it attaches; it
//! carries the plugin's identity, its resources and an operations handle
//! back into the hosting runtime. A [`PluginContext`] is the cheaper
//! read-only view other callers obtain through
//! [`PluginHost::create_plugin_context`](crate::registry::PluginHost::create_plugin_context).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use graft_core::{ComponentName, Intent, PackageName, ServiceChannel};

use crate::connection::ServiceConnection;
use crate::dispatch::{BindFlags, DispatchCall};
use crate::error::{HostError, HostResult};
use crate::invoker::{InvokeCallback, InvokeOutcome};
use crate::registry::PluginHost;
use crate::resources::ResourceTable;

/// Identity of the hosting process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    /// The host application's own package.
    pub host_package: PackageName,
    /// Name of this OS process as the coordinator knows it.
    pub process_name: String,
    /// OS process id.
    pub pid: u32,
}

impl HostIdentity {
    /// Identity of the calling process.
    #[must_use]
    pub fn current(host_package: PackageName, process_name: impl Into<String>) -> Self {
        Self {
            host_package,
            process_name: process_name.into(),
            pid: std::process::id(),
        }
    }
}

/// Which package identity a caller wants to present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityScope {
    /// The plugin's own package name.
    Plugin,
    /// The identity platform calls must see. This is the host package
    /// unless service-lookup interception substitutes identities at the
    /// platform boundary, in which case the plugin package is safe to
    /// present.
    Platform,
}

/// Read-only view of one loaded plugin.
#[derive(Debug, Clone)]
pub struct PluginContext {
    package: PackageName,
    platform_package: PackageName,
    process_name: String,
    data_dir: PathBuf,
    resources: Arc<ResourceTable>,
}

impl PluginContext {
    pub(crate) fn new(
        package: PackageName,
        platform_package: PackageName,
        process_name: String,
        data_dir: PathBuf,
        resources: Arc<ResourceTable>,
    ) -> Self {
        Self {
            package,
            platform_package,
            process_name,
            data_dir,
            resources,
        }
    }

    /// The package name under `scope`.
    #[must_use]
    pub fn package_name(&self, scope: IdentityScope) -> &PackageName {
        match scope {
            IdentityScope::Plugin => &self.package,
            IdentityScope::Platform => &self.platform_package,
        }
    }

    /// The process this plugin is hosted in.
    #[must_use]
    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    /// The plugin's private data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The plugin's resource table.
    #[must_use]
    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }
}

/// The context a plugin application receives at attach time.
///
/// Besides identity and resources it exposes the component addressing
/// surface, routed through the hosting runtime with the plugin's package as
/// the caller identity. The handle into the runtime is weak; operations on
/// a context that outlived its host fail with [`HostError::LifecycleGone`].
#[derive(Clone)]
pub struct AppContext {
    package: PackageName,
    host: HostIdentity,
    substituted: bool,
    data_dir: PathBuf,
    resources: Arc<ResourceTable>,
    ops: Weak<PluginHost>,
}

impl AppContext {
    pub(crate) fn new(
        package: PackageName,
        host: HostIdentity,
        substituted: bool,
        data_dir: PathBuf,
        resources: Arc<ResourceTable>,
        ops: Weak<PluginHost>,
    ) -> Self {
        Self {
            package,
            host,
            substituted,
            data_dir,
            resources,
            ops,
        }
    }

    /// A context with no hosting runtime behind it, for tests of
    /// application implementations.
    #[must_use]
    pub fn detached(package: PackageName) -> Self {
        let host = HostIdentity::current(package.clone(), package.as_str());
        Self {
            resources: Arc::new(ResourceTable::empty(package.clone())),
            data_dir: std::env::temp_dir(),
            package,
            host,
            substituted: false,
            ops: Weak::new(),
        }
    }

    /// The plugin's own package.
    #[must_use]
    pub fn package(&self) -> &PackageName {
        &self.package
    }

    /// The package this context reports as its base identity. With
    /// host-context substitution enabled the application presents the host
    /// package, so platform calls made with it resolve.
    #[must_use]
    pub fn base_package(&self) -> &PackageName {
        if self.substituted {
            &self.host.host_package
        } else {
            &self.package
        }
    }

    /// The hosting process identity.
    #[must_use]
    pub fn host(&self) -> &HostIdentity {
        &self.host
    }

    /// The plugin's private data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The plugin's resource table.
    #[must_use]
    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    /// Starts a plugin activity.
    ///
    /// # Errors
    ///
    /// Fails when the intent resolves to no installed plugin component or
    /// the hosting runtime is gone.
    pub fn start_activity(&self, intent: &Intent) -> HostResult<()> {
        self.ops()?.start_activity(&self.call(), intent)
    }

    /// Starts a plugin activity expecting a result, tagged `request_code`.
    ///
    /// # Errors
    ///
    /// Fails when the intent resolves to no installed plugin component or
    /// the hosting runtime is gone.
    pub fn start_activity_for_result(&self, intent: &Intent, request_code: u32) -> HostResult<()> {
        self.ops()?
            .start_activity_for_result(&self.call(), intent, request_code)
    }

    /// Starts a plugin service and returns the target component.
    ///
    /// # Errors
    ///
    /// Fails when the intent resolves to no installed plugin component or
    /// the hosting runtime is gone.
    pub fn start_service(&self, intent: &Intent) -> HostResult<ComponentName> {
        self.ops()?.start_service(&self.call(), intent)
    }

    /// Stops a plugin service. Returns the platform's answer.
    ///
    /// # Errors
    ///
    /// Fails when the intent resolves to no installed plugin component or
    /// the hosting runtime is gone.
    pub fn stop_service(&self, intent: &Intent) -> HostResult<bool> {
        self.ops()?.stop_service(&self.call(), intent)
    }

    /// Binds `connection` to a plugin service.
    ///
    /// # Errors
    ///
    /// Fails when the intent resolves to no installed plugin component or
    /// the hosting runtime is gone.
    pub fn bind_service(
        &self,
        intent: &Intent,
        connection: &Arc<dyn ServiceConnection>,
        flags: BindFlags,
    ) -> HostResult<bool> {
        self.ops()?.bind_service(&self.call(), intent, connection, flags)
    }

    /// Releases a binding made through [`AppContext::bind_service`].
    ///
    /// # Errors
    ///
    /// Fails when `connection` has no active binding or the hosting runtime
    /// is gone.
    pub fn unbind_service(&self, connection: &Arc<dyn ServiceConnection>) -> HostResult<()> {
        self.ops()?.unbind_service(&self.call(), connection)
    }

    /// Calls a host-exposed invoker service.
    ///
    /// Unknown services answer with a not-found outcome rather than an
    /// error, matching the registry's sentinel convention.
    #[must_use]
    pub fn invoke_host(
        &self,
        service: &str,
        method: &str,
        params: &str,
        callback: Option<InvokeCallback>,
    ) -> InvokeOutcome {
        match self.ops.upgrade() {
            Some(host) => host.invoke_host(&self.call(), service, method, params, callback),
            None => InvokeOutcome::failed(HostError::LifecycleGone.to_string()),
        }
    }

    /// Looks up a platform service channel by name.
    #[must_use]
    pub fn lookup_service(&self, name: &str) -> Option<ServiceChannel> {
        self.ops
            .upgrade()
            .and_then(|host| host.lookup_service(&self.call(), name))
    }

    fn call(&self) -> DispatchCall {
        DispatchCall::new(self.package.clone())
    }

    fn ops(&self) -> HostResult<Arc<PluginHost>> {
        self.ops.upgrade().ok_or(HostError::LifecycleGone)
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("package", &self.package)
            .field("host", &self.host.host_package)
            .field("substituted", &self.substituted)
            .finish_non_exhaustive()
    }
}
