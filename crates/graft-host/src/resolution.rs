//! The host runtime's view of the coordinator.
//!
//! [`Resolution`] is the seam between the in-process runtime and plugin
//! resolution. Production hosts hand the registry a supervised
//! [`CoordClient`]; the coordinator's own process and tests use
//! [`LocalCoordinator`], which answers from an in-process [`CoordService`]
//! without a socket.
//!
//! All answers keep the client's sentinel convention: `None` and empty
//! vectors mean "unavailable or no answer", never a definitive negative.

use std::sync::Arc;

use graft_coord::{CoordClient, CoordService, LifecycleEvent};
use graft_core::{
    ComponentDescriptor, ComponentKind, ComponentName, InstalledPluginInfo, Intent, PackageName,
};
use uuid::Uuid;

/// Plugin resolution as the host runtime consumes it.
pub trait Resolution: Send + Sync {
    /// Makes the resolution path usable, connecting if needed. Returns
    /// whether answers can be trusted to be definitive.
    fn ensure_ready(&self) -> bool;

    /// The install record of `package`.
    fn get_installed_plugin(&self, package: &PackageName) -> Option<InstalledPluginInfo>;

    /// Rewrites a plugin intent into its stub form.
    fn rewrite_intent(&self, kind: ComponentKind, intent: &Intent) -> Option<Intent>;

    /// Resolves `intent` to the best-matching component of `kind`.
    fn resolve_component(&self, kind: ComponentKind, intent: &Intent)
    -> Option<ComponentDescriptor>;

    /// All components of `kind` matching `intent`.
    fn query_components(&self, kind: ComponentKind, intent: &Intent) -> Vec<ComponentDescriptor>;

    /// The plugin component a stub currently carries.
    fn get_stub_target(&self, stub: &ComponentName) -> Option<ComponentName>;

    /// The stub process name for `package`'s declared process.
    fn select_stub_process(&self, package: &PackageName, declared: Option<&str>)
    -> Option<String>;

    /// Reports a lifecycle transition.
    fn notify_event(&self, event: LifecycleEvent);
}

impl Resolution for CoordClient {
    fn ensure_ready(&self) -> bool {
        self.ensure_connected()
    }

    fn get_installed_plugin(&self, package: &PackageName) -> Option<InstalledPluginInfo> {
        Self::get_installed_plugin(self, package)
    }

    fn rewrite_intent(&self, kind: ComponentKind, intent: &Intent) -> Option<Intent> {
        Self::rewrite_intent(self, kind, intent)
    }

    fn resolve_component(
        &self,
        kind: ComponentKind,
        intent: &Intent,
    ) -> Option<ComponentDescriptor> {
        Self::resolve_component(self, kind, intent)
    }

    fn query_components(&self, kind: ComponentKind, intent: &Intent) -> Vec<ComponentDescriptor> {
        Self::query_components(self, kind, intent)
    }

    fn get_stub_target(&self, stub: &ComponentName) -> Option<ComponentName> {
        Self::get_stub_target(self, stub)
    }

    fn select_stub_process(
        &self,
        package: &PackageName,
        declared: Option<&str>,
    ) -> Option<String> {
        Self::select_stub_process(self, package, declared)
    }

    fn notify_event(&self, event: LifecycleEvent) {
        Self::notify_event(self, event);
    }
}

/// Resolution answered by a [`CoordService`] living in this process.
///
/// Used by the coordinator's own process to host plugins, and by tests that
/// need the full resolution path without sockets. Holds a synthetic session
/// so lifecycle records are evicted when the local host goes away.
pub struct LocalCoordinator {
    service: Arc<CoordService>,
    session: Uuid,
}

impl LocalCoordinator {
    /// Attaches a synthetic session for `(pid, process_name)`.
    #[must_use]
    pub fn attach(service: Arc<CoordService>, pid: u32, process_name: impl Into<String>) -> Self {
        let session = Uuid::new_v4();
        service.attach_session(session, pid, process_name);
        Self { service, session }
    }

    /// The backing service.
    #[must_use]
    pub fn service(&self) -> &Arc<CoordService> {
        &self.service
    }

    /// The synthetic session id.
    #[must_use]
    pub fn session(&self) -> Uuid {
        self.session
    }
}

impl Drop for LocalCoordinator {
    fn drop(&mut self) {
        self.service.drop_session(self.session);
    }
}

impl std::fmt::Debug for LocalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCoordinator")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Resolution for LocalCoordinator {
    fn ensure_ready(&self) -> bool {
        true
    }

    fn get_installed_plugin(&self, package: &PackageName) -> Option<InstalledPluginInfo> {
        self.service.installed(package).map(|info| (*info).clone())
    }

    fn rewrite_intent(&self, kind: ComponentKind, intent: &Intent) -> Option<Intent> {
        self.service.rewrite_intent(kind, intent)
    }

    fn resolve_component(
        &self,
        kind: ComponentKind,
        intent: &Intent,
    ) -> Option<ComponentDescriptor> {
        self.service.resolve(kind, intent)
    }

    fn query_components(&self, kind: ComponentKind, intent: &Intent) -> Vec<ComponentDescriptor> {
        self.service.query(kind, intent)
    }

    fn get_stub_target(&self, stub: &ComponentName) -> Option<ComponentName> {
        self.service.stub_target(stub)
    }

    fn select_stub_process(
        &self,
        package: &PackageName,
        declared: Option<&str>,
    ) -> Option<String> {
        self.service.select_stub_process(package, declared)
    }

    fn notify_event(&self, event: LifecycleEvent) {
        self.service.record_event(self.session, &event);
    }
}
