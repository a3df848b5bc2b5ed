//! Process-global attachment of the hosting runtime.
//!
//! A process attaches at most one [`PluginHost`]; [`PluginHost::attach`]
//! builds it from an [`AttachConfig`], installs the process configuration,
//! wraps the dispatch seam with interception and publishes the host for
//! [`PluginHost::current`]. Embedders that need several hosts in one
//! process (tests, mostly) use [`PluginHost::new`] directly and skip the
//! global.

use std::sync::{Arc, OnceLock};

use graft_core::{HostConfig, PackageName};
use tracing::{info, warn};

use crate::dispatch::{ComponentDispatcher, ServiceLookup};
use crate::error::{HostError, HostResult};
use crate::invoker::InvokerFactories;
use crate::loader::{BundleExports, CodeSource, ComponentLoader, StaticCodeSource};
use crate::registry::PluginHost;
use crate::resolution::Resolution;

static HOST: OnceLock<Arc<PluginHost>> = OnceLock::new();

/// Everything a hosting process provides at attach time.
///
/// The required pieces name the process and wire it to the coordinator and
/// the platform's dispatch surface; the rest defaults to an empty in-process
/// setup and is filled in with the `with_*` builders.
pub struct AttachConfig {
    pub(crate) host_package: PackageName,
    pub(crate) process_name: String,
    pub(crate) config: HostConfig,
    pub(crate) resolution: Arc<dyn Resolution>,
    pub(crate) code_source: Arc<dyn CodeSource>,
    pub(crate) host_exports: BundleExports,
    pub(crate) platform_loader: Option<Arc<dyn ComponentLoader>>,
    pub(crate) dispatcher: Arc<dyn ComponentDispatcher>,
    pub(crate) service_lookup: Option<Arc<dyn ServiceLookup>>,
    pub(crate) invoker_factories: InvokerFactories,
}

impl AttachConfig {
    /// A configuration with the required pieces and empty defaults for the
    /// rest.
    #[must_use]
    pub fn new(
        host_package: PackageName,
        process_name: impl Into<String>,
        resolution: Arc<dyn Resolution>,
        dispatcher: Arc<dyn ComponentDispatcher>,
    ) -> Self {
        Self {
            host_package,
            process_name: process_name.into(),
            config: HostConfig::default(),
            resolution,
            code_source: Arc::new(StaticCodeSource::new()),
            host_exports: BundleExports::new(),
            platform_loader: None,
            dispatcher,
            service_lookup: None,
            invoker_factories: InvokerFactories::new(),
        }
    }

    /// Replaces the framework configuration.
    #[must_use]
    pub fn with_config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the code source plugin bundles are opened through.
    #[must_use]
    pub fn with_code_source(mut self, code_source: Arc<dyn CodeSource>) -> Self {
        self.code_source = code_source;
        self
    }

    /// Sets the host application's own component exports. Plugins resolve
    /// against these after their own bundle misses.
    #[must_use]
    pub fn with_host_exports(mut self, exports: BundleExports) -> Self {
        self.host_exports = exports;
        self
    }

    /// Sets the platform loader the host loader delegates to.
    #[must_use]
    pub fn with_platform_loader(mut self, loader: Arc<dyn ComponentLoader>) -> Self {
        self.platform_loader = Some(loader);
        self
    }

    /// Sets the platform's service lookup, enabling lookup interception
    /// when the configuration asks for it.
    #[must_use]
    pub fn with_service_lookup(mut self, lookup: Arc<dyn ServiceLookup>) -> Self {
        self.service_lookup = Some(lookup);
        self
    }

    /// Sets the invoker factories the configuration's invoker table is
    /// resolved against.
    #[must_use]
    pub fn with_invoker_factories(mut self, factories: InvokerFactories) -> Self {
        self.invoker_factories = factories;
        self
    }
}

impl std::fmt::Debug for AttachConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachConfig")
            .field("host_package", &self.host_package)
            .field("process_name", &self.process_name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PluginHost {
    /// Attaches the hosting runtime to this process.
    ///
    /// Installs the process-wide configuration, builds the host, wraps the
    /// dispatch seam with interception and publishes the host for
    /// [`PluginHost::current`]. A coordinator that is unreachable at this
    /// point degrades the host rather than failing the attach; loads will
    /// answer [`HostError::RemoteUnavailable`] until it comes back.
    ///
    /// # Errors
    ///
    /// Fails with [`HostError::AlreadyAttached`] on a second attach in the
    /// same process, or when the lifecycle thread cannot be spawned.
    pub fn attach(config: AttachConfig) -> HostResult<Arc<PluginHost>> {
        if HOST.get().is_some() {
            return Err(HostError::AlreadyAttached);
        }
        if graft_core::config::init(config.config.clone()).is_err() {
            warn!("Process configuration was already installed, keeping the existing one");
        }
        if !config.resolution.ensure_ready() {
            warn!("Coordinator is unreachable at attach, starting degraded");
        }
        let host = PluginHost::new(config)?;
        host.install_interception();
        HOST.set(Arc::clone(&host))
            .map_err(|_| HostError::AlreadyAttached)?;
        info!(
            package = %host.identity().host_package,
            process = %host.identity().process_name,
            pid = host.identity().pid,
            "Plugin host attached"
        );
        Ok(host)
    }

    /// The host attached to this process, if any.
    #[must_use]
    pub fn current() -> Option<Arc<PluginHost>> {
        HOST.get().map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionShadow;
    use crate::dispatch::{BindFlags, DispatchCall, IntentSender, IntentSenderRequest};
    use crate::resolution::LocalCoordinator;
    use graft_coord::CoordService;
    use graft_core::{ComponentName, Intent, ProcessTopology};

    struct NullDispatcher;

    impl ComponentDispatcher for NullDispatcher {
        fn start_activity(&self, _call: &DispatchCall, _intent: Intent) {}

        fn start_service(&self, _call: &DispatchCall, _intent: Intent) -> Option<ComponentName> {
            None
        }

        fn stop_service(&self, _call: &DispatchCall, _intent: Intent) -> bool {
            false
        }

        fn stop_service_token(
            &self,
            _call: &DispatchCall,
            _component: ComponentName,
            _token: u64,
        ) -> bool {
            false
        }

        fn bind_service(
            &self,
            _call: &DispatchCall,
            _intent: Intent,
            _connection: Arc<ConnectionShadow>,
            _flags: BindFlags,
        ) -> bool {
            false
        }

        fn unbind_service(
            &self,
            _call: &DispatchCall,
            _connection: &Arc<ConnectionShadow>,
        ) -> bool {
            false
        }

        fn get_intent_sender(
            &self,
            _call: &DispatchCall,
            _request: IntentSenderRequest,
        ) -> Option<IntentSender> {
            None
        }
    }

    fn config() -> AttachConfig {
        let service = Arc::new(CoordService::new(
            PackageName::from_static("com.example.host"),
            ProcessTopology::Standalone,
        ));
        let resolution: Arc<dyn Resolution> =
            Arc::new(LocalCoordinator::attach(service, 11, "com.example.host"));
        AttachConfig::new(
            PackageName::from_static("com.example.host"),
            "com.example.host",
            resolution,
            Arc::new(NullDispatcher),
        )
    }

    // The only test that touches the process-global attach state.
    #[test]
    fn attach_once_then_already_attached() {
        let host = PluginHost::attach(config()).unwrap();

        let current = PluginHost::current().unwrap();
        assert!(Arc::ptr_eq(&current, &host));
        assert_eq!(
            host.identity().host_package,
            PackageName::from_static("com.example.host")
        );

        let err = PluginHost::attach(config()).unwrap_err();
        assert!(matches!(err, HostError::AlreadyAttached));
    }
}
