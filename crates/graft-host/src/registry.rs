//! The hosting runtime: plugin load, lifecycle calls and addressing.
//!
//! A [`PluginHost`] owns everything one OS process needs to run plugin
//! code: the loaded [`PluginRuntime`]s, the lifecycle thread, the dispatch
//! and lookup slots, the invoker registry, the connection shadow table and
//! the running-instance tables. Loading is keyed by package and reaches the
//! coordinator through the host's [`Resolution`]; a runtime is visible in
//! the map from the moment its install record is accepted, so re-entrant
//! loads during initialization observe the `Loading` state instead of
//! deadlocking on the load lock.
//!
//! Lifecycle callbacks always execute on the dedicated lifecycle thread.
//! The `call_*` methods marshal there and keep the running tables and the
//! coordinator's running registry in step with what actually executed.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use dashmap::DashMap;
use graft_core::{
    ComponentDescriptor, ComponentKind, ComponentName, HostConfig, InstalledPluginInfo, Intent,
    PackageManifest, PackageName, ProcessTopology, ServiceChannel, ServiceOp, extras,
};
use graft_coord::LifecycleEvent;
use tracing::{debug, error, info, warn};

use crate::attach::AttachConfig;
use crate::component::{
    Activity, ActivityCell, Application, ApplicationCell, DefaultApplication, Provider,
    ProviderCell, ReceiverCell, Service, ServiceCell, application_cell,
};
use crate::connection::{ConnectionTable, ServiceConnection};
use crate::context::{AppContext, HostIdentity, PluginContext};
use crate::dispatch::{
    BindFlags, DispatchCall, DispatcherSlot, IntentSender, IntentSenderRequest, LookupSlot,
};
use crate::error::{HostError, HostResult};
use crate::invoker::{InvokeCallback, InvokeContext, InvokeOutcome, InvokerRegistry};
use crate::lifecycle::LifecycleExecutor;
use crate::loader::{
    BundleLoader, CodeSource, ComponentExport, ComponentLoader, StaticLoader,
    instantiate_application, instantiate_provider, instantiate_receiver,
};
use crate::resolution::Resolution;
use crate::resources::ResourceTable;
use crate::running::{ApplicationRecord, ComponentRecord, RunningTable};

/// Load state of one plugin in this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginState {
    /// The install record is accepted and initialization is in flight.
    Loading,
    /// The application attached and load-time components are registered.
    Ready,
    /// Initialization failed. The message is pinned; later loads of the
    /// same package answer with it instead of retrying.
    Failed(String),
}

/// One plugin loaded into this process.
pub struct PluginRuntime {
    installed: InstalledPluginInfo,
    loader: Arc<BundleLoader>,
    resources: Arc<ResourceTable>,
    process_name: String,
    state: RwLock<PluginState>,
    application: OnceLock<ApplicationCell>,
    // Load-time instances stay alive as long as the runtime does; the
    // running tables only hold them weakly.
    providers: Mutex<Vec<(ComponentDescriptor, ProviderCell)>>,
    receivers: Mutex<Vec<(ComponentDescriptor, ReceiverCell)>>,
}

impl PluginRuntime {
    /// The plugin's package.
    #[must_use]
    pub fn package(&self) -> &PackageName {
        &self.installed.package
    }

    /// The coordinator's install record.
    #[must_use]
    pub fn installed(&self) -> &InstalledPluginInfo {
        &self.installed
    }

    /// The plugin's parsed manifest.
    #[must_use]
    pub fn manifest(&self) -> &PackageManifest {
        &self.installed.manifest
    }

    /// The plugin's component loader.
    #[must_use]
    pub fn loader(&self) -> &Arc<BundleLoader> {
        &self.loader
    }

    /// The plugin's resource table.
    #[must_use]
    pub fn resources(&self) -> &Arc<ResourceTable> {
        &self.resources
    }

    /// The process name this runtime serves.
    #[must_use]
    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    /// Current load state.
    #[must_use]
    pub fn state(&self) -> PluginState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The attached application instance, once initialization reached it.
    #[must_use]
    pub fn application(&self) -> Option<&ApplicationCell> {
        self.application.get()
    }

    fn set_state(&self, state: PluginState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn matching_receivers(&self, intent: &Intent) -> Vec<ReceiverCell> {
        let receivers = self.receivers.lock().unwrap_or_else(PoisonError::into_inner);
        receivers
            .iter()
            .filter(|(descriptor, _)| receiver_matches(descriptor, intent))
            .map(|(_, cell)| Arc::clone(cell))
            .collect()
    }
}

impl fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("package", &self.installed.package)
            .field("version", &self.installed.version)
            .field("process_name", &self.process_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Snapshot of one loaded plugin, for diagnostics.
#[derive(Debug, Clone)]
pub struct PluginDump {
    /// The plugin's package.
    pub package: PackageName,
    /// Declared version string.
    pub version: String,
    /// Load state at snapshot time.
    pub state: PluginState,
    /// Process name the runtime serves.
    pub process_name: String,
}

/// Snapshot of a hosting process, for diagnostics.
#[derive(Debug, Clone)]
pub struct HostDump {
    /// The host application's package.
    pub host_package: PackageName,
    /// This process's name.
    pub process_name: String,
    /// This process's id.
    pub pid: u32,
    /// Loaded plugins.
    pub plugins: Vec<PluginDump>,
    /// Attached applications, as `package in process` strings.
    pub attached_applications: Vec<String>,
    /// Flattened names of live activity targets.
    pub running_activities: Vec<String>,
    /// Flattened names of live service targets.
    pub running_services: Vec<String>,
    /// Flattened names of live provider targets.
    pub running_providers: Vec<String>,
    /// Live service-connection shadows.
    pub connections: usize,
}

/// The per-process plugin hosting runtime.
pub struct PluginHost {
    identity: HostIdentity,
    config: HostConfig,
    resolution: Arc<dyn Resolution>,
    code_source: Arc<dyn CodeSource>,
    host_loader: Arc<dyn ComponentLoader>,
    plugins: DashMap<PackageName, Arc<PluginRuntime>>,
    load_lock: Mutex<()>,
    lifecycle: LifecycleExecutor,
    dispatcher: DispatcherSlot,
    lookup: Option<LookupSlot>,
    invokers: InvokerRegistry,
    connections: ConnectionTable,
    applications: RunningTable<Mutex<dyn Application>, ApplicationRecord>,
    activities: RunningTable<Mutex<dyn Activity>, ComponentRecord>,
    services: RunningTable<Mutex<dyn Service>, ComponentRecord>,
    providers: RunningTable<Mutex<dyn Provider>, ComponentRecord>,
}

impl PluginHost {
    /// Builds a host from `attach` without installing it process-globally.
    /// [`PluginHost::attach`](crate::attach) is the usual entry; this one
    /// exists so embedders and tests can run several hosts side by side.
    ///
    /// # Errors
    ///
    /// Fails when the lifecycle thread cannot be spawned.
    pub fn new(attach: AttachConfig) -> HostResult<Arc<Self>> {
        let AttachConfig {
            host_package,
            process_name,
            config,
            resolution,
            code_source,
            host_exports,
            platform_loader,
            dispatcher,
            service_lookup,
            invoker_factories,
        } = attach;
        let host_loader: Arc<dyn ComponentLoader> = match platform_loader {
            Some(platform) => Arc::new(StaticLoader::with_parent(
                host_package.as_str(),
                host_exports,
                platform,
            )),
            None => Arc::new(StaticLoader::new(host_package.as_str(), host_exports)),
        };
        let invokers = InvokerRegistry::new(config.invokers.clone(), invoker_factories);
        Ok(Arc::new(Self {
            identity: HostIdentity::current(host_package, process_name),
            config,
            resolution,
            code_source,
            host_loader,
            plugins: DashMap::new(),
            load_lock: Mutex::new(()),
            lifecycle: LifecycleExecutor::spawn()?,
            dispatcher: DispatcherSlot::new(dispatcher),
            lookup: service_lookup.map(LookupSlot::new),
            invokers,
            connections: ConnectionTable::new(),
            applications: RunningTable::new(),
            activities: RunningTable::new(),
            services: RunningTable::new(),
            providers: RunningTable::new(),
        }))
    }

    /// This process's identity.
    #[must_use]
    pub fn identity(&self) -> &HostIdentity {
        &self.identity
    }

    /// The host's configuration.
    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Wraps the dispatch slot (and, when configured, the lookup slot) with
    /// plugin interception. Returns whether this call installed the
    /// dispatch wrapper; repeats change nothing.
    pub fn install_interception(self: &Arc<Self>) -> bool {
        let installed = self.dispatcher.install_interception(
            Arc::clone(&self.resolution),
            self.identity.host_package.clone(),
        );
        if self.config.intercept_service_lookup
            && let Some(slot) = &self.lookup
        {
            slot.install_interception(self.identity.host_package.clone());
        }
        installed
    }

    /// Loads `package` into this process, initializing it on first use.
    ///
    /// `process_hint` overrides the manifest's declared application process
    /// when the embedding platform assigned this process a specific slot; a
    /// leading `:` is resolved against the plugin's default process.
    ///
    /// The load is idempotent: later calls return the cached runtime, and
    /// calls made from plugin code while initialization is still running
    /// observe the runtime in its `Loading` state.
    ///
    /// # Errors
    ///
    /// Fails when the coordinator is unreachable, the package has no
    /// install record, the code bundle cannot be opened, or initialization
    /// fails. An initialization failure is pinned and re-answered as
    /// [`HostError::InitError`].
    pub fn load_plugin(
        self: &Arc<Self>,
        package: &PackageName,
        process_hint: Option<&str>,
    ) -> HostResult<Arc<PluginRuntime>> {
        if let Some(runtime) = self.plugins.get(package).map(|e| Arc::clone(e.value())) {
            return Self::cached(runtime);
        }
        let runtime = {
            let _guard = self
                .load_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(runtime) = self.plugins.get(package).map(|e| Arc::clone(e.value())) {
                return Self::cached(runtime);
            }
            self.register_runtime(package, process_hint)?
        };
        self.initialize(&runtime)?;
        Ok(runtime)
    }

    fn cached(runtime: Arc<PluginRuntime>) -> HostResult<Arc<PluginRuntime>> {
        match runtime.state() {
            PluginState::Failed(message) => Err(HostError::InitError {
                package: runtime.package().clone(),
                message,
            }),
            PluginState::Loading | PluginState::Ready => Ok(runtime),
        }
    }

    /// Resolves the install record, opens the bundle and publishes the
    /// runtime in `Loading` state. Runs under the load lock.
    fn register_runtime(
        &self,
        package: &PackageName,
        process_hint: Option<&str>,
    ) -> HostResult<Arc<PluginRuntime>> {
        if !self.resolution.ensure_ready() {
            return Err(HostError::RemoteUnavailable);
        }
        let installed = self
            .resolution
            .get_installed_plugin(package)
            .ok_or_else(|| HostError::PluginNotInstalled {
                package: package.clone(),
            })?;
        let exports = self.code_source.open(&installed)?;
        let resources = Arc::new(self.code_source.resources(&installed));
        let loader = Arc::new(BundleLoader::new(
            package.clone(),
            exports,
            self.host_loader.parent().cloned(),
            Arc::clone(&self.host_loader),
        ));
        let process_name = effective_process_name(&installed.manifest, process_hint);
        let stub_process = self
            .resolution
            .select_stub_process(package, installed.manifest.application.process.as_deref());
        let runtime = Arc::new(PluginRuntime {
            loader,
            resources,
            process_name: process_name.clone(),
            state: RwLock::new(PluginState::Loading),
            application: OnceLock::new(),
            providers: Mutex::new(Vec::new()),
            receivers: Mutex::new(Vec::new()),
            installed,
        });
        self.plugins.insert(package.clone(), Arc::clone(&runtime));
        info!(
            package = %package,
            version = %runtime.installed.version,
            process = %process_name,
            stub_process = stub_process.as_deref().unwrap_or("-"),
            "Registered plugin runtime"
        );
        if let Some(name) = rename_target(self.config.topology, &process_name) {
            rename_process(&name);
        }
        Ok(runtime)
    }

    fn initialize(self: &Arc<Self>, runtime: &Arc<PluginRuntime>) -> HostResult<()> {
        let host = Arc::clone(self);
        let target = Arc::clone(runtime);
        let result = self
            .lifecycle
            .run_sync(move || host.initialize_on_lifecycle(&target))
            .and_then(|result| result);
        match result {
            Ok(()) => {
                runtime.set_state(PluginState::Ready);
                info!(package = %runtime.package(), "Plugin is ready");
                Ok(())
            }
            Err(err) => {
                let message = match &err {
                    HostError::InitError { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                runtime.set_state(PluginState::Failed(message.clone()));
                error!(package = %runtime.package(), message = %message, "Plugin initialization failed");
                Err(HostError::InitError {
                    package: runtime.package().clone(),
                    message,
                })
            }
        }
    }

    /// Attach sequence, on the lifecycle thread: application `on_attach`,
    /// then load-time providers and receivers, then application
    /// `on_create`.
    fn initialize_on_lifecycle(self: &Arc<Self>, runtime: &Arc<PluginRuntime>) -> HostResult<()> {
        let manifest = runtime.manifest();
        let cell = match &manifest.application.entry {
            Some(tag) => instantiate_application(runtime.loader().as_ref(), tag)?,
            None => application_cell(DefaultApplication),
        };
        let application = runtime.application.get_or_init(|| cell);
        let ctx = self.app_context(runtime);
        application
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_attach(ctx);
        let record = ApplicationRecord {
            descriptor: manifest.application.clone(),
            process_name: runtime.process_name.clone(),
        };
        if self.applications.register(application, record).is_err() {
            return Err(HostError::DuplicateComponentRegistration {
                component: format!("{} application", runtime.package()),
            });
        }
        self.resolution
            .notify_event(LifecycleEvent::ApplicationAttached {
                package: runtime.package().clone(),
                process_name: runtime.process_name.clone(),
            });
        self.register_load_components(runtime)?;
        application
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_create();
        Ok(())
    }

    /// Creates the manifest's providers and receivers that belong in this
    /// process. Providers are created and announced before the application
    /// sees `on_create`.
    fn register_load_components(&self, runtime: &Arc<PluginRuntime>) -> HostResult<()> {
        let manifest = runtime.manifest();
        let default = manifest.default_process();
        for descriptor in manifest.components_of(ComponentKind::Provider) {
            if descriptor.process_name(default) != runtime.process_name {
                continue;
            }
            let provider = instantiate_provider(runtime.loader().as_ref(), descriptor.name.name())?;
            provider
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_create();
            let stub = self.provider_stub(descriptor);
            let record = ComponentRecord {
                stub: stub.clone(),
                target: descriptor.name.clone(),
            };
            if self.providers.register(&provider, record).is_err() {
                return Err(HostError::DuplicateComponentRegistration {
                    component: descriptor.name.flatten(),
                });
            }
            runtime
                .providers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((descriptor.clone(), provider));
            self.resolution.notify_event(LifecycleEvent::ProviderCreated {
                stub,
                target: descriptor.name.clone(),
            });
            debug!(provider = %descriptor.name, "Created load-time provider");
        }
        for descriptor in manifest.components_of(ComponentKind::Receiver) {
            if descriptor.process_name(default) != runtime.process_name {
                continue;
            }
            let receiver = instantiate_receiver(runtime.loader().as_ref(), descriptor.name.name())?;
            runtime
                .receivers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((descriptor.clone(), receiver));
            debug!(receiver = %descriptor.name, "Registered manifest receiver");
        }
        Ok(())
    }

    fn provider_stub(&self, descriptor: &ComponentDescriptor) -> ComponentName {
        let probe = Intent::to(descriptor.name.clone());
        self.resolution
            .rewrite_intent(ComponentKind::Provider, &probe)
            .and_then(|stub| stub.component().cloned())
            .unwrap_or_else(|| descriptor.name.clone())
    }

    fn app_context(self: &Arc<Self>, runtime: &PluginRuntime) -> AppContext {
        AppContext::new(
            runtime.package().clone(),
            self.identity.clone(),
            self.config.substitute_host_context,
            runtime.installed.data_dir.clone(),
            Arc::clone(&runtime.resources),
            Arc::downgrade(self),
        )
    }

    /// Registers `activity` and runs its `on_create` with the origin
    /// intent on the lifecycle thread.
    ///
    /// # Errors
    ///
    /// Fails when this instance is already registered or the lifecycle
    /// thread is gone; the registration is rolled back on the latter.
    pub fn call_activity_on_create(
        &self,
        activity: &ActivityCell,
        stub: ComponentName,
        target: ComponentName,
        intent: &Intent,
    ) -> HostResult<()> {
        let record = ComponentRecord {
            stub: stub.clone(),
            target: target.clone(),
        };
        if self.activities.register(activity, record).is_err() {
            error!(component = %target, "Activity instance is already registered");
            return Err(HostError::DuplicateComponentRegistration {
                component: target.flatten(),
            });
        }
        let origin = intent.origin_intent().unwrap_or_else(|| intent.clone());
        let instance = Arc::clone(activity);
        let run = self.lifecycle.run_sync(move || {
            instance
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_create(&origin);
        });
        if let Err(err) = run {
            self.activities.remove(activity);
            return Err(err);
        }
        self.resolution
            .notify_event(LifecycleEvent::ActivityCreated { stub, target });
        Ok(())
    }

    /// Runs `on_destroy` on the lifecycle thread and drops the instance's
    /// running record.
    ///
    /// # Errors
    ///
    /// Fails when the lifecycle thread is gone.
    pub fn call_activity_on_destroy(&self, activity: &ActivityCell) -> HostResult<()> {
        let record = self.activities.remove(activity);
        let instance = Arc::clone(activity);
        self.lifecycle.run_sync(move || {
            instance
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_destroy();
        })?;
        match record {
            Some(record) => self
                .resolution
                .notify_event(LifecycleEvent::ActivityDestroyed {
                    stub: record.stub,
                    target: record.target,
                }),
            None => debug!("Destroyed an activity that was never registered"),
        }
        Ok(())
    }

    /// Registers `service` and runs its `on_create` on the lifecycle
    /// thread.
    ///
    /// # Errors
    ///
    /// Fails when this instance is already registered or the lifecycle
    /// thread is gone; the registration is rolled back on the latter.
    pub fn call_service_on_create(
        &self,
        service: &ServiceCell,
        stub: ComponentName,
        target: ComponentName,
    ) -> HostResult<()> {
        let record = ComponentRecord {
            stub: stub.clone(),
            target: target.clone(),
        };
        if self.services.register(service, record).is_err() {
            error!(component = %target, "Service instance is already registered");
            return Err(HostError::DuplicateComponentRegistration {
                component: target.flatten(),
            });
        }
        let instance = Arc::clone(service);
        let run = self.lifecycle.run_sync(move || {
            instance
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_create();
        });
        if let Err(err) = run {
            self.services.remove(service);
            return Err(err);
        }
        self.resolution
            .notify_event(LifecycleEvent::ServiceCreated { stub, target });
        Ok(())
    }

    /// Runs `on_destroy` on the lifecycle thread and drops the instance's
    /// running record.
    ///
    /// # Errors
    ///
    /// Fails when the lifecycle thread is gone.
    pub fn call_service_on_destroy(&self, service: &ServiceCell) -> HostResult<()> {
        let record = self.services.remove(service);
        let instance = Arc::clone(service);
        self.lifecycle.run_sync(move || {
            instance
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_destroy();
        })?;
        match record {
            Some(record) => self
                .resolution
                .notify_event(LifecycleEvent::ServiceDestroyed {
                    stub: record.stub,
                    target: record.target,
                }),
            None => debug!("Destroyed a service that was never registered"),
        }
        Ok(())
    }

    /// Registers an on-demand provider and runs its `on_create` on the
    /// lifecycle thread. Load-time providers go through
    /// [`PluginHost::load_plugin`] instead.
    ///
    /// # Errors
    ///
    /// Fails when this instance is already registered or the lifecycle
    /// thread is gone; the registration is rolled back on the latter.
    pub fn call_provider_on_create(
        &self,
        provider: &ProviderCell,
        stub: ComponentName,
        target: ComponentName,
    ) -> HostResult<()> {
        let record = ComponentRecord {
            stub: stub.clone(),
            target: target.clone(),
        };
        if self.providers.register(provider, record).is_err() {
            error!(component = %target, "Provider instance is already registered");
            return Err(HostError::DuplicateComponentRegistration {
                component: target.flatten(),
            });
        }
        let instance = Arc::clone(provider);
        let run = self.lifecycle.run_sync(move || {
            instance
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_create();
        });
        if let Err(err) = run {
            self.providers.remove(provider);
            return Err(err);
        }
        self.resolution
            .notify_event(LifecycleEvent::ProviderCreated { stub, target });
        Ok(())
    }

    /// Delivers a stub-dispatched command intent to a running service.
    /// A [`ServiceOp::Start`] mark (or none) runs `on_start_command` with
    /// the origin intent; a [`ServiceOp::Stop`] mark destroys the
    /// instance. Returns the op that was applied.
    ///
    /// # Errors
    ///
    /// Fails when the lifecycle thread is gone.
    pub fn deliver_service_command(
        &self,
        service: &ServiceCell,
        intent: &Intent,
    ) -> HostResult<ServiceOp> {
        let op = intent.service_op().unwrap_or(ServiceOp::Start);
        match op {
            ServiceOp::Start => {
                let origin = intent.origin_intent().unwrap_or_else(|| intent.clone());
                let instance = Arc::clone(service);
                self.lifecycle.run_sync(move || {
                    instance
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .on_start_command(&origin);
                })?;
            }
            ServiceOp::Stop => self.call_service_on_destroy(service)?,
        }
        Ok(op)
    }

    /// Asks a running service for its binding channel, passing the origin
    /// intent to `on_bind` on the lifecycle thread.
    ///
    /// # Errors
    ///
    /// Fails when the lifecycle thread is gone.
    pub fn deliver_service_bind(
        &self,
        service: &ServiceCell,
        intent: &Intent,
    ) -> HostResult<Option<ServiceChannel>> {
        let origin = intent.origin_intent().unwrap_or_else(|| intent.clone());
        let instance = Arc::clone(service);
        self.lifecycle.run_sync(move || {
            instance
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_bind(&origin)
        })
    }

    /// Starts a plugin activity: the intent is rewritten to stub form and
    /// handed to the dispatcher.
    ///
    /// # Errors
    ///
    /// Fails when the intent resolves to no installed plugin component.
    pub fn start_activity(&self, call: &DispatchCall, intent: &Intent) -> HostResult<()> {
        let stub = self.rewrite(ComponentKind::Activity, intent)?;
        self.dispatcher.current().start_activity(call, stub);
        Ok(())
    }

    /// Starts a plugin activity expecting a result, tagging the stub
    /// intent with `request_code` for the caller to correlate.
    ///
    /// # Errors
    ///
    /// Fails when the intent resolves to no installed plugin component.
    pub fn start_activity_for_result(
        &self,
        call: &DispatchCall,
        intent: &Intent,
        request_code: u32,
    ) -> HostResult<()> {
        let mut stub = self.rewrite(ComponentKind::Activity, intent)?;
        stub.put_extra(extras::REQUEST_CODE, &request_code)?;
        self.dispatcher.current().start_activity(call, stub);
        Ok(())
    }

    /// Starts a plugin service through its stub, marked
    /// [`ServiceOp::Start`]. Returns the plugin component the intent
    /// resolved to.
    ///
    /// # Errors
    ///
    /// Fails when the intent resolves to no installed plugin component.
    pub fn start_service(
        &self,
        call: &DispatchCall,
        intent: &Intent,
    ) -> HostResult<ComponentName> {
        let mut stub = self.rewrite(ComponentKind::Service, intent)?;
        stub.set_service_op(ServiceOp::Start);
        let target = stub
            .target_descriptor()
            .map(|descriptor| descriptor.name)
            .ok_or_else(|| HostError::PluginComponentNotFound {
                request: describe_intent(intent),
            })?;
        self.dispatcher.current().start_service(call, stub);
        Ok(target)
    }

    /// Stops a plugin service. Stubs multiplex several targets, so the
    /// stop travels as a stub start marked [`ServiceOp::Stop`] rather than
    /// a platform stop of the whole stub. Returns whether the dispatcher
    /// accepted it.
    ///
    /// # Errors
    ///
    /// Fails when the intent resolves to no installed plugin component.
    pub fn stop_service(&self, call: &DispatchCall, intent: &Intent) -> HostResult<bool> {
        let mut stub = self.rewrite(ComponentKind::Service, intent)?;
        stub.set_service_op(ServiceOp::Stop);
        Ok(self.dispatcher.current().start_service(call, stub).is_some())
    }

    /// Binds `connection` to a plugin service. The connection's shadow is
    /// created on first use and receives the channel asynchronously.
    ///
    /// # Errors
    ///
    /// Fails when the intent resolves to no installed plugin component.
    pub fn bind_service(
        &self,
        call: &DispatchCall,
        intent: &Intent,
        connection: &Arc<dyn ServiceConnection>,
        flags: BindFlags,
    ) -> HostResult<bool> {
        let stub = self.rewrite(ComponentKind::Service, intent)?;
        let shadow = self.connections.fetch(connection);
        Ok(self
            .dispatcher
            .current()
            .bind_service(call, stub, shadow, flags))
    }

    /// Releases the binding made for `connection`, detaching its death
    /// watches without firing disconnect callbacks.
    ///
    /// # Errors
    ///
    /// Fails when `connection` has no active binding.
    pub fn unbind_service(
        &self,
        call: &DispatchCall,
        connection: &Arc<dyn ServiceConnection>,
    ) -> HostResult<()> {
        let Some(shadow) = self.connections.remove(connection) else {
            return Err(HostError::PluginComponentNotFound {
                request: "an unbound service connection".to_string(),
            });
        };
        shadow.unbind();
        self.dispatcher.current().unbind_service(call, &shadow);
        Ok(())
    }

    /// Mints a deferred dispatch token through the (possibly intercepted)
    /// dispatcher.
    #[must_use]
    pub fn get_intent_sender(
        &self,
        call: &DispatchCall,
        request: IntentSenderRequest,
    ) -> Option<IntentSender> {
        self.dispatcher.current().get_intent_sender(call, request)
    }

    /// Looks up a platform service channel by name. Answers `None` when
    /// the host was attached without a service lookup.
    #[must_use]
    pub fn lookup_service(&self, call: &DispatchCall, name: &str) -> Option<ServiceChannel> {
        self.lookup
            .as_ref()
            .and_then(|slot| slot.current().lookup(call, name))
    }

    /// Calls a host-exposed invoker service on behalf of `call`.
    #[must_use]
    pub fn invoke_host(
        &self,
        call: &DispatchCall,
        service: &str,
        method: &str,
        params: &str,
        callback: Option<InvokeCallback>,
    ) -> InvokeOutcome {
        let ctx = InvokeContext::new(call.caller.clone(), self.identity.process_name.clone());
        self.invokers
            .invoke_host(&ctx, service, method, params, callback)
    }

    /// Delivers `intent` to every loaded receiver it matches, in
    /// registration order. Returns how many receivers ran; delivery stops
    /// early if the lifecycle thread goes away.
    pub fn dispatch_broadcast(&self, intent: &Intent) -> usize {
        let runtimes: Vec<Arc<PluginRuntime>> = self
            .plugins
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut delivered = 0usize;
        for runtime in runtimes {
            for receiver in runtime.matching_receivers(intent) {
                let sent = intent.clone();
                if let Err(err) = self.lifecycle.run_sync(move || receiver.on_receive(&sent)) {
                    warn!(
                        package = %runtime.package(),
                        error = %err,
                        "Receiver delivery failed, stopping broadcast"
                    );
                    return delivered;
                }
                delivered = delivered.saturating_add(1);
            }
        }
        delivered
    }

    fn rewrite(&self, kind: ComponentKind, intent: &Intent) -> HostResult<Intent> {
        self.resolution
            .rewrite_intent(kind, intent)
            .ok_or_else(|| HostError::PluginComponentNotFound {
                request: describe_intent(intent),
            })
    }

    /// The runtime of `package`, if it is loaded in this process.
    #[must_use]
    pub fn loaded_plugin(&self, package: &PackageName) -> Option<Arc<PluginRuntime>> {
        self.plugins.get(package).map(|e| Arc::clone(e.value()))
    }

    /// All runtimes loaded in this process.
    #[must_use]
    pub fn loaded_plugins(&self) -> Vec<Arc<PluginRuntime>> {
        self.plugins
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// The runtime owning `loader`, matched by loader identity.
    #[must_use]
    pub fn plugin_by_loader(
        &self,
        loader: &Arc<dyn ComponentLoader>,
    ) -> Option<Arc<PluginRuntime>> {
        self.plugins.iter().find_map(|entry| {
            let runtime = entry.value();
            std::ptr::addr_eq(Arc::as_ptr(runtime.loader()), Arc::as_ptr(loader))
                .then(|| Arc::clone(runtime))
        })
    }

    /// Whether `package` names an installed plugin rather than the host.
    ///
    /// The host package is never a plugin. Locally loaded packages answer
    /// without a coordinator round trip; anything else asks the
    /// coordinator, so an unreachable coordinator degrades this to `false`.
    #[must_use]
    pub fn is_plugin(&self, package: &PackageName) -> bool {
        if package == &self.identity.host_package {
            return false;
        }
        if self.plugins.contains_key(package) {
            return true;
        }
        self.resolution.get_installed_plugin(package).is_some()
    }

    /// Resolves `tag` through the loaded plugin's loader chain.
    ///
    /// # Errors
    ///
    /// Fails when `package` is not loaded or the tag resolves to nothing.
    pub fn load_component_class(
        &self,
        package: &PackageName,
        tag: &str,
    ) -> HostResult<ComponentExport> {
        let runtime =
            self.loaded_plugin(package)
                .ok_or_else(|| HostError::ComponentClassNotFound {
                    tag: tag.to_string(),
                })?;
        runtime
            .loader()
            .resolve(tag)
            .ok_or_else(|| HostError::ComponentClassNotFound {
                tag: tag.to_string(),
            })
    }

    /// A read-only context for a loaded plugin. The platform-facing
    /// package is the plugin's own only when service-lookup interception
    /// makes that identity safe to present.
    ///
    /// # Errors
    ///
    /// Fails when `package` is not loaded in this process.
    pub fn create_plugin_context(&self, package: &PackageName) -> HostResult<PluginContext> {
        let runtime = self
            .loaded_plugin(package)
            .ok_or_else(|| HostError::PluginNotInstalled {
                package: package.clone(),
            })?;
        let platform_package = if self.config.intercept_service_lookup {
            package.clone()
        } else {
            self.identity.host_package.clone()
        };
        Ok(PluginContext::new(
            package.clone(),
            platform_package,
            runtime.process_name.clone(),
            runtime.installed.data_dir.clone(),
            Arc::clone(&runtime.resources),
        ))
    }

    /// The running service instance carried by `stub`, with its record.
    #[must_use]
    pub fn running_service_by_stub(
        &self,
        stub: &ComponentName,
    ) -> Option<(ServiceCell, ComponentRecord)> {
        self.services.find(|record| &record.stub == stub)
    }

    /// Snapshot of this host for diagnostics.
    #[must_use]
    pub fn dump(&self) -> HostDump {
        let plugins = self
            .plugins
            .iter()
            .map(|entry| {
                let runtime = entry.value();
                PluginDump {
                    package: runtime.package().clone(),
                    version: runtime.installed.version.clone(),
                    state: runtime.state(),
                    process_name: runtime.process_name.clone(),
                }
            })
            .collect();
        HostDump {
            host_package: self.identity.host_package.clone(),
            process_name: self.identity.process_name.clone(),
            pid: self.identity.pid,
            plugins,
            attached_applications: self
                .applications
                .records()
                .into_iter()
                .map(|record| format!("{} in {}", record.descriptor.package, record.process_name))
                .collect(),
            running_activities: self
                .activities
                .records()
                .into_iter()
                .map(|record| record.target.flatten())
                .collect(),
            running_services: self
                .services
                .records()
                .into_iter()
                .map(|record| record.target.flatten())
                .collect(),
            running_providers: self
                .providers
                .records()
                .into_iter()
                .map(|record| record.target.flatten())
                .collect(),
            connections: self.connections.len(),
        }
    }
}

impl fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHost")
            .field("identity", &self.identity)
            .field("plugins", &self.plugins.len())
            .finish_non_exhaustive()
    }
}

fn receiver_matches(descriptor: &ComponentDescriptor, intent: &Intent) -> bool {
    if let Some(component) = intent.component() {
        return component == &descriptor.name;
    }
    intent
        .action()
        .is_some_and(|action| descriptor.matches_action(action))
}

fn describe_intent(intent: &Intent) -> String {
    if let Some(component) = intent.component() {
        return component.flatten();
    }
    if let Some(action) = intent.action() {
        return format!("action '{action}'");
    }
    "an empty intent".to_string()
}

/// The process name a hosting process should take for `manifest`.
/// `hint` overrides the manifest's application process; a leading `:`
/// resolves against the plugin's default process.
fn effective_process_name(manifest: &PackageManifest, hint: Option<&str>) -> String {
    let default = manifest.default_process();
    match hint {
        None => manifest.application.process_name(default),
        Some(hint) if hint.starts_with(':') => format!("{default}{hint}"),
        Some(hint) => hint.to_string(),
    }
}

/// Under the standalone topology the current process is repurposed for the
/// plugin and takes its declared process name; the dual topology keeps the
/// shared plugin process name it was launched with.
fn rename_target(topology: ProcessTopology, process_name: &str) -> Option<String> {
    match topology {
        ProcessTopology::Standalone => Some(process_name.to_string()),
        ProcessTopology::Dual => None,
    }
}

#[cfg(target_os = "linux")]
fn rename_process(name: &str) {
    let Ok(name) = std::ffi::CString::new(name) else {
        warn!(name, "Process name contains a NUL byte, skipping rename");
        return;
    };
    match nix::sys::prctl::set_name(&name) {
        Ok(()) => debug!(name = %name.to_string_lossy(), "Renamed process"),
        Err(err) => warn!(error = %err, "Process rename failed"),
    }
}

#[cfg(not(target_os = "linux"))]
fn rename_process(name: &str) {
    debug!(name, "Process rename is unsupported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Receiver;
    use crate::connection::ConnectionShadow;
    use crate::dispatch::ComponentDispatcher;
    use crate::loader::{BundleExports, StaticCodeSource};
    use crate::resolution::LocalCoordinator;
    use graft_coord::CoordService;
    use graft_core::{MANIFEST_FILE, StubChannel};
    use std::path::Path;
    use std::sync::Weak;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOTES: &str = r#"
package = "com.example.notes"
version = "1.0.0"

[application]
entry = "NotesApp"

[[component]]
name = "NotesActivity"
kind = "activity"
actions = ["com.example.OPEN"]

[[component]]
name = "SyncService"
kind = "service"

[[component]]
name = "NotesProvider"
kind = "provider"
authority = "com.example.notes.provider"

[[component]]
name = "BootReceiver"
kind = "receiver"
actions = ["com.example.BOOT"]
"#;

    const BROKEN: &str = r#"
package = "com.example.broken"
version = "0.1.0"

[application]
entry = "MissingApp"
"#;

    const ECHO: &str = r#"
package = "com.example.echo"
version = "0.1.0"

[application]
entry = "EchoApp"
"#;

    const WORKER: &str = r#"
package = "com.example.worker"
version = "0.1.0"

[application]
process = ":bg"
"#;

    type EventLog = Arc<Mutex<Vec<String>>>;

    struct NotesApp {
        events: EventLog,
    }

    impl Application for NotesApp {
        fn on_attach(&mut self, ctx: AppContext) {
            self.events
                .lock()
                .unwrap()
                .push(format!("attach {}", ctx.package()));
        }

        fn on_create(&mut self) {
            self.events.lock().unwrap().push("app-create".to_string());
        }
    }

    struct NotesActivity {
        events: EventLog,
    }

    impl Activity for NotesActivity {
        fn on_create(&mut self, intent: &Intent) {
            self.events.lock().unwrap().push(format!(
                "activity-create {}",
                intent.action().unwrap_or("-")
            ));
        }

        fn on_destroy(&mut self) {
            self.events
                .lock()
                .unwrap()
                .push("activity-destroy".to_string());
        }
    }

    struct SyncService {
        events: EventLog,
    }

    impl Service for SyncService {
        fn on_create(&mut self) {
            self.events
                .lock()
                .unwrap()
                .push("service-create".to_string());
        }

        fn on_start_command(&mut self, intent: &Intent) {
            self.events.lock().unwrap().push(format!(
                "service-start {}",
                intent.action().unwrap_or("-")
            ));
        }

        fn on_destroy(&mut self) {
            self.events
                .lock()
                .unwrap()
                .push("service-destroy".to_string());
        }
    }

    struct NotesProvider {
        events: EventLog,
    }

    impl Provider for NotesProvider {
        fn on_create(&mut self) {
            self.events
                .lock()
                .unwrap()
                .push("provider-create".to_string());
        }
    }

    struct BootReceiver {
        events: EventLog,
    }

    impl Receiver for BootReceiver {
        fn on_receive(&self, intent: &Intent) {
            self.events
                .lock()
                .unwrap()
                .push(format!("receive {}", intent.action().unwrap_or("-")));
        }
    }

    fn notes_exports(events: &EventLog) -> BundleExports {
        let app = Arc::clone(events);
        let activity = Arc::clone(events);
        let service = Arc::clone(events);
        let provider = Arc::clone(events);
        let receiver = Arc::clone(events);
        BundleExports::new()
            .application("NotesApp", move || NotesApp {
                events: Arc::clone(&app),
            })
            .activity("NotesActivity", move || NotesActivity {
                events: Arc::clone(&activity),
            })
            .service("SyncService", move || SyncService {
                events: Arc::clone(&service),
            })
            .provider("NotesProvider", move || NotesProvider {
                events: Arc::clone(&provider),
            })
            .receiver("BootReceiver", move || BootReceiver {
                events: Arc::clone(&receiver),
            })
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        activities: Mutex<Vec<Intent>>,
        services: Mutex<Vec<(PackageName, Intent)>>,
        shadows: Mutex<Vec<Arc<ConnectionShadow>>>,
        unbinds: AtomicUsize,
    }

    impl ComponentDispatcher for RecordingDispatcher {
        fn start_activity(&self, _call: &DispatchCall, intent: Intent) {
            self.activities.lock().unwrap().push(intent);
        }

        fn start_service(&self, call: &DispatchCall, intent: Intent) -> Option<ComponentName> {
            let component = intent.component().cloned();
            self.services
                .lock()
                .unwrap()
                .push((call.caller.clone(), intent));
            component
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
            connection: Arc<ConnectionShadow>,
            _flags: BindFlags,
        ) -> bool {
            self.shadows.lock().unwrap().push(connection);
            true
        }

        fn unbind_service(
            &self,
            _call: &DispatchCall,
            _connection: &Arc<ConnectionShadow>,
        ) -> bool {
            self.unbinds.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn get_intent_sender(
            &self,
            _call: &DispatchCall,
            _request: IntentSenderRequest,
        ) -> Option<IntentSender> {
            None
        }
    }

    #[derive(Default)]
    struct RecordingConnection {
        connected: Mutex<Vec<ComponentName>>,
        disconnected: Mutex<Vec<ComponentName>>,
    }

    impl ServiceConnection for RecordingConnection {
        fn on_connected(&self, component: &ComponentName, _channel: ServiceChannel) {
            self.connected.lock().unwrap().push(component.clone());
        }

        fn on_disconnected(&self, component: &ComponentName) {
            self.disconnected.lock().unwrap().push(component.clone());
        }
    }

    struct Harness {
        host: Arc<PluginHost>,
        dispatcher: Arc<RecordingDispatcher>,
        service: Arc<CoordService>,
        code: Arc<StaticCodeSource>,
        events: EventLog,
    }

    fn host_package() -> PackageName {
        PackageName::from_static("com.example.host")
    }

    fn notes() -> PackageName {
        PackageName::from_static("com.example.notes")
    }

    fn sync_service() -> ComponentName {
        ComponentName::unflatten("com.example.notes/SyncService").unwrap()
    }

    fn install_bundle(service: &CoordService, root: &Path, dir_name: &str, manifest: &str) {
        let bundle = root.join(dir_name);
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(bundle.join(MANIFEST_FILE), manifest).unwrap();
        service.install(&bundle).unwrap();
    }

    fn call(package: &str) -> DispatchCall {
        DispatchCall::new(PackageName::from_static(package))
    }

    fn harness(root: &Path) -> Harness {
        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let service = Arc::new(CoordService::new(
            host_package(),
            ProcessTopology::Standalone,
        ));
        install_bundle(&service, root, "notes", NOTES);
        let code = Arc::new(StaticCodeSource::new());
        code.insert(notes(), notes_exports(&events));
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let resolution: Arc<dyn Resolution> = Arc::new(LocalCoordinator::attach(
            Arc::clone(&service),
            7,
            "com.example.host",
        ));
        let attach = AttachConfig::new(
            host_package(),
            "com.example.host",
            resolution,
            Arc::clone(&dispatcher) as Arc<dyn ComponentDispatcher>,
        )
        .with_code_source(Arc::clone(&code) as Arc<dyn CodeSource>);
        let host = PluginHost::new(attach).unwrap();
        Harness {
            host,
            dispatcher,
            service,
            code,
            events,
        }
    }

    #[test]
    fn load_returns_cached_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());

        let first = h.host.load_plugin(&notes(), None).unwrap();
        let second = h.host.load_plugin(&notes(), None).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.state(), PluginState::Ready);
        let attaches = h
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with("attach "))
            .count();
        assert_eq!(attaches, 1);
        assert!(h.service.is_running(&notes()));
    }

    #[test]
    fn load_missing_package_inserts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let ghost = PackageName::from_static("com.example.ghost");

        let err = h.host.load_plugin(&ghost, None).unwrap_err();

        assert!(matches!(err, HostError::PluginNotInstalled { .. }));
        assert!(h.host.loaded_plugin(&ghost).is_none());
        assert!(h.host.loaded_plugins().is_empty());
    }

    #[test]
    fn is_plugin_asks_the_coordinator_for_unloaded_packages() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());

        assert!(!h.host.is_plugin(&host_package()));
        // installed but not yet loaded
        assert!(h.host.is_plugin(&notes()));
        assert!(!h.host.is_plugin(&PackageName::from_static("com.example.ghost")));

        h.host.load_plugin(&notes(), None).unwrap();
        assert!(h.host.is_plugin(&notes()));
    }

    #[test]
    fn failed_init_is_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let broken = PackageName::from_static("com.example.broken");
        install_bundle(&h.service, dir.path(), "broken", BROKEN);
        h.code.insert(broken.clone(), BundleExports::new());

        let err = h.host.load_plugin(&broken, None).unwrap_err();
        let HostError::InitError { package, message } = err else {
            panic!("want an init error, got {err}");
        };
        assert_eq!(package, broken);
        assert!(message.contains("MissingApp"));

        let again = h.host.load_plugin(&broken, None).unwrap_err();
        assert!(matches!(again, HostError::InitError { .. }));
        let state = h.host.loaded_plugin(&broken).unwrap().state();
        assert!(matches!(state, PluginState::Failed(_)));
    }

    #[test]
    fn duplicate_activity_registration_fails() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.host.load_plugin(&notes(), None).unwrap();
        let export = h.host.load_component_class(&notes(), "NotesActivity").unwrap();
        let ComponentExport::Activity(make) = export else {
            panic!("want an activity export");
        };
        let cell = make();
        let stub = ComponentName::new(host_package(), "StubActivityP0S0").unwrap();
        let target = ComponentName::unflatten("com.example.notes/NotesActivity").unwrap();
        let intent = Intent::to(target.clone());

        h.host
            .call_activity_on_create(&cell, stub.clone(), target.clone(), &intent)
            .unwrap();
        let err = h
            .host
            .call_activity_on_create(&cell, stub, target.clone(), &intent)
            .unwrap_err();

        assert!(matches!(
            err,
            HostError::DuplicateComponentRegistration { .. }
        ));
        assert_eq!(h.host.dump().running_activities, [target.flatten()]);
    }

    #[test]
    fn process_rename_only_in_standalone() {
        assert_eq!(
            rename_target(ProcessTopology::Standalone, "com.example.notes:sync").as_deref(),
            Some("com.example.notes:sync")
        );
        assert_eq!(
            rename_target(ProcessTopology::Dual, "com.example.notes:sync"),
            None
        );

        let manifest = PackageManifest::from_toml_str(NOTES, "test").unwrap();
        assert_eq!(effective_process_name(&manifest, None), "com.example.notes");
        assert_eq!(
            effective_process_name(&manifest, Some(":work")),
            "com.example.notes:work"
        );
        assert_eq!(
            effective_process_name(&manifest, Some("host.pool0")),
            "host.pool0"
        );

        let worker = PackageManifest::from_toml_str(WORKER, "test").unwrap();
        assert_eq!(
            effective_process_name(&worker, None),
            "com.example.worker:bg"
        );
    }

    #[test]
    fn start_service_marks_stub_intent() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let intent = Intent::to(sync_service());

        let target = h
            .host
            .start_service(&call("com.example.host"), &intent)
            .unwrap();
        assert_eq!(target, sync_service());

        let sent = h.dispatcher.services.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let stub = &sent[0].1;
        assert_eq!(stub.service_op(), Some(ServiceOp::Start));
        let stub_component = stub.component().unwrap();
        assert_eq!(stub_component.package(), &host_package());
        assert!(stub_component.name().starts_with("StubService"));
        assert_eq!(stub.target_descriptor().unwrap().name, sync_service());
        assert_eq!(stub.origin_intent().unwrap(), intent);
    }

    #[test]
    fn bind_then_unbind_detaches_shadow() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let connection = Arc::new(RecordingConnection::default());
        let conn = Arc::clone(&connection) as Arc<dyn ServiceConnection>;
        let intent = Intent::to(sync_service());

        let bound = h
            .host
            .bind_service(
                &call("com.example.host"),
                &intent,
                &conn,
                BindFlags::auto_create(),
            )
            .unwrap();
        assert!(bound);
        assert_eq!(h.host.dump().connections, 1);

        let shadow = h.dispatcher.shadows.lock().unwrap().pop().unwrap();
        let channel = ServiceChannel::new();
        shadow.handle_connected(StubChannel::new(sync_service(), channel.clone()));
        assert_eq!(
            connection.connected.lock().unwrap().as_slice(),
            [sync_service()]
        );

        h.host
            .unbind_service(&call("com.example.host"), &conn)
            .unwrap();
        assert_eq!(h.dispatcher.unbinds.load(Ordering::SeqCst), 1);
        assert_eq!(h.host.dump().connections, 0);

        // The unbound shadow no longer relays death.
        channel.kill();
        assert!(connection.disconnected.lock().unwrap().is_empty());

        let err = h
            .host
            .unbind_service(&call("com.example.host"), &conn)
            .unwrap_err();
        assert!(matches!(err, HostError::PluginComponentNotFound { .. }));
    }

    #[test]
    fn dispatch_broadcast_matches_action_and_component() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.host.load_plugin(&notes(), None).unwrap();

        assert_eq!(
            h.host
                .dispatch_broadcast(&Intent::for_action("com.example.BOOT")),
            1
        );
        let receiver = ComponentName::unflatten("com.example.notes/BootReceiver").unwrap();
        assert_eq!(h.host.dispatch_broadcast(&Intent::to(receiver)), 1);
        assert_eq!(
            h.host
                .dispatch_broadcast(&Intent::for_action("com.example.NOPE")),
            0
        );
        assert_eq!(h.host.dispatch_broadcast(&Intent::new()), 0);

        let events = h.events.lock().unwrap();
        let received: Vec<_> = events.iter().filter(|e| e.starts_with("receive")).collect();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], "receive com.example.BOOT");
    }

    #[test]
    fn load_orders_attach_providers_then_create() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());

        h.host.load_plugin(&notes(), None).unwrap();

        let events = h.events.lock().unwrap();
        assert_eq!(events[0], "attach com.example.notes");
        assert_eq!(events[1], "provider-create");
        assert_eq!(events[2], "app-create");
        drop(events);

        let dump = h.host.dump();
        assert_eq!(
            dump.running_providers,
            ["com.example.notes/NotesProvider".to_string()]
        );
        assert_eq!(dump.attached_applications.len(), 1);
        assert_eq!(dump.plugins.len(), 1);
        assert_eq!(dump.plugins[0].state, PluginState::Ready);
    }

    struct ReentrantApp {
        package: PackageName,
        host: Arc<Mutex<Option<Weak<PluginHost>>>>,
        events: EventLog,
    }

    impl Application for ReentrantApp {
        fn on_attach(&mut self, _ctx: AppContext) {}

        fn on_create(&mut self) {
            let Some(host) = self
                .host
                .lock()
                .unwrap()
                .as_ref()
                .and_then(Weak::upgrade)
            else {
                return;
            };
            match host.load_plugin(&self.package, None) {
                Ok(runtime) => self
                    .events
                    .lock()
                    .unwrap()
                    .push(format!("reentrant-load ok {:?}", runtime.state())),
                Err(err) => self
                    .events
                    .lock()
                    .unwrap()
                    .push(format!("reentrant-load err {err}")),
            }
        }
    }

    #[test]
    fn reentrant_load_observes_partial_state() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let echo = PackageName::from_static("com.example.echo");
        install_bundle(&h.service, dir.path(), "echo", ECHO);

        let slot: Arc<Mutex<Option<Weak<PluginHost>>>> = Arc::default();
        let exports = BundleExports::new().application("EchoApp", {
            let slot = Arc::clone(&slot);
            let events = Arc::clone(&h.events);
            let package = echo.clone();
            move || ReentrantApp {
                package: package.clone(),
                host: Arc::clone(&slot),
                events: Arc::clone(&events),
            }
        });
        h.code.insert(echo.clone(), exports);
        *slot.lock().unwrap() = Some(Arc::downgrade(&h.host));

        let runtime = h.host.load_plugin(&echo, None).unwrap();

        assert_eq!(runtime.state(), PluginState::Ready);
        let events = h.events.lock().unwrap();
        assert_eq!(events.as_slice(), ["reentrant-load ok Loading"]);
    }
}
