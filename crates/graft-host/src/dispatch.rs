//! Platform dispatch and OS-integration interception.
//!
//! [`ComponentDispatcher`] is the seam between the runtime and whatever
//! actually starts components in this deployment. The host installs its
//! real dispatcher in a [`DispatcherSlot`] at attach time; interception
//! wraps it exactly once with an [`InterceptingDispatcher`], which rewrites
//! the two entry points platform plumbing cannot handle for plugins:
//! deferred intent senders and token-based service stops. Everything else
//! passes through untouched.
//!
//! Every call names its caller explicitly in a [`DispatchCall`]; the layer
//! never guesses identity from runtime state.

use std::fmt;
use std::sync::{Arc, RwLock};

use graft_core::{ComponentKind, ComponentName, Intent, PackageName, ServiceChannel, ServiceOp};
use tracing::{debug, info};

use crate::connection::ConnectionShadow;
use crate::resolution::Resolution;

/// Identity of the code issuing a dispatch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchCall {
    /// Package on whose behalf the call is made.
    pub caller: PackageName,
}

impl DispatchCall {
    /// A call made on behalf of `caller`.
    #[must_use]
    pub fn new(caller: PackageName) -> Self {
        Self { caller }
    }
}

/// Options for a service binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindFlags {
    /// Create the service if it is not already running.
    pub auto_create: bool,
}

impl BindFlags {
    /// Flags requesting service creation on bind.
    #[must_use]
    pub fn auto_create() -> Self {
        Self { auto_create: true }
    }
}

/// Kind of deferred dispatch a sender token stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderKind {
    /// The token starts an activity when fired.
    Activity,
    /// The token starts a service when fired.
    Service,
}

impl SenderKind {
    fn component_kind(self) -> ComponentKind {
        match self {
            Self::Activity => ComponentKind::Activity,
            Self::Service => ComponentKind::Service,
        }
    }
}

/// A request for a deferred dispatch token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentSenderRequest {
    /// What firing the token dispatches.
    pub kind: SenderKind,
    /// Package requesting the token. The platform validates this against
    /// the calling process, which is why plugin identities must be
    /// substituted before the request leaves the host.
    pub requester: PackageName,
    /// Caller-chosen correlation code.
    pub request_code: u32,
    /// The intent the token will dispatch.
    pub intent: Intent,
}

/// A minted dispatch token, as the platform recorded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentSender {
    /// What firing the token dispatches.
    pub kind: SenderKind,
    /// Package the token is registered to.
    pub requester: PackageName,
    /// Correlation code from the request.
    pub request_code: u32,
    /// The intent the token will dispatch.
    pub intent: Intent,
}

/// The platform's component dispatch surface.
///
/// Intents arriving here are already in stub form when they address
/// plugins; the dispatcher does not consult the coordinator.
pub trait ComponentDispatcher: Send + Sync {
    /// Starts an activity.
    fn start_activity(&self, call: &DispatchCall, intent: Intent);

    /// Starts a service, returning the component the platform started.
    fn start_service(&self, call: &DispatchCall, intent: Intent) -> Option<ComponentName>;

    /// Stops a service by intent. Returns whether a service was stopped.
    fn stop_service(&self, call: &DispatchCall, intent: Intent) -> bool;

    /// Stops a service instance by component and start token.
    fn stop_service_token(&self, call: &DispatchCall, component: ComponentName, token: u64)
    -> bool;

    /// Binds `connection` to a service. Returns whether the binding was
    /// accepted; channels arrive on the shadow asynchronously.
    fn bind_service(
        &self,
        call: &DispatchCall,
        intent: Intent,
        connection: Arc<ConnectionShadow>,
        flags: BindFlags,
    ) -> bool;

    /// Releases a binding. Returns whether one existed.
    fn unbind_service(&self, call: &DispatchCall, connection: &Arc<ConnectionShadow>) -> bool;

    /// Mints a deferred dispatch token.
    fn get_intent_sender(
        &self,
        call: &DispatchCall,
        request: IntentSenderRequest,
    ) -> Option<IntentSender>;
}

/// Decorator fixing up the dispatch entry points plugins would otherwise
/// break on.
///
/// Two rules, everything else delegates untouched:
///
/// - `get_intent_sender`: a request whose intent resolves to an installed
///   plugin component is rewritten to stub form and re-attributed to the
///   host package, since the platform rejects tokens for packages it never
///   installed. Non-plugin requests pass through byte-identical.
/// - `stop_service_token`: the platform's stop-by-token path knows nothing
///   about targets behind stubs. A component that resolves to a plugin
///   service is re-issued as a stub start marked [`ServiceOp::Stop`]; the
///   original call never reaches the platform.
pub struct InterceptingDispatcher {
    real: Arc<dyn ComponentDispatcher>,
    resolution: Arc<dyn Resolution>,
    host_package: PackageName,
}

impl InterceptingDispatcher {
    /// Wraps `real`, resolving plugin intents through `resolution`.
    #[must_use]
    pub fn new(
        real: Arc<dyn ComponentDispatcher>,
        resolution: Arc<dyn Resolution>,
        host_package: PackageName,
    ) -> Self {
        Self {
            real,
            resolution,
            host_package,
        }
    }
}

impl ComponentDispatcher for InterceptingDispatcher {
    fn start_activity(&self, call: &DispatchCall, intent: Intent) {
        self.real.start_activity(call, intent);
    }

    fn start_service(&self, call: &DispatchCall, intent: Intent) -> Option<ComponentName> {
        self.real.start_service(call, intent)
    }

    fn stop_service(&self, call: &DispatchCall, intent: Intent) -> bool {
        self.real.stop_service(call, intent)
    }

    fn stop_service_token(
        &self,
        call: &DispatchCall,
        component: ComponentName,
        token: u64,
    ) -> bool {
        let probe = Intent::to(component.clone());
        if let Some(mut stub) = self.resolution.rewrite_intent(ComponentKind::Service, &probe) {
            stub.set_service_op(ServiceOp::Stop);
            debug!(component = %component, token, "Re-issuing plugin service stop through its stub");
            self.real.start_service(call, stub);
            return true;
        }
        self.real.stop_service_token(call, component, token)
    }

    fn bind_service(
        &self,
        call: &DispatchCall,
        intent: Intent,
        connection: Arc<ConnectionShadow>,
        flags: BindFlags,
    ) -> bool {
        self.real.bind_service(call, intent, connection, flags)
    }

    fn unbind_service(&self, call: &DispatchCall, connection: &Arc<ConnectionShadow>) -> bool {
        self.real.unbind_service(call, connection)
    }

    fn get_intent_sender(
        &self,
        call: &DispatchCall,
        request: IntentSenderRequest,
    ) -> Option<IntentSender> {
        let kind = request.kind.component_kind();
        if let Some(stub) = self.resolution.rewrite_intent(kind, &request.intent) {
            debug!(
                kind = ?request.kind,
                requester = %request.requester,
                "Substituting host identity on a plugin intent sender"
            );
            let substituted = IntentSenderRequest {
                requester: self.host_package.clone(),
                intent: stub,
                ..request
            };
            return self.real.get_intent_sender(call, substituted);
        }
        self.real.get_intent_sender(call, request)
    }
}

impl fmt::Debug for InterceptingDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptingDispatcher")
            .field("host_package", &self.host_package)
            .finish_non_exhaustive()
    }
}

struct SlotState<T: ?Sized> {
    current: Arc<T>,
    intercepted: bool,
}

/// Holder of the process's component dispatcher.
///
/// Interception swaps the held dispatcher for its intercepting wrapper
/// exactly once; later installs are refused so the chain never nests.
pub struct DispatcherSlot {
    state: RwLock<SlotState<dyn ComponentDispatcher>>,
}

impl DispatcherSlot {
    /// A slot holding the deployment's real dispatcher.
    #[must_use]
    pub fn new(real: Arc<dyn ComponentDispatcher>) -> Self {
        Self {
            state: RwLock::new(SlotState {
                current: real,
                intercepted: false,
            }),
        }
    }

    /// The dispatcher calls should go through right now.
    #[must_use]
    pub fn current(&self) -> Arc<dyn ComponentDispatcher> {
        Arc::clone(&self.read_state().current)
    }

    /// Wraps the held dispatcher with plugin interception. Returns whether
    /// this call installed it; repeat installs change nothing.
    pub fn install_interception(
        &self,
        resolution: Arc<dyn Resolution>,
        host_package: PackageName,
    ) -> bool {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.intercepted {
            debug!("Dispatch interception is already installed");
            return false;
        }
        state.current = Arc::new(InterceptingDispatcher::new(
            Arc::clone(&state.current),
            resolution,
            host_package,
        ));
        state.intercepted = true;
        info!("Installed dispatch interception");
        true
    }

    /// Whether interception has been installed.
    #[must_use]
    pub fn is_intercepted(&self) -> bool {
        self.read_state().intercepted
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, SlotState<dyn ComponentDispatcher>> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for DispatcherSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherSlot")
            .field("intercepted", &self.is_intercepted())
            .finish()
    }
}

/// Name-based lookup of platform service channels.
pub trait ServiceLookup: Send + Sync {
    /// The channel registered under `name`, if the platform knows it.
    fn lookup(&self, call: &DispatchCall, name: &str) -> Option<ServiceChannel>;
}

/// Decorator presenting the host identity on plugin-originated lookups.
///
/// Platform services validate the caller against installed packages, so
/// lookups carrying a plugin package would be refused. Calls already made
/// as the host pass through unchanged.
pub struct InterceptingLookup {
    real: Arc<dyn ServiceLookup>,
    host_package: PackageName,
}

impl InterceptingLookup {
    /// Wraps `real`, substituting `host_package` for plugin callers.
    #[must_use]
    pub fn new(real: Arc<dyn ServiceLookup>, host_package: PackageName) -> Self {
        Self { real, host_package }
    }
}

impl ServiceLookup for InterceptingLookup {
    fn lookup(&self, call: &DispatchCall, name: &str) -> Option<ServiceChannel> {
        if call.caller == self.host_package {
            return self.real.lookup(call, name);
        }
        debug!(name, caller = %call.caller, "Substituting host identity on a service lookup");
        let substituted = DispatchCall::new(self.host_package.clone());
        self.real.lookup(&substituted, name)
    }
}

impl fmt::Debug for InterceptingLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptingLookup")
            .field("host_package", &self.host_package)
            .finish_non_exhaustive()
    }
}

/// Holder of the process's service lookup, with once-only interception
/// like [`DispatcherSlot`].
pub struct LookupSlot {
    state: RwLock<SlotState<dyn ServiceLookup>>,
}

impl LookupSlot {
    /// A slot holding the deployment's real lookup.
    #[must_use]
    pub fn new(real: Arc<dyn ServiceLookup>) -> Self {
        Self {
            state: RwLock::new(SlotState {
                current: real,
                intercepted: false,
            }),
        }
    }

    /// The lookup calls should go through right now.
    #[must_use]
    pub fn current(&self) -> Arc<dyn ServiceLookup> {
        Arc::clone(&self.read_state().current)
    }

    /// Wraps the held lookup with identity substitution. Returns whether
    /// this call installed it.
    pub fn install_interception(&self, host_package: PackageName) -> bool {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.intercepted {
            debug!("Service-lookup interception is already installed");
            return false;
        }
        state.current = Arc::new(InterceptingLookup::new(
            Arc::clone(&state.current),
            host_package,
        ));
        state.intercepted = true;
        info!("Installed service-lookup interception");
        true
    }

    /// Whether interception has been installed.
    #[must_use]
    pub fn is_intercepted(&self) -> bool {
        self.read_state().intercepted
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, SlotState<dyn ServiceLookup>> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for LookupSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupSlot")
            .field("intercepted", &self.is_intercepted())
            .finish()
    }
}
