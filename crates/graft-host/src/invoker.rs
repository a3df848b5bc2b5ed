//! Host-exposed invoker services.
//!
//! Invokers are the string-addressed call surface plugins use to reach
//! host functionality without a component round trip. The host declares
//! its invokers in configuration (`service name → factory tag`) and
//! registers the factories in an [`InvokerFactories`] table at attach
//! time; instances are created lazily, once per service, and cached for
//! the process lifetime.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use graft_core::PackageName;
use tracing::{debug, warn};

/// Identity of an invoker call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeContext {
    /// Package on whose behalf the call is made.
    pub caller: PackageName,
    /// Name of the process the call originates from.
    pub process_name: String,
}

impl InvokeContext {
    /// A context for `caller` in `process_name`.
    #[must_use]
    pub fn new(caller: PackageName, process_name: impl Into<String>) -> Self {
        Self {
            caller,
            process_name: process_name.into(),
        }
    }
}

/// Completion code of an invoker call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeCode {
    /// The invoker handled the call.
    Ok,
    /// No invoker is registered under the requested service name, or the
    /// invoker does not implement the method.
    NotFound,
    /// The invoker ran and reported a failure.
    Failed,
}

/// Outcome of an invoker call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOutcome {
    /// Completion code.
    pub code: InvokeCode,
    /// Payload. Carries the result for [`InvokeCode::Ok`] and the failure
    /// message for [`InvokeCode::Failed`].
    pub data: Option<String>,
}

impl InvokeOutcome {
    /// A successful outcome with an optional payload.
    #[must_use]
    pub fn ok(data: Option<String>) -> Self {
        Self {
            code: InvokeCode::Ok,
            data,
        }
    }

    /// The outcome for an unknown service or method.
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            code: InvokeCode::NotFound,
            data: None,
        }
    }

    /// A failure outcome carrying `message`.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            code: InvokeCode::Failed,
            data: Some(message.into()),
        }
    }

    /// Whether the call was handled successfully.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == InvokeCode::Ok
    }

    /// Whether the invoker reported a failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.code == InvokeCode::Failed
    }
}

/// Callback an invoker may use to push a payload back to the caller.
pub type InvokeCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A host-side service callable by name from plugin code.
pub trait HostInvoker: Send + Sync {
    /// Handles `method` with JSON-encoded `params`.
    ///
    /// Implementations answer unknown methods with
    /// [`InvokeOutcome::not_found`] rather than an error.
    fn invoke(
        &self,
        ctx: &InvokeContext,
        method: &str,
        params: &str,
        callback: Option<InvokeCallback>,
    ) -> InvokeOutcome;
}

type InvokerFactory = Arc<dyn Fn() -> Arc<dyn HostInvoker> + Send + Sync>;

/// Factory table mapping configuration tags to invoker constructors.
#[derive(Clone, Default)]
pub struct InvokerFactories {
    factories: HashMap<String, InvokerFactory>,
}

impl InvokerFactories {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor under `tag`.
    #[must_use]
    pub fn register<I, F>(mut self, tag: impl Into<String>, make: F) -> Self
    where
        I: HostInvoker + 'static,
        F: Fn() -> I + Send + Sync + 'static,
    {
        self.factories
            .insert(tag.into(), Arc::new(move || Arc::new(make())));
        self
    }

    /// The factory registered under `tag`, if any.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&InvokerFactory> {
        self.factories.get(tag)
    }

    /// Number of registered factories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether the table has no factories.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for InvokerFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokerFactories")
            .field("tags", &self.factories.len())
            .finish()
    }
}

/// The per-process invoker registry.
///
/// Service names come from host configuration; factories from the attach
/// setup. Instantiation is double-checked: reads hit the instance cache
/// through a read lock, a miss instantiates under the write lock after a
/// re-check, so concurrent first use yields exactly one instance.
pub struct InvokerRegistry {
    entries: BTreeMap<String, String>,
    factories: InvokerFactories,
    instances: RwLock<HashMap<String, Arc<dyn HostInvoker>>>,
}

impl InvokerRegistry {
    /// A registry over the configured `entries` and the registered
    /// `factories`.
    #[must_use]
    pub fn new(entries: BTreeMap<String, String>, factories: InvokerFactories) -> Self {
        Self {
            entries,
            factories,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Calls `method` on the invoker registered as `service`.
    ///
    /// Unknown services and tags answer [`InvokeOutcome::not_found`];
    /// whether the coordinator is reachable never matters here, the
    /// registry is process-local.
    #[must_use]
    pub fn invoke_host(
        &self,
        ctx: &InvokeContext,
        service: &str,
        method: &str,
        params: &str,
        callback: Option<InvokeCallback>,
    ) -> InvokeOutcome {
        let Some(invoker) = self.instance_of(service) else {
            debug!(service, caller = %ctx.caller, "No invoker for service");
            return InvokeOutcome::not_found();
        };
        invoker.invoke(ctx, method, params, callback)
    }

    /// The configured service names, sorted.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of configured services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no services are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn instance_of(&self, service: &str) -> Option<Arc<dyn HostInvoker>> {
        if let Some(instance) = self.read_instances().get(service) {
            return Some(Arc::clone(instance));
        }
        let tag = self.entries.get(service)?;
        let Some(factory) = self.factories.get(tag) else {
            warn!(service, tag, "Invoker entry names an unregistered factory tag");
            return None;
        };
        let mut instances = self.write_instances();
        // Another caller may have instantiated while we waited for the
        // write lock.
        if let Some(instance) = instances.get(service) {
            return Some(Arc::clone(instance));
        }
        let instance = factory();
        instances.insert(service.to_string(), Arc::clone(&instance));
        debug!(service, tag, "Instantiated host invoker");
        Some(instance)
    }

    fn read_instances(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn HostInvoker>>> {
        self.instances
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_instances(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn HostInvoker>>> {
        self.instances
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for InvokerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokerRegistry")
            .field("services", &self.entries.len())
            .field("instantiated", &self.read_instances().len())
            .finish()
    }
}
