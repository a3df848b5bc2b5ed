//! Component loaders and bundle code sources.
//!
//! A plugin bundle exports component constructors under string tags (the
//! short component names from its manifest). A [`ComponentLoader`] resolves
//! a tag to an export, delegating along a parent chain the way platform
//! class loading does. Plugin loaders ([`BundleLoader`]) parent to the
//! *host's parent*, not the host itself, and consult the host loader last,
//! so host exports never shadow plugin exports with the same tag.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use graft_core::{InstalledPluginInfo, PackageName};
use tracing::warn;

use crate::component::{
    Activity, ActivityCell, Application, ApplicationCell, Provider, ProviderCell, Receiver,
    ReceiverCell, Service, ServiceCell, activity_cell, application_cell, provider_cell,
    receiver_cell, service_cell,
};
use crate::error::{HostError, HostResult};
use crate::resources::ResourceTable;

/// A constructor for one exported component, tagged with its kind.
#[derive(Clone)]
pub enum ComponentExport {
    /// Builds the bundle's application entry.
    Application(Arc<dyn Fn() -> ApplicationCell + Send + Sync>),
    /// Builds an activity instance.
    Activity(Arc<dyn Fn() -> ActivityCell + Send + Sync>),
    /// Builds a service instance.
    Service(Arc<dyn Fn() -> ServiceCell + Send + Sync>),
    /// Builds a provider instance.
    Provider(Arc<dyn Fn() -> ProviderCell + Send + Sync>),
    /// Builds a receiver instance.
    Receiver(Arc<dyn Fn() -> ReceiverCell + Send + Sync>),
}

impl ComponentExport {
    /// The export's kind, for diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Application(_) => "application",
            Self::Activity(_) => "activity",
            Self::Service(_) => "service",
            Self::Provider(_) => "provider",
            Self::Receiver(_) => "receiver",
        }
    }
}

impl fmt::Debug for ComponentExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentExport")
            .field(&self.kind_name())
            .finish()
    }
}

/// The export table of one code bundle, keyed by component tag.
#[derive(Debug, Clone, Default)]
pub struct BundleExports {
    exports: HashMap<String, ComponentExport>,
}

impl BundleExports {
    /// An empty export table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports an application entry under `tag`.
    #[must_use]
    pub fn application<A, F>(mut self, tag: impl Into<String>, make: F) -> Self
    where
        A: Application + 'static,
        F: Fn() -> A + Send + Sync + 'static,
    {
        self.exports.insert(
            tag.into(),
            ComponentExport::Application(Arc::new(move || application_cell(make()))),
        );
        self
    }

    /// Exports an activity under `tag`.
    #[must_use]
    pub fn activity<A, F>(mut self, tag: impl Into<String>, make: F) -> Self
    where
        A: Activity + 'static,
        F: Fn() -> A + Send + Sync + 'static,
    {
        self.exports.insert(
            tag.into(),
            ComponentExport::Activity(Arc::new(move || activity_cell(make()))),
        );
        self
    }

    /// Exports a service under `tag`.
    #[must_use]
    pub fn service<S, F>(mut self, tag: impl Into<String>, make: F) -> Self
    where
        S: Service + 'static,
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.exports.insert(
            tag.into(),
            ComponentExport::Service(Arc::new(move || service_cell(make()))),
        );
        self
    }

    /// Exports a provider under `tag`.
    #[must_use]
    pub fn provider<P, F>(mut self, tag: impl Into<String>, make: F) -> Self
    where
        P: Provider + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.exports.insert(
            tag.into(),
            ComponentExport::Provider(Arc::new(move || provider_cell(make()))),
        );
        self
    }

    /// Exports a receiver under `tag`.
    #[must_use]
    pub fn receiver<R, F>(mut self, tag: impl Into<String>, make: F) -> Self
    where
        R: Receiver + 'static,
        F: Fn() -> R + Send + Sync + 'static,
    {
        self.exports.insert(
            tag.into(),
            ComponentExport::Receiver(Arc::new(move || receiver_cell(make()))),
        );
        self
    }

    /// The export registered under `tag`, if any.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&ComponentExport> {
        self.exports.get(tag)
    }

    /// Number of exports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exports.len()
    }

    /// Whether the table has no exports.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    /// Iterates over the exported tags.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }
}

/// Resolves component tags to exports, consulting a parent chain.
pub trait ComponentLoader: Send + Sync {
    /// Diagnostic name (package name for bundle loaders).
    fn name(&self) -> &str;

    /// This loader's own exports, no delegation.
    fn resolve_local(&self, tag: &str) -> Option<ComponentExport>;

    /// The next loader in the delegation chain.
    fn parent(&self) -> Option<&Arc<dyn ComponentLoader>>;

    /// Resolves `tag`: own exports first, then the parent chain.
    fn resolve(&self, tag: &str) -> Option<ComponentExport> {
        if let Some(export) = self.resolve_local(tag) {
            return Some(export);
        }
        let mut next = self.parent();
        while let Some(loader) = next {
            if let Some(export) = loader.resolve_local(tag) {
                return Some(export);
            }
            next = loader.parent();
        }
        None
    }
}

/// A loader over a fixed export table. Used for the host's own exports and
/// for shared framework tables plugins inherit through their parent chain.
pub struct StaticLoader {
    name: String,
    exports: BundleExports,
    parent: Option<Arc<dyn ComponentLoader>>,
}

impl StaticLoader {
    /// A root loader with no parent.
    #[must_use]
    pub fn new(name: impl Into<String>, exports: BundleExports) -> Self {
        Self {
            name: name.into(),
            exports,
            parent: None,
        }
    }

    /// A loader that delegates unresolved tags to `parent`.
    #[must_use]
    pub fn with_parent(
        name: impl Into<String>,
        exports: BundleExports,
        parent: Arc<dyn ComponentLoader>,
    ) -> Self {
        Self {
            name: name.into(),
            exports,
            parent: Some(parent),
        }
    }
}

impl ComponentLoader for StaticLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve_local(&self, tag: &str) -> Option<ComponentExport> {
        self.exports.get(tag).cloned()
    }

    fn parent(&self) -> Option<&Arc<dyn ComponentLoader>> {
        self.parent.as_ref()
    }
}

impl fmt::Debug for StaticLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticLoader")
            .field("name", &self.name)
            .field("exports", &self.exports.len())
            .finish_non_exhaustive()
    }
}

/// The loader of one loaded plugin bundle.
///
/// Resolution order: the bundle's own exports, then the parent chain
/// (normally the host's parent), then the host loader's local table as a
/// final delegate. The host sits last so its tags cannot shadow the
/// plugin's.
pub struct BundleLoader {
    package: PackageName,
    exports: BundleExports,
    parent: Option<Arc<dyn ComponentLoader>>,
    delegate: Arc<dyn ComponentLoader>,
}

impl BundleLoader {
    /// Builds the loader for `package` with its export table, parent chain
    /// and host delegate.
    #[must_use]
    pub fn new(
        package: PackageName,
        exports: BundleExports,
        parent: Option<Arc<dyn ComponentLoader>>,
        delegate: Arc<dyn ComponentLoader>,
    ) -> Self {
        Self {
            package,
            exports,
            parent,
            delegate,
        }
    }

    /// The owning package.
    #[must_use]
    pub fn package(&self) -> &PackageName {
        &self.package
    }
}

impl ComponentLoader for BundleLoader {
    fn name(&self) -> &str {
        self.package.as_str()
    }

    fn resolve_local(&self, tag: &str) -> Option<ComponentExport> {
        self.exports.get(tag).cloned()
    }

    fn parent(&self) -> Option<&Arc<dyn ComponentLoader>> {
        self.parent.as_ref()
    }

    fn resolve(&self, tag: &str) -> Option<ComponentExport> {
        if let Some(export) = self.resolve_local(tag) {
            return Some(export);
        }
        let mut next = self.parent();
        while let Some(loader) = next {
            if let Some(export) = loader.resolve_local(tag) {
                return Some(export);
            }
            next = loader.parent();
        }
        // Host last. Its own table only; its parents are already covered by
        // the chain above.
        self.delegate.resolve_local(tag)
    }
}

impl fmt::Debug for BundleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleLoader")
            .field("package", &self.package)
            .field("exports", &self.exports.len())
            .field("delegate", &self.delegate.name())
            .finish_non_exhaustive()
    }
}

/// Opens installed bundles and produces their export tables.
///
/// The host registers one code source at attach time. A dynamic-linking
/// source would open the bundle's `lib/` artifacts; test and embedded hosts
/// register [`StaticCodeSource`] tables instead.
pub trait CodeSource: Send + Sync {
    /// Opens the bundle behind `installed` and returns its exports.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::InitError`] when the bundle's code cannot be
    /// opened.
    fn open(&self, installed: &InstalledPluginInfo) -> HostResult<BundleExports>;

    /// The bundle's resource table. Defaults to an empty per-package table.
    fn resources(&self, installed: &InstalledPluginInfo) -> ResourceTable {
        ResourceTable::empty(installed.package.clone())
    }
}

/// In-process code source backed by pre-registered export tables.
#[derive(Default)]
pub struct StaticCodeSource {
    bundles: std::sync::Mutex<HashMap<PackageName, StaticBundle>>,
}

struct StaticBundle {
    exports: BundleExports,
    resources: Option<ResourceTable>,
}

impl StaticCodeSource {
    /// An empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the export table for `package`.
    pub fn insert(&self, package: PackageName, exports: BundleExports) {
        self.locked().insert(
            package,
            StaticBundle {
                exports,
                resources: None,
            },
        );
    }

    /// Registers exports plus a resource table for `package`.
    pub fn insert_with_resources(
        &self,
        package: PackageName,
        exports: BundleExports,
        resources: ResourceTable,
    ) {
        self.locked().insert(
            package,
            StaticBundle {
                exports,
                resources: Some(resources),
            },
        );
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, HashMap<PackageName, StaticBundle>> {
        self.bundles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl CodeSource for StaticCodeSource {
    fn open(&self, installed: &InstalledPluginInfo) -> HostResult<BundleExports> {
        self.locked()
            .get(&installed.package)
            .map(|bundle| bundle.exports.clone())
            .ok_or_else(|| HostError::InitError {
                package: installed.package.clone(),
                message: "no code registered for package".to_string(),
            })
    }

    fn resources(&self, installed: &InstalledPluginInfo) -> ResourceTable {
        self.locked()
            .get(&installed.package)
            .and_then(|bundle| bundle.resources.clone())
            .unwrap_or_else(|| ResourceTable::empty(installed.package.clone()))
    }
}

impl fmt::Debug for StaticCodeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCodeSource")
            .field("bundles", &self.locked().len())
            .finish()
    }
}

/// Instantiates the application export under `tag`.
///
/// # Errors
///
/// Returns [`HostError::ComponentClassNotFound`] when the tag is missing or
/// resolves to a different component kind.
pub fn instantiate_application(
    loader: &dyn ComponentLoader,
    tag: &str,
) -> HostResult<ApplicationCell> {
    match loader.resolve(tag) {
        Some(ComponentExport::Application(make)) => Ok(make()),
        other => Err(not_found("application", tag, other.as_ref())),
    }
}

/// Instantiates the activity export under `tag`.
///
/// # Errors
///
/// Returns [`HostError::ComponentClassNotFound`] when the tag is missing or
/// resolves to a different component kind.
pub fn instantiate_activity(loader: &dyn ComponentLoader, tag: &str) -> HostResult<ActivityCell> {
    match loader.resolve(tag) {
        Some(ComponentExport::Activity(make)) => Ok(make()),
        other => Err(not_found("activity", tag, other.as_ref())),
    }
}

/// Instantiates the service export under `tag`.
///
/// # Errors
///
/// Returns [`HostError::ComponentClassNotFound`] when the tag is missing or
/// resolves to a different component kind.
pub fn instantiate_service(loader: &dyn ComponentLoader, tag: &str) -> HostResult<ServiceCell> {
    match loader.resolve(tag) {
        Some(ComponentExport::Service(make)) => Ok(make()),
        other => Err(not_found("service", tag, other.as_ref())),
    }
}

/// Instantiates the provider export under `tag`.
///
/// # Errors
///
/// Returns [`HostError::ComponentClassNotFound`] when the tag is missing or
/// resolves to a different component kind.
pub fn instantiate_provider(loader: &dyn ComponentLoader, tag: &str) -> HostResult<ProviderCell> {
    match loader.resolve(tag) {
        Some(ComponentExport::Provider(make)) => Ok(make()),
        other => Err(not_found("provider", tag, other.as_ref())),
    }
}

/// Instantiates the receiver export under `tag`.
///
/// # Errors
///
/// Returns [`HostError::ComponentClassNotFound`] when the tag is missing or
/// resolves to a different component kind.
pub fn instantiate_receiver(loader: &dyn ComponentLoader, tag: &str) -> HostResult<ReceiverCell> {
    match loader.resolve(tag) {
        Some(ComponentExport::Receiver(make)) => Ok(make()),
        other => Err(not_found("receiver", tag, other.as_ref())),
    }
}

fn not_found(expected: &str, tag: &str, found: Option<&ComponentExport>) -> HostError {
    if let Some(export) = found {
        warn!(
            tag,
            expected,
            found = export.kind_name(),
            "Tag resolves to a different component kind"
        );
    }
    HostError::ComponentClassNotFound {
        tag: tag.to_string(),
    }
}
