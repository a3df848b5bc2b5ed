//! The in-memory install index.
//!
//! Knows every installed bundle and answers component resolution over the
//! installed manifests. Install state is not persisted: a coordinator
//! restart starts from an empty index.

use dashmap::DashMap;
use graft_core::{
    ComponentDescriptor, ComponentKind, InstalledPluginInfo, Intent, PackageManifest, PackageName,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::CoordResult;

/// Install records keyed by package, with intent resolution.
#[derive(Default)]
pub struct InstallIndex {
    plugins: DashMap<PackageName, Arc<InstalledPluginInfo>>,
}

impl InstallIndex {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the bundle at `bundle_path` and add it to the index.
    ///
    /// Reinstalling a package replaces the previous record
    /// (last-writer-wins).
    ///
    /// # Errors
    ///
    /// Returns an error when the bundle manifest cannot be read or parsed.
    pub fn install(&self, bundle_path: &Path) -> CoordResult<Arc<InstalledPluginInfo>> {
        let manifest = PackageManifest::load(bundle_path)?;
        let info = Arc::new(InstalledPluginInfo::from_bundle(
            bundle_path.to_path_buf(),
            manifest,
        ));
        let replaced = self
            .plugins
            .insert(info.package.clone(), Arc::clone(&info))
            .is_some();
        info!(
            package = %info.package,
            version = %info.version,
            replaced,
            "Installed plugin bundle"
        );
        Ok(info)
    }

    /// Remove a package, returning its record if it was installed.
    pub fn uninstall(&self, package: &PackageName) -> Option<Arc<InstalledPluginInfo>> {
        let removed = self.plugins.remove(package).map(|(_, info)| info);
        if removed.is_some() {
            info!(package = %package, "Uninstalled plugin");
        } else {
            debug!(package = %package, "Uninstall for package that is not installed");
        }
        removed
    }

    /// The install record of one package.
    #[must_use]
    pub fn get(&self, package: &PackageName) -> Option<Arc<InstalledPluginInfo>> {
        self.plugins.get(package).map(|entry| Arc::clone(&entry))
    }

    /// All install records, ordered by package name.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<InstalledPluginInfo>> {
        let mut infos: Vec<_> = self
            .plugins
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        infos.sort_by(|a, b| a.package.cmp(&b.package));
        infos
    }

    /// Number of installed packages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// All components of `kind` matching `intent`, ordered by package name
    /// then declaration order.
    ///
    /// An explicit intent matches at most the declared component it names.
    /// An implicit intent matches every component whose action filters
    /// contain the intent action. Resolution never invents descriptors.
    #[must_use]
    pub fn query(&self, kind: ComponentKind, intent: &Intent) -> Vec<ComponentDescriptor> {
        if let Some(component) = intent.component() {
            return self
                .get(component.package())
                .and_then(|info| info.manifest.component_named(component, kind).cloned())
                .into_iter()
                .collect();
        }
        let Some(action) = intent.action() else {
            return Vec::new();
        };
        let mut hits = Vec::new();
        for info in self.all() {
            for descriptor in info.manifest.components_of(kind) {
                if descriptor.matches_action(action) {
                    hits.push(descriptor.clone());
                }
            }
        }
        hits
    }

    /// The best-matching component of `kind` for `intent`, if any.
    #[must_use]
    pub fn resolve(&self, kind: ComponentKind, intent: &Intent) -> Option<ComponentDescriptor> {
        self.query(kind, intent).into_iter().next()
    }
}

impl std::fmt::Debug for InstallIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallIndex")
            .field("installed", &self.plugins.len())
            .finish()
    }
}
