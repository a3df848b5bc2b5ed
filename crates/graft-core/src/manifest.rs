//! Plugin package manifests and install records.
//!
//! Every plugin bundle carries a `graft.toml` at its root declaring the
//! package identity, the optional application entry, and the component
//! table. The coordinator parses manifests at install time and serves them
//! to hosting processes as part of [`InstalledPluginInfo`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};
use crate::package::{ComponentKind, ComponentName, PackageName};

/// Manifest file name inside a plugin bundle.
pub const MANIFEST_FILE: &str = "graft.toml";

/// A declared component record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Fully-qualified component identity.
    pub name: ComponentName,
    /// Component kind.
    pub kind: ComponentKind,
    /// Declared process. `None` means the package default; a leading `:`
    /// means a package-private process suffix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    /// Whether external packages may address this component.
    #[serde(default)]
    pub exported: bool,
    /// Action filters this component matches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    /// Provider authority. Only meaningful for [`ComponentKind::Provider`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
}

impl ComponentDescriptor {
    /// Resolve the effective process name for this component.
    ///
    /// `default` is the owning package's default process. A declared name
    /// starting with `:` is appended to the default as a private suffix.
    #[must_use]
    pub fn process_name(&self, default: &str) -> String {
        match self.process.as_deref() {
            None | Some("") => default.to_string(),
            Some(p) if p.starts_with(':') => format!("{default}{p}"),
            Some(p) => p.to_string(),
        }
    }

    /// Whether any of this component's action filters matches `action`.
    #[must_use]
    pub fn matches_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }
}

/// The declared application entry of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDescriptor {
    /// Owning package.
    pub package: PackageName,
    /// Declared application tag; `None` selects the default application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    /// Declared application process, same rules as component processes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
}

impl ApplicationDescriptor {
    /// Resolve the effective application process name.
    #[must_use]
    pub fn process_name(&self, default: &str) -> String {
        match self.process.as_deref() {
            None | Some("") => default.to_string(),
            Some(p) if p.starts_with(':') => format!("{default}{p}"),
            Some(p) => p.to_string(),
        }
    }
}

/// A parsed plugin manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Package identity.
    pub package: PackageName,
    /// Declared package version string.
    pub version: String,
    /// Application entry declaration.
    pub application: ApplicationDescriptor,
    /// Declared components.
    pub components: Vec<ComponentDescriptor>,
}

impl PackageManifest {
    /// Parse a manifest from TOML text. `origin` names the source for error
    /// messages (a file path, or a placeholder for in-memory text).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ManifestParse`] on malformed TOML, invalid
    /// names, or duplicate component declarations.
    pub fn from_toml_str(text: &str, origin: &str) -> CoreResult<Self> {
        let raw: RawManifest = toml::from_str(text).map_err(|e| CoreError::ManifestParse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        raw.into_manifest(origin)
    }

    /// Load and parse `graft.toml` from a bundle directory.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Io`] when the file cannot be read and
    /// [`CoreError::ManifestParse`] when it cannot be parsed.
    pub fn load(bundle_dir: &Path) -> CoreResult<Self> {
        let path = bundle_dir.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&text, &path.display().to_string())
    }

    /// The package's default process name (the package name itself).
    #[must_use]
    pub fn default_process(&self) -> &str {
        self.package.as_str()
    }

    /// Look up a component by its short name.
    #[must_use]
    pub fn component(&self, short_name: &str) -> Option<&ComponentDescriptor> {
        self.components.iter().find(|c| c.name.name() == short_name)
    }

    /// Look up a component by its fully-qualified name and kind.
    #[must_use]
    pub fn component_named(
        &self,
        name: &ComponentName,
        kind: ComponentKind,
    ) -> Option<&ComponentDescriptor> {
        self.components
            .iter()
            .find(|c| c.kind == kind && &c.name == name)
    }

    /// All components of one kind, in declaration order.
    pub fn components_of(&self, kind: ComponentKind) -> impl Iterator<Item = &ComponentDescriptor> {
        self.components.iter().filter(move |c| c.kind == kind)
    }

    /// First declared component of `kind` matching `action`, if any.
    #[must_use]
    pub fn resolve_action(&self, kind: ComponentKind, action: &str) -> Option<&ComponentDescriptor> {
        self.components_of(kind).find(|c| c.matches_action(action))
    }
}

/// Coordinator-issued record of an installed plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPluginInfo {
    /// Package identity.
    pub package: PackageName,
    /// Declared version string.
    pub version: String,
    /// Bundle root directory.
    pub bundle_path: PathBuf,
    /// Native/library payload directory inside the bundle.
    pub lib_dir: PathBuf,
    /// Private data directory assigned to the package.
    pub data_dir: PathBuf,
    /// Install timestamp.
    pub installed_at: DateTime<Utc>,
    /// The parsed manifest.
    pub manifest: PackageManifest,
}

impl InstalledPluginInfo {
    /// Build an install record for a bundle rooted at `bundle_path`.
    #[must_use]
    pub fn from_bundle(bundle_path: PathBuf, manifest: PackageManifest) -> Self {
        let lib_dir = bundle_path.join("lib");
        let data_dir = bundle_path.join("data");
        Self {
            package: manifest.package.clone(),
            version: manifest.version.clone(),
            bundle_path,
            lib_dir,
            data_dir,
            installed_at: Utc::now(),
            manifest,
        }
    }
}

// Raw TOML shapes. Component names in the file are short; conversion
// qualifies them against the declared package.

#[derive(Debug, Deserialize)]
struct RawManifest {
    package: PackageName,
    version: String,
    application: Option<RawApplication>,
    #[serde(default, rename = "component")]
    components: Vec<RawComponent>,
}

#[derive(Debug, Deserialize)]
struct RawApplication {
    entry: Option<String>,
    process: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawComponent {
    name: String,
    kind: ComponentKind,
    process: Option<String>,
    #[serde(default)]
    exported: bool,
    #[serde(default)]
    actions: Vec<String>,
    authority: Option<String>,
}

impl RawManifest {
    fn into_manifest(self, origin: &str) -> CoreResult<PackageManifest> {
        let parse_err = |message: String| CoreError::ManifestParse {
            path: origin.to_string(),
            message,
        };

        let mut seen: HashSet<&str> = HashSet::new();
        for raw in &self.components {
            if !seen.insert(raw.name.as_str()) {
                return Err(parse_err(format!(
                    "duplicate component declaration '{}'",
                    raw.name
                )));
            }
        }

        let mut components = Vec::with_capacity(self.components.len());
        for raw in self.components {
            let name = ComponentName::new(self.package.clone(), raw.name)
                .map_err(|e| parse_err(e.to_string()))?;
            components.push(ComponentDescriptor {
                name,
                kind: raw.kind,
                process: raw.process,
                exported: raw.exported,
                actions: raw.actions,
                authority: raw.authority,
            });
        }

        let application = match self.application {
            Some(app) => ApplicationDescriptor {
                package: self.package.clone(),
                entry: app.entry,
                process: app.process,
            },
            None => ApplicationDescriptor {
                package: self.package.clone(),
                entry: None,
                process: None,
            },
        };

        Ok(PackageManifest {
            package: self.package,
            version: self.version,
            application,
            components,
        })
    }
}
