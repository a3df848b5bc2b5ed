//! Package and component identities.
//!
//! A [`PackageName`] identifies an installable plugin package. A
//! [`ComponentName`] identifies one component inside a package, in the
//! flattened string form `"com.example.pkg/ComponentName"`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};

/// A validated plugin package name.
///
/// Package names are reverse-domain style: at least two dot-separated
/// segments, each starting with a lowercase letter and containing only
/// lowercase alphanumerics, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PackageName(String);

/// Deserialize with validation; rejects malformed names arriving over the
/// wire or from crafted manifests.
impl<'de> Deserialize<'de> for PackageName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl PackageName {
    /// Maximum accepted length, matching platform package-name limits.
    pub const MAX_LEN: usize = 255;

    /// Create a new `PackageName`, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPackageName`] if the name is empty, too
    /// long, not dot-segmented, or contains invalid characters.
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Create a `PackageName` without validation (for tests and internal use).
    #[must_use]
    pub fn from_static(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner `String`.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Check whether a string is a valid package name without constructing one.
    #[must_use]
    pub fn is_valid(name: &str) -> bool {
        Self::validate(name).is_ok()
    }

    fn invalid(name: &str, reason: impl Into<String>) -> CoreError {
        CoreError::InvalidPackageName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Validate that a package name string is well-formed.
    fn validate(name: &str) -> CoreResult<()> {
        if name.is_empty() {
            return Err(Self::invalid(name, "must not be empty"));
        }
        if name.len() > Self::MAX_LEN {
            return Err(Self::invalid(name, "exceeds maximum length"));
        }
        let segments: Vec<&str> = name.split('.').collect();
        if segments.len() < 2 {
            return Err(Self::invalid(
                name,
                "must contain at least two dot-separated segments",
            ));
        }
        for segment in segments {
            if segment.is_empty() {
                return Err(Self::invalid(name, "segments must not be empty"));
            }
            let mut chars = segment.chars();
            if let Some(first) = chars.next()
                && !first.is_ascii_lowercase()
            {
                return Err(Self::invalid(
                    name,
                    "segments must start with a lowercase letter",
                ));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
            {
                return Err(Self::invalid(
                    name,
                    format!("segment '{segment}' contains invalid characters"),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The kinds of dispatchable plugin components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// A user-facing screen with a create/destroy lifecycle
    Activity,
    /// A background component that can be started, stopped and bound
    Service,
    /// A data endpoint identified by an authority, created once per process
    Provider,
    /// A broadcast handler matched by action filters
    Receiver,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Activity => "activity",
            Self::Service => "service",
            Self::Provider => "provider",
            Self::Receiver => "receiver",
        };
        write!(f, "{s}")
    }
}

/// A fully-qualified component identity: owning package plus component name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentName {
    package: PackageName,
    name: String,
}

impl ComponentName {
    /// Create a component name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidComponentName`] if `name` is empty or
    /// contains `/`.
    pub fn new(package: PackageName, name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::InvalidComponentName {
                name,
                reason: "must not be empty".to_string(),
            });
        }
        if name.contains('/') {
            return Err(CoreError::InvalidComponentName {
                name,
                reason: "must not contain '/'".to_string(),
            });
        }
        Ok(Self { package, name })
    }

    /// The owning package.
    #[must_use]
    pub fn package(&self) -> &PackageName {
        &self.package
    }

    /// The component's short name within its package.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flatten to the canonical `"package/Name"` string form.
    #[must_use]
    pub fn flatten(&self) -> String {
        format!("{}/{}", self.package, self.name)
    }

    /// Parse the canonical `"package/Name"` string form.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidComponentName`] when the separator is
    /// missing, or [`CoreError::InvalidPackageName`] when the package half
    /// fails validation.
    pub fn unflatten(flat: &str) -> CoreResult<Self> {
        let Some((pkg, name)) = flat.split_once('/') else {
            return Err(CoreError::InvalidComponentName {
                name: flat.to_string(),
                reason: "missing '/' separator".to_string(),
            });
        };
        Self::new(PackageName::new(pkg)?, name)
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.name)
    }
}

impl Serialize for ComponentName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.flatten())
    }
}

impl<'de> Deserialize<'de> for ComponentName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::unflatten(&s).map_err(serde::de::Error::custom)
    }
}
