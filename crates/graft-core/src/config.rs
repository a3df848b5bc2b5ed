//! Host configuration.
//!
//! A hosting process carries one immutable [`HostConfig`], installed at
//! attach time via [`init`] and readable anywhere through [`get`]. Reads
//! before [`init`] see the defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::info;

use crate::error::{CoreError, CoreResult};

/// How plugin components are distributed across OS processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessTopology {
    /// Every plugin process claims a dedicated stub process, renamed to the
    /// plugin's declared process name.
    #[default]
    Standalone,
    /// The host process plus one shared plugin process.
    Dual,
}

/// Process-wide framework configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Process distribution model.
    pub topology: ProcessTopology,
    /// Whether system-service lookups are interposed on in this process.
    pub intercept_service_lookup: bool,
    /// Whether plugin applications receive a host-substituted context at
    /// attach time.
    pub substitute_host_context: bool,
    /// Declarative invoker table: service name to factory tag.
    pub invokers: BTreeMap<String, String>,
}

impl HostConfig {
    /// Parse a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigParse`] on malformed TOML.
    pub fn from_toml_str(text: &str) -> CoreResult<Self> {
        toml::from_str(text).map_err(|e| CoreError::ConfigParse {
            message: e.to_string(),
        })
    }
}

static CONFIG: OnceLock<HostConfig> = OnceLock::new();

/// Install the process-wide configuration. Called once, at attach.
///
/// # Errors
///
/// Returns [`CoreError::ConfigAlreadySet`] on a second call.
pub fn init(config: HostConfig) -> CoreResult<()> {
    let topology = config.topology;
    CONFIG
        .set(config)
        .map_err(|_| CoreError::ConfigAlreadySet)?;
    info!(?topology, "Host configuration installed");
    Ok(())
}

/// The process-wide configuration, or the defaults if none was installed.
#[must_use]
pub fn get() -> &'static HostConfig {
    static DEFAULT: OnceLock<HostConfig> = OnceLock::new();
    CONFIG
        .get()
        .unwrap_or_else(|| DEFAULT.get_or_init(HostConfig::default))
}
