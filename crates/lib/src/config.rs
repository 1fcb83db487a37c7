//! Daemon configuration and well-known paths.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Configuration root of the daemon.
pub const CONFIG_ROOT: &str = "/etc/ctrbuild";
/// Path of the main daemon configuration file.
pub const CONFIGURATION_PATH: &str = "/etc/ctrbuild/configuration.toml";
/// Path of the registry configuration.
pub const REGISTRY_CONFIG_PATH: &str = "/etc/ctrbuild/registries.toml";
/// Default persistent data root.
pub const DEFAULT_DATA_ROOT: &str = "/var/lib/ctrbuild";
/// Default runtime state root.
pub const DEFAULT_RUN_ROOT: &str = "/var/run/ctrbuild";

/// The serialized daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Persistent data root holding the image store.
    pub data_root: Utf8PathBuf,
    /// Runtime state root.
    pub run_root: Utf8PathBuf,
    /// Default log level when none is given on the command line.
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_root: DEFAULT_DATA_ROOT.into(),
            run_root: DEFAULT_RUN_ROOT.into(),
            log_level: "warn".into(),
        }
    }
}

impl DaemonConfig {
    /// Load the configuration file; a missing file yields the defaults.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Reading {path}"))?;
        toml::from_str(&contents).with_context(|| format!("Parsing {path}"))
    }
}
