//! Configuration for the layered attestation APB.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ApbError;

/// Default location of the APB configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/layered-attest/apb.json";

/// Remote measurement timeout in seconds.
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 1000;

/// Configuration for the APB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApbConfig {
    /// ASP registry file.
    pub asp_registry: PathBuf,
    /// Place directory file.
    pub place_directory: PathBuf,
    /// Directory holding `<uuid>.json` measurement specs.
    pub spec_dir: PathBuf,
    /// Timeout for each remote measurement and contract verification.
    pub remote_timeout_secs: u64,
    /// Parent directory for measurement graphs (system temp dir if unset).
    pub graph_dir: Option<PathBuf>,
}

impl Default for ApbConfig {
    fn default() -> Self {
        Self {
            asp_registry: "/etc/layered-attest/asps.json".into(),
            place_directory: "/etc/layered-attest/places.json".into(),
            spec_dir: "/etc/layered-attest/specs".into(),
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            graph_dir: None,
        }
    }
}

impl ApbConfig {
    /// Load configuration from a JSON file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ApbError> {
        load_json(path)
    }

    /// Remote timeout as a duration.
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

/// Read and deserialize a JSON file, mapping failures to configuration errors.
pub(crate) fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ApbError> {
    let raw = std::fs::read(path)
        .map_err(|e| ApbError::config(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_slice(&raw)
        .map_err(|e| ApbError::config(format!("invalid JSON in {}: {e}", path.display())))
}
