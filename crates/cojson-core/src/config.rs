//! Node-local configuration (AMB-6). Governs only local behavior; none of
//! these values are part of the wire protocol.

use crate::error::{CoJsonError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for a single node instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Per-peer outbound queue high-water mark before `KNOWN` coalescing and
    /// `CONTENT` fragmentation kick in (§4.8).
    pub sync_high_water_mark: usize,
    /// Maximum transactions per `CONTENT` fragment once backpressure engages.
    pub content_fragment_size: usize,
    /// Per-message acknowledgement timeout, in milliseconds, before a peer's
    /// tracked known state is pessimistically reset (§5).
    pub ack_timeout_millis: u64,
    /// Interval, in milliseconds, after which a CoValue blocked on an
    /// unknown dependency is surfaced to application code as unloadable (§7).
    pub unresolved_dependency_interval_millis: u64,
    /// Where the file-backed storage reference implementation keeps its data.
    pub storage_path: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sync_high_water_mark: 1000,
            content_fragment_size: 100,
            ack_timeout_millis: 10_000,
            unresolved_dependency_interval_millis: 60_000,
            storage_path: None,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file, falling back to defaults for any
    /// field the file omits.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CoJsonError::invalid(format!("cannot read config file: {e}")))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| CoJsonError::invalid(format!("invalid config TOML: {e}")))
    }
}
