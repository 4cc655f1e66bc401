//! Link configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading a [`LinkConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Device matching and timing parameters.
///
/// Every field has a default, so a YAML document only needs the values it
/// overrides:
///
/// ```yaml
/// transfer_timeout_ms: 250
/// read_wait_cycles: 10
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// USB vendor id to match.
    pub vendor_id: u16,
    /// USB product id to match.
    pub product_id: u16,
    /// Exact number of interfaces a matching device exposes.
    pub interface_count: usize,
    /// Timeout of a single bulk transfer.
    pub transfer_timeout_ms: u64,
    /// Upper bound on bytes requested by one read.
    pub read_buffer_size: usize,
    /// Empty reads tolerated before an exchange fails with a read timeout.
    pub read_wait_cycles: u32,
    /// Cadence of the discovery poll loop.
    pub poll_interval_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            vendor_id: 0x2c97,
            product_id: 0x0001,
            interface_count: 1,
            transfer_timeout_ms: 1000,
            read_buffer_size: 4096,
            read_wait_cycles: 60,
            poll_interval_ms: 1000,
        }
    }
}

impl LinkConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn with_device_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_read_wait_cycles(mut self, cycles: u32) -> Self {
        self.read_wait_cycles = cycles;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Timeout of a single bulk transfer.
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    /// Cadence of the discovery poll loop.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
