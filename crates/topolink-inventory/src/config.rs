//! Inventory configuration

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which inventory backend enumerates the node's accelerators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventoryBackend {
    /// Deterministic synthetic devices for testing and bring-up
    Mock,
}

impl fmt::Display for InventoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventoryBackend::Mock => write!(f, "mock"),
        }
    }
}

/// Inventory configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Backend used to enumerate devices and measure topology
    pub backend: InventoryBackend,

    /// Number of synthetic devices the mock backend exposes
    pub device_count: usize,

    /// Skip spawning the error watcher entirely
    pub disable_health_events: bool,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            backend: InventoryBackend::Mock,
            device_count: 8,
            disable_health_events: false,
        }
    }
}

impl InventoryConfig {
    /// Create a configuration for the given backend
    pub fn new(backend: InventoryBackend) -> Self {
        Self {
            backend,
            ..Default::default()
        }
    }

    /// Set the synthetic device count
    pub fn with_device_count(mut self, count: usize) -> Self {
        self.device_count = count;
        self
    }

    /// Disable health-event watching
    pub fn with_health_events_disabled(mut self, disabled: bool) -> Self {
        self.disable_health_events = disabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.device_count == 0 {
            return Err("device count must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InventoryConfig::default();
        assert_eq!(config.backend, InventoryBackend::Mock);
        assert_eq!(config.device_count, 8);
        assert!(!config.disable_health_events);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_helpers() {
        let config = InventoryConfig::new(InventoryBackend::Mock)
            .with_device_count(4)
            .with_health_events_disabled(true);

        assert_eq!(config.device_count, 4);
        assert!(config.disable_health_events);
    }

    #[test]
    fn test_zero_devices_invalid() {
        let config = InventoryConfig::default().with_device_count(0);
        assert!(config.validate().is_err());
    }
}
