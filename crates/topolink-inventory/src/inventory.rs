//! Accelerator inventory interface

use crate::config::{InventoryBackend, InventoryConfig};
use crate::{InventoryError, Result};

use async_trait::async_trait;
use topolink_core::{Device, TopoEdge};
use tracing::info;

/// Trait defining the interface to the node's accelerator inventory
#[async_trait]
pub trait AcceleratorInventory: Send + Sync {
    /// Enumerate the physical accelerators on this node
    async fn enumerate(&self) -> Result<Vec<Device>>;

    /// Measure the pairwise interconnect between all enumerated devices
    async fn measure_topology(&self) -> Result<Vec<TopoEdge>>;
}

/// Create a backend-specific inventory
pub fn create_inventory(config: &InventoryConfig) -> Result<Box<dyn AcceleratorInventory>> {
    config.validate().map_err(InventoryError::Configuration)?;

    info!("Creating accelerator inventory for backend: {}", config.backend);

    match config.backend {
        InventoryBackend::Mock => {
            let inventory = crate::mock::MockInventory::new(config.device_count);
            Ok(Box::new(inventory))
        }
    }
}

/// Create the error-event source matching the configured backend
pub fn create_error_source(
    config: &InventoryConfig,
) -> Result<Box<dyn crate::events::ErrorEventSource>> {
    match config.backend {
        // The mock backend has no hardware error stream.
        InventoryBackend::Mock => Ok(Box::new(crate::events::IdleErrorSource)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_mock_inventory() {
        let config = InventoryConfig::default().with_device_count(4);
        let inventory = create_inventory(&config).unwrap();

        let devices = inventory.enumerate().await.unwrap();
        assert_eq!(devices.len(), 4);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = InventoryConfig::default().with_device_count(0);
        assert!(create_inventory(&config).is_err());
    }
}
