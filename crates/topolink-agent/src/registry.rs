//! Device registry
//!
//! Canonical list of advertised devices and their health flags. Health is
//! mutated from exactly one place, the plugin's health-consumption loop;
//! the streaming and allocation paths only take snapshots. There is no
//! operation that returns a device to `Healthy`: once unhealthy, a device
//! stays unfit until the process restarts.

use std::sync::Arc;
use tokio::sync::RwLock;
use topolink_core::{Device, Health};
use tracing::info;

/// Shared registry of the node's advertised devices
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<Vec<Device>>>,
}

impl DeviceRegistry {
    /// Create a registry from the inventory's device list
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices: Arc::new(RwLock::new(devices)),
        }
    }

    /// Number of registered devices
    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Check whether a device id is registered
    pub async fn contains(&self, id: &str) -> bool {
        self.devices.read().await.iter().any(|d| d.id == id)
    }

    /// All registered device ids, in registration order
    pub async fn ids(&self) -> Vec<String> {
        self.devices.read().await.iter().map(|d| d.id.clone()).collect()
    }

    /// Consistent copy of the current device list
    pub async fn snapshot(&self) -> Vec<Device> {
        self.devices.read().await.clone()
    }

    /// Mark a device unhealthy.
    ///
    /// Returns `true` only when this call performed the Healthy→Unhealthy
    /// transition; repeated calls and unknown ids return `false`.
    pub async fn mark_unhealthy(&self, id: &str) -> bool {
        let mut devices = self.devices.write().await;
        match devices.iter_mut().find(|d| d.id == id) {
            Some(device) if device.health == Health::Healthy => {
                device.health = Health::Unhealthy;
                info!("Device {} marked unhealthy", id);
                true
            }
            _ => false,
        }
    }
}
