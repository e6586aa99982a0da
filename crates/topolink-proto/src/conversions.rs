//! Conversions between domain types and generated protobuf types

use crate::v1;
use topolink_core::{Device, Health};

impl From<Health> for v1::Health {
    fn from(health: Health) -> Self {
        match health {
            Health::Healthy => v1::Health::Healthy,
            Health::Unhealthy => v1::Health::Unhealthy,
        }
    }
}

impl From<v1::Health> for Health {
    fn from(health: v1::Health) -> Self {
        match health {
            v1::Health::Healthy => Health::Healthy,
            v1::Health::Unhealthy => Health::Unhealthy,
        }
    }
}

impl From<&Device> for v1::Device {
    fn from(device: &Device) -> Self {
        v1::Device {
            id: device.id.clone(),
            health: v1::Health::from(device.health) as i32,
        }
    }
}

impl From<Device> for v1::Device {
    fn from(device: Device) -> Self {
        v1::Device::from(&device)
    }
}

impl From<&v1::Device> for Device {
    fn from(device: &v1::Device) -> Self {
        // An out-of-range enum value is treated as unhealthy, the
        // conservative reading.
        let health = v1::Health::try_from(device.health)
            .map(Health::from)
            .unwrap_or(Health::Unhealthy);

        Device {
            id: device.id.clone(),
            health,
        }
    }
}

/// Convert a registry snapshot into the wire device list
pub fn devices_to_proto(devices: &[Device]) -> Vec<v1::Device> {
    devices.iter().map(v1::Device::from).collect()
}
