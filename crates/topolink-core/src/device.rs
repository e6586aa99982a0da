//! Device and health data structures

use serde::{Deserialize, Serialize};
use std::fmt;

/// Health status of an accelerator device
///
/// The transition is one-directional: a device that goes `Unhealthy` stays
/// unhealthy for the lifetime of the advertising process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Health {
    /// Device is usable
    Healthy,
    /// Device has failed and is permanently unfit until process restart
    Unhealthy,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Healthy => write!(f, "Healthy"),
            Health::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// A single accelerator device advertised by this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Opaque identifier, globally unique per physical accelerator
    pub id: String,

    /// Current health status
    pub health: Health,
}

impl Device {
    /// Create a new healthy device
    pub fn healthy(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            health: Health::Healthy,
        }
    }

    /// Check whether the device is currently healthy
    pub fn is_healthy(&self) -> bool {
        self.health == Health::Healthy
    }
}
