//! Mock inventory for testing and bring-up

use crate::inventory::AcceleratorInventory;
use crate::Result;

use async_trait::async_trait;
use topolink_core::{Device, LinkClass, TopoEdge};
use tracing::{debug, info};

/// Deterministic synthetic inventory.
///
/// Devices are laid out as boards of two linked by NVLink, boards grouped
/// in fours under a shared PCIe switch, and groups bridged across NUMA
/// nodes. The same configuration always produces the same devices and
/// edges, so allocation outcomes are reproducible.
pub struct MockInventory {
    device_count: usize,
    overrides: Option<(Vec<Device>, Vec<TopoEdge>)>,
}

impl MockInventory {
    /// Create a mock inventory with the given device count
    pub fn new(device_count: usize) -> Self {
        info!("Creating mock inventory with {} devices", device_count);
        Self {
            device_count,
            overrides: None,
        }
    }

    /// Create a mock inventory that reports exactly the given devices and
    /// edges, for tests that need full control of the topology
    pub fn with_fixed(devices: Vec<Device>, edges: Vec<TopoEdge>) -> Self {
        Self {
            device_count: devices.len(),
            overrides: Some((devices, edges)),
        }
    }

    fn device_id(index: usize) -> String {
        format!(
            "GPU-{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            0x92d93cd6u32,
            0xe41f,
            0x6884,
            0x6748,
            0x3738a9760000u64 + index as u64
        )
    }

    fn link_class(i: usize, j: usize) -> LinkClass {
        if i / 2 == j / 2 {
            // Same board
            LinkClass::NvLink
        } else if i / 4 == j / 4 {
            // Same PCIe switch group
            LinkClass::SingleSwitch
        } else {
            LinkClass::CrossNuma
        }
    }
}

#[async_trait]
impl AcceleratorInventory for MockInventory {
    async fn enumerate(&self) -> Result<Vec<Device>> {
        if let Some((devices, _)) = &self.overrides {
            return Ok(devices.clone());
        }

        let devices: Vec<Device> = (0..self.device_count)
            .map(|i| Device::healthy(Self::device_id(i)))
            .collect();

        debug!("Enumerated {} mock devices", devices.len());
        Ok(devices)
    }

    async fn measure_topology(&self) -> Result<Vec<TopoEdge>> {
        if let Some((_, edges)) = &self.overrides {
            return Ok(edges.clone());
        }

        let mut edges = Vec::new();
        for i in 0..self.device_count {
            for j in (i + 1)..self.device_count {
                edges.push(TopoEdge::new(
                    Self::device_id(i),
                    Self::device_id(j),
                    Self::link_class(i, j),
                ));
            }
        }

        debug!("Measured {} mock edges", edges.len());
        Ok(edges)
    }
}
