//! # topolink-inventory
//!
//! Accelerator inventory boundary for topolink.
//!
//! This crate provides:
//! - The [`AcceleratorInventory`] trait: device enumeration and pairwise
//!   interconnect measurement
//! - A deterministic mock backend for environments without hardware
//! - The raw error-event source abstraction and the watcher that turns raw
//!   accelerator errors into broker health events
//!
//! Real hardware backends (NVML, DCGM, ...) live behind the same trait and
//! factory seam but are external collaborators of the broker core.

use thiserror::Error;

pub mod config;
pub mod events;
pub mod inventory;
pub mod mock;

// Re-export main types
pub use config::{InventoryBackend, InventoryConfig};
pub use events::{
    watch_errors, ErrorEventSource, HealthEvent, IdleErrorSource, MockErrorSource, RawErrorEvent,
};
pub use inventory::{create_error_source, create_inventory, AcceleratorInventory};
pub use mock::MockInventory;

/// Result type for inventory operations
pub type Result<T> = std::result::Result<T, InventoryError>;

/// Errors that can occur during inventory operations
#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("inventory backend not supported: {0}")]
    UnsupportedBackend(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("device enumeration failed: {0}")]
    EnumerationFailed(String),

    #[error("topology measurement failed: {0}")]
    MeasurementFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
