//! # topolink-proto
//!
//! Protocol buffer definitions and generated gRPC bindings for topolink.
//!
//! This crate provides the API definitions for the broker's protocol
//! surface:
//! - Device Plugin API served by the broker over a local Unix socket
//! - Registration API consumed by the broker at startup
//!
//! Conversions between the generated types and the domain types in
//! `topolink-core` live in [`conversions`].

pub mod conversions;

// Generated protobuf code
pub mod v1 {
    tonic::include_proto!("topolink.v1");
}

// Re-export commonly used types for convenience (both server and client)
pub use v1::{
    device_plugin_client::DevicePluginClient,
    device_plugin_server::{DevicePlugin, DevicePluginServer},
    registration_client::RegistrationClient,
    registration_server::{Registration, RegistrationServer},
    AllocateRequest, AllocateResponse, ContainerAllocateRequest, ContainerAllocateResponse,
    Device, DevicePluginOptions, Empty, Health, ListAndWatchResponse, PreAllocateRequest,
    PreAllocateResponse, PreStartContainerRequest, PreStartContainerResponse, RegisterRequest,
};

/// Version of the device plugin API this crate defines
pub const API_VERSION: &str = "v1";

// Common error type for proto operations
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, ProtoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proto_creation() {
        let device = Device {
            id: "GPU-12345678".to_string(),
            health: Health::Healthy as i32,
        };

        assert_eq!(device.id, "GPU-12345678");
        assert_eq!(device.health, Health::Healthy as i32);
    }

    #[test]
    fn test_register_request_defaults() {
        let request = RegisterRequest {
            version: API_VERSION.to_string(),
            endpoint: "topolink.sock".to_string(),
            resource_name: "topolink.io/accel".to_string(),
            options: Some(DevicePluginOptions {
                pre_start_required: false,
                pre_allocate_required: false,
            }),
        };

        assert_eq!(request.version, "v1");
        assert!(!request.options.unwrap().pre_start_required);
    }
}
