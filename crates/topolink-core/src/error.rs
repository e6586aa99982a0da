//! Error handling for topolink core operations

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors produced by the topology model and the selection strategies
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    /// The usable device set cannot satisfy the requested count
    #[error("insufficient usable devices: requested {requested}, usable {usable}")]
    InsufficientDevices { requested: usize, usable: usize },

    /// A device identifier is not part of the known device set
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// The request is malformed
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CoreError::InsufficientDevices {
            requested: 4,
            usable: 2,
        };
        assert_eq!(
            error.to_string(),
            "insufficient usable devices: requested 4, usable 2"
        );

        let error = CoreError::UnknownDevice("GPU-0".to_string());
        assert_eq!(error.to_string(), "unknown device: GPU-0");
    }
}
