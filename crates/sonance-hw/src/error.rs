//! Hardware error types.

use sonance_core::GatewayError;
use thiserror::Error;

/// Hardware error type.
#[derive(Debug, Error)]
pub enum HwError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Permission denied - check udev rules")]
    PermissionDenied,

    #[error("USB error: {0}")]
    UsbError(#[from] rusb::Error),

    #[error("ALSA error: {0}")]
    AlsaError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for hardware operations.
pub type HwResult<T> = Result<T, HwError>;

impl From<HwError> for GatewayError {
    fn from(err: HwError) -> Self {
        match err {
            HwError::DeviceNotFound(name) => Self::DeviceNotFound(name),
            other => Self::Device(other.to_string()),
        }
    }
}
