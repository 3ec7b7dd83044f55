//! Error types for Sonance core.

use thiserror::Error;

use crate::state::SinkId;

/// Core error type for command dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Volume out of range: {0} (must be 0-100)")]
    InvalidRange(i64),

    #[error("Unknown sink: {0}")]
    UnknownSink(SinkId),

    #[error("No sinks available")]
    NoSinksAvailable,

    #[error("Gateway failure: {0}")]
    GatewayFailure(String),

    #[error("Event queue overflow, {dropped} event(s) dropped")]
    QueueOverflow { dropped: u64 },

    #[error("Command dropped before it was applied")]
    CommandDropped,
}

impl Error {
    /// HTTP-style status code for reporting this error to API callers.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRange(_) | Self::UnknownSink(_) => 400,
            Self::NoSinksAvailable => 409,
            Self::GatewayFailure(_) | Self::QueueOverflow { .. } | Self::CommandDropped => 503,
        }
    }
}

/// Result type alias for Sonance core operations.
pub type Result<T> = std::result::Result<T, Error>;
