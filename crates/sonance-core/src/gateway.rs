//! Capabilities the dispatcher uses to reach real hardware.
//!
//! Both gateways may be slow and may fail. The dispatcher bounds every call
//! with a timeout and never issues two calls at once.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::state::{AudioState, SinkId};

/// Error reported by a gateway implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Gateway call timed out")]
    Timeout,
}

/// A change to realize on the mixer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkChange {
    /// Set the playback volume of a sink
    Volume { sink: SinkId, level: u8 },
    /// Set the mute switch of a sink
    Mute { sink: SinkId, muted: bool },
    /// Route output to a sink, carrying the current volume and mute over
    Activate { sink: SinkId, volume: u8, muted: bool },
}

/// Mixer access.
pub trait AudioSinkGateway: Send + Sync + 'static {
    /// Read the hardware state at startup.
    fn current_state(&self) -> impl Future<Output = Result<AudioState, GatewayError>> + Send;

    /// Realize a change.
    fn apply(&self, change: &SinkChange) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// List the sinks currently present.
    fn enumerate_sinks(&self) -> impl Future<Output = Result<Vec<SinkId>, GatewayError>> + Send;
}

/// Hub port power switching.
pub trait PowerGateway: Send + Sync + 'static {
    /// Switch power for the port feeding `sink`.
    fn set_power(&self, sink: &SinkId, on: bool) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

impl<T: AudioSinkGateway> AudioSinkGateway for Arc<T> {
    fn current_state(&self) -> impl Future<Output = Result<AudioState, GatewayError>> + Send {
        (**self).current_state()
    }

    fn apply(&self, change: &SinkChange) -> impl Future<Output = Result<(), GatewayError>> + Send {
        (**self).apply(change)
    }

    fn enumerate_sinks(&self) -> impl Future<Output = Result<Vec<SinkId>, GatewayError>> + Send {
        (**self).enumerate_sinks()
    }
}

impl<T: PowerGateway> PowerGateway for Arc<T> {
    fn set_power(&self, sink: &SinkId, on: bool) -> impl Future<Output = Result<(), GatewayError>> + Send {
        (**self).set_power(sink, on)
    }
}
