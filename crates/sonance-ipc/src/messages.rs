//! IPC message types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sonance_core::SinkId;

use crate::events::EventType;

/// Request envelope sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique request ID for matching responses
    pub id: u64,
    /// The method to invoke
    pub method: Method,
}

/// Response envelope sent from daemon to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this is responding to
    pub id: u64,
    /// Result of the request
    pub result: Result<Value, ErrorInfo>,
}

/// Error information in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code (HTTP-style)
    pub code: u16,
    /// Human-readable error message
    pub message: String,
}

impl ErrorInfo {
    /// Create a new error.
    #[must_use]
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl From<&sonance_core::Error> for ErrorInfo {
    fn from(err: &sonance_core::Error) -> Self {
        Self::new(err.status_code(), err.to_string())
    }
}

/// Methods that can be invoked via IPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum Method {
    // State queries
    /// Get the full audio state snapshot
    GetState,
    /// Get the current volume (0 - 100)
    GetVolume,
    /// List known sinks in order
    ListSinks,

    // Volume and mute
    /// Set an absolute volume (0 - 100)
    SetVolume { level: i64 },
    /// Raise volume; uses the daemon's default step when `step` is omitted
    VolumeUp {
        #[serde(default)]
        step: Option<u8>,
    },
    /// Lower volume; uses the daemon's default step when `step` is omitted
    VolumeDown {
        #[serde(default)]
        step: Option<u8>,
    },
    /// Flip the mute state
    ToggleMute,
    /// Set the mute state
    SetMute { muted: bool },

    // Sinks
    /// Make a sink active
    SelectSink { sink: SinkId },
    /// Advance to the next sink
    CycleSink,
    /// Switch hub power for a sink (the active one when omitted)
    SetPower {
        #[serde(default)]
        sink: Option<SinkId>,
        on: bool,
    },

    // Subscriptions
    /// Subscribe to event types
    Subscribe { events: Vec<EventType> },
    /// Unsubscribe from event types
    Unsubscribe { events: Vec<EventType> },
}
