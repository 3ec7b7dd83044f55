//! Sonance IPC - Unix socket control protocol and client library.
//!
//! This crate defines the local control protocol spoken between the daemon
//! and desktop tooling: newline-delimited JSON requests, responses and
//! subscribed events.

pub mod client;
pub mod error;
pub mod events;
pub mod messages;
pub mod server;

pub use client::IpcClient;
pub use error::{IpcError, IpcResult};
pub use events::{Event, EventType, MuteChangedData, SinkChangedData, VolumeChangedData};
pub use messages::{ErrorInfo, Method, Request, Response};
pub use server::{IpcServer, PendingRequest};

use std::path::PathBuf;

/// Longest accepted line on the socket.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Get the default socket path.
///
/// Uses `$XDG_RUNTIME_DIR/sonance/daemon.sock` or falls back to
/// `/run/user/$UID/sonance/daemon.sock`.
#[must_use]
#[allow(unsafe_code)] // libc::getuid() is safe to call
pub fn socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("sonance/daemon.sock")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/run/user/{uid}/sonance/daemon.sock"))
    }
}
