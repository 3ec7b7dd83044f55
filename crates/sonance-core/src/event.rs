//! Normalized input events.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::command::AudioCommand;
use crate::error::Result;
use crate::state::AudioState;

/// Channel through which the dispatcher answers a direct command.
pub type Reply = oneshot::Sender<Result<AudioState>>;

/// Where an event came from.
///
/// Used to keep debounce state per source and for logging. Never used for
/// authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// Infrared remote decoded by LIRC
    RemoteIr,
    /// Generic input device (evdev)
    InputDevice,
    /// Local inter-process bus (Unix socket or D-Bus)
    Bus,
    /// Network HTTP API
    Http,
    /// Daemon-internal monitors (playback, sink hotplug)
    Hardware,
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RemoteIr => "remote_ir",
            Self::InputDevice => "input_device",
            Self::Bus => "bus",
            Self::Http => "http",
            Self::Hardware => "hardware",
        };
        f.write_str(name)
    }
}

/// What happened.
pub enum EventKind {
    /// A button was pressed
    ButtonDown(String),
    /// A button was released
    ButtonUp(String),
    /// Hardware auto-repeat for a held button
    ButtonRepeat(String),
    /// A one-shot command from an API caller, with an optional reply channel
    Direct(AudioCommand, Option<Reply>),
    /// The set of hardware sinks may have changed
    SinksChanged,
}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ButtonDown(code) => f.debug_tuple("ButtonDown").field(code).finish(),
            Self::ButtonUp(code) => f.debug_tuple("ButtonUp").field(code).finish(),
            Self::ButtonRepeat(code) => f.debug_tuple("ButtonRepeat").field(code).finish(),
            Self::Direct(cmd, reply) => {
                f.debug_struct("Direct").field("command", cmd).field("reply", &reply.is_some()).finish()
            }
            Self::SinksChanged => f.write_str("SinksChanged"),
        }
    }
}

/// A single event on the bus.
#[derive(Debug)]
pub struct InputEvent {
    pub source: SourceId,
    pub kind: EventKind,
    pub timestamp: Instant,
}

impl InputEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(source: SourceId, kind: EventKind) -> Self {
        Self { source, kind, timestamp: Instant::now() }
    }

    /// Create an event with an explicit timestamp.
    #[must_use]
    pub fn at(source: SourceId, kind: EventKind, timestamp: Instant) -> Self {
        Self { source, kind, timestamp }
    }

    /// A direct command whose result is sent back on the returned receiver.
    #[must_use]
    pub fn direct(source: SourceId, command: AudioCommand) -> (Self, oneshot::Receiver<Result<AudioState>>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(source, EventKind::Direct(command, Some(tx))), rx)
    }

    /// A direct command nobody waits on.
    #[must_use]
    pub fn fire_and_forget(source: SourceId, command: AudioCommand) -> Self {
        Self::new(source, EventKind::Direct(command, None))
    }
}
