//! evdev input device adapter.
//!
//! Media keys on a keyboard, a USB volume knob or a Bluetooth remote all
//! show up as `EV_KEY` events. Key codes are passed on by their kernel
//! name (`KEY_VOLUMEUP`), which is what the keymap binds.

use std::path::PathBuf;

use evdev::{Device, InputEventKind, Key};
use sonance_core::{BusPublisher, EventKind, InputEvent, SourceId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::RECONNECT_DELAY;
use crate::error::HwResult;

/// Default input device.
pub const DEFAULT_DEVICE: &str = "/dev/input/event0";

/// Reads key events from one evdev device.
#[derive(Debug, Clone)]
pub struct InputDeviceAdapter {
    path: PathBuf,
    grab: bool,
}

impl InputDeviceAdapter {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), grab: false }
    }

    /// Take exclusive access so keys don't also reach the console.
    #[must_use]
    pub fn with_grab(mut self, grab: bool) -> Self {
        self.grab = grab;
        self
    }

    fn open(&self) -> HwResult<evdev::EventStream> {
        let mut device = Device::open(&self.path)?;
        if self.grab {
            device.grab()?;
        }
        info!(path = ?self.path, name = device.name().unwrap_or("unknown"), "Input device opened");
        Ok(device.into_event_stream()?)
    }

    /// Run until `shutdown` is cancelled, reopening the device if it
    /// disappears.
    pub async fn run(self, publisher: BusPublisher, shutdown: CancellationToken) {
        loop {
            match self.open() {
                Ok(mut stream) => loop {
                    let next = tokio::select! {
                        () = shutdown.cancelled() => {
                            debug!("Input adapter stopped");
                            return;
                        }
                        next = stream.next_event() => next,
                    };
                    match next {
                        Ok(event) => {
                            if let InputEventKind::Key(key) = event.kind()
                                && let Some(kind) = key_event(key, event.value())
                            {
                                trace!(?kind, "Key event");
                                publisher.publish(InputEvent::new(SourceId::InputDevice, kind));
                            }
                        }
                        Err(e) => {
                            warn!(path = ?self.path, error = %e, "Input device read failed");
                            break;
                        }
                    }
                },
                Err(e) => warn!(path = ?self.path, error = %e, "Cannot open input device"),
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
        debug!("Input adapter stopped");
    }
}

/// Translate a key event value: 0 release, 1 press, 2 autorepeat.
#[must_use]
pub fn key_event(key: Key, value: i32) -> Option<EventKind> {
    let name = format!("{key:?}");
    match value {
        0 => Some(EventKind::ButtonUp(name)),
        1 => Some(EventKind::ButtonDown(name)),
        2 => Some(EventKind::ButtonRepeat(name)),
        _ => None,
    }
}
