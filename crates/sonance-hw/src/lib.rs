//! Sonance hardware - gateways and event source adapters.
//!
//! Gateways realize commands on the machine: [`AlsaMixer`] drives the ALSA
//! mixer through `amixer`, [`HubPower`] switches USB hub port power.
//! Adapters turn hardware input into bus events: [`LircAdapter`] reads the
//! `lircd` socket, [`InputDeviceAdapter`] reads an evdev device, and the
//! monitors watch `/proc/asound` for playback and sink hotplug.

pub mod alsa;
pub mod error;
pub mod hub;
pub mod input;
pub mod lirc;
pub mod monitor;

pub use alsa::AlsaMixer;
pub use error::{HwError, HwResult};
pub use hub::HubPower;
pub use input::InputDeviceAdapter;
pub use lirc::LircAdapter;
pub use monitor::{HotplugWatcher, PlaybackMonitor};

use std::time::Duration;

/// Delay before an adapter retries a lost device or socket.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
