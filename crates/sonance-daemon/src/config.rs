//! Daemon configuration.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sonance_core::keymap::{self, KeyMapConfig};
use sonance_core::{DispatcherConfig, FilterConfig, KeyMap};

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub ipc: IpcConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub dbus: DbusConfig,
    #[serde(default)]
    pub lirc: LircConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub alsa: AlsaConfig,
    #[serde(default)]
    pub power: PowerConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    /// Per-source key bindings; the built-in map is used when absent
    #[serde(default)]
    pub keymap: Option<KeyMapConfig>,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonConfig {
    /// Log level, used when neither `--log-level` nor `RUST_LOG` is given
    pub log_level: Option<String>,
}

/// Event pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub queue_capacity: usize,
    pub repeat_window_ms: u64,
    pub min_repeat_interval_ms: u64,
    pub repeat_every: u32,
    pub long_press_ms: u64,
    pub gateway_timeout_ms: u64,
    /// Step for volume up/down when the caller gives none
    pub volume_step: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: sonance_core::bus::DEFAULT_CAPACITY,
            repeat_window_ms: 400,
            min_repeat_interval_ms: 80,
            repeat_every: 1,
            long_press_ms: 3000,
            gateway_timeout_ms: 2000,
            volume_step: 5,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn filter(&self) -> FilterConfig {
        FilterConfig {
            repeat_window: Duration::from_millis(self.repeat_window_ms),
            min_repeat_interval: Duration::from_millis(self.min_repeat_interval_ms),
            repeat_every: self.repeat_every.max(1),
            long_press: Duration::from_millis(self.long_press_ms),
        }
    }

    #[must_use]
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig { gateway_timeout: Duration::from_millis(self.gateway_timeout_ms) }
    }
}

/// Unix socket control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Socket path (defaults to `$XDG_RUNTIME_DIR/sonance/daemon.sock`)
    pub path: Option<PathBuf>,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self { enabled: true, path: None }
    }
}

/// HTTP control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: Vec<SocketAddr>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { enabled: true, bind: default_bind() }
    }
}

fn default_bind() -> Vec<SocketAddr> {
    vec![
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 8080)),
    ]
}

/// D-Bus control surface (needs the `dbus` feature).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for DbusConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// IR remote via `lircd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LircConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_lirc_socket")]
    pub socket: PathBuf,
}

impl Default for LircConfig {
    fn default() -> Self {
        Self { enabled: true, socket: default_lirc_socket() }
    }
}

fn default_lirc_socket() -> PathBuf {
    PathBuf::from(sonance_hw::lirc::DEFAULT_SOCKET)
}

/// evdev input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_input_device")]
    pub device: PathBuf,
    /// Grab the device exclusively
    #[serde(default)]
    pub grab: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { enabled: false, device: default_input_device(), grab: false }
    }
}

fn default_input_device() -> PathBuf {
    PathBuf::from(sonance_hw::input::DEFAULT_DEVICE)
}

/// ALSA mixer and sink discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlsaConfig {
    /// Simple mixer control driven on every card
    #[serde(default = "default_control")]
    pub control: String,
    /// Card ids treated as sinks; empty means all cards
    #[serde(default)]
    pub cards: Vec<String>,
    /// Card activated at startup when present
    pub default_sink: Option<String>,
    /// Card list poll period; 0 disables hotplug detection
    #[serde(default = "default_hotplug_poll_ms")]
    pub hotplug_poll_ms: u64,
}

impl Default for AlsaConfig {
    fn default() -> Self {
        Self {
            control: default_control(),
            cards: Vec::new(),
            default_sink: None,
            hotplug_poll_ms: default_hotplug_poll_ms(),
        }
    }
}

fn default_control() -> String {
    "Master".to_string()
}

fn default_hotplug_poll_ms() -> u64 {
    2000
}

/// USB hub port power.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Hub USB vendor id (hex)
    #[serde(default = "default_vid")]
    pub vendor_id: String,
    /// Hub USB product id (hex)
    #[serde(default = "default_pid")]
    pub product_id: String,
    /// Port used for sinks without an entry in `ports`
    #[serde(default = "default_port")]
    pub port: u8,
    /// Sink id to hub port
    #[serde(default)]
    pub ports: BTreeMap<String, u8>,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            vendor_id: default_vid(),
            product_id: default_pid(),
            port: default_port(),
            ports: BTreeMap::new(),
        }
    }
}

impl PowerConfig {
    /// Parsed hub USB ids.
    ///
    /// # Errors
    /// Returns an error if either id is not a 16-bit hex number.
    pub fn usb_ids(&self) -> Result<(u16, u16)> {
        Ok((parse_usb_id(&self.vendor_id)?, parse_usb_id(&self.product_id)?))
    }
}

fn parse_usb_id(id: &str) -> Result<u16> {
    let hex = id.trim_start_matches("0x");
    u16::from_str_radix(hex, 16).with_context(|| format!("Invalid USB id: {id:?}"))
}

// Raspberry Pi 3/4 onboard hub, which supports per-port power switching
fn default_vid() -> String {
    "0424".to_string()
}

fn default_pid() -> String {
    "2514".to_string()
}

fn default_port() -> u8 {
    2
}

/// PCM playback monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Card directory under `/proc/asound`
    #[serde(default = "default_card")]
    pub card: String,
    #[serde(default)]
    pub subdevice: u32,
    /// Sink to power; the active sink when absent
    pub sink: Option<String>,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { enabled: false, card: default_card(), subdevice: 0, sink: None, poll_ms: default_poll_ms() }
    }
}

fn default_card() -> String {
    "card0".to_string()
}

fn default_poll_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Resolved key map.
    #[must_use]
    pub fn keymap(&self) -> KeyMap {
        let step = self.engine.volume_step;
        match &self.keymap {
            Some(config) => KeyMap::from_config(config, step),
            None => KeyMap::from_config(&keymap::default_config(), step),
        }
    }
}

/// Where the loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// Nothing at the default location
    Defaults(PathBuf),
}

/// Load configuration from `path`, or from the default location.
///
/// An explicit path must exist; a missing default file means defaults.
/// Runs before tracing is initialized, so it does not log.
pub fn load_config(path: Option<&Path>) -> Result<(Config, ConfigSource)> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = config_path()?;
            if !default.exists() {
                return Ok((Config::default(), ConfigSource::Defaults(default)));
            }
            default
        }
    };

    let content = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file: {config_path:?}"))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {config_path:?}"))?;
    Ok((config, ConfigSource::File(config_path)))
}

/// Get the configuration file path.
fn config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("org", "sonance", "Sonance").context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}
