//! Button code to command mapping.
//!
//! Key maps are configured per source in TOML:
//!
//! ```toml
//! [keymap.remote_ir]
//! KEY_VOLUMEUP = "volume_up"
//! KEY_MUTE = "toggle_mute"
//! KEY_1 = { select_sink = "Headphones" }
//! KEY_POWER = "power_on"
//! KEY_SLEEP = "power_off"
//!
//! [keymap.input_device]
//! KEY_POWER = { press = "power_on", long_press = "power_off" }
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::command::AudioCommand;
use crate::event::SourceId;
use crate::state::SinkId;

/// Commands that can be named with a bare string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedCommand {
    VolumeUp,
    VolumeDown,
    ToggleMute,
    Mute,
    Unmute,
    CycleSink,
    PowerOn,
    PowerOff,
}

/// A command as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Named(NamedCommand),
    VolumeUp { volume_up: u8 },
    VolumeDown { volume_down: u8 },
    SetVolume { set_volume: i64 },
    SelectSink { select_sink: SinkId },
    Power {
        power: bool,
        #[serde(default)]
        sink: Option<SinkId>,
    },
}

impl CommandSpec {
    /// Resolve into a command, using `step` for bare volume commands.
    #[must_use]
    pub fn resolve(&self, step: u8) -> AudioCommand {
        match self {
            Self::Named(named) => match named {
                NamedCommand::VolumeUp => AudioCommand::VolumeUp { step },
                NamedCommand::VolumeDown => AudioCommand::VolumeDown { step },
                NamedCommand::ToggleMute => AudioCommand::ToggleMute,
                NamedCommand::Mute => AudioCommand::SetMute { muted: true },
                NamedCommand::Unmute => AudioCommand::SetMute { muted: false },
                NamedCommand::CycleSink => AudioCommand::CycleSink,
                NamedCommand::PowerOn => AudioCommand::PowerSink { sink: None, on: true },
                NamedCommand::PowerOff => AudioCommand::PowerSink { sink: None, on: false },
            },
            Self::VolumeUp { volume_up } => AudioCommand::VolumeUp { step: *volume_up },
            Self::VolumeDown { volume_down } => AudioCommand::VolumeDown { step: *volume_down },
            Self::SetVolume { set_volume } => AudioCommand::SetVolume { level: *set_volume },
            Self::SelectSink { select_sink } => {
                AudioCommand::SelectSink { sink: select_sink.clone() }
            }
            Self::Power { power, sink } => AudioCommand::PowerSink { sink: sink.clone(), on: *power },
        }
    }
}

/// A binding as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BindingSpec {
    /// Distinct commands for short and long presses
    Hold {
        #[serde(default)]
        press: Option<CommandSpec>,
        long_press: CommandSpec,
    },
    /// One command, repeated while held
    Single(CommandSpec),
}

/// Per-source binding tables as written in the configuration file.
pub type KeyMapConfig = BTreeMap<SourceId, BTreeMap<String, BindingSpec>>;

/// What a button does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Fires on press and on (rate-limited) auto-repeat.
    Press(AudioCommand),
    /// Fires `long_press` once when held long enough, otherwise `press` on release.
    Hold { press: Option<AudioCommand>, long_press: AudioCommand },
}

/// Resolved key map for all sources.
#[derive(Debug, Clone, Default)]
pub struct KeyMap {
    bindings: HashMap<(SourceId, String), Binding>,
}

impl KeyMap {
    /// Build from configuration, resolving bare volume commands with `step`.
    #[must_use]
    pub fn from_config(config: &KeyMapConfig, step: u8) -> Self {
        let mut map = Self::default();
        for (source, table) in config {
            for (code, spec) in table {
                let binding = match spec {
                    BindingSpec::Single(cmd) => Binding::Press(cmd.resolve(step)),
                    BindingSpec::Hold { press, long_press } => Binding::Hold {
                        press: press.as_ref().map(|c| c.resolve(step)),
                        long_press: long_press.resolve(step),
                    },
                };
                map.insert(*source, code.clone(), binding);
            }
        }
        map
    }

    /// Add or replace a binding.
    pub fn insert(&mut self, source: SourceId, code: impl Into<String>, binding: Binding) {
        self.bindings.insert((source, code.into()), binding);
    }

    /// Look up the binding for a button on a source.
    #[must_use]
    pub fn lookup(&self, source: SourceId, code: &str) -> Option<&Binding> {
        self.bindings.get(&(source, code.to_string()))
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no bindings are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Bindings used when the configuration has no key map.
///
/// Covers the standard Linux key names for both the IR remote and the input
/// device. LIRC never reports a release, so the remote only gets plain
/// bindings and a separate key for power off.
#[must_use]
pub fn default_config() -> KeyMapConfig {
    let named = |command| BindingSpec::Single(CommandSpec::Named(command));
    let common = [
        ("KEY_VOLUMEUP", named(NamedCommand::VolumeUp)),
        ("KEY_VOLUMEDOWN", named(NamedCommand::VolumeDown)),
        ("KEY_MUTE", named(NamedCommand::ToggleMute)),
        ("KEY_NEXT", named(NamedCommand::CycleSink)),
    ];

    let remote = common.clone().into_iter().chain([
        ("KEY_POWER", named(NamedCommand::PowerOn)),
        ("KEY_SLEEP", named(NamedCommand::PowerOff)),
    ]);
    let device = common.into_iter().chain([(
        "KEY_POWER",
        BindingSpec::Hold {
            press: Some(CommandSpec::Named(NamedCommand::PowerOn)),
            long_press: CommandSpec::Named(NamedCommand::PowerOff),
        },
    )]);

    [(SourceId::RemoteIr, table(remote)), (SourceId::InputDevice, table(device))].into_iter().collect()
}

fn table<'a>(entries: impl IntoIterator<Item = (&'a str, BindingSpec)>) -> BTreeMap<String, BindingSpec> {
    entries.into_iter().map(|(code, spec)| (code.to_string(), spec)).collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        keymap: KeyMapConfig,
    }

    #[test]
    fn test_parse_binding_forms() {
        let config: Wrapper = toml::from_str(
            r#"
            [keymap.remote_ir]
            KEY_VOLUMEUP = "volume_up"
            KEY_F1 = { volume_down = 10 }
            KEY_1 = { select_sink = "Headphones" }
            KEY_2 = { set_volume = 30 }
            KEY_3 = { power = true, sink = "Amp" }
            KEY_POWER = { press = "power_on", long_press = "power_off" }

            [keymap.input_device]
            KEY_MUTE = "toggle_mute"
            "#,
        )
        .unwrap();

        let map = KeyMap::from_config(&config.keymap, 5);
        assert_eq!(map.len(), 7);

        let lookup = |code: &str| map.lookup(SourceId::RemoteIr, code).cloned();
        assert_eq!(lookup("KEY_VOLUMEUP"), Some(Binding::Press(AudioCommand::VolumeUp { step: 5 })));
        assert_eq!(lookup("KEY_F1"), Some(Binding::Press(AudioCommand::VolumeDown { step: 10 })));
        assert_eq!(
            lookup("KEY_1"),
            Some(Binding::Press(AudioCommand::SelectSink { sink: SinkId::from("Headphones") }))
        );
        assert_eq!(lookup("KEY_2"), Some(Binding::Press(AudioCommand::SetVolume { level: 30 })));
        assert_eq!(
            lookup("KEY_3"),
            Some(Binding::Press(AudioCommand::PowerSink { sink: Some("Amp".into()), on: true }))
        );
        assert_eq!(
            lookup("KEY_POWER"),
            Some(Binding::Hold {
                press: Some(AudioCommand::PowerSink { sink: None, on: true }),
                long_press: AudioCommand::PowerSink { sink: None, on: false },
            })
        );
        assert_eq!(
            map.lookup(SourceId::InputDevice, "KEY_MUTE"),
            Some(&Binding::Press(AudioCommand::ToggleMute))
        );
    }

    #[test]
    fn test_bindings_are_per_source() {
        let mut map = KeyMap::default();
        map.insert(SourceId::RemoteIr, "KEY_MUTE", Binding::Press(AudioCommand::ToggleMute));

        assert!(map.lookup(SourceId::RemoteIr, "KEY_MUTE").is_some());
        assert!(map.lookup(SourceId::InputDevice, "KEY_MUTE").is_none());
    }

    #[test]
    fn test_default_config_covers_both_sources() {
        let map = KeyMap::from_config(&default_config(), 5);
        for source in [SourceId::RemoteIr, SourceId::InputDevice] {
            assert_eq!(
                map.lookup(source, "KEY_VOLUMEDOWN"),
                Some(&Binding::Press(AudioCommand::VolumeDown { step: 5 }))
            );
        }
    }

    #[test]
    fn test_default_remote_bindings_fire_on_press() {
        let map = KeyMap::from_config(&default_config(), 5);
        let remote = &default_config()[&SourceId::RemoteIr];
        assert!(!remote.is_empty());
        for code in remote.keys() {
            assert_matches!(map.lookup(SourceId::RemoteIr, code), Some(Binding::Press(_)), "{code}");
        }
        assert_eq!(
            map.lookup(SourceId::RemoteIr, "KEY_POWER"),
            Some(&Binding::Press(AudioCommand::PowerSink { sink: None, on: true }))
        );
        assert_eq!(
            map.lookup(SourceId::RemoteIr, "KEY_SLEEP"),
            Some(&Binding::Press(AudioCommand::PowerSink { sink: None, on: false }))
        );
        assert_matches!(map.lookup(SourceId::InputDevice, "KEY_POWER"), Some(Binding::Hold { .. }));
    }
}
