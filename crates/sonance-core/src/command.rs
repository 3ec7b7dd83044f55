//! The normalized command vocabulary.
//!
//! Every input event, whatever its source, resolves to one of these before it
//! reaches the dispatcher.

use serde::{Deserialize, Serialize};

use crate::state::SinkId;

/// A request to change the audio subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "command")]
pub enum AudioCommand {
    /// Raise volume by `step`, clamped at 100
    VolumeUp { step: u8 },
    /// Lower volume by `step`, clamped at 0
    VolumeDown { step: u8 },
    /// Set an absolute volume; out-of-range levels are rejected, not clamped
    SetVolume { level: i64 },
    /// Flip the mute state
    ToggleMute,
    /// Set the mute state
    SetMute { muted: bool },
    /// Advance to the next known sink, wrapping
    CycleSink,
    /// Make a specific sink active
    SelectSink { sink: SinkId },
    /// Switch hub power for a sink (the active one when `sink` is `None`)
    PowerSink {
        #[serde(default)]
        sink: Option<SinkId>,
        on: bool,
    },
}

impl AudioCommand {
    /// Short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::VolumeUp { .. } => "volume_up",
            Self::VolumeDown { .. } => "volume_down",
            Self::SetVolume { .. } => "set_volume",
            Self::ToggleMute => "toggle_mute",
            Self::SetMute { .. } => "set_mute",
            Self::CycleSink => "cycle_sink",
            Self::SelectSink { .. } => "select_sink",
            Self::PowerSink { .. } => "power_sink",
        }
    }

    /// Whether the command changes [`AudioState`](crate::AudioState).
    #[must_use]
    pub fn mutates_state(&self) -> bool {
        !matches!(self, Self::PowerSink { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_tagged() {
        let cmd: AudioCommand = serde_json::from_str(r#"{"command":"volume_up","step":3}"#).unwrap();
        assert_eq!(cmd, AudioCommand::VolumeUp { step: 3 });

        let cmd: AudioCommand = serde_json::from_str(r#"{"command":"power_sink","on":true}"#).unwrap();
        assert_eq!(cmd, AudioCommand::PowerSink { sink: None, on: true });
    }

    #[test]
    fn test_power_does_not_mutate_state() {
        assert!(!AudioCommand::PowerSink { sink: None, on: false }.mutates_state());
        assert!(AudioCommand::CycleSink.mutates_state());
    }
}
