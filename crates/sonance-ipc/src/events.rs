//! IPC event types (server to client).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sonance_core::{AudioState, SinkId};

/// Event sent from daemon to subscribed clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type
    pub event: EventType,
    /// Event data
    pub data: Value,
}

/// Types of events that can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Any state change, carrying the full snapshot
    StateChanged,
    /// Volume changed
    VolumeChanged,
    /// Mute state changed
    MuteChanged,
    /// Active sink or sink list changed
    SinkChanged,
}

/// Volume changed event data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeChangedData {
    pub volume: u8,
}

/// Mute changed event data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuteChangedData {
    pub muted: bool,
}

/// Sink changed event data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkChangedData {
    pub active_sink: Option<SinkId>,
    pub known_sinks: Vec<SinkId>,
}

impl Event {
    /// Events describing the difference between two snapshots.
    ///
    /// Always ends with a `StateChanged` event carrying `current`.
    #[must_use]
    pub fn diff(previous: &AudioState, current: &AudioState) -> Vec<Self> {
        let mut events = Vec::new();
        if previous.volume != current.volume {
            events.push(Self::new(EventType::VolumeChanged, &VolumeChangedData { volume: current.volume }));
        }
        if previous.muted != current.muted {
            events.push(Self::new(EventType::MuteChanged, &MuteChangedData { muted: current.muted }));
        }
        if previous.active_sink != current.active_sink || previous.known_sinks != current.known_sinks {
            events.push(Self::new(
                EventType::SinkChanged,
                &SinkChangedData {
                    active_sink: current.active_sink.clone(),
                    known_sinks: current.known_sinks.clone(),
                },
            ));
        }
        events.push(Self::new(EventType::StateChanged, current));
        events
    }

    fn new(event: EventType, data: &impl Serialize) -> Self {
        Self { event, data: serde_json::to_value(data).unwrap_or_default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_reports_changed_fields() {
        let before = AudioState::new(50, false, Some("a".into()), vec!["a".into(), "b".into()]);
        let mut after = before.clone();
        after.volume = 55;
        after.active_sink = Some("b".into());

        let events = Event::diff(&before, &after);
        let types: Vec<EventType> = events.iter().map(|e| e.event).collect();
        assert_eq!(types, vec![EventType::VolumeChanged, EventType::SinkChanged, EventType::StateChanged]);
        assert_eq!(events[0].data["volume"], 55);
        assert_eq!(events[1].data["active_sink"], "b");
        assert_eq!(events[2].data["activeSink"], "b");
    }

    #[test]
    fn test_diff_without_changes_still_reports_state() {
        let state = AudioState::default();
        let events = Event::diff(&state, &state);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, EventType::StateChanged);
    }
}
