//! Audio state model and the read-only status board.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Highest allowed volume level.
pub const MAX_VOLUME: u8 = 100;

/// Opaque identifier naming a hardware audio output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SinkId(String);

impl SinkId {
    /// Create a sink identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SinkId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Authoritative model of the audio subsystem.
///
/// Only the dispatcher mutates this. Everyone else reads snapshots from
/// the [`StatusBoard`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AudioState {
    /// Volume level (0 - 100)
    pub volume: u8,
    /// Whether output is muted
    pub muted: bool,
    /// Currently selected sink, `None` only when no sinks are known
    pub active_sink: Option<SinkId>,
    /// All sinks in enumeration order
    pub known_sinks: Vec<SinkId>,
}

impl AudioState {
    /// Create a state, normalizing it so the invariants hold.
    ///
    /// The volume is capped at [`MAX_VOLUME`] and an active sink that is not
    /// in `known_sinks` is replaced by the first known sink.
    #[must_use]
    pub fn new(volume: u8, muted: bool, active_sink: Option<SinkId>, known_sinks: Vec<SinkId>) -> Self {
        let active_sink = match active_sink {
            Some(sink) if known_sinks.contains(&sink) => Some(sink),
            _ => known_sinks.first().cloned(),
        };
        Self { volume: volume.min(MAX_VOLUME), muted, active_sink, known_sinks }
    }

    /// Check whether a sink is known.
    #[must_use]
    pub fn knows(&self, sink: &SinkId) -> bool {
        self.known_sinks.contains(sink)
    }

    /// The sink following the active one, wrapping around.
    #[must_use]
    pub fn next_sink(&self) -> Option<SinkId> {
        if self.known_sinks.is_empty() {
            return None;
        }
        let next = self
            .active_sink
            .as_ref()
            .and_then(|active| self.known_sinks.iter().position(|s| s == active))
            .map_or(0, |idx| (idx + 1) % self.known_sinks.len());
        Some(self.known_sinks[next].clone())
    }
}

/// Read-only view of the latest applied [`AudioState`].
///
/// The dispatcher publishes a fresh snapshot after each command completes;
/// HTTP and bus responders load it without touching the dispatcher.
#[derive(Clone)]
pub struct StatusBoard {
    current: Arc<ArcSwap<AudioState>>,
    changes: broadcast::Sender<Arc<AudioState>>,
}

impl StatusBoard {
    /// Create a board holding the initial state.
    #[must_use]
    pub fn new(initial: AudioState) -> Self {
        let (changes, _) = broadcast::channel(32);
        Self { current: Arc::new(ArcSwap::from_pointee(initial)), changes }
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<AudioState> {
        self.current.load_full()
    }

    /// Subscribe to snapshots published after state changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AudioState>> {
        self.changes.subscribe()
    }

    pub(crate) fn publish(&self, state: &AudioState) {
        let snapshot = Arc::new(state.clone());
        self.current.store(Arc::clone(&snapshot));
        // No subscribers is fine
        let _ = self.changes.send(snapshot);
    }
}

impl fmt::Debug for StatusBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusBoard").field("current", &self.current.load()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sinks(ids: &[&str]) -> Vec<SinkId> {
        ids.iter().map(|id| SinkId::from(*id)).collect()
    }

    #[test]
    fn test_new_caps_volume() {
        let state = AudioState::new(140, false, None, vec![]);
        assert_eq!(state.volume, 100);
        assert_eq!(state.active_sink, None);
    }

    #[test]
    fn test_new_replaces_unknown_active_sink() {
        let state = AudioState::new(50, false, Some("gone".into()), sinks(&["a", "b"]));
        assert_eq!(state.active_sink, Some(SinkId::from("a")));
    }

    #[test]
    fn test_next_sink_wraps() {
        let state = AudioState::new(50, false, Some("b".into()), sinks(&["a", "b"]));
        assert_eq!(state.next_sink(), Some(SinkId::from("a")));
    }

    #[test]
    fn test_next_sink_empty() {
        let state = AudioState::default();
        assert_eq!(state.next_sink(), None);
    }

    #[test]
    fn test_serializes_camel_case() {
        let state = AudioState::new(10, true, Some("a".into()), sinks(&["a"]));
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["activeSink"], "a");
        assert_eq!(json["knownSinks"][0], "a");
        assert_eq!(json["muted"], true);
    }

    #[tokio::test]
    async fn test_board_publishes_snapshots() {
        let board = StatusBoard::new(AudioState::default());
        let mut rx = board.subscribe();

        let state = AudioState::new(42, false, None, vec![]);
        board.publish(&state);

        assert_eq!(board.snapshot().volume, 42);
        assert_eq!(rx.recv().await.unwrap().volume, 42);
    }
}
