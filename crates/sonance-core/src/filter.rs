//! Debounce and repeat filter.
//!
//! Turns raw button down/repeat/up noise into a clean command cadence and
//! resolves button codes through the [`KeyMap`]. Direct commands pass
//! through untouched.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::command::AudioCommand;
use crate::event::{EventKind, InputEvent, Reply, SourceId};
use crate::keymap::{Binding, KeyMap};

/// Timing parameters for the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterConfig {
    /// Silence after which a held button counts as released
    pub repeat_window: Duration,
    /// Minimum time between two commands emitted for one held button
    pub min_repeat_interval: Duration,
    /// Emit on every Nth repeat
    pub repeat_every: u32,
    /// Hold time after which a long-press binding fires
    pub long_press: Duration,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            repeat_window: Duration::from_millis(400),
            min_repeat_interval: Duration::from_millis(80),
            repeat_every: 1,
            long_press: Duration::from_secs(3),
        }
    }
}

/// Tracking for the button currently held on one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceState {
    pub code: String,
    pub pressed_at: Instant,
    pub last_timestamp: Instant,
    pub last_emit: Instant,
    pub repeat_count: u32,
    pub long_press_fired: bool,
}

impl DebounceState {
    fn new(code: String, now: Instant) -> Self {
        Self {
            code,
            pressed_at: now,
            last_timestamp: now,
            last_emit: now,
            repeat_count: 0,
            long_press_fired: false,
        }
    }
}

/// Output of the filter.
#[derive(Debug)]
pub enum Filtered {
    /// A command to apply
    Command { source: SourceId, command: AudioCommand, reply: Option<Reply> },
    /// Sinks must be re-enumerated
    SinksChanged { source: SourceId },
}

/// Per-source debounce filter.
pub struct DebounceFilter {
    config: FilterConfig,
    keymap: KeyMap,
    states: HashMap<SourceId, DebounceState>,
}

impl DebounceFilter {
    #[must_use]
    pub fn new(config: FilterConfig, keymap: KeyMap) -> Self {
        Self { config, keymap, states: HashMap::new() }
    }

    /// Debounce state for a source, if a button is being tracked.
    #[must_use]
    pub fn state(&self, source: SourceId) -> Option<&DebounceState> {
        self.states.get(&source)
    }

    /// Process one event, returning what the dispatcher should do, if anything.
    pub fn process(&mut self, event: InputEvent) -> Option<Filtered> {
        let InputEvent { source, kind, timestamp } = event;
        self.expire(timestamp);

        match kind {
            EventKind::Direct(command, reply) => Some(Filtered::Command { source, command, reply }),
            EventKind::SinksChanged => Some(Filtered::SinksChanged { source }),
            EventKind::ButtonDown(code) => self.on_down(source, code, timestamp),
            EventKind::ButtonRepeat(code) => self.on_repeat(source, &code, timestamp),
            EventKind::ButtonUp(code) => self.on_up(source, &code, timestamp),
        }
    }

    /// Drop state for every source that has been silent longer than the repeat window.
    ///
    /// A button with a hold binding is kept until it is released, since a
    /// device without auto-repeat stays silent for the whole hold.
    pub fn expire(&mut self, now: Instant) {
        let window = self.config.repeat_window;
        let keymap = &self.keymap;
        self.states.retain(|source, state| {
            if matches!(keymap.lookup(*source, &state.code), Some(Binding::Hold { .. })) {
                return true;
            }
            let live = now.saturating_duration_since(state.last_timestamp) <= window;
            if !live {
                trace!(%source, code = %state.code, "Debounce state timed out");
            }
            live
        });
    }

    fn on_down(&mut self, source: SourceId, code: String, now: Instant) -> Option<Filtered> {
        let Some(binding) = self.keymap.lookup(source, &code) else {
            debug!(%source, code = %code, "Ignoring unmapped button");
            return None;
        };

        if let Some(state) = self.states.get_mut(&source)
            && state.code == code
            && now.saturating_duration_since(state.last_timestamp) <= self.config.repeat_window
        {
            trace!(%source, code = %code, "Suppressing repeated press");
            state.last_timestamp = now;
            return None;
        }

        let command = match binding {
            Binding::Press(command) => Some(command.clone()),
            Binding::Hold { .. } => None,
        };
        self.states.insert(source, DebounceState::new(code, now));
        command.map(|command| Filtered::Command { source, command, reply: None })
    }

    fn on_repeat(&mut self, source: SourceId, code: &str, now: Instant) -> Option<Filtered> {
        let Some(state) = self.states.get_mut(&source).filter(|s| s.code == code) else {
            debug!(%source, code, "Ignoring repeat without a matching press");
            return None;
        };
        let Some(binding) = self.keymap.lookup(source, code) else {
            return None;
        };

        state.repeat_count += 1;
        state.last_timestamp = now;

        let command = match binding {
            Binding::Press(command) => {
                let nth = state.repeat_count % self.config.repeat_every.max(1) == 0;
                let spaced =
                    now.saturating_duration_since(state.last_emit) >= self.config.min_repeat_interval;
                if !(nth && spaced) {
                    return None;
                }
                command.clone()
            }
            Binding::Hold { long_press, .. } => {
                let held = now.saturating_duration_since(state.pressed_at) >= self.config.long_press;
                if state.long_press_fired || !held {
                    return None;
                }
                debug!(%source, code, "Long press");
                state.long_press_fired = true;
                long_press.clone()
            }
        };

        state.last_emit = now;
        Some(Filtered::Command { source, command, reply: None })
    }

    fn on_up(&mut self, source: SourceId, code: &str, now: Instant) -> Option<Filtered> {
        let state = self.states.remove(&source)?;
        if state.code != code || state.long_press_fired {
            return None;
        }
        let Some(Binding::Hold { press, long_press }) = self.keymap.lookup(source, code) else {
            return None;
        };
        // Held past the threshold without a repeat crossing it
        let command = if now.saturating_duration_since(state.pressed_at) >= self.config.long_press {
            debug!(%source, code, "Long press on release");
            long_press.clone()
        } else {
            press.clone()?
        };
        Some(Filtered::Command { source, command, reply: None })
    }
}
