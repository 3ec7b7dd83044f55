//! Command dispatcher, the single writer of [`AudioState`].
//!
//! Commands are applied one at a time: the in-memory state is mutated first,
//! then the gateway is called. If the gateway fails or times out the state is
//! rolled back. Power switching goes to the power gateway and never touches
//! the audio state.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::command::AudioCommand;
use crate::error::{Error, Result};
use crate::event::SourceId;
use crate::filter::Filtered;
use crate::gateway::{AudioSinkGateway, GatewayError, PowerGateway, SinkChange};
use crate::state::{AudioState, MAX_VOLUME, SinkId, StatusBoard};

/// Dispatcher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Upper bound for a single gateway call
    pub gateway_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { gateway_timeout: Duration::from_secs(2) }
    }
}

/// Dispatcher state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Applying,
}

/// Applies commands against the audio state and the gateways.
pub struct Dispatcher<S, P> {
    sink: S,
    power: P,
    state: AudioState,
    board: StatusBoard,
    config: DispatcherConfig,
    phase: Phase,
}

impl<S: AudioSinkGateway, P: PowerGateway> Dispatcher<S, P> {
    /// Create a dispatcher with a known initial state.
    pub fn new(sink: S, power: P, initial: AudioState, config: DispatcherConfig) -> Self {
        let board = StatusBoard::new(initial.clone());
        Self { sink, power, state: initial, board, config, phase: Phase::Idle }
    }

    /// Create a dispatcher seeded from the hardware.
    ///
    /// # Errors
    /// Returns an error if the sink gateway cannot report its state in time.
    pub async fn init(sink: S, power: P, config: DispatcherConfig) -> Result<Self> {
        let current = bounded(config.gateway_timeout, sink.current_state()).await?;
        let initial =
            AudioState::new(current.volume, current.muted, current.active_sink, current.known_sinks);
        info!(
            volume = initial.volume,
            muted = initial.muted,
            active_sink = ?initial.active_sink,
            sinks = initial.known_sinks.len(),
            "Audio state loaded from hardware"
        );
        Ok(Self::new(sink, power, initial, config))
    }

    /// Board on which snapshots are published.
    #[must_use]
    pub fn board(&self) -> StatusBoard {
        self.board.clone()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &AudioState {
        &self.state
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Apply a filtered event, answering or logging the outcome.
    pub async fn handle(&mut self, filtered: Filtered) {
        match filtered {
            Filtered::Command { source, command, reply } => {
                let name = command.name();
                let result = self.apply(command).await;
                match &result {
                    Ok(state) => debug!(
                        %source,
                        command = name,
                        volume = state.volume,
                        muted = state.muted,
                        active_sink = ?state.active_sink,
                        "Command applied"
                    ),
                    Err(e) if reply.is_some() => debug!(%source, command = name, error = %e, "Command failed"),
                    Err(e) => warn!(%source, command = name, error = %e, "Command failed"),
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Filtered::SinksChanged { source } => {
                if let Err(e) = self.rescan(source).await {
                    warn!(%source, error = %e, "Sink re-enumeration failed");
                }
            }
        }
    }

    /// Apply one command to completion.
    ///
    /// # Errors
    /// Returns a validation error without touching anything, or
    /// `GatewayFailure` after rolling the state back.
    pub async fn apply(&mut self, command: AudioCommand) -> Result<AudioState> {
        if let AudioCommand::PowerSink { sink, on } = command {
            let target = sink.or_else(|| self.state.active_sink.clone()).ok_or(Error::NoSinksAvailable)?;
            self.enter();
            let result = bounded(self.config.gateway_timeout, self.power.set_power(&target, on)).await;
            self.leave();
            result?;
            info!(sink = %target, on, "Sink power switched");
            return Ok(self.state.clone());
        }

        let previous = self.state.clone();
        let change = self.mutate(command)?;

        self.enter();
        let result = bounded(self.config.gateway_timeout, self.sink.apply(&change)).await;
        self.leave();

        if let Err(e) = result {
            self.state = previous;
            return Err(e);
        }

        self.board.publish(&self.state);
        Ok(self.state.clone())
    }

    /// Re-enumerate sinks after a hotplug notification.
    ///
    /// The active sink is kept if it is still present, otherwise the first
    /// remaining sink is activated.
    ///
    /// # Errors
    /// Returns `GatewayFailure` if enumeration fails; the state is unchanged.
    pub async fn rescan(&mut self, source: SourceId) -> Result<AudioState> {
        self.enter();
        let result = bounded(self.config.gateway_timeout, self.sink.enumerate_sinks()).await;
        self.leave();
        let sinks = result?;

        if sinks == self.state.known_sinks {
            trace!(%source, "Sink set unchanged");
            return Ok(self.state.clone());
        }

        let keep_active = self.state.active_sink.as_ref().is_some_and(|s| sinks.contains(s));
        info!(%source, ?sinks, keep_active, "Sink set changed");
        self.state.known_sinks = sinks;

        if !keep_active {
            self.state.active_sink = self.state.known_sinks.first().cloned();
            if let Some(sink) = self.state.active_sink.clone() {
                let change = SinkChange::Activate { sink, volume: self.state.volume, muted: self.state.muted };
                self.enter();
                let result = bounded(self.config.gateway_timeout, self.sink.apply(&change)).await;
                self.leave();
                // The sink list reflects the hardware, so there is nothing to roll back to
                if let Err(e) = result {
                    warn!(error = %e, "Failed to activate fallback sink");
                }
            }
        }

        self.board.publish(&self.state);
        Ok(self.state.clone())
    }

    /// Validate a command and mutate the in-memory state.
    fn mutate(&mut self, command: AudioCommand) -> Result<SinkChange> {
        let state = &mut self.state;

        let change = match command {
            AudioCommand::VolumeUp { step } => {
                let sink = active_sink(state)?;
                state.volume = state.volume.saturating_add(step).min(MAX_VOLUME);
                SinkChange::Volume { sink, level: state.volume }
            }
            AudioCommand::VolumeDown { step } => {
                let sink = active_sink(state)?;
                state.volume = state.volume.saturating_sub(step);
                SinkChange::Volume { sink, level: state.volume }
            }
            AudioCommand::SetVolume { level } => {
                let level = u8::try_from(level)
                    .ok()
                    .filter(|l| *l <= MAX_VOLUME)
                    .ok_or(Error::InvalidRange(level))?;
                let sink = active_sink(state)?;
                state.volume = level;
                SinkChange::Volume { sink, level }
            }
            AudioCommand::ToggleMute => {
                let sink = active_sink(state)?;
                state.muted = !state.muted;
                SinkChange::Mute { sink, muted: state.muted }
            }
            AudioCommand::SetMute { muted } => {
                let sink = active_sink(state)?;
                state.muted = muted;
                SinkChange::Mute { sink, muted }
            }
            AudioCommand::CycleSink => {
                let sink = state.next_sink().ok_or(Error::NoSinksAvailable)?;
                state.active_sink = Some(sink.clone());
                SinkChange::Activate { sink, volume: state.volume, muted: state.muted }
            }
            AudioCommand::SelectSink { sink } => {
                if !state.knows(&sink) {
                    return Err(Error::UnknownSink(sink));
                }
                state.active_sink = Some(sink.clone());
                SinkChange::Activate { sink, volume: state.volume, muted: state.muted }
            }
            AudioCommand::PowerSink { .. } => unreachable!("power commands bypass the audio state"),
        };
        Ok(change)
    }

    fn enter(&mut self) {
        debug_assert_eq!(self.phase, Phase::Idle, "only one gateway call may be in flight");
        self.phase = Phase::Applying;
    }

    fn leave(&mut self) {
        self.phase = Phase::Idle;
    }
}

fn active_sink(state: &AudioState) -> Result<SinkId> {
    state.active_sink.clone().ok_or(Error::NoSinksAvailable)
}

/// Run a gateway call under a timeout, mapping failures to `GatewayFailure`.
async fn bounded<T>(timeout: Duration, call: impl Future<Output = std::result::Result<T, GatewayError>>) -> Result<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::GatewayFailure(e.to_string())),
        Err(_) => Err(Error::GatewayFailure(GatewayError::Timeout.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use proptest::prelude::*;

    use super::*;
    use crate::testing::{FakePower, FakeSink};

    fn state(volume: u8, sinks: &[&str]) -> AudioState {
        let sinks: Vec<SinkId> = sinks.iter().map(|s| SinkId::from(*s)).collect();
        AudioState::new(volume, false, sinks.first().cloned(), sinks)
    }

    fn dispatcher(initial: AudioState) -> (Dispatcher<Arc<FakeSink>, Arc<FakePower>>, Arc<FakeSink>, Arc<FakePower>) {
        let sink = Arc::new(FakeSink::new(initial.clone()));
        let power = Arc::new(FakePower::default());
        let d = Dispatcher::new(Arc::clone(&sink), Arc::clone(&power), initial, DispatcherConfig::default());
        (d, sink, power)
    }

    #[tokio::test]
    async fn test_example_scenario() {
        let (mut d, sink, _) = dispatcher(state(50, &["A", "B"]));

        let s = d.apply(AudioCommand::VolumeUp { step: 5 }).await.unwrap();
        assert_eq!(s.volume, 55);

        assert_matches!(d.apply(AudioCommand::SetVolume { level: 102 }).await, Err(Error::InvalidRange(102)));
        assert_eq!(d.state().volume, 55);

        let s = d.apply(AudioCommand::CycleSink).await.unwrap();
        assert_eq!(s.active_sink, Some(SinkId::from("B")));

        let s = d.apply(AudioCommand::ToggleMute).await.unwrap();
        assert!(s.muted);

        assert_eq!(
            sink.applied(),
            vec![
                SinkChange::Volume { sink: "A".into(), level: 55 },
                SinkChange::Activate { sink: "B".into(), volume: 55, muted: false },
                SinkChange::Mute { sink: "B".into(), muted: true },
            ]
        );
    }

    #[tokio::test]
    async fn test_set_volume_out_of_range_leaves_state() {
        let (mut d, sink, _) = dispatcher(state(30, &["A"]));
        let before = d.state().clone();

        assert_matches!(d.apply(AudioCommand::SetVolume { level: 150 }).await, Err(Error::InvalidRange(150)));
        assert_matches!(d.apply(AudioCommand::SetVolume { level: -1 }).await, Err(Error::InvalidRange(-1)));
        assert_eq!(d.state(), &before);
        assert!(sink.applied().is_empty());
    }

    #[tokio::test]
    async fn test_volume_clamps_and_echoes() {
        let (mut d, _, _) = dispatcher(state(98, &["A"]));
        assert_eq!(d.apply(AudioCommand::VolumeUp { step: 5 }).await.unwrap().volume, 100);

        let (mut d, _, _) = dispatcher(state(3, &["A"]));
        assert_eq!(d.apply(AudioCommand::VolumeDown { step: 5 }).await.unwrap().volume, 0);
    }

    #[tokio::test]
    async fn test_mute_commands_idempotent() {
        let (mut d, _, _) = dispatcher(state(50, &["A"]));
        assert!(d.apply(AudioCommand::SetMute { muted: true }).await.unwrap().muted);
        assert!(d.apply(AudioCommand::SetMute { muted: true }).await.unwrap().muted);
        assert!(!d.apply(AudioCommand::ToggleMute).await.unwrap().muted);
    }

    #[tokio::test]
    async fn test_cycle_sink_without_sinks() {
        let (mut d, _, _) = dispatcher(state(50, &[]));
        assert_matches!(d.apply(AudioCommand::CycleSink).await, Err(Error::NoSinksAvailable));
        assert_matches!(d.apply(AudioCommand::VolumeUp { step: 1 }).await, Err(Error::NoSinksAvailable));
    }

    #[tokio::test]
    async fn test_select_unknown_sink() {
        let (mut d, _, _) = dispatcher(state(50, &["A", "B"]));
        assert_matches!(
            d.apply(AudioCommand::SelectSink { sink: "C".into() }).await,
            Err(Error::UnknownSink(s)) if s.as_str() == "C"
        );
        assert_eq!(d.state().active_sink, Some(SinkId::from("A")));

        let s = d.apply(AudioCommand::SelectSink { sink: "B".into() }).await.unwrap();
        assert_eq!(s.active_sink, Some(SinkId::from("B")));
    }

    #[tokio::test]
    async fn test_gateway_failure_rolls_back() {
        let (mut d, sink, _) = dispatcher(state(50, &["A", "B"]));
        sink.fail_next("mixer unplugged");

        assert_matches!(d.apply(AudioCommand::VolumeUp { step: 10 }).await, Err(Error::GatewayFailure(_)));
        assert_eq!(d.state().volume, 50);
        assert_eq!(d.board().snapshot().volume, 50);

        sink.fail_next("mixer unplugged");
        assert_matches!(d.apply(AudioCommand::CycleSink).await, Err(Error::GatewayFailure(_)));
        assert_eq!(d.state().active_sink, Some(SinkId::from("A")));
        assert_eq!(d.phase(), Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_timeout_rolls_back() {
        let (mut d, sink, _) = dispatcher(state(50, &["A"]));
        sink.set_delay(Duration::from_secs(5));

        let err = d.apply(AudioCommand::ToggleMute).await.unwrap_err();
        assert_eq!(err, Error::GatewayFailure(GatewayError::Timeout.to_string()));
        assert!(!d.state().muted);
        assert_eq!(d.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_power_does_not_touch_state() {
        let (mut d, sink, power) = dispatcher(state(50, &["A"]));
        let before = d.state().clone();

        d.apply(AudioCommand::PowerSink { sink: None, on: true }).await.unwrap();
        d.apply(AudioCommand::PowerSink { sink: Some("Amp".into()), on: false }).await.unwrap();

        assert_eq!(power.calls(), vec![(SinkId::from("A"), true), (SinkId::from("Amp"), false)]);
        assert_eq!(d.state(), &before);
        assert!(sink.applied().is_empty());
    }

    #[tokio::test]
    async fn test_power_failure_keeps_earlier_changes() {
        let (mut d, _, power) = dispatcher(state(50, &["A"]));
        d.apply(AudioCommand::VolumeUp { step: 5 }).await.unwrap();

        power.fail_next("hub not found");
        assert_matches!(
            d.apply(AudioCommand::PowerSink { sink: None, on: true }).await,
            Err(Error::GatewayFailure(_))
        );
        assert_eq!(d.state().volume, 55);
    }

    #[tokio::test]
    async fn test_rescan_keeps_active_sink() {
        let (mut d, sink, _) = dispatcher(state(50, &["A", "B"]));
        d.apply(AudioCommand::SelectSink { sink: "B".into() }).await.unwrap();

        sink.set_sinks(&["B", "C"]);
        let s = d.rescan(SourceId::Hardware).await.unwrap();
        assert_eq!(s.known_sinks, vec![SinkId::from("B"), SinkId::from("C")]);
        assert_eq!(s.active_sink, Some(SinkId::from("B")));
    }

    #[tokio::test]
    async fn test_rescan_falls_back_to_first_sink() {
        let (mut d, sink, _) = dispatcher(state(40, &["A", "B"]));

        sink.set_sinks(&["B"]);
        let s = d.rescan(SourceId::Hardware).await.unwrap();
        assert_eq!(s.active_sink, Some(SinkId::from("B")));
        assert_eq!(sink.applied().last(), Some(&SinkChange::Activate { sink: "B".into(), volume: 40, muted: false }));

        sink.set_sinks(&[]);
        let s = d.rescan(SourceId::Hardware).await.unwrap();
        assert_eq!(s.active_sink, None);
        assert!(s.known_sinks.is_empty());
    }

    #[tokio::test]
    async fn test_init_reads_hardware() {
        let hw = state(70, &["A", "B"]);
        let d = Dispatcher::init(FakeSink::new(hw.clone()), FakePower::default(), DispatcherConfig::default())
            .await
            .unwrap();
        assert_eq!(d.state(), &hw);
        assert_eq!(*d.board().snapshot(), hw);
    }

    #[tokio::test]
    async fn test_cycle_sink_returns_to_start() {
        let (mut d, _, _) = dispatcher(state(50, &["A", "B", "C"]));
        let start = d.state().active_sink.clone();
        for _ in 0..3 {
            d.apply(AudioCommand::CycleSink).await.unwrap();
        }
        assert_eq!(d.state().active_sink, start);
    }

    fn volume_command() -> impl Strategy<Value = AudioCommand> {
        prop_oneof![
            (0u8..=255).prop_map(|step| AudioCommand::VolumeUp { step }),
            (0u8..=255).prop_map(|step| AudioCommand::VolumeDown { step }),
        ]
    }

    proptest! {
        #[test]
        fn prop_volume_stays_in_range(start in 0u8..=100, commands in prop::collection::vec(volume_command(), 0..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            rt.block_on(async {
                let (mut d, _, _) = dispatcher(state(start, &["A"]));
                for command in commands {
                    let s = d.apply(command).await.unwrap();
                    prop_assert!(s.volume <= 100);
                }
                Ok(())
            })?;
        }

        #[test]
        fn prop_cycle_sink_is_cyclic(count in 1usize..8, offset in 0usize..8) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            rt.block_on(async {
                let ids: Vec<String> = (0..count).map(|i| format!("sink{i}")).collect();
                let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
                let (mut d, _, _) = dispatcher(state(50, &refs));
                for _ in 0..(offset % count) {
                    d.apply(AudioCommand::CycleSink).await.unwrap();
                }
                let start = d.state().active_sink.clone();
                for _ in 0..count {
                    d.apply(AudioCommand::CycleSink).await.unwrap();
                }
                prop_assert_eq!(d.state().active_sink.clone(), start);
                Ok(())
            })?;
        }
    }
}
