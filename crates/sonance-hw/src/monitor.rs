//! `/proc/asound` watchers.
//!
//! [`PlaybackMonitor`] turns a DAC on while a PCM stream is open and off when
//! it closes. [`HotplugWatcher`] notices cards coming and going and asks the
//! dispatcher to rescan.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sonance_core::{AudioCommand, BusPublisher, EventKind, InputEvent, SinkId, SourceId};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alsa::read_cards;

/// Default `/proc` directory for ALSA.
pub const ASOUND_ROOT: &str = "/proc/asound";

/// Polls a PCM substream status file and emits power commands.
#[derive(Debug, Clone)]
pub struct PlaybackMonitor {
    status_path: PathBuf,
    sink: Option<SinkId>,
    period: Duration,
}

impl PlaybackMonitor {
    /// Watch `<root>/<card>/pcm0p/sub<subdevice>/status`.
    #[must_use]
    pub fn new(root: &Path, card: &str, subdevice: u32, period: Duration) -> Self {
        Self {
            status_path: root.join(card).join("pcm0p").join(format!("sub{subdevice}")).join("status"),
            sink: None,
            period,
        }
    }

    /// Power this sink instead of the active one.
    #[must_use]
    pub fn with_sink(mut self, sink: Option<SinkId>) -> Self {
        self.sink = sink;
        self
    }

    /// Whether the substream is open. A missing file counts as closed.
    pub async fn is_playing(&self) -> bool {
        match tokio::fs::read_to_string(&self.status_path).await {
            Ok(status) => status.trim() != "closed",
            Err(e) => {
                debug!(path = ?self.status_path, error = %e, "PCM status unreadable");
                false
            }
        }
    }

    /// Emit the current state once, then every change, until shutdown.
    pub async fn run(self, publisher: BusPublisher, shutdown: CancellationToken) {
        info!(path = ?self.status_path, "Playback monitor started");
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = None;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let playing = self.is_playing().await;
            if last == Some(playing) {
                continue;
            }
            last = Some(playing);
            info!(playing, "Playback state changed");
            publisher.publish(InputEvent::fire_and_forget(
                SourceId::Hardware,
                AudioCommand::PowerSink { sink: self.sink.clone(), on: playing },
            ));
        }
        debug!("Playback monitor stopped");
    }
}

/// Polls the card list and emits [`EventKind::SinksChanged`] on change.
#[derive(Debug, Clone)]
pub struct HotplugWatcher {
    cards_path: PathBuf,
    allowed: Vec<String>,
    period: Duration,
}

impl HotplugWatcher {
    #[must_use]
    pub fn new(cards_path: impl Into<PathBuf>, allowed: Vec<String>, period: Duration) -> Self {
        Self { cards_path: cards_path.into(), allowed, period }
    }

    pub async fn run(self, publisher: BusPublisher, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut known: Option<Vec<SinkId>> = None;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let cards = match read_cards(&self.cards_path, &self.allowed).await {
                Ok(cards) => cards,
                Err(e) => {
                    warn!(path = ?self.cards_path, error = %e, "Cannot read card list");
                    continue;
                }
            };

            match &known {
                Some(previous) if *previous != cards => {
                    info!(?cards, "Sound cards changed");
                    publisher.publish(InputEvent::new(SourceId::Hardware, EventKind::SinksChanged));
                }
                _ => {}
            }
            known = Some(cards);
        }
        debug!("Hotplug watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use sonance_core::EventBus;

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    fn write_status(root: &Path, status: &str) {
        let dir = root.join("DAC/pcm0p/sub0");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("status"), status).unwrap();
    }

    #[tokio::test]
    async fn test_playback_monitor_emits_initial_and_changes() {
        let dir = tempfile::tempdir().unwrap();
        write_status(dir.path(), "closed\n");

        let bus = EventBus::new(16);
        let shutdown = CancellationToken::new();
        let monitor = PlaybackMonitor::new(dir.path(), "DAC", 0, Duration::from_millis(10))
            .with_sink(Some(SinkId::from("DAC")));
        let task = tokio::spawn(monitor.run(bus.publisher(), shutdown.clone()));

        let first = tokio::time::timeout(WAIT, bus.next_event()).await.unwrap();
        assert_eq!(first.source, SourceId::Hardware);
        assert_matches!(
            first.kind,
            EventKind::Direct(AudioCommand::PowerSink { sink: Some(ref s), on: false }, None) if s.as_str() == "DAC"
        );

        write_status(dir.path(), "state: RUNNING\nowner_pid   : 1234\n");
        let second = tokio::time::timeout(WAIT, bus.next_event()).await.unwrap();
        assert_matches!(second.kind, EventKind::Direct(AudioCommand::PowerSink { on: true, .. }, None));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_status_counts_as_closed() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = PlaybackMonitor::new(dir.path(), "Gone", 3, Duration::from_secs(1));
        assert!(!monitor.is_playing().await);
    }

    #[tokio::test]
    async fn test_hotplug_watcher_reports_changes_only() {
        let dir = tempfile::tempdir().unwrap();
        let cards = dir.path().join("cards");
        std::fs::write(&cards, " 0 [PCH            ]: HDA-Intel - HDA Intel PCH\n").unwrap();

        let bus = EventBus::new(16);
        let shutdown = CancellationToken::new();
        let watcher = HotplugWatcher::new(&cards, Vec::new(), Duration::from_millis(10));
        let task = tokio::spawn(watcher.run(bus.publisher(), shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(bus.is_empty());

        std::fs::write(
            &cards,
            " 0 [PCH            ]: HDA-Intel - HDA Intel PCH\n 1 [DAC            ]: USB-Audio - DAC\n",
        )
        .unwrap();
        let event = tokio::time::timeout(WAIT, bus.next_event()).await.unwrap();
        assert_matches!(event.kind, EventKind::SinksChanged);

        shutdown.cancel();
        task.await.unwrap();
    }
}
