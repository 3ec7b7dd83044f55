//! The engine task: bus → filter → dispatcher, strictly sequential.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::{BusPublisher, EventBus};
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::event::EventKind;
use crate::filter::DebounceFilter;
use crate::gateway::{AudioSinkGateway, PowerGateway};
use crate::state::StatusBoard;

/// Owns the consumer end of the bus, the filter and the dispatcher.
pub struct Engine<S, P> {
    bus: EventBus,
    filter: DebounceFilter,
    dispatcher: Dispatcher<S, P>,
}

impl<S: AudioSinkGateway, P: PowerGateway> Engine<S, P> {
    #[must_use]
    pub fn new(bus: EventBus, filter: DebounceFilter, dispatcher: Dispatcher<S, P>) -> Self {
        Self { bus, filter, dispatcher }
    }

    /// Handle for adapters to publish events.
    #[must_use]
    pub fn publisher(&self) -> BusPublisher {
        self.bus.publisher()
    }

    /// Board for status queries.
    #[must_use]
    pub fn board(&self) -> StatusBoard {
        self.dispatcher.board()
    }

    /// Process events until `shutdown` is cancelled.
    ///
    /// A command being applied when shutdown is requested is finished first.
    /// Direct commands still queued afterwards, or published once the loop
    /// has exited, are answered with [`Error::CommandDropped`].
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Engine started");
        loop {
            let event = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                event = self.bus.next_event() => event,
            };
            if let Some(filtered) = self.filter.process(event) {
                self.dispatcher.handle(filtered).await;
            }
        }
        debug!(pending = self.bus.len(), dropped = self.bus.dropped(), "Engine loop exited");
        for event in self.bus.close() {
            if let EventKind::Direct(_, Some(reply)) = event.kind {
                let _ = reply.send(Err(Error::CommandDropped));
            }
        }
        info!("Engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::command::AudioCommand;
    use crate::dispatcher::DispatcherConfig;
    use crate::event::{InputEvent, SourceId};
    use crate::filter::FilterConfig;
    use crate::gateway::SinkChange;
    use crate::keymap::{Binding, KeyMap};
    use crate::state::{AudioState, SinkId};
    use crate::testing::{FakePower, FakeSink};

    fn engine(sink: Arc<FakeSink>) -> Engine<Arc<FakeSink>, FakePower> {
        let mut keymap = KeyMap::default();
        keymap.insert(SourceId::RemoteIr, "KEY_VOLUMEUP", Binding::Press(AudioCommand::VolumeUp { step: 1 }));
        let initial = AudioState::new(50, false, Some("A".into()), vec!["A".into(), "B".into()]);
        let dispatcher = Dispatcher::new(sink, FakePower::default(), initial, DispatcherConfig::default());
        Engine::new(EventBus::new(256), DebounceFilter::new(FilterConfig::default(), keymap), dispatcher)
    }

    #[tokio::test]
    async fn test_direct_command_round_trip() {
        let sink = Arc::new(FakeSink::new(AudioState::default()));
        let engine = engine(Arc::clone(&sink));
        let tx = engine.publisher();
        let board = engine.board();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(engine.run(shutdown.clone()));

        let (event, rx) = InputEvent::direct(SourceId::Http, AudioCommand::SetVolume { level: 20 });
        tx.publish(event);
        assert_eq!(rx.await.unwrap().unwrap().volume, 20);
        assert_eq!(board.snapshot().volume, 20);

        let (event, rx) = InputEvent::direct(SourceId::Bus, AudioCommand::SelectSink { sink: "Z".into() });
        tx.publish(event);
        assert_matches!(rx.await.unwrap(), Err(Error::UnknownSink(_)));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_answers_queued_commands() {
        let engine = engine(Arc::new(FakeSink::new(AudioState::default())));
        let (event, rx) = InputEvent::direct(SourceId::Bus, AudioCommand::ToggleMute);
        engine.publisher().publish(event);

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let tx = engine.publisher();
        engine.run(shutdown).await;

        assert_matches!(rx.await.unwrap(), Err(Error::CommandDropped));

        let (event, late) = InputEvent::direct(SourceId::Http, AudioCommand::ToggleMute);
        tx.publish(event);
        assert_matches!(late.await.unwrap(), Err(Error::CommandDropped));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sources_are_serialized() {
        let sink = Arc::new(FakeSink::new(AudioState::default()));
        sink.set_delay(Duration::from_millis(1));
        let engine = engine(Arc::clone(&sink));
        let board = engine.board();
        let shutdown = CancellationToken::new();

        let bus_tx = engine.publisher();
        let http_tx = engine.publisher();
        let remote_tx = engine.publisher();
        let tx = engine.publisher();
        let handle = tokio::spawn(engine.run(shutdown.clone()));

        let bus = tokio::spawn(async move {
            let mut replies = Vec::new();
            for _ in 0..20 {
                let (event, rx) = InputEvent::direct(SourceId::Bus, AudioCommand::VolumeUp { step: 1 });
                bus_tx.publish(event);
                replies.push(rx);
                tokio::task::yield_now().await;
            }
            replies
        });
        let http = tokio::spawn(async move {
            let mut replies = Vec::new();
            for _ in 0..20 {
                let (event, rx) = InputEvent::direct(SourceId::Http, AudioCommand::VolumeDown { step: 1 });
                http_tx.publish(event);
                replies.push(rx);
                tokio::task::yield_now().await;
            }
            replies
        });
        let remote = tokio::spawn(async move {
            remote_tx.publish(InputEvent::new(SourceId::RemoteIr, EventKind::ButtonDown("KEY_VOLUMEUP".into())));
            for _ in 0..10 {
                remote_tx.publish(InputEvent::new(SourceId::RemoteIr, EventKind::ButtonRepeat("KEY_VOLUMEUP".into())));
                tokio::task::yield_now().await;
            }
            remote_tx.publish(InputEvent::new(SourceId::RemoteIr, EventKind::ButtonUp("KEY_VOLUMEUP".into())));
        });

        let mut replies = bus.await.unwrap();
        replies.extend(http.await.unwrap());
        remote.await.unwrap();
        for rx in replies {
            rx.await.unwrap().unwrap();
        }

        // The bus is FIFO, so once this is answered the remote tail has been applied
        let (event, rx) = InputEvent::direct(SourceId::Http, AudioCommand::SetMute { muted: false });
        tx.publish(event);
        rx.await.unwrap().unwrap();

        assert_eq!(sink.in_flight().peak(), 1);

        // +20 -20 from the APIs; every remote command applied is reflected in the state
        let remote_applied =
            sink.applied().iter().filter(|c| matches!(c, SinkChange::Volume { .. })).count() - 40;
        let expected = 50 + u8::try_from(remote_applied).unwrap();
        assert_eq!(board.snapshot().volume, expected);
        assert!(remote_applied >= 1 && remote_applied < 11);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sinks_changed_event_rescans() {
        let sink = Arc::new(FakeSink::new(AudioState::default()));
        sink.set_sinks(&["A", "B", "C"]);
        let engine = engine(Arc::clone(&sink));
        let tx = engine.publisher();
        let board = engine.board();
        let mut changes = board.subscribe();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(engine.run(shutdown.clone()));

        tx.publish(InputEvent::new(SourceId::Hardware, EventKind::SinksChanged));
        let state = changes.recv().await.unwrap();
        assert_eq!(state.known_sinks.len(), 3);
        assert_eq!(state.active_sink, Some(SinkId::from("A")));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
