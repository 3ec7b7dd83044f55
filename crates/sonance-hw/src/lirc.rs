//! LIRC remote control adapter.
//!
//! `lircd` broadcasts one line per decoded IR frame on its socket:
//!
//! ```text
//! 0000000000f40bf0 00 KEY_VOLUMEUP RC5
//! ```
//!
//! The second field counts repeats of a held button. LIRC never reports a
//! release, so remote buttons only produce down and repeat events.

use std::path::PathBuf;

use futures::StreamExt;
use sonance_core::{BusPublisher, EventKind, InputEvent, SourceId};
use tokio::net::UnixStream;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::RECONNECT_DELAY;

/// Default `lircd` output socket.
pub const DEFAULT_SOCKET: &str = "/var/run/lirc/lircd";

const MAX_LINE_LENGTH: usize = 1024;

/// Reads the `lircd` socket and publishes [`SourceId::RemoteIr`] events.
#[derive(Debug, Clone)]
pub struct LircAdapter {
    socket: PathBuf,
}

impl LircAdapter {
    #[must_use]
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self { socket: socket.into() }
    }

    /// Run until `shutdown` is cancelled, reconnecting when `lircd` goes away.
    pub async fn run(self, publisher: BusPublisher, shutdown: CancellationToken) {
        loop {
            let connected = tokio::select! {
                () = shutdown.cancelled() => break,
                connected = UnixStream::connect(&self.socket) => connected,
            };

            match connected {
                Ok(stream) => {
                    info!(socket = ?self.socket, "Connected to lircd");
                    if Self::pump(stream, &publisher, &shutdown).await {
                        break;
                    }
                    warn!("lircd connection lost");
                }
                Err(e) => warn!(socket = ?self.socket, error = %e, "Cannot connect to lircd"),
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
        debug!("LIRC adapter stopped");
    }

    /// Forward lines until the stream ends. Returns true on shutdown.
    async fn pump(stream: UnixStream, publisher: &BusPublisher, shutdown: &CancellationToken) -> bool {
        let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        loop {
            let frame = tokio::select! {
                () = shutdown.cancelled() => return true,
                frame = lines.next() => frame,
            };
            match frame {
                Some(Ok(line)) => match parse_line(&line) {
                    Some(kind) => {
                        trace!(?kind, "IR frame");
                        publisher.publish(InputEvent::new(SourceId::RemoteIr, kind));
                    }
                    None => debug!(%line, "Ignoring lircd line"),
                },
                Some(Err(e)) => {
                    warn!(error = %e, "Bad lircd frame");
                    return false;
                }
                None => return false,
            }
        }
    }
}

/// Parse one `lircd` broadcast line.
///
/// Returns `None` for anything that is not a key line, such as the
/// `BEGIN`/`END` reply blocks lircd sends on `SIGHUP`.
#[must_use]
pub fn parse_line(line: &str) -> Option<EventKind> {
    let mut fields = line.split_whitespace();
    let code = fields.next()?;
    let repeat = fields.next()?;
    let key = fields.next()?;
    fields.next()?;

    u64::from_str_radix(code, 16).ok()?;
    let repeat = u32::from_str_radix(repeat, 16).ok()?;

    Some(if repeat == 0 {
        EventKind::ButtonDown(key.to_string())
    } else {
        EventKind::ButtonRepeat(key.to_string())
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use sonance_core::EventBus;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixListener;

    use super::*;

    #[test]
    fn test_parse_press_and_repeat() {
        assert_matches!(
            parse_line("0000000000f40bf0 00 KEY_VOLUMEUP RC5"),
            Some(EventKind::ButtonDown(key)) if key == "KEY_VOLUMEUP"
        );
        assert_matches!(
            parse_line("0000000000f40bf0 0a KEY_VOLUMEUP RC5"),
            Some(EventKind::ButtonRepeat(key)) if key == "KEY_VOLUMEUP"
        );
    }

    #[test]
    fn test_parse_rejects_noise() {
        assert!(parse_line("BEGIN").is_none());
        assert!(parse_line("SIGHUP").is_none());
        assert!(parse_line("").is_none());
        assert!(parse_line("zz 00 KEY_MUTE RC5").is_none());
        assert!(parse_line("00 xx KEY_MUTE RC5").is_none());
        assert!(parse_line("00 00 KEY_MUTE").is_none());
    }

    #[tokio::test]
    async fn test_adapter_publishes_remote_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lircd");
        let listener = UnixListener::bind(&path).unwrap();

        let bus = EventBus::new(16);
        let shutdown = CancellationToken::new();
        let adapter = tokio::spawn(LircAdapter::new(&path).run(bus.publisher(), shutdown.clone()));

        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"BEGIN\n0000000000f40bf0 00 KEY_MUTE RC5\n0000000000f40bf0 01 KEY_MUTE RC5\n").await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), bus.next_event()).await.unwrap();
        assert_eq!(first.source, SourceId::RemoteIr);
        assert_matches!(first.kind, EventKind::ButtonDown(key) if key == "KEY_MUTE");

        let second = tokio::time::timeout(Duration::from_secs(2), bus.next_event()).await.unwrap();
        assert_matches!(second.kind, EventKind::ButtonRepeat(_));

        shutdown.cancel();
        adapter.await.unwrap();
    }
}
