//! IPC server implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, info, warn};

use crate::MAX_LINE_LENGTH;
use crate::error::IpcResult;
use crate::events::{Event, EventType};
use crate::messages::{ErrorInfo, Method, Request, Response};

/// A request waiting for the daemon to answer it.
#[derive(Debug)]
pub struct PendingRequest {
    pub client_id: u64,
    pub request: Request,
    pub response_tx: mpsc::Sender<Response>,
}

impl PendingRequest {
    /// Send the response back to the client.
    pub async fn respond(self, result: Result<serde_json::Value, ErrorInfo>) {
        let response = Response { id: self.request.id, result };
        if self.response_tx.send(response).await.is_err() {
            debug!(client_id = self.client_id, "Client gone before response");
        }
    }
}

/// IPC server that listens for client connections.
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
    clients: Arc<RwLock<HashMap<u64, ClientHandle>>>,
    next_client_id: AtomicU64,
    event_tx: broadcast::Sender<Event>,
    request_tx: mpsc::Sender<PendingRequest>,
}

/// Per-client bookkeeping. An empty subscription list means "everything".
struct ClientHandle {
    subscriptions: Vec<EventType>,
}

impl IpcServer {
    /// Create a new IPC server bound to the given socket path.
    ///
    /// # Errors
    /// Returns an error if the socket cannot be created.
    pub async fn bind(socket_path: &Path) -> IpcResult<(Self, mpsc::Receiver<PendingRequest>)> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Remove stale socket file if it exists
        if socket_path.exists() {
            tokio::fs::remove_file(socket_path).await?;
        }

        let listener = UnixListener::bind(socket_path)?;
        info!(?socket_path, "IPC server listening");

        let (event_tx, _) = broadcast::channel(256);
        let (request_tx, request_rx) = mpsc::channel(64);

        Ok((
            Self {
                listener,
                path: socket_path.to_path_buf(),
                clients: Arc::new(RwLock::new(HashMap::new())),
                next_client_id: AtomicU64::new(1),
                event_tx,
                request_tx,
            },
            request_rx,
        ))
    }

    /// Path the server is listening on.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
                    info!(client_id, "Client connected");

                    let clients = Arc::clone(&self.clients);
                    let event_rx = self.event_tx.subscribe();
                    let request_tx = self.request_tx.clone();

                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_client(client_id, stream, clients, event_rx, request_tx).await
                        {
                            error!(client_id, error = %e, "Client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                }
            }
        }
    }

    /// Broadcast an event to all subscribed clients.
    pub fn broadcast(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// Get a clone of the event sender for broadcasting from other tasks.
    pub fn event_sender(&self) -> broadcast::Sender<Event> {
        self.event_tx.clone()
    }

    async fn handle_client(
        client_id: u64,
        stream: UnixStream,
        clients: Arc<RwLock<HashMap<u64, ClientHandle>>>,
        mut event_rx: broadcast::Receiver<Event>,
        request_tx: mpsc::Sender<PendingRequest>,
    ) -> IpcResult<()> {
        let (reader, writer) = stream.into_split();
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let mut out = FramedWrite::new(writer, LinesCodec::new());

        let (response_tx, mut response_rx) = mpsc::channel::<Response>(16);

        clients.write().await.insert(client_id, ClientHandle { subscriptions: Vec::new() });

        loop {
            tokio::select! {
                // Read request from client
                frame = lines.next() => {
                    match frame {
                        None => {
                            debug!(client_id, "Client disconnected");
                            break;
                        }
                        Some(Ok(line)) => {
                            let Ok(request) = serde_json::from_str::<Request>(&line) else {
                                warn!(client_id, "Invalid request format");
                                continue;
                            };
                            debug!(client_id, request_id = request.id, "Received request");

                            match request.method {
                                Method::Subscribe { ref events } | Method::Unsubscribe { ref events } => {
                                    let subscribe = matches!(request.method, Method::Subscribe { .. });
                                    if let Some(handle) = clients.write().await.get_mut(&client_id) {
                                        handle.subscriptions.retain(|e| !events.contains(e));
                                        if subscribe {
                                            handle.subscriptions.extend(events.iter().copied());
                                        }
                                    }
                                    let response = Response { id: request.id, result: Ok(json!({"success": true})) };
                                    out.send(serde_json::to_string(&response)?).await?;
                                }
                                _ => {
                                    let pending = PendingRequest { client_id, request, response_tx: response_tx.clone() };
                                    if let Err(mpsc::error::SendError(pending)) = request_tx.send(pending).await {
                                        let response = Response {
                                            id: pending.request.id,
                                            result: Err(ErrorInfo::new(503, "Daemon is shutting down")),
                                        };
                                        out.send(serde_json::to_string(&response)?).await?;
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            error!(client_id, error = %e, "Read error");
                            break;
                        }
                    }
                }

                // Send response to client
                Some(response) = response_rx.recv() => {
                    out.send(serde_json::to_string(&response)?).await?;
                }

                // Forward events to client
                event = event_rx.recv() => {
                    match event {
                        Ok(event) => {
                            let wanted = clients.read().await.get(&client_id).is_some_and(|handle| {
                                handle.subscriptions.is_empty() || handle.subscriptions.contains(&event.event)
                            });
                            if wanted {
                                out.send(serde_json::to_string(&event)?).await?;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(client_id, skipped, "Client fell behind on events");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }

        clients.write().await.remove(&client_id);

        info!(client_id, "Client handler exiting");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::client::IpcClient;

    async fn start() -> (tempfile::TempDir, PathBuf, broadcast::Sender<Event>, mpsc::Receiver<PendingRequest>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/daemon.sock");
        let (server, requests) = IpcServer::bind(&path).await.unwrap();
        let events = server.event_sender();
        tokio::spawn(async move { server.run().await });
        (dir, path, events, requests)
    }

    #[tokio::test]
    async fn test_request_response() {
        let (_dir, path, _events, mut requests) = start().await;

        tokio::spawn(async move {
            while let Some(pending) = requests.recv().await {
                let result = match pending.request.method {
                    Method::GetVolume => Ok(json!(42)),
                    _ => Err(ErrorInfo::new(400, "nope")),
                };
                pending.respond(result).await;
            }
        });

        let client = IpcClient::connect(&path).await.unwrap();
        assert_eq!(client.call(Method::GetVolume).await.unwrap(), json!(42));

        let err = client.call(Method::CycleSink).await.unwrap_err();
        assert_matches!(err, crate::IpcError::Server(ErrorInfo { code: 400, .. }));
    }

    #[tokio::test]
    async fn test_subscriptions_filter_events() {
        let (_dir, path, events, _requests) = start().await;

        let mut client = IpcClient::connect(&path).await.unwrap();
        client.call(Method::Subscribe { events: vec![EventType::MuteChanged] }).await.unwrap();

        let _ = events.send(Event { event: EventType::VolumeChanged, data: json!({"volume": 1}) });
        let _ = events.send(Event { event: EventType::MuteChanged, data: json!({"muted": true}) });

        let event = tokio::time::timeout(Duration::from_secs(2), client.events().recv()).await.unwrap().unwrap();
        assert_eq!(event.event, EventType::MuteChanged);
    }
}
