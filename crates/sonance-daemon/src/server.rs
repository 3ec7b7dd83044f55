//! Request handling for the IPC server.

use serde::Serialize;
use serde_json::{Value, json};
use sonance_core::{AudioCommand, AudioState, SourceId};
use sonance_ipc::{ErrorInfo, Event, Method, PendingRequest};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::control::{self, Controller};

/// An IPC request after it has been taken off the wire.
pub enum Submitted {
    /// Answered without going through the engine
    Ready(Result<Value, ErrorInfo>),
    /// Queued on the bus; resolves once the dispatcher is done
    Queued(oneshot::Receiver<sonance_core::Result<AudioState>>),
}

/// Answer a query or queue a command, without waiting.
///
/// Queries are answered from the status board; everything else goes to the
/// engine as a direct command from [`SourceId::Bus`].
pub fn submit_request(controller: &Controller, method: Method) -> Submitted {
    let command = match method {
        Method::GetState => return Submitted::Ready(to_value(&*controller.state())),
        Method::GetVolume => return Submitted::Ready(Ok(json!(controller.state().volume))),
        Method::ListSinks => return Submitted::Ready(to_value(&controller.state().known_sinks)),

        Method::SetVolume { level } => AudioCommand::SetVolume { level },
        Method::VolumeUp { step } => AudioCommand::VolumeUp { step: step.unwrap_or(controller.step()) },
        Method::VolumeDown { step } => AudioCommand::VolumeDown { step: step.unwrap_or(controller.step()) },
        Method::ToggleMute => AudioCommand::ToggleMute,
        Method::SetMute { muted } => AudioCommand::SetMute { muted },
        Method::SelectSink { sink } => AudioCommand::SelectSink { sink },
        Method::CycleSink => AudioCommand::CycleSink,
        Method::SetPower { sink, on } => AudioCommand::PowerSink { sink, on },

        // The server answers these itself
        Method::Subscribe { .. } | Method::Unsubscribe { .. } => {
            return Submitted::Ready(Ok(json!({"success": true})));
        }
    };

    debug!(command = command.name(), "IPC command");
    Submitted::Queued(controller.submit(SourceId::Bus, command))
}

/// Wait for a submitted request's response value.
pub async fn finish(submitted: Submitted) -> Result<Value, ErrorInfo> {
    match submitted {
        Submitted::Ready(result) => result,
        Submitted::Queued(reply) => {
            let state = control::answer(reply).await.map_err(|e| ErrorInfo::from(&e))?;
            to_value(&state)
        }
    }
}

/// Handle an IPC request and return a response value.
pub async fn handle_request(controller: &Controller, method: Method) -> Result<Value, ErrorInfo> {
    finish(submit_request(controller, method)).await
}

fn to_value(value: &impl Serialize) -> Result<Value, ErrorInfo> {
    serde_json::to_value(value).map_err(|e| ErrorInfo::new(500, e.to_string()))
}

/// Answer IPC requests until shutdown.
///
/// Requests are submitted in arrival order; only the wait for each answer
/// runs in its own task, so a slow command does not hold up queries.
pub async fn serve(controller: Controller, mut requests: mpsc::Receiver<PendingRequest>, shutdown: CancellationToken) {
    loop {
        let pending = tokio::select! {
            () = shutdown.cancelled() => break,
            pending = requests.recv() => match pending {
                Some(pending) => pending,
                None => break,
            },
        };

        let submitted = submit_request(&controller, pending.request.method.clone());
        tokio::spawn(async move {
            pending.respond(finish(submitted).await).await;
        });
    }
    debug!("IPC request handler stopped");
}

/// Turn published states into IPC events for subscribed clients.
pub async fn forward_state_changes(
    controller: Controller,
    events: broadcast::Sender<Event>,
    shutdown: CancellationToken,
) {
    let mut changes = controller.subscribe();
    let mut previous = controller.state();
    loop {
        let current = tokio::select! {
            () = shutdown.cancelled() => break,
            change = changes.recv() => match change {
                Ok(state) => state,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "State forwarder fell behind");
                    controller.state()
                }
                Err(RecvError::Closed) => break,
            },
        };
        for event in Event::diff(&previous, &current) {
            // No receivers just means no client is connected
            let _ = events.send(event);
        }
        previous = current;
    }
    debug!("State forwarder stopped");
}
