//! D-Bus control surface on the session bus.

use sonance_core::{AudioCommand, AudioState, Error, SinkId, SourceId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zbus::{fdo, interface};

use crate::control::Controller;

/// Well-known bus name.
pub const BUS_NAME: &str = "org.sonance.Control1";
/// Object path of the control interface.
pub const OBJECT_PATH: &str = "/org/sonance/Control1";

struct Control {
    controller: Controller,
}

impl Control {
    async fn run(&self, command: AudioCommand) -> fdo::Result<AudioState> {
        debug!(command = command.name(), "D-Bus command");
        self.controller.execute(SourceId::Bus, command).await.map_err(to_fdo)
    }
}

fn to_fdo(err: Error) -> fdo::Error {
    match err {
        Error::InvalidRange(_) | Error::UnknownSink(_) => fdo::Error::InvalidArgs(err.to_string()),
        other => fdo::Error::Failed(other.to_string()),
    }
}

#[interface(name = "org.sonance.Control1")]
impl Control {
    async fn get_volume(&self) -> u8 {
        self.controller.state().volume
    }

    async fn set_volume(&self, level: i64) -> fdo::Result<u8> {
        Ok(self.run(AudioCommand::SetVolume { level }).await?.volume)
    }

    /// Returns the new mute state.
    async fn toggle_mute(&self) -> fdo::Result<bool> {
        Ok(self.run(AudioCommand::ToggleMute).await?.muted)
    }

    async fn list_sinks(&self) -> Vec<String> {
        self.controller.state().known_sinks.iter().map(|sink| sink.as_str().to_string()).collect()
    }

    async fn select_sink(&self, id: String) -> fdo::Result<()> {
        self.run(AudioCommand::SelectSink { sink: SinkId::new(id) }).await.map(|_| ())
    }
}

/// Export the interface and hold the name until shutdown.
///
/// # Errors
/// Returns an error if the session bus is unreachable or the name is taken.
pub async fn serve(controller: Controller, shutdown: CancellationToken) -> zbus::Result<()> {
    let connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, Control { controller })?
        .build()
        .await?;
    info!(name = BUS_NAME, "D-Bus interface exported");

    shutdown.cancelled().await;
    drop(connection);
    debug!("D-Bus interface released");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert!(matches!(to_fdo(Error::InvalidRange(150)), fdo::Error::InvalidArgs(_)));
        assert!(matches!(to_fdo(Error::UnknownSink("Z".into())), fdo::Error::InvalidArgs(_)));
        assert!(matches!(to_fdo(Error::NoSinksAvailable), fdo::Error::Failed(_)));
        assert!(matches!(to_fdo(Error::GatewayFailure("x".into())), fdo::Error::Failed(_)));
    }
}
