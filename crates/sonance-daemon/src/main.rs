//! Sonance Daemon - remote audio control service.
//!
//! Wires the hardware adapters, the IPC/HTTP/D-Bus control surfaces and the
//! event engine together, then runs until SIGINT or SIGTERM.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

mod config;
mod control;
#[cfg(feature = "dbus")]
mod dbus;
mod gateways;
mod http;
mod server;
mod signals;

use sonance_core::{DebounceFilter, Dispatcher, Engine, EventBus, SinkId};
use sonance_hw::alsa::CARDS_PATH;
use sonance_hw::monitor::ASOUND_ROOT;
use sonance_hw::{HotplugWatcher, InputDeviceAdapter, LircAdapter, PlaybackMonitor};
use sonance_ipc::{IpcServer, socket_path};

use crate::config::ConfigSource;
use crate::control::Controller;

/// How long tasks get to finish after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Remote volume, mute, output and power control daemon.
#[derive(Debug, Parser)]
#[command(name = "sonance-daemon", version, about)]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level, overriding RUST_LOG and the config file
    #[arg(long, value_name = "LEVEL", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, source) = config::load_config(args.config.as_deref())?;

    init_logging(args.log_level.as_deref(), config.daemon.log_level.as_deref())?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Sonance daemon");
    match source {
        ConfigSource::File(config_path) => info!(?config_path, "Configuration loaded"),
        ConfigSource::Defaults(config_path) => info!(?config_path, "Config file not found, using defaults"),
    }

    let shutdown = CancellationToken::new();
    signals::setup_signal_handlers(shutdown.clone())?;

    // Gateways and engine
    let mixer = gateways::mixer(&config);
    let power = gateways::power(&config)?;
    let dispatcher = Dispatcher::init(mixer, power, config.engine.dispatcher())
        .await
        .context("Failed to read mixer state")?;

    let keymap = config.keymap();
    info!(bindings = keymap.len(), "Key map loaded");

    let engine = Engine::new(
        EventBus::new(config.engine.queue_capacity),
        DebounceFilter::new(config.engine.filter(), keymap),
        dispatcher,
    );
    let publisher = engine.publisher();
    let controller = Controller::new(publisher.clone(), engine.board(), config.engine.volume_step);

    let mut tasks = JoinSet::new();
    tasks.spawn(engine.run(shutdown.clone()));

    // Hardware inputs
    if config.lirc.enabled {
        tasks.spawn(LircAdapter::new(&config.lirc.socket).run(publisher.clone(), shutdown.clone()));
    }
    if config.input.enabled {
        let adapter = InputDeviceAdapter::new(&config.input.device).with_grab(config.input.grab);
        tasks.spawn(adapter.run(publisher.clone(), shutdown.clone()));
    }
    if config.alsa.hotplug_poll_ms > 0 {
        let watcher = HotplugWatcher::new(
            CARDS_PATH,
            config.alsa.cards.clone(),
            Duration::from_millis(config.alsa.hotplug_poll_ms),
        );
        tasks.spawn(watcher.run(publisher.clone(), shutdown.clone()));
    }
    if config.playback.enabled {
        let monitor = PlaybackMonitor::new(
            Path::new(ASOUND_ROOT),
            &config.playback.card,
            config.playback.subdevice,
            Duration::from_millis(config.playback.poll_ms),
        )
        .with_sink(config.playback.sink.clone().map(SinkId::new));
        tasks.spawn(monitor.run(publisher.clone(), shutdown.clone()));
    }

    // Control surfaces
    let socket = if config.ipc.enabled {
        let socket = config.ipc.path.clone().unwrap_or_else(socket_path);
        let (ipc_server, request_rx) = IpcServer::bind(&socket).await.context("Failed to start IPC server")?;
        let event_tx = ipc_server.event_sender();

        tasks.spawn(server::serve(controller.clone(), request_rx, shutdown.clone()));
        tasks.spawn(server::forward_state_changes(controller.clone(), event_tx, shutdown.clone()));

        let token = shutdown.clone();
        tasks.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = ipc_server.run() => {}
            }
        });
        Some(socket)
    } else {
        None
    };

    if config.http.enabled {
        let router = http::router(controller.clone());
        let listeners = http::bind(&config.http.bind).await;
        if listeners.is_empty() {
            error!("HTTP control surface has no listening address");
        }
        for listener in listeners {
            tasks.spawn(http::serve(listener, router.clone(), shutdown.clone()));
        }
    }

    #[cfg(feature = "dbus")]
    if config.dbus.enabled {
        let controller = controller.clone();
        let token = shutdown.clone();
        tasks.spawn(async move {
            if let Err(e) = dbus::serve(controller, token).await {
                error!(error = %e, "D-Bus control surface failed");
            }
        });
    }
    #[cfg(not(feature = "dbus"))]
    if config.dbus.enabled {
        debug!("Built without D-Bus support, skipping");
    }

    info!("Sonance daemon running");
    shutdown.cancelled().await;
    info!("Shutting down...");

    let drain = async {
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Task failed during shutdown");
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Tasks still running after grace period, aborting");
    }

    if let Some(socket) = socket {
        match std::fs::remove_file(&socket) {
            Ok(()) => debug!(?socket, "Removed IPC socket"),
            Err(e) => warn!(?socket, error = %e, "Failed to remove IPC socket"),
        }
    }

    info!("Sonance daemon stopped");
    Ok(())
}

/// Install the tracing subscriber.
///
/// Precedence: `--log-level`, then `RUST_LOG`, then `daemon.log_level`,
/// then the built-in directives.
fn init_logging(cli_level: Option<&str>, config_level: Option<&str>) -> Result<()> {
    let filter = if let Some(level) = cli_level {
        level_filter(level)?
    } else if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        EnvFilter::from_default_env()
    } else if let Some(level) = config_level {
        level_filter(level)?
    } else {
        EnvFilter::new("sonance=info,sonance_daemon=debug")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn level_filter(level: &str) -> Result<EnvFilter> {
    level.parse::<LevelFilter>().with_context(|| format!("Invalid log level: {level:?}"))?;
    let level = level.to_ascii_lowercase();
    Ok(EnvFilter::try_new(format!("warn,sonance={level}"))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        let args = Args::try_parse_from(["sonance-daemon", "--config", "/etc/sonance.toml", "--log-level", "debug"])
            .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/sonance.toml")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));

        assert!(Args::try_parse_from(["sonance-daemon", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn test_level_filter() {
        assert!(level_filter("info").is_ok());
        assert!(level_filter("WARN").is_ok());
        assert!(level_filter("chatty").is_err());
    }
}
