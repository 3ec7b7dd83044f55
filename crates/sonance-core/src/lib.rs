//! Sonance Core - event aggregation and command dispatch.
//!
//! Every input channel (IR remote, input device, local bus, HTTP) publishes
//! normalized [`InputEvent`]s onto a single [`EventBus`]. The [`Engine`] drains
//! the bus sequentially, runs events through the [`DebounceFilter`], and hands
//! the resulting [`AudioCommand`]s to the [`Dispatcher`], which is the only
//! writer of [`AudioState`].

pub mod bus;
pub mod command;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod event;
pub mod filter;
pub mod gateway;
pub mod keymap;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bus::{BusPublisher, EventBus};
pub use command::AudioCommand;
pub use dispatcher::{Dispatcher, DispatcherConfig, Phase};
pub use engine::Engine;
pub use error::{Error, Result};
pub use event::{EventKind, InputEvent, Reply, SourceId};
pub use filter::{DebounceFilter, FilterConfig, Filtered};
pub use gateway::{AudioSinkGateway, GatewayError, PowerGateway, SinkChange};
pub use keymap::{Binding, KeyMap};
pub use state::{AudioState, SinkId, StatusBoard};
