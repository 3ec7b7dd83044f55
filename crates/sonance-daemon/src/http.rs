//! HTTP control surface.
//!
//! Every mutating route publishes a direct command from [`SourceId::Http`]
//! and answers with the resulting status once the dispatcher is done.

use std::net::SocketAddr;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sonance_core::{AudioCommand, AudioState, SinkId, SourceId};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::control::Controller;

/// Body of `GET /status` and of every successful command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    pub volume: u8,
    pub muted: bool,
    pub active_sink: Option<SinkId>,
}

impl From<&AudioState> for StatusBody {
    fn from(state: &AudioState) -> Self {
        Self { volume: state.volume, muted: state.muted, active_sink: state.active_sink.clone() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinksBody {
    pub sinks: Vec<SinkId>,
    pub active_sink: Option<SinkId>,
}

#[derive(Debug, Deserialize)]
struct VolumeRequest {
    level: i64,
}

#[derive(Debug, Deserialize)]
struct MuteRequest {
    on: bool,
}

#[derive(Debug, Deserialize)]
struct SinkRequest {
    id: SinkId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PowerRequest {
    #[serde(default)]
    sink_id: Option<SinkId>,
    on: bool,
}

#[derive(Debug, Deserialize)]
struct StepQuery {
    step: Option<u8>,
}

/// Error response: the dispatcher's error with its HTTP status.
#[derive(Debug)]
pub struct ApiError(sonance_core::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<StatusBody>, ApiError>;

/// Build the router.
pub fn router(controller: Controller) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/sinks", get(sinks))
        .route("/volume", post(set_volume))
        .route("/volume/up", post(volume_up))
        .route("/volume/down", post(volume_down))
        .route("/mute", post(set_mute))
        .route("/mute/toggle", post(toggle_mute))
        .route("/sink", post(select_sink))
        .route("/sink/cycle", post(cycle_sink))
        .route("/power", post(set_power))
        .layer(TraceLayer::new_for_http())
        .with_state(controller)
}

async fn run(controller: &Controller, command: AudioCommand) -> ApiResult {
    debug!(command = command.name(), "HTTP command");
    let state = controller.execute(SourceId::Http, command).await.map_err(ApiError)?;
    Ok(Json(StatusBody::from(&state)))
}

async fn status(State(controller): State<Controller>) -> Json<StatusBody> {
    Json(StatusBody::from(&*controller.state()))
}

async fn sinks(State(controller): State<Controller>) -> Json<SinksBody> {
    let state = controller.state();
    Json(SinksBody { sinks: state.known_sinks.clone(), active_sink: state.active_sink.clone() })
}

async fn set_volume(State(controller): State<Controller>, Json(body): Json<VolumeRequest>) -> ApiResult {
    run(&controller, AudioCommand::SetVolume { level: body.level }).await
}

async fn volume_up(State(controller): State<Controller>, Query(query): Query<StepQuery>) -> ApiResult {
    let step = query.step.unwrap_or(controller.step());
    run(&controller, AudioCommand::VolumeUp { step }).await
}

async fn volume_down(State(controller): State<Controller>, Query(query): Query<StepQuery>) -> ApiResult {
    let step = query.step.unwrap_or(controller.step());
    run(&controller, AudioCommand::VolumeDown { step }).await
}

async fn set_mute(State(controller): State<Controller>, Json(body): Json<MuteRequest>) -> ApiResult {
    run(&controller, AudioCommand::SetMute { muted: body.on }).await
}

async fn toggle_mute(State(controller): State<Controller>) -> ApiResult {
    run(&controller, AudioCommand::ToggleMute).await
}

async fn select_sink(State(controller): State<Controller>, Json(body): Json<SinkRequest>) -> ApiResult {
    run(&controller, AudioCommand::SelectSink { sink: body.id }).await
}

async fn cycle_sink(State(controller): State<Controller>) -> ApiResult {
    run(&controller, AudioCommand::CycleSink).await
}

async fn set_power(State(controller): State<Controller>, Json(body): Json<PowerRequest>) -> ApiResult {
    run(&controller, AudioCommand::PowerSink { sink: body.sink_id, on: body.on }).await
}

/// Bind every address that can be bound.
///
/// On Linux `[::]` usually also covers IPv4, so a second bind of the same
/// port on `0.0.0.0` may fail; that is logged and skipped.
pub async fn bind(addrs: &[SocketAddr]) -> Vec<TcpListener> {
    let mut listeners = Vec::new();
    for addr in addrs {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!(%addr, "HTTP server listening");
                listeners.push(listener);
            }
            Err(e) => warn!(%addr, error = %e, "Cannot bind HTTP address"),
        }
    }
    listeners
}

/// Serve `router` on `listener` until shutdown.
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) {
    let addr = listener.local_addr().ok();
    if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await {
        warn!(?addr, error = %e, "HTTP server failed");
    }
    debug!(?addr, "HTTP server stopped");
}
