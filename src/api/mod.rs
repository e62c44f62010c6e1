//! HTTP and WebSocket gateway
//!
//! Provides the device listing, status probe and fade endpoints, plus the
//! `/ws/midi` stream that relays every MIDI input event to connected clients.
//! Default port: 8000

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tracing::{debug, error, info, warn};

use crate::config::{duration_from_secs, CorsOrigins, FadeDefaults, ServerConfig};
use crate::error::FadeError;
use crate::fade::{run_fade, FadeRequest};
use crate::hub::BroadcastHub;
use crate::ports::{DeviceList, MidiPorts};
use crate::version;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8000;

/// Prefix of the REST endpoints
pub const API_PREFIX: &str = "/api/v1";

/// Shared state for API handlers
pub struct ApiState {
    /// MIDI backend used for listings and fades
    pub ports: Arc<dyn MidiPorts>,
    /// Subscribers of the MIDI stream
    pub hub: Arc<BroadcastHub>,
    /// Values for start request fields left out
    pub fade_defaults: FadeDefaults,
}

/// Response of `GET /`
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub git_commit: String,
    pub timestamp: String,
}

/// Response of `GET /api/v1/midi_devices`
#[derive(Debug, Serialize)]
pub struct MidiDevicesResponse {
    pub input: Vec<String>,
    pub output: Vec<String>,
}

/// Body of the action endpoints and of every error
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// First frame sent on the MIDI stream
#[derive(Debug, Serialize)]
pub struct DeviceAnnouncement {
    pub input_devices: Vec<String>,
    pub output_devices: Vec<String>,
}

/// Fade parameters accepted in the query string and in the JSON body
#[derive(Debug, Default, Deserialize)]
pub struct StartParams {
    pub midi_device_name: Option<String>,
    pub channels: Option<ChannelList>,
    pub steps: Option<u32>,
    /// Seconds
    pub step_delay: Option<f64>,
    pub control: Option<u8>,
}

/// Channels as a JSON array, or comma separated in a query string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChannelList {
    List(Vec<u8>),
    Csv(String),
}

impl ChannelList {
    fn into_channels(self) -> Result<Vec<u8>, ApiError> {
        match self {
            ChannelList::List(channels) => Ok(channels),
            ChannelList::Csv(csv) => csv
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| {
                    part.parse::<u8>()
                        .map_err(|e| ApiError::internal(format!("Invalid channel '{}': {}", part, e)))
                })
                .collect(),
        }
    }
}

impl StartParams {
    /// Fields set here win over fields set in `fallback`
    fn or(self, fallback: StartParams) -> StartParams {
        StartParams {
            midi_device_name: self.midi_device_name.or(fallback.midi_device_name),
            channels: self.channels.or(fallback.channels),
            steps: self.steps.or(fallback.steps),
            step_delay: self.step_delay.or(fallback.step_delay),
            control: self.control.or(fallback.control),
        }
    }
}

/// API error response: `{message}` with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<FadeError> for ApiError {
    fn from(e: FadeError) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::internal(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::internal(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(MessageResponse {
                message: self.message,
            }),
        )
            .into_response()
    }
}

/// Build the API router
pub fn build_router(state: Arc<ApiState>, cors: &CorsOrigins) -> Router {
    Router::new()
        .route("/", get(status))
        .route(&format!("{}/midi_devices", API_PREFIX), get(list_midi_devices))
        .route(&format!("{}/start", API_PREFIX), post(start_fade))
        .route(&format!("{}/go", API_PREFIX), post(go))
        .route("/ws/midi", get(midi_ws))
        .layer(cors_layer(cors))
        .with_state(state)
}

/// CORS policy for the configured origins
///
/// Credentials are only allowed with an explicit origin list; browsers reject them
/// together with a wildcard.
pub fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    match origins {
        CorsOrigins::Any => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        CorsOrigins::List(list) => {
            let origins: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
                        None
                    }
                })
                .collect();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_credentials(true)
                .allow_methods(AllowMethods::mirror_request())
                .allow_headers(AllowHeaders::mirror_request())
        }
    }
}

/// GET / - Running commit and server time
async fn status() -> Json<StatusResponse> {
    let git_commit = tokio::task::spawn_blocking(version::git_commit)
        .await
        .unwrap_or_else(|e| format!("Git hash not available: {}", e));

    Json(StatusResponse {
        git_commit,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
    })
}

/// GET /api/v1/midi_devices - Input and output port names
async fn list_midi_devices(State(state): State<Arc<ApiState>>) -> Json<MidiDevicesResponse> {
    let devices = DeviceList::enumerate(state.ports.as_ref());
    Json(MidiDevicesResponse {
        input: devices.input,
        output: devices.output,
    })
}

/// POST /api/v1/start - Run a fade-out on an output device
async fn start_fade(
    State(state): State<Arc<ApiState>>,
    query: Result<Query<StartParams>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MessageResponse>, ApiError> {
    info!("Racers to the starting line!");

    let Query(query) = query.map_err(|e| {
        warn!("Rejected start query: {}", e.body_text());
        ApiError::from(e)
    })?;
    let params = match parse_start_body(&headers, &body) {
        Ok(Some(body)) => body.or(query),
        Ok(None) => query,
        Err(e) => {
            warn!("Rejected start body: {}", e.message);
            return Err(e);
        }
    };
    let request = resolve_fade_request(state.as_ref(), params)?;

    match run_fade(state.ports.as_ref(), &request).await {
        Ok(summary) => Ok(Json(MessageResponse {
            message: summary.to_string(),
        })),
        Err(e) => {
            error!("Error sending MIDI: {}", e);
            Err(e.into())
        }
    }
}

/// Start parameters from the request body
///
/// An empty body means "no body". Anything else must be JSON with a JSON content type.
fn parse_start_body(headers: &HeaderMap, body: &Bytes) -> Result<Option<StartParams>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    if !has_json_content_type(headers) {
        return Err(ApiError::internal(
            "Expected request with `Content-Type: application/json`",
        ));
    }

    let Json(params) = Json::<StartParams>::from_bytes(body)?;
    Ok(Some(params))
}

fn has_json_content_type(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };

    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}

/// Fill in missing start parameters from the configured defaults
fn resolve_fade_request(state: &ApiState, params: StartParams) -> Result<FadeRequest, ApiError> {
    let defaults = &state.fade_defaults;

    let device = match params.midi_device_name.or_else(|| defaults.device.clone()) {
        Some(device) => device,
        None => first_output(state.ports.as_ref()).ok_or(FadeError::NoDevice)?,
    };

    let channels = match params.channels {
        Some(channels) => channels.into_channels()?,
        None => defaults.channels.clone(),
    };

    let step_delay = match params.step_delay {
        Some(secs) => duration_from_secs(secs).map_err(|e| ApiError::internal(e.to_string()))?,
        None => defaults.step_delay,
    };

    Ok(FadeRequest {
        device,
        channels,
        steps: params.steps.unwrap_or(defaults.steps),
        step_delay,
        control: params.control.unwrap_or(defaults.control),
    })
}

fn first_output(ports: &dyn MidiPorts) -> Option<String> {
    match ports.output_names() {
        Ok(names) => names.into_iter().next(),
        Err(e) => {
            warn!("Failed to list MIDI outputs: {}", e);
            None
        }
    }
}

/// POST /api/v1/go - Acknowledge only
async fn go() -> Json<MessageResponse> {
    info!("Racers are running!");
    Json(MessageResponse {
        message: "Racers are running!".to_string(),
    })
}

/// GET /ws/midi - Stream of MIDI input events
async fn midi_ws(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle one MIDI stream connection
async fn handle_websocket(mut socket: WebSocket, state: Arc<ApiState>) {
    // Subscribe first so events arriving during the greeting are queued, not lost
    let (id, mut frames) = state.hub.subscribe();
    info!("WebSocket client {} connected.", id);

    let devices = DeviceList::enumerate(state.ports.as_ref());
    let greeting = DeviceAnnouncement {
        input_devices: devices.input,
        output_devices: devices.output,
    };

    let greeted = match serde_json::to_string(&greeting) {
        Ok(text) => socket.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize device list: {}", e);
            false
        }
    };

    if greeted {
        loop {
            tokio::select! {
                // Forward hub frames to the client
                frame = frames.recv() => {
                    let Some(text) = frame else {
                        debug!("Subscriber {} dropped by hub", id);
                        break;
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                // Client → server is unused apart from keeping the connection alive
                incoming = socket.recv() => {
                    match incoming {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(Message::Ping(data))) => {
                            if socket.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!("WebSocket error: {}", e);
                            break;
                        }
                    }
                }
            }
        }
    }

    state.hub.unregister(id);
    info!("WebSocket client {} disconnected.", id);
}

/// Start the HTTP server and run it until `shutdown` resolves
pub async fn start_server(
    state: Arc<ApiState>,
    config: &ServerConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = build_router(state, &config.cors);

    info!("Starting MIDI server on http://{}", config.bind);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")?;

    Ok(())
}
