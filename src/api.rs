use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, Path};
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::channel::Frame;
use crate::dispatcher::Dispatcher;
use crate::error::BridgeError;
use crate::registry::catalog;
use crate::settings::BridgeConfig;

/// Shared by every request handler.
#[derive(Debug, Clone)]
pub struct ApiState {
    pub dispatcher: Dispatcher,
    pub config: BridgeConfig,
}

// ── Response types ───────────────────────────────────────────────

#[derive(Serialize)]
struct CommandOk {
    result: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelOpened {
    channel_id: String,
}

/// A `BridgeError` rendered with the server's debug setting.
struct ApiError {
    error: BridgeError,
    debug: bool,
}

impl ApiError {
    fn new(state: &ApiState, error: BridgeError) -> Self {
        Self {
            error,
            debug: state.config.debug,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.error.to_body(self.debug))).into_response()
    }
}

/// Request body as JSON. An empty body means no arguments.
fn parse_args(body: &Bytes) -> Result<Value, BridgeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(body)
        .map_err(|e| BridgeError::validation(format!("Invalid JSON body: {e}")))
}

fn frame_event(frame: &Frame) -> Event {
    let data = match frame {
        Frame::Close => "null".to_string(),
        other => serde_json::to_string(&other.data()).unwrap_or_else(|_| "null".to_string()),
    };
    Event::default().event(frame.event()).data(data)
}

// ── Handlers ─────────────────────────────────────────────────────

async fn get_health(Extension(state): Extension<Arc<ApiState>>) -> impl IntoResponse {
    let commands: Vec<String> = state
        .dispatcher
        .registry()
        .list_all()
        .map(|def| def.name.clone())
        .collect();
    Json(json!({
        "status": "ok",
        "bridge": state.config.title,
        "commands": commands,
    }))
}

async fn get_commands(Extension(state): Extension<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.dispatcher.registry().list())
}

async fn get_directory_schema(
    Extension(state): Extension<Arc<ApiState>>,
) -> Result<Json<Value>, ApiError> {
    catalog::to_json_schema(state.dispatcher.registry())
        .map(Json)
        .map_err(|e| ApiError::new(&state, e))
}

async fn get_command_schema(
    Extension(state): Extension<Arc<ApiState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    catalog::param_schema(state.dispatcher.registry(), &name)
        .map(Json)
        .map_err(|e| ApiError::new(&state, e))
}

async fn post_command(
    Extension(state): Extension<Arc<ApiState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<CommandOk>, ApiError> {
    let args = parse_args(&body).map_err(|e| ApiError::new(&state, e))?;
    let result = state
        .dispatcher
        .invoke(&name, args)
        .await
        .map_err(|e| ApiError::new(&state, e))?;
    Ok(Json(CommandOk { result }))
}

async fn post_channel(
    Extension(state): Extension<Arc<ApiState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<ChannelOpened>, ApiError> {
    let args = parse_args(&body).map_err(|e| ApiError::new(&state, e))?;
    let channel_id = state
        .dispatcher
        .open_stream(&name, args)
        .map_err(|e| ApiError::new(&state, e))?;
    Ok(Json(ChannelOpened { channel_id }))
}

async fn get_channel_stream(
    Extension(state): Extension<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let receiver = state
        .dispatcher
        .attach(&id)
        .map_err(|e| ApiError::new(&state, e))?;
    let events = receiver
        .into_stream()
        .map(|frame| Ok::<_, Infallible>(frame_event(&frame)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

// ── Router & server ──────────────────────────────────────────────

fn cors_layer(config: &BridgeConfig) -> CorsLayer {
    if config.allows_any_origin() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin: {e}");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn router(state: Arc<ApiState>) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route("/", get(get_health))
        .route("/commands", get(get_commands))
        .route("/commands/schema", get(get_directory_schema))
        .route("/commands/{name}/schema", get(get_command_schema))
        .route("/command/{name}", post(post_command))
        .route("/channel/{name}", post(post_channel))
        .route("/channel/stream/{id}", get(get_channel_stream))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}

/// Bind `addr` and serve in the background. Returns the bound address, which
/// differs from `addr` when port 0 was requested.
pub async fn start_api_server(
    state: Arc<ApiState>,
    addr: SocketAddr,
) -> Result<SocketAddr, BridgeError> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BridgeError::internal(format!("Failed to bind API server on {addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| BridgeError::internal(format!("Failed to get API server address: {e}")))?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {e}");
        }
    });

    tracing::info!(%local, "API server listening");
    Ok(local)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_empty_object() {
        assert_eq!(parse_args(&Bytes::new()).unwrap(), json!({}));
        assert_eq!(parse_args(&Bytes::from_static(b"  \n")).unwrap(), json!({}));
    }

    #[test]
    fn invalid_body_is_validation_error() {
        let err = parse_args(&Bytes::from_static(b"{nope")).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
