use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::{
    config::{Config, ServerConfig},
    rpc::{RpcRequest, RpcResponse, JSONRPC_VERSION},
    session::{Session, SessionRegistry},
    tools,
};

pub const SESSION_HEADER: &str = "mcp-session-id";
pub const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "kbc-daemon";

pub async fn run() -> Result<()> {
    let config = ServerConfig::from_env()?;
    let state = Arc::new(AppState {
        sessions: SessionRegistry::with_idle_timeout(config.session_idle_timeout),
        defaults: config.defaults.clone(),
    });
    spawn_session_sweeper(state.clone());

    let app = build_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listen socket")?;

    info!(addr = %config.listen_addr, "kbc-daemon listening");
    axum::serve(listener, app)
        .await
        .context("HTTP server exited")?;
    Ok(())
}

/// Periodically drops sessions whose clients went away without closing them.
fn spawn_session_sweeper(state: Arc<AppState>) {
    let period = (state.sessions.idle_timeout() / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = state.sessions.evict_idle();
            if evicted > 0 {
                debug!(evicted, open = state.sessions.len(), "idle sessions evicted");
            }
        }
    });
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/mcp", post(handle_rpc).delete(close_session))
        .with_state(state)
}

/// Shared server state: open sessions and the configuration new sessions
/// start from.
#[derive(Debug)]
pub struct AppState {
    pub sessions: SessionRegistry,
    pub defaults: Config,
}

impl AppState {
    pub fn new(defaults: Config) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            defaults,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    arguments: Value,
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Service is healthy"))
)]
async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[utoipa::path(
    post,
    path = "/mcp",
    request_body = RpcRequest,
    responses(
        (status = 200, description = "JSON-RPC response; `initialize` also sets the Mcp-Session-Id header", body = RpcResponse),
        (status = 202, description = "Notification accepted"),
        (status = 400, description = "Missing or malformed Mcp-Session-Id", body = ErrorBody),
        (status = 404, description = "Unknown session", body = ErrorBody)
    )
)]
async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(response) => return Json(response).into_response(),
    };

    if request.is_notification() {
        debug!(method = %request.method, "notification received");
        return StatusCode::ACCEPTED.into_response();
    }

    let id = request.id;
    match request.method.as_str() {
        "initialize" => initialize(&state, &headers, &query, id),
        "ping" => Json(RpcResponse::success(id, json!({}))).into_response(),
        "tools/list" => Json(RpcResponse::success(
            id,
            json!({ "tools": tools::list_tools() }),
        ))
        .into_response(),
        "tools/call" => match lookup_session(&state, &headers) {
            Ok(session) => dispatch_tool_call(&session, id, request.params).await,
            Err(err) => err.into_response(),
        },
        other => Json(RpcResponse::method_not_found(id, other)).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/mcp",
    responses(
        (status = 204, description = "Session closed"),
        (status = 400, description = "Missing or malformed Mcp-Session-Id", body = ErrorBody),
        (status = 404, description = "Unknown session", body = ErrorBody)
    )
)]
async fn close_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let id = session_id(&headers)?;
    state
        .sessions
        .remove(id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| ApiError::not_found(format!("session {id} not found")))
}

fn parse_request(body: &[u8]) -> Result<RpcRequest, RpcResponse> {
    let value: Value = serde_json::from_slice(body).map_err(RpcResponse::parse_error)?;
    if value.is_array() {
        return Err(RpcResponse::invalid_request(
            Value::Null,
            "batch requests are not supported",
        ));
    }
    let request: RpcRequest = serde_json::from_value(value)
        .map_err(|err| RpcResponse::invalid_request(Value::Null, err.to_string()))?;
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(RpcResponse::invalid_request(
            request.id,
            format!("unsupported jsonrpc version '{}'", request.jsonrpc),
        ));
    }
    Ok(request)
}

fn initialize(
    state: &AppState,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    id: Value,
) -> Response {
    let config = session_config(&state.defaults, headers, query);
    match Session::open(config) {
        Ok(session) => {
            let session = state.sessions.insert(session);
            let result = json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")}
            });
            (
                [(SESSION_HEADER, session.id.to_string())],
                Json(RpcResponse::success(id, result)),
            )
                .into_response()
        }
        Err(err) => {
            warn!(error = %err, "session rejected");
            Json(RpcResponse::invalid_params(id, err.to_string())).into_response()
        }
    }
}

/// Server defaults overlaid with the request headers and, when the resulting
/// config allows it, the query string.
fn session_config(
    defaults: &Config,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Config {
    let config = defaults.clone().replace_by(
        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), Some(value)))),
    );
    if config.accepts_secrets_in_url() {
        config.replace_by(
            query
                .iter()
                .map(|(key, value)| (key.as_str(), Some(value.as_str()))),
        )
    } else {
        config
    }
}

async fn dispatch_tool_call(session: &Session, id: Value, params: Value) -> Response {
    let params: ToolCallParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(err) => return Json(RpcResponse::invalid_params(id, err.to_string())).into_response(),
    };

    let response = match tools::call_tool(session, &params.name, params.arguments).await {
        Ok(output) => RpcResponse::success(id, output.into_call_result()),
        Err(err) if err.is_request_error() => RpcResponse::invalid_params(id, err.to_string()),
        Err(err) => RpcResponse::success(id, err.to_call_result()),
    };
    Json(response).into_response()
}

fn session_id(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let raw = headers
        .get(SESSION_HEADER)
        .ok_or_else(|| ApiError::bad_request("missing Mcp-Session-Id header"))?;
    raw.to_str()
        .ok()
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
        .ok_or_else(|| ApiError::bad_request("invalid Mcp-Session-Id header"))
}

fn lookup_session(state: &AppState, headers: &HeaderMap) -> Result<Arc<Session>, ApiError> {
    let id = session_id(headers)?;
    state
        .sessions
        .get(id)
        .ok_or_else(|| ApiError::not_found(format!("session {id} not found")))
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(status = %self.status, message = %self.message, "api error");
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize, ToSchema)]
struct ErrorBody {
    error: String,
}

pub mod docs {
    use super::*;
    use crate::rpc::RpcError;

    #[derive(OpenApi)]
    #[openapi(
        info(title = "KBC MCP Daemon API", version = "0.1.0"),
        paths(healthz, handle_rpc, close_session),
        components(schemas(RpcRequest, RpcResponse, RpcError, ToolCallParams, ErrorBody))
    )]
    pub struct ApiDoc;
}
