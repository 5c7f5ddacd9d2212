//! Browser-facing HTTP surface: the terminal WebSocket and a health probe.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{Extensions, HeaderMap, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::auth::{ConnectionContext, bearer_token};
use crate::supervisor::{SessionSupervisor, TargetRequest};
use crate::transport::{TransportConfig, TransportEndpoint};

/// Shared router state.
#[derive(Clone)]
pub struct ConsoleState {
    pub supervisor: Arc<SessionSupervisor>,
    pub transport: TransportConfig,
}

/// Query string of `GET /ws/shell`.
///
/// Browsers cannot set headers on a WebSocket handshake, so the token may
/// also travel as `?token=`.
#[derive(Debug, Deserialize)]
pub struct ShellQuery {
    pub namespace: String,
    pub pod: String,
    pub container: Option<String>,
    pub command: Option<String>,
    pub rows: Option<u16>,
    pub cols: Option<u16>,
    pub token: Option<String>,
}

impl ShellQuery {
    fn into_parts(self) -> (TargetRequest, Option<String>) {
        let request = TargetRequest {
            namespace: self.namespace,
            pod: self.pod,
            container: self.container,
            command: self.command,
            rows: self.rows,
            cols: self.cols,
        };
        (request, self.token)
    }
}

pub fn build_router(state: ConsoleState) -> Router {
    Router::new()
        .route("/ws/shell", get(shell_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /healthz`
async fn healthz() -> &'static str {
    "ok"
}

/// `GET /ws/shell?namespace=..&pod=..`: one terminal session per socket.
async fn shell_ws(
    ws: WebSocketUpgrade,
    State(state): State<ConsoleState>,
    headers: HeaderMap,
    extensions: Extensions,
    Query(query): Query<ShellQuery>,
) -> Response {
    let (request, query_token) = query.into_parts();
    let header_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| bearer_token(v).to_string());
    let ctx = ConnectionContext {
        bearer: header_token.or(query_token).filter(|t| !t.is_empty()),
        peer: extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr),
    };
    debug!(peer = ?ctx.peer, pod = %request.pod, "Terminal upgrade requested");

    ws.on_upgrade(move |socket| handle_shell_socket(socket, state, ctx, request))
        .into_response()
}

async fn handle_shell_socket(
    socket: WebSocket,
    state: ConsoleState,
    ctx: ConnectionContext,
    request: TargetRequest,
) {
    let transport = TransportEndpoint::from_websocket(socket, &state.transport);
    match state.supervisor.accept(ctx, request, transport).await {
        Ok(reason) => info!(reason = %reason, "Terminal session ended"),
        Err(rejection) => info!(reason = %rejection, "Terminal connection rejected"),
    }
}
