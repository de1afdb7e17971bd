//! SSE transport: one event stream per connection, requests over POST, and /health.
//!
//! `GET /sse` opens a connection and first emits an `endpoint` event naming
//! the URL to POST envelopes to. Each POSTed envelope is answered with
//! `202 Accepted`; its JSON-RPC response arrives later as a `message` event
//! on the stream. Dropping the stream closes the connection.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json as AxumJson, Response,
    },
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::context::ToolContext;
use crate::protocol::ProtocolHandler;
use crate::tools::ToolRegistry;
use crate::types::{error_codes, JsonRpcError, McpError, McpResult, RequestId};

use super::framing;

const EVENT_QUEUE_DEPTH: usize = 64;

/// What a connection's stream carries, before SSE encoding.
#[derive(Debug)]
enum Outbound {
    Endpoint(String),
    Message(serde_json::Value),
}

impl Outbound {
    fn into_event(self) -> Event {
        match self {
            Outbound::Endpoint(url) => Event::default().event("endpoint").data(url),
            Outbound::Message(msg) => Event::default().event("message").data(msg.to_string()),
        }
    }
}

struct Connection {
    handler: Arc<ProtocolHandler>,
    events: mpsc::Sender<Outbound>,
}

/// Shared server state passed to all handlers via axum State.
pub struct ServerState {
    registry: Arc<ToolRegistry>,
    context: Arc<ToolContext>,
    connections: Mutex<HashMap<String, Connection>>,
}

impl ServerState {
    fn connections(&self) -> std::sync::MutexGuard<'_, HashMap<String, Connection>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a connection with a fresh lifecycle.
    fn open(self: &Arc<Self>) -> (String, mpsc::Receiver<Outbound>, ConnectionGuard) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let handler = Arc::new(ProtocolHandler::new(
            self.registry.clone(),
            self.context.clone(),
        ));
        self.connections().insert(
            id.clone(),
            Connection {
                handler,
                events: tx,
            },
        );
        let guard = ConnectionGuard {
            id: id.clone(),
            state: self.clone(),
        };
        (id, rx, guard)
    }

    fn lookup(&self, id: &str) -> Option<(Arc<ProtocolHandler>, mpsc::Sender<Outbound>)> {
        self.connections()
            .get(id)
            .map(|c| (c.handler.clone(), c.events.clone()))
    }

    pub fn connection_count(&self) -> usize {
        self.connections().len()
    }
}

/// Removes the connection and closes its lifecycle when the stream is dropped.
struct ConnectionGuard {
    id: String,
    state: Arc<ServerState>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.state.connections().remove(&self.id) {
            conn.handler.close();
            tracing::info!(session_id = %self.id, "SSE connection closed");
        }
    }
}

/// SSE transport for web-based MCP clients.
pub struct SseTransport {
    state: Arc<ServerState>,
    max_body_bytes: usize,
}

impl SseTransport {
    pub fn new(registry: Arc<ToolRegistry>, context: Arc<ToolContext>) -> Self {
        let max_body_bytes = context.config.max_frame_bytes;
        Self {
            state: Arc::new(ServerState {
                registry,
                context,
                connections: Mutex::new(HashMap::new()),
            }),
            max_body_bytes,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/sse", get(handle_sse))
            .route("/message", post(handle_message))
            .route("/health", get(handle_health))
            .layer(DefaultBodyLimit::max(self.max_body_bytes))
            .with_state(self.state.clone())
    }

    /// Run the HTTP server on the given address.
    pub async fn run(&self, addr: &str) -> McpResult<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(McpError::Io)?;

        tracing::info!("SSE transport listening on {addr}");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct MessageParams {
    #[serde(rename = "sessionId")]
    session_id: String,
}

async fn handle_sse(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, rx, guard) = state.open();

    let endpoint = Outbound::Endpoint(format!("/message?sessionId={id}"));
    if let Some((_, tx)) = state.lookup(&id) {
        if tx.send(endpoint).await.is_err() {
            tracing::warn!(session_id = %id, "Failed to send endpoint event");
        }
    }

    tracing::info!(session_id = %id, "SSE connection established");

    let stream = ReceiverStream::new(rx).map(move |event| {
        let _connection = &guard;
        Ok::<_, Infallible>(event.into_event())
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}

async fn handle_message(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<MessageParams>,
    body: String,
) -> Response {
    let Some((handler, events)) = state.lookup(&params.session_id) else {
        let error = JsonRpcError::new(
            RequestId::Null,
            error_codes::INVALID_REQUEST,
            format!("Unknown session: {}", params.session_id),
        );
        return (StatusCode::NOT_FOUND, AxumJson(error)).into_response();
    };

    let msg = match framing::parse_message(&body) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(session_id = %params.session_id, "Malformed message: {e}");
            let response = handler.error_response(&e, framing::recover_id(&body));
            emit(&events, &response).await;
            return StatusCode::ACCEPTED.into_response();
        }
    };

    if handler.runs_concurrently(&msg) {
        tokio::spawn(async move {
            if let Some(response) = handler.handle_message(msg).await {
                emit(&events, &response).await;
            }
        });
    } else if let Some(response) = handler.handle_message(msg).await {
        emit(&events, &response).await;
    }

    StatusCode::ACCEPTED.into_response()
}

async fn emit(events: &mpsc::Sender<Outbound>, response: &serde_json::Value) {
    if events.send(Outbound::Message(response.clone())).await.is_err() {
        tracing::debug!("Event stream already closed; dropping response");
    }
}

/// Health check endpoint.
async fn handle_health(State(state): State<Arc<ServerState>>) -> AxumJson<serde_json::Value> {
    AxumJson(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.connection_count(),
    }))
}
