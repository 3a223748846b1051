//! Server-Sent Events transport bridge.
//!
//! Each `GET /sse` opens a session: a fresh MCP service is started over an
//! in-process channel pair, the client receives an `endpoint` event naming
//! `/messages?sessionId=<id>`, and every outgoing JSON-RPC message is pushed
//! as a `message` event. Requests arrive via `POST /messages` and are routed
//! to the matching session with a [`CallerContext`] attached.
//!
//! Sessions live in a [`SessionRegistry`] keyed by id, so concurrent
//! subscribers never displace each other. A POST without `sessionId` goes to
//! the most recently opened session.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_stream::stream;
use axum::{
    Json, Router,
    body::to_bytes,
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{SinkExt, Stream};
use rmcp::model::{ClientJsonRpcMessage, GetExtensions, ServerJsonRpcMessage};
use rmcp::{ServerHandler, ServiceExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::PollSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::CallerContext;

/// Path clients subscribe on.
pub const SSE_PATH: &str = "/sse";
/// Path clients post JSON-RPC messages to.
pub const MESSAGES_PATH: &str = "/messages";

const CHANNEL_CAPACITY: usize = 64;
const KEEP_ALIVE_SECS: u64 = 15;
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Why a POST could not be routed to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// No client is subscribed at all
    NoActiveConnection,
    /// `sessionId` does not name a live session
    UnknownSession(String),
}

struct SessionEntry {
    sender: mpsc::Sender<ClientJsonRpcMessage>,
    opened: u64,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, SessionEntry>,
    next_seq: u64,
}

/// Live SSE sessions keyed by session id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a session and its inbound channel.
    pub fn insert(&self, id: impl Into<String>, sender: mpsc::Sender<ClientJsonRpcMessage>) {
        let mut inner = self.lock();
        let opened = inner.next_seq;
        inner.next_seq += 1;
        inner.sessions.insert(id.into(), SessionEntry { sender, opened });
    }

    /// Drop a session; its MCP service stops once the inbound channel closes.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick the session a POST belongs to.
    pub fn route(
        &self,
        session_id: Option<&str>,
    ) -> Result<mpsc::Sender<ClientJsonRpcMessage>, RouteError> {
        let inner = self.lock();
        if inner.sessions.is_empty() {
            return Err(RouteError::NoActiveConnection);
        }
        match session_id {
            Some(id) => inner
                .sessions
                .get(id)
                .map(|entry| entry.sender.clone())
                .ok_or_else(|| RouteError::UnknownSession(id.to_string())),
            None => inner
                .sessions
                .values()
                .max_by_key(|entry| entry.opened)
                .map(|entry| entry.sender.clone())
                .ok_or(RouteError::NoActiveConnection),
        }
    }
}

/// Removes its session when the event stream is dropped.
struct SessionGuard {
    registry: SessionRegistry,
    id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.registry.remove(&self.id) {
            info!(session_id = %self.id, "SSE client disconnected");
        }
    }
}

struct SseState<H> {
    handler: H,
    sessions: SessionRegistry,
}

impl<H: Clone> Clone for SseState<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            sessions: self.sessions.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId", default)]
    session_id: Option<String>,
}

/// Build the SSE router for `handler`.
pub fn router<H>(handler: H, sessions: SessionRegistry) -> Router
where
    H: ServerHandler + Clone + Send + Sync + 'static,
{
    Router::new()
        .route(SSE_PATH, get(subscribe::<H>))
        .route(MESSAGES_PATH, post(post_message::<H>))
        .fallback(route_not_found)
        .with_state(SseState { handler, sessions })
}

async fn subscribe<H>(
    State(state): State<SseState<H>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send>
where
    H: ServerHandler + Clone + Send + Sync + 'static,
{
    let session_id = Uuid::new_v4().to_string();
    let (from_client_tx, from_client_rx) = mpsc::channel::<ClientJsonRpcMessage>(CHANNEL_CAPACITY);
    let (to_client_tx, mut to_client_rx) = mpsc::channel::<ServerJsonRpcMessage>(CHANNEL_CAPACITY);

    state.sessions.insert(session_id.clone(), from_client_tx);
    info!(session_id = %session_id, active = state.sessions.len(), "SSE client connected");

    let transport = (
        PollSender::new(to_client_tx).sink_map_err(std::io::Error::other),
        ReceiverStream::new(from_client_rx),
    );
    let handler = state.handler.clone();
    let service_session = session_id.clone();
    tokio::spawn(async move {
        match handler.serve(transport).await {
            Ok(service) => {
                if let Err(e) = service.waiting().await {
                    warn!(
                        session_id = %service_session,
                        error = %e,
                        "MCP session ended with error"
                    );
                }
            }
            Err(e) => warn!(
                session_id = %service_session,
                error = %e,
                "MCP session failed to initialize"
            ),
        }
        debug!(session_id = %service_session, "MCP session task finished");
    });

    let guard = SessionGuard {
        registry: state.sessions.clone(),
        id: session_id.clone(),
    };
    let endpoint = format!("{}?sessionId={}", MESSAGES_PATH, session_id);

    let events = stream! {
        let _guard = guard;
        yield Ok::<Event, Infallible>(Event::default().event("endpoint").data(endpoint));

        while let Some(message) = to_client_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => yield Ok(Event::default().event("message").data(json)),
                Err(e) => warn!(error = %e, "Dropping unserializable outgoing message"),
            }
        }
    };

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("keep-alive"),
    )
}

async fn post_message<H>(
    State(state): State<SseState<H>>,
    Query(query): Query<MessageQuery>,
    request: Request,
) -> Response
where
    H: ServerHandler + Clone + Send + Sync + 'static,
{
    let sender = match state.sessions.route(query.session_id.as_deref()) {
        Ok(sender) => sender,
        Err(RouteError::NoActiveConnection) => {
            return (StatusCode::BAD_REQUEST, "No active SSE connection").into_response();
        }
        Err(RouteError::UnknownSession(id)) => {
            debug!(session_id = %id, "POST for unknown session");
            return (StatusCode::NOT_FOUND, "Session not found").into_response();
        }
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let caller = caller_context(request.headers(), peer);

    let body = match to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("Failed to read request body: {}", e))
                .into_response();
        }
    };

    let mut message: ClientJsonRpcMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("Invalid JSON-RPC message: {}", e))
                .into_response();
        }
    };

    debug!(caller = %caller.ip_or_unknown(), "Forwarding client message");
    if let ClientJsonRpcMessage::Request(request) = &mut message {
        request.request.extensions_mut().insert(caller);
    }

    if sender.send(message).await.is_err() {
        return (StatusCode::NOT_FOUND, "Session closed").into_response();
    }

    StatusCode::ACCEPTED.into_response()
}

async fn route_not_found(request: Request) -> Response {
    let body = json!({
        "error": "Not Found",
        "message": format!("Route {} {} not found", request.method(), request.uri().path()),
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

/// Build the caller context for an inbound POST.
///
/// IP priority: first `x-forwarded-for` entry, `x-real-ip`, the socket peer,
/// then `"unknown"`.
pub fn caller_context(headers: &HeaderMap, peer: Option<SocketAddr>) -> CallerContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let ip = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| header("x-real-ip").map(str::to_string))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    CallerContext {
        ip_address: Some(ip),
        headers,
    }
}
