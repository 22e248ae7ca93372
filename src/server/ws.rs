//! axum routes: the client WebSocket endpoint, the feed ingress endpoint,
//! health, and the metrics surfaces.

use crate::server::feed::FeedRouter;
use crate::server::session::{Session, SessionConfig};
use crate::tree::Deps;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{interval, Instant};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Weak handles to every live session so shutdown can close them in order.
#[derive(Clone, Default)]
pub struct SessionSet {
    inner: Arc<Mutex<Vec<Weak<Session>>>>,
}

impl SessionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&self, session: &Arc<Session>) {
        let mut inner = self.inner.lock();
        inner.retain(|w| w.strong_count() > 0);
        inner.push(Arc::downgrade(session));
    }

    pub fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut inner = self.inner.lock();
            let live = inner.iter().filter_map(Weak::upgrade).collect();
            inner.clear();
            live
        };
        for s in sessions {
            s.close();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().iter().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct AppState {
    pub deps: Deps,
    pub session_cfg: SessionConfig,
    pub feed_router: FeedRouter,
    pub sessions: SessionSet,
    pub prometheus: Option<PrometheusHandle>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(client_ws_handler))
        .route("/feed", get(feed_ws_handler))
        .route("/health", get(health))
        .route("/metrics.json", get(metrics_json))
        .route("/metrics", get(metrics_prometheus))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_json() -> Json<serde_json::Value> {
    Json(crate::metrics::registry().snapshot_json())
}

async fn metrics_prometheus(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (axum::http::StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

async fn client_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_client_socket(socket, state))
}

async fn feed_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_feed_socket(socket, state))
}

/// One task per client connection. Writes are serialized through the
/// session's bounded outbox; reads dispatch into the session state machine.
async fn handle_client_socket(mut socket: WebSocket, state: AppState) {
    let (session, mut outbox_rx, mut close_rx) =
        Session::new(state.deps.clone(), state.session_cfg.clone());
    state.sessions.track(&session);
    crate::metrics::registry().hit("ws.accept");
    info!(session = %session.id(), "client connected");

    let mut ping = interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            // outbound frames, serialized per session
            out = outbox_rx.recv() => {
                match out {
                    Some(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // graph or overflow-triggered close
            _ = close_rx.changed() => {
                if *close_rx.borrow() {
                    break;
                }
            }

            // keep-alive; drop sessions that stopped answering
            _ = ping.tick() => {
                if last_seen.elapsed() > IDLE_TIMEOUT {
                    warn!(session = %session.id(), "idle timeout; closing");
                    break;
                }
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        session.handle_message(&text);
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(session = %session.id(), error = %e, "client read error");
                        break;
                    }
                }
            }
        }
    }

    session.close();
    let _ = socket.send(Message::Close(None)).await;
}

/// Feed ingress: every text frame goes through the shared decoder. Errors
/// close this feed connection, never the server.
async fn handle_feed_socket(mut socket: WebSocket, state: AppState) {
    crate::metrics::registry().hit("feed.accept");
    info!("feed connected (ingress)");

    let mut ping = interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => state.feed_router.route_frame(&text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "feed read error");
                        break;
                    }
                }
            }
        }
    }

    info!("feed disconnected (ingress)");
}
