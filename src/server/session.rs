//! Per-connection client session: subscription registry, rate limiting, and
//! the bounded outbox feeding the socket writer.

use crate::models::{ClientMessage, ServerMessage, SubscribeRequest, SymbolValue};
use crate::nodes::{Node, Responder};
use crate::tree::{self, Deps};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

/// Live request graphs owned by one session, keyed by request id.
#[derive(Default)]
pub struct RequestRegistry {
    map: Mutex<HashMap<String, Arc<dyn Node>>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root under an id; a previous graph under the same id is
    /// shut down first.
    pub fn register(&self, id: &str, root: Arc<dyn Node>) {
        let old = self.map.lock().insert(id.to_string(), root);
        if let Some(old) = old {
            old.shutdown();
        }
    }

    /// Remove and shut down. Returns whether the id was live.
    pub fn unregister(&self, id: &str) -> bool {
        let root = self.map.lock().remove(id);
        match root {
            Some(root) => {
                root.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.map.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Swap the map out, then shut every root down outside the lock.
    pub fn shutdown_all(&self) {
        let roots = std::mem::take(&mut *self.map.lock());
        for root in roots.into_values() {
            root.shutdown();
        }
    }
}

/// Token bucket: `subscribe` costs one token.
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    rate_per_sec: f64,
    burst: f64,
}

impl TokenBucket {
    fn new(rate_per_sec: f64, burst: f64) -> Self {
        Self {
            tokens: burst,
            last_refill: Instant::now(),
            rate_per_sec,
            burst,
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.burst);
        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_subscriptions: usize,
    pub outbox_cap: usize,
    pub rate_per_sec: f64,
    pub rate_burst: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_subscriptions: 1024,
            outbox_cap: 256,
            rate_per_sec: 10.0,
            rate_burst: 20.0,
        }
    }
}

pub struct Session {
    id: Uuid,
    deps: Deps,
    cfg: SessionConfig,
    requests: RequestRegistry,
    bucket: Mutex<TokenBucket>,
    outbox: mpsc::Sender<String>,
    close_tx: watch::Sender<bool>,
    closed: AtomicBool,
    weak: Weak<Session>,
}

impl Session {
    /// Returns the session plus the outbox receiver and the close signal the
    /// socket task selects on.
    pub fn new(
        deps: Deps,
        cfg: SessionConfig,
    ) -> (Arc<Self>, mpsc::Receiver<String>, watch::Receiver<bool>) {
        let (outbox, rx) = mpsc::channel(cfg.outbox_cap.max(1));
        let (close_tx, close_rx) = watch::channel(false);
        let session = Arc::new_cyclic(|weak| Self {
            id: Uuid::new_v4(),
            deps,
            bucket: Mutex::new(TokenBucket::new(cfg.rate_per_sec, cfg.rate_burst)),
            cfg,
            requests: RequestRegistry::new(),
            outbox,
            close_tx,
            closed: AtomicBool::new(false),
            weak: weak.clone(),
        });
        (session, rx, close_rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn live_subscriptions(&self) -> usize {
        self.requests.len()
    }

    /// Queue one outbound frame. A full outbox closes the session rather
    /// than letting a slow client grow server memory.
    pub fn send_text(&self, text: String) -> anyhow::Result<()> {
        if self.is_closed() {
            anyhow::bail!("session closed");
        }
        match self.outbox.try_send(text) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session = %self.id, "outbox overflow; closing session");
                crate::metrics::registry().hit("ws.outbox_overflow");
                self.close();
                anyhow::bail!("outbox overflow")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                anyhow::bail!("outbox receiver gone")
            }
        }
    }

    fn send_msg(&self, msg: &ServerMessage) {
        crate::metrics::registry().hit("ws.msg_out");
        let _ = self.send_text(msg.to_json());
    }

    fn send_error(&self, where_: &'static str, message: impl Into<String>) {
        self.send_msg(&ServerMessage::error(where_, message));
    }

    /// Idempotent teardown: shut down every live graph and signal the socket
    /// task.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.requests.shutdown_all();
        let _ = self.close_tx.send(true);
        crate::metrics::registry().hit("ws.close");
        info!(session = %self.id, "session closed");
    }

    /// Entry point for one inbound text frame.
    pub fn handle_message(&self, text: &str) {
        crate::metrics::registry().hit("ws.msg_in");
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                self.send_error("parse", format!("invalid message: {e}"));
                return;
            }
        };
        match msg {
            ClientMessage::Subscribe { requests, .. } => self.handle_subscribe(requests),
            ClientMessage::Cancel { ids, .. } => self.handle_cancel(ids),
        }
    }

    fn handle_subscribe(&self, requests: Vec<SubscribeRequest>) {
        if !self.bucket.lock().try_acquire() {
            self.send_error("subscribe", "rate limit exceeded");
            return;
        }

        for req in requests {
            let key = match tree::validate_request(&req) {
                Ok(key) => key,
                Err(e) => {
                    self.send_error("subscribe", e.to_string());
                    continue;
                }
            };

            if self.requests.len() >= self.cfg.max_subscriptions && !self.requests.contains(&key)
            {
                self.send_error("subscribe", "max subscriptions reached");
                continue;
            }

            // The responder reaches back into this session without owning
            // it, so cancelling the graph lets the session drop.
            let weak = self.weak.clone();
            let terminal = Responder::new(
                Arc::new(move |key: &str, sv: &SymbolValue| {
                    let Some(session) = weak.upgrade() else {
                        anyhow::bail!("session gone");
                    };
                    let msg = ServerMessage::Update {
                        key: key.to_string(),
                        symbol: sv.symbol.clone(),
                        value: sv.value.clone(),
                        ts: chrono::Utc::now().timestamp_millis(),
                    };
                    crate::metrics::registry().hit("ws.msg_out");
                    session.send_text(msg.to_json())
                }),
                key.clone(),
            );

            match tree::build_subscription(&req, &self.deps, terminal) {
                Ok(chain) => {
                    self.requests.register(&key, chain.head.clone());
                    chain.start();
                    crate::metrics::registry().hit("ws.subscribe");
                    self.send_msg(&ServerMessage::Subscribed { key: key.clone() });
                    info!(
                        session = %self.id,
                        key = %key,
                        symbol = %req.symbol,
                        field = %req.field,
                        poll_ms = ?req.poll_ms,
                        "subscribed"
                    );
                }
                Err(e) => self.send_error("build", e.to_string()),
            }
        }
    }

    fn handle_cancel(&self, ids: Vec<serde_json::Value>) {
        for raw in ids {
            let key = match tree::request_id(&raw) {
                Ok(key) => key,
                Err(e) => {
                    self.send_error("cancel", e.to_string());
                    continue;
                }
            };
            if self.requests.unregister(&key) {
                crate::metrics::registry().hit("ws.cancel");
                self.send_msg(&ServerMessage::Canceled { key });
            } else {
                self.send_error("cancel", format!("unknown id: {key}"));
            }
        }
    }
}
