//! Feed ingress: decodes upstream frames into dispatcher ticks and book
//! mutations.
//!
//! Two paths share one decoder: the `/feed` WebSocket route (upstreams that
//! connect to us) and the outbound connector (upstreams we dial, with
//! exponential-backoff reconnect).

use crate::book::manager::OrderBookManager;
use crate::book::materializer::Materializer;
use crate::book::types::{FeedScope, Side};
use crate::dispatch::MarketDispatcher;
use crate::models::SymbolTick;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const RECONNECT_BASE_DELAY_MS: u64 = 100;
const RECONNECT_MAX_DELAY_MS: u64 = 30_000;
const FEED_PING_INTERVAL_MS: u64 = 5_000;

/// Everything one decoded frame can touch.
#[derive(Clone)]
pub struct FeedRouter {
    pub dispatcher: Arc<MarketDispatcher>,
    pub books: Arc<OrderBookManager>,
    pub materializer: Arc<Materializer>,
}

impl FeedRouter {
    /// Route one text frame. Malformed frames count a metric and drop; this
    /// never fails the connection.
    pub fn route_frame(&self, text: &str) {
        let parsed: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                crate::metrics::registry().hit("feed.malformed");
                return;
            }
        };
        let Some(obj) = parsed.as_object() else {
            crate::metrics::registry().hit("feed.malformed");
            return;
        };

        if obj.contains_key("Message Type") {
            self.route_l2(obj);
        } else if let Some(symbol) = obj.get("symbol").and_then(|s| s.as_str()) {
            crate::metrics::registry().hit("feed.tick");
            self.dispatcher.on_tick(&SymbolTick {
                symbol: symbol.to_string(),
                payload: obj.clone(),
            });
        } else {
            crate::metrics::registry().hit("feed.malformed");
        }
    }

    /// Level-2 frames carry `Message Type` 0 (snapshot row), 3 (add),
    /// 4 (update), 5 (delete) or 6 (level summary).
    fn route_l2(&self, obj: &serde_json::Map<String, serde_json::Value>) {
        let Some(msg_type) = l2_type(obj) else {
            crate::metrics::registry().hit("feed.malformed");
            return;
        };
        let Some(symbol) = obj.get("Symbol").and_then(|s| s.as_str()) else {
            crate::metrics::registry().hit("feed.malformed");
            return;
        };

        let scope = FeedScope {
            feed_id: obj.get("Feed").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            epoch: obj.get("Epoch").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        };

        // feed sequencing gates everything that follows
        if let Some(seq) = obj.get("Seq").and_then(|v| v.as_u64()) {
            if !self.books.on_seq(symbol, seq) {
                return;
            }
        }

        let side = || -> Option<Side> {
            obj.get("Side").and_then(|s| s.as_str()).map(|s| {
                if s.starts_with('B') {
                    Side::Bid
                } else {
                    Side::Ask
                }
            })
        };
        let id = obj.get("Order ID").and_then(|v| v.as_u64());
        let price = obj.get("Price").and_then(|v| v.as_f64());
        let size = obj.get("Order Size").and_then(|v| v.as_u64());
        let priority = obj.get("Order Priority").and_then(|v| v.as_u64()).unwrap_or(0);

        let changed = match msg_type {
            // snapshot rows and adds share semantics
            0 | 3 => match (side(), price, size) {
                (Some(side), Some(price), Some(size)) => self.books.on_add(
                    symbol,
                    id.unwrap_or(0),
                    side,
                    price,
                    size,
                    priority,
                    scope,
                    id.is_none(),
                ),
                _ => {
                    crate::metrics::registry().hit("feed.malformed");
                    false
                }
            },
            4 => match id {
                Some(id) => {
                    let key = crate::book::types::OrderKey {
                        id,
                        feed_id: scope.feed_id,
                        epoch: scope.epoch,
                        synthetic: false,
                    };
                    self.books.on_update(symbol, key, price, size)
                }
                None => {
                    crate::metrics::registry().hit("feed.malformed");
                    false
                }
            },
            5 => match id {
                Some(id) => {
                    let key = crate::book::types::OrderKey {
                        id,
                        feed_id: scope.feed_id,
                        epoch: scope.epoch,
                        synthetic: false,
                    };
                    self.books.on_delete(symbol, key)
                }
                None => {
                    crate::metrics::registry().hit("feed.malformed");
                    false
                }
            },
            6 => match (side(), price) {
                (Some(side), Some(price)) => {
                    let count = obj
                        .get("Order Count")
                        .and_then(|v| v.as_u64())
                        .map(|c| c as u32);
                    self.books
                        .on_level_summary(symbol, side, price, size.unwrap_or(0), count)
                }
                _ => {
                    crate::metrics::registry().hit("feed.malformed");
                    false
                }
            },
            _ => {
                debug!(msg_type, "ignoring unknown L2 message type");
                false
            }
        };

        if changed {
            self.materializer.on_book_update(symbol);
        }
    }
}

fn l2_type(obj: &serde_json::Map<String, serde_json::Value>) -> Option<u64> {
    let v = obj.get("Message Type")?;
    if let Some(n) = v.as_u64() {
        return Some(n);
    }
    v.as_str()?.trim().parse().ok()
}

/// Dials each configured upstream and pumps frames into the router until the
/// stop signal flips. One task per URL; reconnects with exponential backoff.
pub fn spawn_connectors(
    urls: Vec<String>,
    router: FeedRouter,
    stop: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    urls.into_iter()
        .map(|url| {
            let router = router.clone();
            let mut stop = stop.clone();
            tokio::spawn(async move {
                run_connector(url, router, &mut stop).await;
            })
        })
        .collect()
}

async fn run_connector(url: String, router: FeedRouter, stop: &mut watch::Receiver<bool>) {
    let mut delay_ms = RECONNECT_BASE_DELAY_MS;
    loop {
        if *stop.borrow() {
            return;
        }
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!(url = %url, "feed connected");
                crate::metrics::registry().hit("feed.connect");
                delay_ms = RECONNECT_BASE_DELAY_MS;
                let (mut sink, mut stream) = ws.split();
                let mut ping = tokio::time::interval(Duration::from_millis(FEED_PING_INTERVAL_MS));

                loop {
                    tokio::select! {
                        _ = stop.changed() => {
                            if *stop.borrow() {
                                let _ = sink.send(Message::Close(None)).await;
                                return;
                            }
                        }
                        _ = ping.tick() => {
                            if sink.send(Message::Ping(Vec::new())).await.is_err() {
                                break;
                            }
                        }
                        frame = stream.next() => {
                            match frame {
                                Some(Ok(Message::Text(text))) => router.route_frame(&text),
                                Some(Ok(Message::Ping(data))) => {
                                    let _ = sink.send(Message::Pong(data)).await;
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!(url = %url, error = %e, "feed read error");
                                    break;
                                }
                            }
                        }
                    }
                }
                warn!(url = %url, "feed disconnected");
                crate::metrics::registry().hit("feed.disconnect");
            }
            Err(e) => {
                warn!(url = %url, error = %e, delay_ms, "feed connect failed");
            }
        }

        // backoff before redialing, but stay responsive to shutdown
        tokio::select! {
            _ = stop.changed() => {
                if *stop.borrow() {
                    return;
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
        }
        delay_ms = (delay_ms * 2).min(RECONNECT_MAX_DELAY_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::materializer::MaterializeConfig;
    use crate::config::TaConfig;
    use crate::models::Value;
    use crate::rt::ThreadPool;
    use crate::store::{AtomicStore, FunctionRegistry, HistoryStore};

    fn router() -> (FeedRouter, Arc<AtomicStore>) {
        let pool = Arc::new(ThreadPool::new(2));
        let store = Arc::new(AtomicStore::new());
        let dispatcher = MarketDispatcher::new(
            pool,
            store.clone(),
            Arc::new(FunctionRegistry::with_builtins()),
            Arc::new(HistoryStore::new(32)),
            TaConfig::default(),
            32,
        );
        let books = Arc::new(OrderBookManager::new());
        books.set_tick_size("S", 0.01);
        let materializer = Materializer::new(
            books.clone(),
            store.clone(),
            MaterializeConfig::default(),
        );
        (
            FeedRouter {
                dispatcher,
                books,
                materializer,
            },
            store,
        )
    }

    #[test]
    fn test_tick_frame_reaches_dispatcher() {
        let (router, store) = router();
        router.route_frame(r#"{"symbol":"S","price":10.5,"volume":3}"#);
        router.dispatcher.pool().drain();
        assert_eq!(store.get("S", "lastPrice"), Some(Value::Double(10.5)));
        assert_eq!(store.get("S", "volume"), Some(Value::Double(3.0)));
    }

    #[test]
    fn test_l2_add_update_delete() {
        let (router, _) = router();
        router.route_frame(
            r#"{"Message Type":"3","Symbol":"S","Order ID":1,"Side":"B","Price":1.00,"Order Size":50,"Order Priority":1}"#,
        );
        assert_eq!(router.books.best_bid("S"), Some(1.00));
        assert_eq!(router.books.best_bid_size("S"), 50);

        router.route_frame(
            r#"{"Message Type":4,"Symbol":"S","Order ID":1,"Order Size":30}"#,
        );
        assert_eq!(router.books.best_bid_size("S"), 30);

        router.route_frame(r#"{"Message Type":"5","Symbol":"S","Order ID":1}"#);
        assert_eq!(router.books.best_bid("S"), None);
        assert_eq!(router.books.stats().adds, 1);
        assert_eq!(router.books.stats().updates, 1);
        assert_eq!(router.books.stats().deletes, 1);
    }

    #[test]
    fn test_l2_snapshot_row_and_summary() {
        let (router, _) = router();
        router.route_frame(
            r#"{"Message Type":"0","Symbol":"S","Order ID":9,"Side":"A","Price":1.02,"Order Size":25,"Order Priority":2}"#,
        );
        assert_eq!(router.books.best_ask("S"), Some(1.02));

        router.route_frame(
            r#"{"Message Type":"6","Symbol":"S","Side":"A","Price":1.03,"Order Size":40,"Order Count":4}"#,
        );
        assert_eq!(router.books.stats().summaries, 1);
    }

    #[test]
    fn test_l2_seq_gap_drops_followers() {
        let (router, _) = router();
        let add = |seq: u64, id: u64| {
            format!(
                r#"{{"Message Type":"3","Symbol":"S","Seq":{seq},"Order ID":{id},"Side":"B","Price":1.00,"Order Size":10,"Order Priority":1}}"#
            )
        };
        router.route_frame(&add(1, 1));
        router.route_frame(&add(2, 2));
        // gap: stale; the mutation must not apply
        router.route_frame(&add(9, 3));
        router.route_frame(&add(10, 4));
        assert!(router.books.is_stale("S"));
        assert_eq!(router.books.best_bid_size("S"), 20);
        assert_eq!(router.books.stats().seq_gaps, 1);
    }

    #[test]
    fn test_malformed_frames_counted_not_fatal() {
        let (router, _) = router();
        router.route_frame("not json");
        router.route_frame("[1,2,3]");
        router.route_frame(r#"{"no_symbol":true}"#);
        router.route_frame(r#"{"Message Type":"3","Symbol":"S"}"#);
        // the router survives; nothing was applied
        assert_eq!(router.books.stats().adds, 0);
    }
}
