//! Market dispatcher: fans raw ticks out to per-(symbol, field) listener
//! sets, maintains bounded histories, and drives the derived-value
//! computation on every sample.

use crate::config::TaConfig;
use crate::models::{SymbolTick, SymbolValue, TickEntry, Value};
use crate::nodes::Node;
use crate::rt::ThreadPool;
use crate::store::{AtomicStore, FunctionRegistry, HistoryStore};
use crate::ta::computer;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// Opaque identity for registered listeners; unregistration is by handle,
/// not by pointer equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registered {
    id: ListenerId,
    node: Weak<dyn Node>,
}

#[derive(Default)]
struct Listeners {
    // symbol -> field -> registered nodes
    map: HashMap<String, HashMap<String, Vec<Registered>>>,
}

pub struct MarketDispatcher {
    listeners: RwLock<Listeners>,
    // per-(symbol, field) bounded numeric histories
    field_histories: RwLock<HashMap<String, HashMap<String, VecDeque<f64>>>>,
    tick_history: Arc<HistoryStore>,
    store: Arc<AtomicStore>,
    functions: Arc<FunctionRegistry>,
    pool: Arc<ThreadPool>,
    ta: TaConfig,
    history_max: usize,
    next_listener_id: AtomicU64,
}

impl MarketDispatcher {
    pub fn new(
        pool: Arc<ThreadPool>,
        store: Arc<AtomicStore>,
        functions: Arc<FunctionRegistry>,
        tick_history: Arc<HistoryStore>,
        ta: TaConfig,
        history_max: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            listeners: RwLock::new(Listeners::default()),
            field_histories: RwLock::new(HashMap::new()),
            tick_history,
            store,
            functions,
            pool,
            ta,
            history_max: history_max.max(1),
            next_listener_id: AtomicU64::new(1),
        })
    }

    pub fn store(&self) -> &Arc<AtomicStore> {
        &self.store
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    /// Register a node for (symbol, field); returns the handle used to
    /// unregister. The dispatcher holds only a weak reference.
    pub fn register_listener(
        &self,
        symbol: &str,
        field: &str,
        node: &Arc<dyn Node>,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.write();
        listeners
            .map
            .entry(symbol.to_string())
            .or_default()
            .entry(field.to_string())
            .or_default()
            .push(Registered {
                id,
                node: Arc::downgrade(node),
            });
        id
    }

    /// Synchronous removal: after this returns, future ticks no longer fan
    /// out to the node (already-posted pool tasks may deliver once more).
    pub fn unregister_listener(&self, symbol: &str, field: &str, id: ListenerId) {
        let mut listeners = self.listeners.write();
        let Some(fields) = listeners.map.get_mut(symbol) else {
            return;
        };
        let Some(nodes) = fields.get_mut(field) else {
            return;
        };
        nodes.retain(|r| r.id != id);
        if nodes.is_empty() {
            fields.remove(field);
        }
        if fields.is_empty() {
            listeners.map.remove(symbol);
        }
    }

    /// Ingest one tick: update histories, recompute derived values, fan out.
    pub fn on_tick(&self, tick: &SymbolTick) {
        // Snapshot interested (field, node) pairs under the read lock; nodes
        // are never invoked while any dispatcher lock is held.
        let mut to_notify: Vec<(String, Arc<dyn Node>)> = Vec::new();
        {
            let listeners = self.listeners.read();
            if let Some(fields) = listeners.map.get(&tick.symbol) {
                for (field, nodes) in fields {
                    if tick.payload.contains_key(field) {
                        for reg in nodes {
                            if let Some(node) = reg.node.upgrade() {
                                to_notify.push((field.clone(), node));
                            }
                        }
                    }
                }
            }
        }

        // Raw price/volume history + the full derived-key table.
        if let Some(price) = tick.numeric_field("price") {
            let volume = tick.numeric_field("volume").unwrap_or(0.0);
            self.tick_history.push(&tick.symbol, TickEntry { price, volume });
            let hist = self.tick_history.snapshot(&tick.symbol);
            computer::compute_all(&tick.symbol, &hist, &self.store, &self.ta);
        }

        for (field, node) in to_notify {
            let Some(raw) = tick.numeric_field(&field) else {
                warn!(symbol = %tick.symbol, field = %field, "tick field is not numeric; skipping");
                continue;
            };

            // Append under the write lock and copy the deque out.
            let hist_copy: Vec<f64> = {
                let mut histories = self.field_histories.write();
                let hist = histories
                    .entry(tick.symbol.clone())
                    .or_default()
                    .entry(field.clone())
                    .or_default();
                hist.push_back(raw);
                while hist.len() > self.history_max {
                    hist.pop_front();
                }
                hist.iter().copied().collect()
            };

            self.compute_and_store_atomics(&tick.symbol, &hist_copy);

            let sv = SymbolValue {
                symbol: tick.symbol.clone(),
                value: Value::Double(raw),
            };
            self.pool.post(move || node.on_value(&sv));
        }
    }

    /// Evaluate every registered function over the history snapshot, write
    /// the results, and fan each result out to its (symbol, fnName)
    /// subscribers via the pool.
    fn compute_and_store_atomics(&self, symbol: &str, history: &[f64]) {
        for (fn_name, f) in self.functions.snapshot() {
            let result = f(history);
            self.store.set(symbol, &fn_name, Value::Double(result));

            let subs: Vec<Arc<dyn Node>> = {
                let listeners = self.listeners.read();
                listeners
                    .map
                    .get(symbol)
                    .and_then(|fields| fields.get(&fn_name))
                    .map(|nodes| nodes.iter().filter_map(|r| r.node.upgrade()).collect())
                    .unwrap_or_default()
            };

            for node in subs {
                let sv = SymbolValue {
                    symbol: symbol.to_string(),
                    value: Value::Double(result),
                };
                self.pool.post(move || node.on_value(&sv));
            }
        }
    }

    /// Copy of the raw tick history for a symbol.
    pub fn history_snapshot(&self, symbol: &str) -> Vec<TickEntry> {
        self.tick_history.snapshot(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Sink {
        seen: Mutex<Vec<SymbolValue>>,
    }

    impl Sink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Node for Sink {
        fn on_value(&self, sv: &SymbolValue) {
            self.seen.lock().push(sv.clone());
        }
        fn shutdown(&self) {}
    }

    fn dispatcher() -> Arc<MarketDispatcher> {
        MarketDispatcher::new(
            Arc::new(ThreadPool::new(2)),
            Arc::new(AtomicStore::new()),
            Arc::new(FunctionRegistry::with_builtins()),
            Arc::new(HistoryStore::new(64)),
            TaConfig::default(),
            64,
        )
    }

    fn tick(symbol: &str, fields: &[(&str, f64)]) -> SymbolTick {
        let mut payload = serde_json::Map::new();
        for (k, v) in fields {
            payload.insert(k.to_string(), serde_json::json!(v));
        }
        SymbolTick {
            symbol: symbol.to_string(),
            payload,
        }
    }

    #[test]
    fn test_fan_out_to_matching_field() {
        let d = dispatcher();
        let sink = Sink::new();
        let node: Arc<dyn Node> = sink.clone();
        d.register_listener("AAPL", "price", &node);

        d.on_tick(&tick("AAPL", &[("price", 101.5), ("volume", 10.0)]));
        d.on_tick(&tick("MSFT", &[("price", 50.0)]));
        d.pool().drain();

        let seen = sink.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].symbol, "AAPL");
        assert_eq!(seen[0].value, Value::Double(101.5));
    }

    #[test]
    fn test_derived_values_written_to_store() {
        let d = dispatcher();
        let sink = Sink::new();
        let node: Arc<dyn Node> = sink.clone();
        d.register_listener("AAPL", "price", &node);

        for i in 1..=25 {
            d.on_tick(&tick(
                "AAPL",
                &[("price", i as f64), ("volume", 2.0 * i as f64)],
            ));
        }
        d.pool().drain();

        // registry functions over the (symbol, field) history
        assert_eq!(
            d.store().get("AAPL", "last"),
            Some(Value::Double(25.0))
        );
        assert_eq!(d.store().get("AAPL", "count"), Some(Value::Double(25.0)));
        // full tick-history indicator table
        assert_eq!(d.store().get("AAPL", "sma_5"), Some(Value::Double(23.0)));
        assert_eq!(
            d.store().get("AAPL", "volume_avg_20"),
            Some(Value::Double(31.0))
        );
    }

    #[test]
    fn test_function_listener_receives_computed_value() {
        let d = dispatcher();
        let raw = Sink::new();
        let raw_node: Arc<dyn Node> = raw.clone();
        // a listener on the *function name* receives the computed stream
        let mean_sink = Sink::new();
        let mean_node: Arc<dyn Node> = mean_sink.clone();
        d.register_listener("S", "price", &raw_node);
        d.register_listener("S", "mean", &mean_node);

        d.on_tick(&tick("S", &[("price", 10.0)]));
        d.on_tick(&tick("S", &[("price", 20.0)]));
        d.pool().drain();

        let seen = mean_sink.seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].value, Value::Double(10.0));
        assert_eq!(seen[1].value, Value::Double(15.0));
    }

    #[test]
    fn test_unregister_stops_fan_out() {
        let d = dispatcher();
        let sink = Sink::new();
        let node: Arc<dyn Node> = sink.clone();
        let id = d.register_listener("S", "price", &node);
        d.on_tick(&tick("S", &[("price", 1.0)]));
        d.pool().drain();
        d.unregister_listener("S", "price", id);
        d.on_tick(&tick("S", &[("price", 2.0)]));
        d.pool().drain();
        assert_eq!(sink.seen.lock().len(), 1);
    }

    #[test]
    fn test_non_numeric_field_skipped() {
        let d = dispatcher();
        let sink = Sink::new();
        let node: Arc<dyn Node> = sink.clone();
        d.register_listener("S", "note", &node);
        let mut payload = serde_json::Map::new();
        payload.insert("note".to_string(), serde_json::json!("hello"));
        d.on_tick(&SymbolTick {
            symbol: "S".to_string(),
            payload,
        });
        d.pool().drain();
        assert!(sink.seen.lock().is_empty());
    }

    #[test]
    fn test_field_history_bounded() {
        let d = MarketDispatcher::new(
            Arc::new(ThreadPool::new(1)),
            Arc::new(AtomicStore::new()),
            Arc::new(FunctionRegistry::with_builtins()),
            Arc::new(HistoryStore::new(4)),
            TaConfig::default(),
            4,
        );
        let sink = Sink::new();
        let node: Arc<dyn Node> = sink.clone();
        d.register_listener("S", "price", &node);
        for i in 1..=10 {
            d.on_tick(&tick("S", &[("price", i as f64)]));
        }
        d.pool().drain();
        // count function sees at most history_max samples
        assert_eq!(d.store().get("S", "count"), Some(Value::Double(4.0)));
        assert_eq!(d.history_snapshot("S").len(), 4);
    }
}
