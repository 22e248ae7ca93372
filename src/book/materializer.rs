//! Coalescing background evaluator that writes `ob.*` keys into the atomic
//! store whenever a symbol's book changes.
//!
//! Book deltas only mark a symbol dirty; a dedicated worker thread evaluates
//! the configured key profile at most once per throttle window per symbol so
//! bursty feeds cannot flood the store.

use crate::book::key::{self, Mode};
use crate::book::provider::default_profile;
use crate::book::snapshot::SnapshotSource;
use crate::book::eval;
use crate::models::Value;
use crate::store::AtomicStore;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct MaterializeConfig {
    /// Keys evaluated for symbols without a specific profile.
    pub default_keys: Vec<String>,
    /// Per-symbol overrides.
    pub keys_by_symbol: HashMap<String, Vec<String>>,
    pub max_levels: usize,
    pub throttle_ms: u64,
}

impl Default for MaterializeConfig {
    fn default() -> Self {
        Self {
            default_keys: default_profile(),
            keys_by_symbol: HashMap::new(),
            max_levels: 20,
            throttle_ms: 10,
        }
    }
}

struct Dirty {
    symbols: HashSet<String>,
    stopping: bool,
}

pub struct Materializer {
    source: Arc<dyn SnapshotSource>,
    store: Arc<AtomicStore>,
    cfg: MaterializeConfig,
    dirty: Mutex<Dirty>,
    wake: Condvar,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Materializer {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        store: Arc<AtomicStore>,
        cfg: MaterializeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            store,
            cfg,
            dirty: Mutex::new(Dirty {
                symbols: HashSet::new(),
                stopping: false,
            }),
            wake: Condvar::new(),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    /// Spawn the evaluation thread. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let me = self.clone();
        let handle = std::thread::Builder::new()
            .name("tickmesh-ob-mat".to_string())
            .spawn(move || me.run())
            .expect("spawn materializer");
        *self.worker.lock() = Some(handle);
    }

    /// Mark a symbol dirty; called from the manager's delta subscription.
    pub fn on_book_update(&self, symbol: &str) {
        let mut dirty = self.dirty.lock();
        dirty.symbols.insert(symbol.to_string());
        self.wake.notify_one();
    }

    /// Stop and join the worker. Idempotent.
    pub fn stop(&self) {
        {
            let mut dirty = self.dirty.lock();
            dirty.stopping = true;
        }
        self.wake.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        self.running.store(false, Ordering::Release);
    }

    fn keys_for<'a>(&'a self, symbol: &str) -> &'a [String] {
        self.cfg
            .keys_by_symbol
            .get(symbol)
            .map_or(&self.cfg.default_keys, Vec::as_slice)
    }

    /// One evaluation pass for one symbol; also usable synchronously from
    /// tests.
    pub fn materialize_now(&self, symbol: &str) {
        let keys = self.keys_for(symbol);
        if keys.is_empty() {
            return;
        }

        // One snapshot per view mode actually referenced by the profile.
        let mut per: Option<_> = None;
        let mut agg: Option<_> = None;
        let mut batch: Vec<(String, Value)> = Vec::with_capacity(keys.len());

        for raw in keys {
            let k = match key::parse(raw) {
                Ok(k) => k,
                Err(e) => {
                    warn!(key = %raw, error = %e, "materializer skipping bad key");
                    continue;
                }
            };
            let snap = match k.mode {
                Mode::Per => per.get_or_insert_with(|| {
                    self.source
                        .capture(symbol, self.cfg.max_levels, Mode::Per, None)
                }),
                Mode::Agg => agg.get_or_insert_with(|| {
                    self.source
                        .capture(symbol, self.cfg.max_levels, Mode::Agg, None)
                }),
            };
            let v = eval::eval(snap, &k);
            batch.push((raw.clone(), Value::Double(v)));
        }

        self.store.set_batch(symbol, batch);
    }

    fn run(&self) {
        let throttle = Duration::from_millis(self.cfg.throttle_ms);
        let mut last_pass: HashMap<String, Instant> = HashMap::new();

        loop {
            let todo: Vec<String> = {
                let mut dirty = self.dirty.lock();
                while dirty.symbols.is_empty() && !dirty.stopping {
                    self.wake.wait(&mut dirty);
                }
                if dirty.stopping && dirty.symbols.is_empty() {
                    return;
                }
                dirty.symbols.drain().collect()
            };

            for symbol in todo {
                if let Some(at) = last_pass.get(&symbol) {
                    let since = at.elapsed();
                    if since < throttle {
                        std::thread::sleep(throttle - since);
                    }
                }
                self.materialize_now(&symbol);
                last_pass.insert(symbol.clone(), Instant::now());
                debug!(symbol = %symbol, "materialized ob keys");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::manager::OrderBookManager;
    use crate::book::types::{FeedScope, Side};

    fn setup() -> (Arc<OrderBookManager>, Arc<AtomicStore>) {
        let mgr = Arc::new(OrderBookManager::new());
        mgr.set_tick_size("S", 0.01);
        assert!(mgr.on_add("S", 1, Side::Bid, 1.00, 50, 1, FeedScope::default(), false));
        assert!(mgr.on_add("S", 2, Side::Ask, 1.01, 30, 2, FeedScope::default(), false));
        (mgr, Arc::new(AtomicStore::new()))
    }

    #[test]
    fn test_materialize_now_writes_profile() {
        let (mgr, store) = setup();
        let mat = Materializer::new(mgr, store.clone(), MaterializeConfig::default());
        mat.materialize_now("S");

        let spread = store.get("S", "ob.spread").and_then(|v| v.as_f64()).unwrap();
        assert!((spread - 0.01).abs() < 1e-9);
        let stale = store
            .get("S", "ob.meta.is_stale")
            .and_then(|v| v.as_f64())
            .unwrap();
        assert_eq!(stale, 0.0);
    }

    #[test]
    fn test_per_symbol_profile_override() {
        let (mgr, store) = setup();
        let mut cfg = MaterializeConfig::default();
        cfg.keys_by_symbol
            .insert("S".to_string(), vec!["ob.mid".to_string()]);
        let mat = Materializer::new(mgr, store.clone(), cfg);
        mat.materialize_now("S");
        assert!(store.get("S", "ob.mid").is_some());
        assert!(store.get("S", "ob.spread").is_none());
    }

    #[test]
    fn test_background_worker_coalesces() {
        let (mgr, store) = setup();
        let mat = Materializer::new(
            mgr.clone(),
            store.clone(),
            MaterializeConfig {
                throttle_ms: 1,
                ..MaterializeConfig::default()
            },
        );
        mat.start();
        {
            let mat = mat.clone();
            mgr.subscribe_deltas(
                "S",
                Arc::new(move |d: &crate::book::manager::BookDelta| {
                    mat.on_book_update(&d.symbol);
                }),
            );
        }
        assert!(mgr.on_add("S", 3, Side::Bid, 0.99, 10, 3, FeedScope::default(), false));

        // wait for the worker to pick the symbol up
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if store.get("S", "ob.spread").is_some() {
                break;
            }
            assert!(Instant::now() < deadline, "materializer never ran");
            std::thread::sleep(Duration::from_millis(5));
        }
        mat.stop();
        mat.stop();
    }
}
