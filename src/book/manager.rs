//! Per-symbol order-book manager: tick-size quantization, feed sequencing
//! and staleness gates, venue-key resolution, delta publication, and the
//! snapshot surface the key evaluator runs against.

use crate::book::key::Mode;
use crate::book::order_book::OrderBook;
use crate::book::snapshot::{Ladder, Level, Snapshot, SnapshotSource};
use crate::book::types::{
    Aggressor, FeedScope, LevelSnapshotEntry, Order, OrderKey, Price, Side,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const DEFAULT_TICK: f64 = 1e-4;
const DEFAULT_RESOLVER_CAP: usize = 65_536;

/// Per-symbol feed sequencing state.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedState {
    pub last_seq: u64,
    pub epoch: u32,
    pub stale: bool,
}

/// One level's new total after a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelDelta {
    pub side: Side,
    pub price: f64,
    pub total_size: u64,
}

/// Streamed incremental change. `seq` is the manager's per-symbol
/// publication counter, distinct from the feed sequence.
#[derive(Debug, Clone, Default)]
pub struct BookDelta {
    pub symbol: String,
    pub seq: u64,
    /// Only levels whose totals changed.
    pub levels: Vec<LevelDelta>,
    /// Present iff the top-of-book bid changed (price or size) and exists.
    pub bid: Option<(f64, u64)>,
    /// Present iff the top-of-book ask changed (price or size) and exists.
    pub ask: Option<(f64, u64)>,
}

pub type DeltaHandler = Arc<dyn Fn(&BookDelta) + Send + Sync>;
pub type RequestSnapshotFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-order snapshot row at the floating-point boundary.
#[derive(Debug, Clone, Copy)]
pub struct PerOrderSnapshotEntry {
    pub id: u64,
    pub side: Side,
    pub price: f64,
    pub size: u64,
    pub priority: u64,
}

/// Aggregated snapshot row at the floating-point boundary.
#[derive(Debug, Clone, Copy)]
pub struct AggSnapshotEntry {
    pub side: Side,
    pub price: f64,
    pub total_size: u64,
    pub order_count: Option<u32>,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct BookMetrics {
    pub adds: AtomicU64,
    pub updates: AtomicU64,
    pub deletes: AtomicU64,
    pub trades: AtomicU64,
    pub snapshots: AtomicU64,
    pub summaries: AtomicU64,
    pub priorities: AtomicU64,
    pub dropped_malformed: AtomicU64,
    pub dropped_stale: AtomicU64,
    pub seq_gaps: AtomicU64,
    pub seq_resets: AtomicU64,
    pub stale_transitions: AtomicU64,
    pub deltas_published: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct BookMetricsSnapshot {
    pub adds: u64,
    pub updates: u64,
    pub deletes: u64,
    pub trades: u64,
    pub snapshots: u64,
    pub summaries: u64,
    pub priorities: u64,
    pub dropped_malformed: u64,
    pub dropped_stale: u64,
    pub seq_gaps: u64,
    pub seq_resets: u64,
    pub stale_transitions: u64,
    pub deltas_published: u64,
}

impl BookMetrics {
    fn hit(c: &AtomicU64) {
        c.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BookMetricsSnapshot {
        let g = |c: &AtomicU64| c.load(Ordering::Relaxed);
        BookMetricsSnapshot {
            adds: g(&self.adds),
            updates: g(&self.updates),
            deletes: g(&self.deletes),
            trades: g(&self.trades),
            snapshots: g(&self.snapshots),
            summaries: g(&self.summaries),
            priorities: g(&self.priorities),
            dropped_malformed: g(&self.dropped_malformed),
            dropped_stale: g(&self.dropped_stale),
            seq_gaps: g(&self.seq_gaps),
            seq_resets: g(&self.seq_resets),
            stale_transitions: g(&self.stale_transitions),
            deltas_published: g(&self.deltas_published),
        }
    }
}

// ---------------------------------------------------------------------------
// Venue-key resolver (bounded LRU per symbol)
// ---------------------------------------------------------------------------

struct LruResolver {
    cap: usize,
    map: HashMap<String, OrderKey>,
    recency: VecDeque<String>,
}

impl LruResolver {
    fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            map: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    fn put(&mut self, venue_key: &str, key: OrderKey) {
        if self.map.insert(venue_key.to_string(), key).is_none() {
            self.recency.push_back(venue_key.to_string());
        } else if let Some(pos) = self.recency.iter().position(|k| k == venue_key) {
            let k = self.recency.remove(pos).expect("position exists");
            self.recency.push_back(k);
        }
        while self.map.len() > self.cap {
            if let Some(oldest) = self.recency.pop_front() {
                self.map.remove(&oldest);
            } else {
                break;
            }
        }
    }

    fn get(&self, venue_key: &str) -> Option<OrderKey> {
        self.map.get(venue_key).copied()
    }

    fn set_cap(&mut self, cap: usize) {
        self.cap = cap.max(1);
        while self.map.len() > self.cap {
            if let Some(oldest) = self.recency.pop_front() {
                self.map.remove(&oldest);
            } else {
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PubState {
    seq: HashMap<String, u64>,
    subs: HashMap<String, HashMap<u64, DeltaHandler>>,
}

pub struct OrderBookManager {
    books: RwLock<HashMap<String, Arc<OrderBook>>>,
    tick_size: RwLock<HashMap<String, f64>>,
    feed: Mutex<HashMap<String, FeedState>>,
    resolver: Mutex<HashMap<String, LruResolver>>,
    resolver_cap: AtomicU64,
    pub_state: Mutex<PubState>,
    next_sub_id: AtomicU64,
    last_change_ms: Mutex<HashMap<String, i64>>,
    request_snapshot: RwLock<Option<RequestSnapshotFn>>,
    metrics: BookMetrics,
}

impl Default for OrderBookManager {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBookManager {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            tick_size: RwLock::new(HashMap::new()),
            feed: Mutex::new(HashMap::new()),
            resolver: Mutex::new(HashMap::new()),
            resolver_cap: AtomicU64::new(DEFAULT_RESOLVER_CAP as u64),
            pub_state: Mutex::new(PubState::default()),
            next_sub_id: AtomicU64::new(1),
            last_change_ms: Mutex::new(HashMap::new()),
            request_snapshot: RwLock::new(None),
            metrics: BookMetrics::default(),
        }
    }

    // ---------- tick size ----------

    pub fn set_tick_size(&self, symbol: &str, tick: f64) {
        let tick = if tick > 0.0 { tick } else { DEFAULT_TICK };
        self.tick_size.write().insert(symbol.to_string(), tick);
    }

    pub fn tick_size(&self, symbol: &str) -> f64 {
        self.tick_size
            .read()
            .get(symbol)
            .copied()
            .unwrap_or(DEFAULT_TICK)
    }

    pub fn quantize(px: f64, tick: f64) -> i64 {
        (px / tick + 1e-12).round() as i64
    }

    pub fn to_ticks(&self, symbol: &str, px: f64) -> Price {
        Price(Self::quantize(px, self.tick_size(symbol)))
    }

    pub fn to_price(&self, symbol: &str, p: Price) -> f64 {
        p.0 as f64 * self.tick_size(symbol)
    }

    fn valid_price(&self, symbol: &str, px: f64) -> bool {
        if !(px > 0.0) || !px.is_finite() {
            return false;
        }
        let q = px / self.tick_size(symbol);
        (q - q.round()).abs() < 1e-8
    }

    fn valid_size(size: u64) -> bool {
        size > 0
    }

    // ---------- book access ----------

    pub fn book(&self, symbol: &str) -> Arc<OrderBook> {
        if let Some(b) = self.books.read().get(symbol) {
            return b.clone();
        }
        self.books
            .write()
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(OrderBook::new()))
            .clone()
    }

    fn find_book(&self, symbol: &str) -> Option<Arc<OrderBook>> {
        self.books.read().get(symbol).cloned()
    }

    // ---------- feed state / sequencing ----------

    /// Accepts the first seq seen; then `last + 1` advances. A gap marks the
    /// symbol stale and triggers the snapshot-request callback. While stale,
    /// everything (including further seqs) drops.
    pub fn on_seq(&self, symbol: &str, seq: u64) -> bool {
        let became_stale = {
            let mut feed = self.feed.lock();
            let st = feed.entry(symbol.to_string()).or_default();
            if st.stale {
                BookMetrics::hit(&self.metrics.dropped_stale);
                return false;
            }
            if st.last_seq == 0 || seq == st.last_seq + 1 {
                st.last_seq = seq;
                return true;
            }
            st.stale = true;
            true
        };
        if became_stale {
            BookMetrics::hit(&self.metrics.seq_gaps);
            BookMetrics::hit(&self.metrics.stale_transitions);
            self.fire_request_snapshot(symbol);
        }
        false
    }

    /// Session reset: new epoch, cleared seq, stale until a snapshot lands.
    pub fn on_reset(&self, symbol: &str, new_epoch: u32) {
        {
            let mut feed = self.feed.lock();
            let st = feed.entry(symbol.to_string()).or_default();
            st.epoch = new_epoch;
            st.last_seq = 0;
            st.stale = true;
        }
        BookMetrics::hit(&self.metrics.seq_resets);
        BookMetrics::hit(&self.metrics.stale_transitions);
        self.fire_request_snapshot(symbol);
    }

    pub fn is_stale(&self, symbol: &str) -> bool {
        self.feed.lock().get(symbol).is_some_and(|st| st.stale)
    }

    pub fn feed_state(&self, symbol: &str) -> FeedState {
        self.feed.lock().get(symbol).copied().unwrap_or_default()
    }

    pub fn set_request_snapshot(&self, f: RequestSnapshotFn) {
        *self.request_snapshot.write() = Some(f);
    }

    fn fire_request_snapshot(&self, symbol: &str) {
        let f = self.request_snapshot.read().clone();
        if let Some(f) = f {
            f(symbol);
        }
    }

    fn gate_stale(&self, symbol: &str) -> bool {
        let stale = self.is_stale(symbol);
        if stale {
            BookMetrics::hit(&self.metrics.dropped_stale);
        }
        stale
    }

    // ---------- venue-key resolver ----------

    pub fn resolver_set_capacity(&self, cap: usize) {
        self.resolver_cap.store(cap.max(1) as u64, Ordering::Relaxed);
        let mut resolver = self.resolver.lock();
        for lru in resolver.values_mut() {
            lru.set_cap(cap);
        }
    }

    pub fn resolver_put(&self, symbol: &str, venue_key: &str, key: OrderKey) {
        let cap = self.resolver_cap.load(Ordering::Relaxed) as usize;
        self.resolver
            .lock()
            .entry(symbol.to_string())
            .or_insert_with(|| LruResolver::new(cap))
            .put(venue_key, key);
    }

    pub fn resolver_get(&self, symbol: &str, venue_key: &str) -> Option<OrderKey> {
        self.resolver.lock().get(symbol)?.get(venue_key)
    }

    // ---------- delta publication ----------

    pub fn subscribe_deltas(&self, symbol: &str, handler: DeltaHandler) -> u64 {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        self.pub_state
            .lock()
            .subs
            .entry(symbol.to_string())
            .or_default()
            .insert(id, handler);
        id
    }

    pub fn unsubscribe_deltas(&self, symbol: &str, sub_id: u64) {
        if let Some(subs) = self.pub_state.lock().subs.get_mut(symbol) {
            subs.remove(&sub_id);
        }
    }

    fn publish_delta(
        &self,
        symbol: &str,
        levels: Vec<LevelDelta>,
        bid: Option<(f64, u64)>,
        ask: Option<(f64, u64)>,
    ) {
        if levels.is_empty() && bid.is_none() && ask.is_none() {
            return;
        }
        BookMetrics::hit(&self.metrics.deltas_published);

        let mut delta = BookDelta {
            symbol: symbol.to_string(),
            seq: 0,
            levels,
            bid,
            ask,
        };

        // seq assignment and handler snapshot share one lock so per-symbol
        // publications stay monotonic for every subscriber
        let handlers: Vec<DeltaHandler> = {
            let mut st = self.pub_state.lock();
            let seq = st.seq.entry(symbol.to_string()).or_insert(0);
            *seq += 1;
            delta.seq = *seq;
            st.subs
                .get(symbol)
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default()
        };

        self.last_change_ms
            .lock()
            .insert(symbol.to_string(), chrono::Utc::now().timestamp_millis());

        for h in handlers {
            h(&delta);
        }
    }

    /// Before/after probe around a mutation: records TOB changes and changes
    /// in the touched levels' totals, then publishes a delta.
    fn mutate_with_delta(
        &self,
        symbol: &str,
        candidates: &[(Side, Price)],
        mutate: impl FnOnce(&OrderBook) -> bool,
    ) -> bool {
        let book = self.book(symbol);

        let pre_bid = book.best_bid();
        let pre_bid_sz = book.best_bid_size();
        let pre_ask = book.best_ask();
        let pre_ask_sz = book.best_ask_size();

        let mut probes: Vec<(Side, Price, u64)> = Vec::with_capacity(candidates.len());
        for &(side, price) in candidates {
            if !probes.iter().any(|&(s, p, _)| s == side && p == price) {
                probes.push((side, price, book.level_size(side, price)));
            }
        }

        if !mutate(&book) {
            return false;
        }

        let post_bid = book.best_bid();
        let post_bid_sz = book.best_bid_size();
        let post_ask = book.best_ask();
        let post_ask_sz = book.best_ask_size();

        let mut levels = Vec::with_capacity(probes.len());
        for (side, price, before) in probes {
            let after = book.level_size(side, price);
            if after != before {
                levels.push(LevelDelta {
                    side,
                    price: self.to_price(symbol, price),
                    total_size: after,
                });
            }
        }

        let bid_changed =
            pre_bid != post_bid || (pre_bid.is_some() && pre_bid_sz != post_bid_sz);
        let ask_changed =
            pre_ask != post_ask || (pre_ask.is_some() && pre_ask_sz != post_ask_sz);

        let bid = post_bid
            .filter(|_| bid_changed)
            .map(|p| (self.to_price(symbol, p), post_bid_sz));
        let ask = post_ask
            .filter(|_| ask_changed)
            .map(|p| (self.to_price(symbol, p), post_ask_sz));

        self.publish_delta(symbol, levels, bid, ask);
        true
    }

    // ---------- mutations ----------

    #[allow(clippy::too_many_arguments)]
    pub fn on_add(
        &self,
        symbol: &str,
        id: u64,
        side: Side,
        price: f64,
        size: u64,
        priority: u64,
        scope: FeedScope,
        id_missing: bool,
    ) -> bool {
        self.on_add_get_key(symbol, id, side, price, size, priority, scope, id_missing)
            .is_some()
    }

    /// Add returning the composite key actually stored (synthetic ids
    /// included), or `None` when gated or malformed.
    #[allow(clippy::too_many_arguments)]
    pub fn on_add_get_key(
        &self,
        symbol: &str,
        id: u64,
        side: Side,
        price: f64,
        size: u64,
        priority: u64,
        scope: FeedScope,
        id_missing: bool,
    ) -> Option<OrderKey> {
        if self.gate_stale(symbol) {
            return None;
        }
        if !self.valid_price(symbol, price) || !Self::valid_size(size) {
            BookMetrics::hit(&self.metrics.dropped_malformed);
            return None;
        }
        BookMetrics::hit(&self.metrics.adds);

        let ticks = self.to_ticks(symbol, price);
        let order = Order {
            id,
            side,
            price: ticks,
            size,
            priority,
            feed_id: scope.feed_id,
            epoch: scope.epoch,
            synthetic: false,
        };

        let mut out_key = None;
        self.mutate_with_delta(symbol, &[(side, ticks)], |book| {
            out_key = Some(book.add_get_key(order, scope, id_missing));
            true
        });
        out_key
    }

    #[allow(clippy::too_many_arguments)]
    pub fn on_add_with_venue_key(
        &self,
        symbol: &str,
        venue_key: &str,
        id: u64,
        side: Side,
        price: f64,
        size: u64,
        priority: u64,
        scope: FeedScope,
        id_missing: bool,
    ) -> bool {
        let Some(key) =
            self.on_add_get_key(symbol, id, side, price, size, priority, scope, id_missing)
        else {
            return false;
        };
        self.resolver_put(symbol, venue_key, key);
        true
    }

    pub fn on_update(
        &self,
        symbol: &str,
        key: OrderKey,
        new_price: Option<f64>,
        new_size: Option<u64>,
    ) -> bool {
        if self.gate_stale(symbol) {
            return false;
        }
        if new_price.is_none() && new_size.is_none() {
            BookMetrics::hit(&self.metrics.dropped_malformed);
            return false;
        }
        if let Some(px) = new_price {
            if !self.valid_price(symbol, px) {
                BookMetrics::hit(&self.metrics.dropped_malformed);
                return false;
            }
        }
        // a zero new_size is a delete, so sizes are not gated here
        BookMetrics::hit(&self.metrics.updates);

        let book = self.book(symbol);
        let ticks = new_price.map(|px| self.to_ticks(symbol, px));
        let mut candidates = Vec::with_capacity(2);
        if let Some((side, price)) = book.locate(key) {
            candidates.push((side, price));
            if let Some(t) = ticks {
                candidates.push((side, t));
            }
        }
        self.mutate_with_delta(symbol, &candidates, |book| {
            book.update(key, ticks, new_size)
        })
    }

    pub fn on_update_by_venue_key(
        &self,
        symbol: &str,
        venue_key: &str,
        new_price: Option<f64>,
        new_size: Option<u64>,
    ) -> bool {
        if self.gate_stale(symbol) {
            return false;
        }
        let Some(key) = self.resolver_get(symbol, venue_key) else {
            BookMetrics::hit(&self.metrics.dropped_malformed);
            return false;
        };
        self.on_update(symbol, key, new_price, new_size)
    }

    pub fn on_delete(&self, symbol: &str, key: OrderKey) -> bool {
        if self.gate_stale(symbol) {
            return false;
        }
        BookMetrics::hit(&self.metrics.deletes);

        let book = self.book(symbol);
        let candidates: Vec<(Side, Price)> = book.locate(key).into_iter().collect();
        self.mutate_with_delta(symbol, &candidates, |book| book.delete(key))
    }

    pub fn on_delete_by_venue_key(&self, symbol: &str, venue_key: &str) -> bool {
        if self.gate_stale(symbol) {
            return false;
        }
        let Some(key) = self.resolver_get(symbol, venue_key) else {
            BookMetrics::hit(&self.metrics.dropped_malformed);
            return false;
        };
        self.on_delete(symbol, key)
    }

    pub fn on_priority(&self, symbol: &str, key: OrderKey, new_priority: u64) -> bool {
        if self.gate_stale(symbol) {
            return false;
        }
        BookMetrics::hit(&self.metrics.priorities);
        self.mutate_with_delta(symbol, &[], |book| book.priority(key, new_priority))
    }

    pub fn on_trade(&self, symbol: &str, price: f64, size: u64, aggr: Aggressor) -> bool {
        if self.gate_stale(symbol) {
            return false;
        }
        if !self.valid_price(symbol, price) || !Self::valid_size(size) {
            BookMetrics::hit(&self.metrics.dropped_malformed);
            return false;
        }
        BookMetrics::hit(&self.metrics.trades);

        let ticks = self.to_ticks(symbol, price);
        let book = self.book(symbol);
        let mut candidates = Vec::with_capacity(2);
        if book.level_size(Side::Bid, ticks) > 0 {
            candidates.push((Side::Bid, ticks));
        }
        if book.level_size(Side::Ask, ticks) > 0 {
            candidates.push((Side::Ask, ticks));
        }
        self.mutate_with_delta(symbol, &candidates, |book| {
            book.trade(ticks, size, aggr) > 0
        })
    }

    // ---------- snapshots / summaries ----------

    /// Atomic per-order replace; the only path (with the aggregated variant)
    /// that clears staleness.
    pub fn on_snapshot_per_order(
        &self,
        symbol: &str,
        entries: &[PerOrderSnapshotEntry],
        scope: FeedScope,
        snapshot_seq: Option<u64>,
    ) {
        let orders: Vec<Order> = entries
            .iter()
            .map(|e| Order {
                id: e.id,
                side: e.side,
                price: self.to_ticks(symbol, e.price),
                size: e.size,
                priority: e.priority,
                feed_id: scope.feed_id,
                epoch: scope.epoch,
                synthetic: false,
            })
            .collect();
        self.book(symbol).snapshot_per_order(&orders);
        self.clear_stale(symbol, snapshot_seq);
        BookMetrics::hit(&self.metrics.snapshots);
        self.publish_tob_delta(symbol);
    }

    pub fn on_snapshot_aggregated(
        &self,
        symbol: &str,
        entries: &[AggSnapshotEntry],
        snapshot_seq: Option<u64>,
    ) {
        let levels: Vec<LevelSnapshotEntry> = entries
            .iter()
            .map(|e| LevelSnapshotEntry {
                side: e.side,
                price: self.to_ticks(symbol, e.price),
                total_size: e.total_size,
                order_count: e.order_count,
            })
            .collect();
        self.book(symbol).snapshot_aggregated(&levels);
        self.clear_stale(symbol, snapshot_seq);
        BookMetrics::hit(&self.metrics.snapshots);
        self.publish_tob_delta(symbol);
    }

    pub fn on_level_summary(
        &self,
        symbol: &str,
        side: Side,
        price: f64,
        total_size: u64,
        order_count: Option<u32>,
    ) -> bool {
        if self.gate_stale(symbol) {
            return false;
        }
        if !self.valid_price(symbol, price) {
            BookMetrics::hit(&self.metrics.dropped_malformed);
            return false;
        }
        BookMetrics::hit(&self.metrics.summaries);

        let ticks = self.to_ticks(symbol, price);
        self.mutate_with_delta(symbol, &[(side, ticks)], |book| {
            book.level_summary(side, ticks, total_size, order_count)
        })
    }

    fn clear_stale(&self, symbol: &str, snapshot_seq: Option<u64>) {
        let mut feed = self.feed.lock();
        let st = feed.entry(symbol.to_string()).or_default();
        st.stale = false;
        if let Some(seq) = snapshot_seq {
            st.last_seq = seq;
        }
    }

    fn publish_tob_delta(&self, symbol: &str) {
        let book = self.book(symbol);
        let bid = book
            .best_bid()
            .map(|p| (self.to_price(symbol, p), book.best_bid_size()));
        let ask = book
            .best_ask()
            .map(|p| (self.to_price(symbol, p), book.best_ask_size()));
        self.publish_delta(symbol, Vec::new(), bid, ask);
    }

    // ---------- queries ----------

    pub fn best_bid(&self, symbol: &str) -> Option<f64> {
        let book = self.find_book(symbol)?;
        book.best_bid().map(|p| self.to_price(symbol, p))
    }

    pub fn best_ask(&self, symbol: &str) -> Option<f64> {
        let book = self.find_book(symbol)?;
        book.best_ask().map(|p| self.to_price(symbol, p))
    }

    pub fn best_bid_size(&self, symbol: &str) -> u64 {
        self.find_book(symbol).map_or(0, |b| b.best_bid_size())
    }

    pub fn best_ask_size(&self, symbol: &str) -> u64 {
        self.find_book(symbol).map_or(0, |b| b.best_ask_size())
    }

    /// Top-N depth as (price, size) pairs, best toward worse.
    pub fn depth_n(&self, symbol: &str, n: usize) -> (Vec<(f64, u64)>, Vec<(f64, u64)>) {
        let mut bids = Vec::new();
        let mut asks = Vec::new();
        if let Some(book) = self.find_book(symbol) {
            book.for_each_level(Side::Bid, n, |p, sz, _| {
                bids.push((self.to_price(symbol, p), sz));
            });
            book.for_each_level(Side::Ask, n, |p, sz, _| {
                asks.push((self.to_price(symbol, p), sz));
            });
        }
        (bids, asks)
    }

    pub fn stats(&self) -> BookMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn assert_invariants(&self, symbol: &str) -> Result<(), String> {
        match self.find_book(symbol) {
            Some(b) => b.check_invariants(),
            None => Err("book not found".to_string()),
        }
    }

    /// Human-readable ladder rendering for debugging.
    pub fn dump_ladder(&self, symbol: &str, max_levels_per_side: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== DUMP {symbol} ===");
        let st = self.feed_state(symbol);
        let _ = writeln!(
            out,
            "epoch={} stale={} feedSeq={}",
            st.epoch, st.stale, st.last_seq
        );

        let (bids, asks) = self.depth_n(symbol, max_levels_per_side);
        let _ = writeln!(out, "[BIDS]");
        if bids.is_empty() {
            let _ = writeln!(out, "  (empty)");
        }
        for (px, sz) in bids {
            let _ = writeln!(out, "  {px:>14.10}  x {sz}");
        }
        let _ = writeln!(out, "[ASKS]");
        if asks.is_empty() {
            let _ = writeln!(out, "  (empty)");
        }
        for (px, sz) in asks {
            let _ = writeln!(out, "  {px:>14.10}  x {sz}");
        }
        out
    }
}

impl SnapshotSource for OrderBookManager {
    fn capture(
        &self,
        symbol: &str,
        max_levels: usize,
        mode: Mode,
        price_band: Option<(f64, f64)>,
    ) -> Snapshot {
        let mut snap = Snapshot::default();

        let st = self.feed_state(symbol);
        snap.meta.epoch = st.epoch;
        snap.meta.stale = st.stale;
        snap.meta.seq = self
            .pub_state
            .lock()
            .seq
            .get(symbol)
            .copied()
            .unwrap_or(0);
        snap.meta.last_change_ms = self
            .last_change_ms
            .lock()
            .get(symbol)
            .copied()
            .unwrap_or(0);

        let Some(book) = self.find_book(symbol) else {
            return snap;
        };

        // A price band ignores the depth hint and scans everything in range.
        let limit = if price_band.is_some() {
            usize::MAX
        } else {
            max_levels
        };

        let fill = |side: Side| {
            let mut levels = Vec::new();
            let mut push = |p: Price, sz: u64, cnt: u32| {
                let price = self.to_price(symbol, p);
                if let Some((lo, hi)) = price_band {
                    if price < lo || price > hi {
                        return;
                    }
                }
                let orders = if cnt == 0 && mode == Mode::Agg {
                    None
                } else {
                    Some(cnt)
                };
                levels.push(Level::new(price, sz as f64, orders));
            };
            match mode {
                Mode::Per => book.for_each_level(side, limit, &mut push),
                Mode::Agg => book.for_each_level_aggregated(side, limit, &mut push),
            }
            Ladder { levels }
        };

        snap.bids = fill(Side::Bid);
        snap.asks = fill(Side::Ask);
        snap.meta.bid_levels = snap.bids.levels.len();
        snap.meta.ask_levels = snap.asks.levels.len();
        snap
    }

    fn tick_size(&self, symbol: &str) -> f64 {
        OrderBookManager::tick_size(self, symbol)
    }
}
