//! Per-symbol limit order book: per-order ladders, aggregated ladders, and
//! the locator index.
//!
//! All mutations take the single per-book lock. The book reports the feed as
//! given; a crossed book is an upstream data bug, not something to rebalance.

use crate::book::types::{Aggressor, FeedScope, LevelSnapshotEntry, Order, OrderKey, Price, Side};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Default)]
struct PriceLevel {
    orders: VecDeque<Order>,
    total_size: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct LevelAgg {
    total_size: u64,
    order_count: u32,
}

#[derive(Debug, Clone, Copy)]
struct Locator {
    side: Side,
    price: Price,
}

#[derive(Default)]
struct BookCore {
    bids: BTreeMap<Price, PriceLevel>,
    asks: BTreeMap<Price, PriceLevel>,
    bids_agg: BTreeMap<Price, LevelAgg>,
    asks_agg: BTreeMap<Price, LevelAgg>,
    by_id: HashMap<OrderKey, Locator>,
    synth_counters: HashMap<u64, u64>,
}

#[derive(Default)]
pub struct OrderBook {
    core: Mutex<BookCore>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------- mutations ----------

    /// Add an order carrying its own scope. A duplicate key is cancel+add.
    pub fn add(&self, o: Order) -> bool {
        let mut core = self.core.lock();
        core.add_impl(o);
        true
    }

    /// Add under an explicit scope; allocates a synthetic id when the feed
    /// omitted one.
    pub fn add_scoped(&self, o: Order, scope: FeedScope, id_missing: bool) -> bool {
        self.add_get_key(o, scope, id_missing);
        true
    }

    /// Same as [`add_scoped`] but returns the composite key actually stored.
    pub fn add_get_key(&self, mut o: Order, scope: FeedScope, id_missing: bool) -> OrderKey {
        let mut core = self.core.lock();
        o.feed_id = scope.feed_id;
        o.epoch = scope.epoch;
        if id_missing || o.id == 0 {
            o.synthetic = true;
            o.id = core.next_synthetic_id(scope);
        }
        let key = o.key();
        core.add_impl(o);
        key
    }

    /// `new_size == 0` deletes. A pure size change keeps queue position; a
    /// price change moves the order to the tail of the new level. Returns
    /// false when the key is unknown or nothing changed.
    pub fn update(&self, key: OrderKey, new_price: Option<Price>, new_size: Option<u64>) -> bool {
        self.core.lock().update_impl(key, new_price, new_size)
    }

    pub fn delete(&self, key: OrderKey) -> bool {
        self.core.lock().delete_impl(key)
    }

    /// Consume quantity from the passive side at `price`, front to back.
    /// Returns the quantity actually consumed.
    pub fn trade(&self, price: Price, qty: u64, aggr: Aggressor) -> u64 {
        if qty == 0 {
            return 0;
        }
        let mut core = self.core.lock();
        let passive = match aggr {
            Aggressor::Buy => Side::Ask,
            Aggressor::Sell => Side::Bid,
            Aggressor::Unknown => {
                // Infer from per-order TOB only.
                if core.bids.keys().next_back().is_some_and(|b| price <= *b) {
                    Side::Bid
                } else if core.asks.keys().next().is_some_and(|a| price >= *a) {
                    Side::Ask
                } else {
                    return 0;
                }
            }
        };
        core.consume_at_level(passive, price, qty)
    }

    /// Atomic replace of the per-order book.
    pub fn snapshot_per_order(&self, orders: &[Order]) {
        let mut core = self.core.lock();
        core.bids.clear();
        core.asks.clear();
        core.by_id.clear();
        for o in orders {
            core.add_impl(*o);
        }
    }

    /// Atomic replace of the aggregated ladders; zero-size entries are
    /// dropped on the way in.
    pub fn snapshot_aggregated(&self, levels: &[LevelSnapshotEntry]) {
        let mut core = self.core.lock();
        core.bids_agg.clear();
        core.asks_agg.clear();
        for e in levels {
            if e.total_size == 0 {
                continue;
            }
            let agg = LevelAgg {
                total_size: e.total_size,
                order_count: e.order_count.unwrap_or(0),
            };
            core.agg_ladder_mut(e.side).insert(e.price, agg);
        }
    }

    /// Upsert on the aggregated ladder; zero size removes the level.
    /// Returns whether anything changed.
    pub fn level_summary(
        &self,
        side: Side,
        price: Price,
        total_size: u64,
        order_count: Option<u32>,
    ) -> bool {
        let mut core = self.core.lock();
        if total_size == 0 {
            return core.agg_ladder_mut(side).remove(&price).is_some();
        }
        let lvl = core.agg_ladder_mut(side).entry(price).or_default();
        let changed = lvl.total_size != total_size
            || order_count.is_some_and(|c| lvl.order_count != c);
        lvl.total_size = total_size;
        if let Some(c) = order_count {
            lvl.order_count = c;
        }
        changed
    }

    /// Priority update; a changed priority moves the order to the tail of
    /// its level. Returns false when the key is unknown.
    pub fn priority(&self, key: OrderKey, new_priority: u64) -> bool {
        self.core.lock().priority_impl(key, new_priority)
    }

    // ---------- queries (per-order) ----------

    pub fn best_bid(&self) -> Option<Price> {
        self.core.lock().bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.core.lock().asks.keys().next().copied()
    }

    pub fn best_bid_size(&self) -> u64 {
        let core = self.core.lock();
        core.bids.values().next_back().map_or(0, |l| l.total_size)
    }

    pub fn best_ask_size(&self) -> u64 {
        let core = self.core.lock();
        core.asks.values().next().map_or(0, |l| l.total_size)
    }

    pub fn level_size(&self, side: Side, price: Price) -> u64 {
        let core = self.core.lock();
        core.ladder(side).get(&price).map_or(0, |l| l.total_size)
    }

    /// Iterate up to `n` per-order levels from best toward worse with
    /// `(price, total_size, order_count)`.
    pub fn for_each_level(&self, side: Side, n: usize, mut f: impl FnMut(Price, u64, u32)) {
        let core = self.core.lock();
        let ladder = core.ladder(side);
        let iter: Box<dyn Iterator<Item = (&Price, &PriceLevel)> + '_> = match side {
            Side::Bid => Box::new(ladder.iter().rev()),
            Side::Ask => Box::new(ladder.iter()),
        };
        for (p, lvl) in iter.take(n) {
            f(*p, lvl.total_size, lvl.orders.len() as u32);
        }
    }

    // ---------- queries (aggregated) ----------

    pub fn best_bid_aggregated(&self) -> Option<Price> {
        self.core.lock().bids_agg.keys().next_back().copied()
    }

    pub fn best_ask_aggregated(&self) -> Option<Price> {
        self.core.lock().asks_agg.keys().next().copied()
    }

    pub fn level_size_aggregated(&self, side: Side, price: Price) -> u64 {
        let core = self.core.lock();
        core.agg_ladder(side).get(&price).map_or(0, |l| l.total_size)
    }

    /// Aggregated-ladder walk, best toward worse.
    pub fn for_each_level_aggregated(
        &self,
        side: Side,
        n: usize,
        mut f: impl FnMut(Price, u64, u32),
    ) {
        let core = self.core.lock();
        let ladder = core.agg_ladder(side);
        let iter: Box<dyn Iterator<Item = (&Price, &LevelAgg)> + '_> = match side {
            Side::Bid => Box::new(ladder.iter().rev()),
            Side::Ask => Box::new(ladder.iter()),
        };
        for (p, lvl) in iter.take(n) {
            f(*p, lvl.total_size, lvl.order_count);
        }
    }

    /// Current (side, price) of a live order.
    pub fn locate(&self, key: OrderKey) -> Option<(Side, Price)> {
        self.core
            .lock()
            .by_id
            .get(&key)
            .map(|loc| (loc.side, loc.price))
    }

    pub fn level_counts(&self) -> (usize, usize) {
        let core = self.core.lock();
        (core.bids.len(), core.asks.len())
    }

    // ---------- invariants ----------

    /// Verifies per-level sums, locator consistency, and the absence of
    /// empty levels. Returns the first violation as a reason string.
    pub fn check_invariants(&self) -> Result<(), String> {
        let core = self.core.lock();

        for (ladder, name) in [(&core.bids, "bids"), (&core.asks, "asks")] {
            for (price, lvl) in ladder {
                if lvl.orders.is_empty() {
                    return Err(format!("{name}: empty level at {:?}", price));
                }
                let sum: u64 = lvl.orders.iter().map(|o| o.size).sum();
                if sum != lvl.total_size {
                    return Err(format!(
                        "{name}: level {:?} totalSize {} != order sum {}",
                        price, lvl.total_size, sum
                    ));
                }
            }
        }

        for (key, loc) in &core.by_id {
            let Some(lvl) = core.ladder(loc.side).get(&loc.price) else {
                return Err(format!("locator for {key:?} references missing level"));
            };
            let Some(o) = lvl.orders.iter().find(|o| o.key() == *key) else {
                return Err(format!("locator for {key:?} does not match any order"));
            };
            if o.side != loc.side || o.price != loc.price {
                return Err(format!("locator for {key:?} disagrees with stored order"));
            }
        }

        for (ladder, name) in [(&core.bids_agg, "bidsAgg"), (&core.asks_agg, "asksAgg")] {
            if ladder.values().any(|l| l.total_size == 0) {
                return Err(format!("{name}: zero-size level present"));
            }
        }

        Ok(())
    }
}

impl BookCore {
    fn ladder(&self, side: Side) -> &BTreeMap<Price, PriceLevel> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn ladder_mut(&mut self, side: Side) -> &mut BTreeMap<Price, PriceLevel> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    fn agg_ladder(&self, side: Side) -> &BTreeMap<Price, LevelAgg> {
        match side {
            Side::Bid => &self.bids_agg,
            Side::Ask => &self.asks_agg,
        }
    }

    fn agg_ladder_mut(&mut self, side: Side) -> &mut BTreeMap<Price, LevelAgg> {
        match side {
            Side::Bid => &mut self.bids_agg,
            Side::Ask => &mut self.asks_agg,
        }
    }

    fn next_synthetic_id(&mut self, scope: FeedScope) -> u64 {
        let scope_key = (u64::from(scope.feed_id) << 32) | u64::from(scope.epoch);
        // start at 1: 0 is a common "missing id" sentinel upstream
        let counter = self.synth_counters.entry(scope_key).or_insert(1);
        let id = *counter;
        *counter += 1;
        id
    }

    fn add_impl(&mut self, o: Order) {
        let key = o.key();
        if self.by_id.contains_key(&key) {
            // cancel+add semantics on a duplicate within the same scope
            self.delete_impl(key);
        }

        let lvl = self.ladder_mut(o.side).entry(o.price).or_default();
        lvl.orders.push_back(o);
        lvl.total_size += o.size;
        self.by_id.insert(
            key,
            Locator {
                side: o.side,
                price: o.price,
            },
        );
    }

    fn update_impl(
        &mut self,
        key: OrderKey,
        new_price: Option<Price>,
        new_size: Option<u64>,
    ) -> bool {
        let Some(loc) = self.by_id.get(&key).copied() else {
            return false;
        };

        // Read current attributes; a dangling locator is dropped.
        let found = self.ladder(loc.side).get(&loc.price).and_then(|lvl| {
            lvl.orders
                .iter()
                .find(|o| o.key() == key)
                .map(|o| (o.price, o.size))
        });
        let Some((old_price, old_size)) = found else {
            self.by_id.remove(&key);
            return false;
        };

        let tgt_price = new_price.unwrap_or(old_price);
        let tgt_size = new_size.unwrap_or(old_size);

        if tgt_size == 0 {
            return self.delete_impl(key);
        }

        if tgt_price == old_price {
            if tgt_size == old_size {
                return false;
            }
            if let Some(lvl) = self.ladder_mut(loc.side).get_mut(&old_price) {
                if let Some(o) = lvl.orders.iter_mut().find(|o| o.key() == key) {
                    o.size = tgt_size;
                }
                lvl.total_size = lvl.total_size - old_size + tgt_size;
            }
            return true;
        }

        // price change: leave the old level, join the tail of the new one
        let mut moved = None;
        if let Some(lvl) = self.ladder_mut(loc.side).get_mut(&old_price) {
            if let Some(idx) = lvl.orders.iter().position(|o| o.key() == key) {
                moved = lvl.orders.remove(idx);
                lvl.total_size = lvl.total_size.saturating_sub(old_size);
            }
        }
        let old_level_empty = self
            .ladder(loc.side)
            .get(&old_price)
            .is_some_and(|l| l.orders.is_empty());
        if old_level_empty {
            self.ladder_mut(loc.side).remove(&old_price);
        }
        let Some(mut moved) = moved else {
            self.by_id.remove(&key);
            return false;
        };

        moved.price = tgt_price;
        moved.size = tgt_size;
        let new_lvl = self.ladder_mut(loc.side).entry(tgt_price).or_default();
        new_lvl.orders.push_back(moved);
        new_lvl.total_size += tgt_size;

        self.by_id.insert(
            key,
            Locator {
                side: loc.side,
                price: tgt_price,
            },
        );
        true
    }

    fn delete_impl(&mut self, key: OrderKey) -> bool {
        let Some(loc) = self.by_id.remove(&key) else {
            return false;
        };
        let Some(lvl) = self.ladder_mut(loc.side).get_mut(&loc.price) else {
            return false;
        };
        let Some(idx) = lvl.orders.iter().position(|o| o.key() == key) else {
            return false;
        };
        let size = lvl.orders[idx].size;
        lvl.orders.remove(idx);
        lvl.total_size = lvl.total_size.saturating_sub(size);
        if lvl.orders.is_empty() {
            self.ladder_mut(loc.side).remove(&loc.price);
        }
        true
    }

    fn priority_impl(&mut self, key: OrderKey, new_priority: u64) -> bool {
        let Some(loc) = self.by_id.get(&key).copied() else {
            return false;
        };
        let Some(lvl) = self.ladder_mut(loc.side).get_mut(&loc.price) else {
            return false;
        };
        let Some(idx) = lvl.orders.iter().position(|o| o.key() == key) else {
            return false;
        };
        if lvl.orders[idx].priority == new_priority {
            return true;
        }
        let mut o = lvl.orders.remove(idx).expect("indexed order exists");
        o.priority = new_priority;
        lvl.orders.push_back(o);
        true
    }

    fn consume_at_level(&mut self, passive: Side, price: Price, qty: u64) -> u64 {
        // Borrow the ladder and the locator as disjoint fields; orders fully
        // consumed at the front must leave both.
        let ladder = match passive {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        let Some(lvl) = ladder.get_mut(&price) else {
            return 0;
        };

        let mut remaining = qty;
        while remaining > 0 {
            let Some(front) = lvl.orders.front_mut() else {
                break;
            };
            let take = front.size.min(remaining);
            front.size -= take;
            remaining -= take;
            lvl.total_size = lvl.total_size.saturating_sub(take);

            if front.size == 0 {
                let key = front.key();
                lvl.orders.pop_front();
                self.by_id.remove(&key);
            } else {
                // partially consumed front order: trade exhausted
                break;
            }
        }

        if lvl.orders.is_empty() {
            ladder.remove(&price);
        }
        qty - remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: u64, side: Side, ticks: i64, size: u64) -> Order {
        Order {
            id,
            side,
            price: Price(ticks),
            size,
            priority: id,
            feed_id: 0,
            epoch: 0,
            synthetic: false,
        }
    }

    #[test]
    fn test_add_and_tob() {
        let book = OrderBook::new();
        book.add(order(1, Side::Bid, 100, 50));
        book.add(order(2, Side::Ask, 101, 30));
        assert_eq!(book.best_bid(), Some(Price(100)));
        assert_eq!(book.best_ask(), Some(Price(101)));
        assert_eq!(book.best_bid_size(), 50);
        assert_eq!(book.best_ask_size(), 30);
        assert!(book.check_invariants().is_ok());
    }

    #[test]
    fn test_duplicate_add_is_cancel_add() {
        let book = OrderBook::new();
        book.add(order(1, Side::Bid, 100, 50));
        book.add(order(1, Side::Bid, 101, 20));
        assert_eq!(book.level_size(Side::Bid, Price(100)), 0);
        assert_eq!(book.level_size(Side::Bid, Price(101)), 20);
        assert_eq!(book.locate(order(1, Side::Bid, 101, 20).key()), Some((Side::Bid, Price(101))));
        assert!(book.check_invariants().is_ok());
    }

    #[test]
    fn test_update_size_keeps_position() {
        let book = OrderBook::new();
        book.add(order(1, Side::Ask, 100, 10));
        book.add(order(2, Side::Ask, 100, 20));
        assert!(book.update(order(1, Side::Ask, 100, 0).key(), None, Some(15)));
        // order 1 still at the front: a trade consumes it first
        assert_eq!(book.trade(Price(100), 15, Aggressor::Buy), 15);
        assert_eq!(book.level_size(Side::Ask, Price(100)), 20);
        assert!(book.check_invariants().is_ok());
    }

    #[test]
    fn test_update_price_moves_to_tail() {
        let book = OrderBook::new();
        book.add(order(1, Side::Ask, 100, 10));
        book.add(order(2, Side::Ask, 101, 20));
        assert!(book.update(order(1, Side::Ask, 100, 0).key(), Some(Price(101)), None));
        assert_eq!(book.level_size(Side::Ask, Price(100)), 0);
        assert_eq!(book.level_size(Side::Ask, Price(101)), 30);
        // order 2 keeps priority at 101; a 20-lot trade consumes it fully
        assert_eq!(book.trade(Price(101), 20, Aggressor::Buy), 20);
        assert_eq!(book.level_size(Side::Ask, Price(101)), 10);
        assert!(book.check_invariants().is_ok());
    }

    #[test]
    fn test_update_size_zero_is_delete() {
        let book = OrderBook::new();
        let o = order(1, Side::Bid, 100, 10);
        book.add(o);
        assert!(book.update(o.key(), None, Some(0)));
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.locate(o.key()), None);
    }

    #[test]
    fn test_update_unknown_key() {
        let book = OrderBook::new();
        assert!(!book.update(order(9, Side::Bid, 1, 1).key(), None, Some(5)));
    }

    #[test]
    fn test_trade_consumes_front_to_back() {
        let book = OrderBook::new();
        book.add(order(1, Side::Ask, 100, 50));
        assert_eq!(book.trade(Price(100), 30, Aggressor::Buy), 30);
        assert_eq!(book.level_size(Side::Ask, Price(100)), 20);
        assert_eq!(book.trade(Price(100), 20, Aggressor::Buy), 20);
        assert_eq!(book.best_ask(), None);
        assert!(book.check_invariants().is_ok());
    }

    #[test]
    fn test_trade_unknown_aggressor_inference() {
        let book = OrderBook::new();
        book.add(order(1, Side::Bid, 100, 10));
        book.add(order(2, Side::Ask, 102, 10));
        // at or below best bid: hits the bid
        assert_eq!(book.trade(Price(100), 5, Aggressor::Unknown), 5);
        assert_eq!(book.level_size(Side::Bid, Price(100)), 5);
        // at or above best ask: lifts the ask
        assert_eq!(book.trade(Price(102), 5, Aggressor::Unknown), 5);
        // midpoint: no visible liquidity to consume
        assert_eq!(book.trade(Price(101), 5, Aggressor::Unknown), 0);
    }

    #[test]
    fn test_priority_change_moves_to_tail() {
        let book = OrderBook::new();
        let a = order(1, Side::Bid, 100, 10);
        book.add(a);
        book.add(order(2, Side::Bid, 100, 20));
        assert!(book.priority(a.key(), 99));
        // order 2 is now at the front
        assert_eq!(book.trade(Price(100), 20, Aggressor::Sell), 20);
        assert_eq!(book.level_size(Side::Bid, Price(100)), 10);
        assert!(!book.priority(order(7, Side::Bid, 1, 1).key(), 3));
    }

    #[test]
    fn test_snapshot_per_order_idempotent() {
        let book = OrderBook::new();
        book.add(order(9, Side::Bid, 90, 5));
        let snap = vec![
            order(1, Side::Bid, 100, 10),
            order(2, Side::Ask, 101, 20),
        ];
        book.snapshot_per_order(&snap);
        book.snapshot_per_order(&snap);
        assert_eq!(book.best_bid(), Some(Price(100)));
        assert_eq!(book.best_ask(), Some(Price(101)));
        assert_eq!(book.level_size(Side::Bid, Price(90)), 0);
        assert_eq!(book.best_bid_size(), 10);
        assert!(book.check_invariants().is_ok());
    }

    #[test]
    fn test_aggregated_snapshot_and_summary() {
        let book = OrderBook::new();
        book.snapshot_aggregated(&[
            LevelSnapshotEntry {
                side: Side::Bid,
                price: Price(100),
                total_size: 40,
                order_count: Some(4),
            },
            LevelSnapshotEntry {
                side: Side::Ask,
                price: Price(101),
                total_size: 0,
                order_count: None,
            },
        ]);
        assert_eq!(book.best_bid_aggregated(), Some(Price(100)));
        assert_eq!(book.best_ask_aggregated(), None);

        assert!(book.level_summary(Side::Ask, Price(102), 7, None));
        assert_eq!(book.level_size_aggregated(Side::Ask, Price(102)), 7);
        // unchanged upsert reports no change
        assert!(!book.level_summary(Side::Ask, Price(102), 7, None));
        // zero removes
        assert!(book.level_summary(Side::Ask, Price(102), 0, None));
        assert_eq!(book.best_ask_aggregated(), None);
        assert!(book.check_invariants().is_ok());
    }

    #[test]
    fn test_synthetic_ids_per_scope() {
        let book = OrderBook::new();
        let scope = FeedScope { feed_id: 1, epoch: 0 };
        let mut o = order(0, Side::Bid, 100, 10);
        o.id = 0;
        let k1 = book.add_get_key(o, scope, true);
        let k2 = book.add_get_key(o, scope, true);
        assert!(k1.synthetic && k2.synthetic);
        assert_eq!(k1.id, 1);
        assert_eq!(k2.id, 2);
        assert_eq!(book.level_size(Side::Bid, Price(100)), 20);
    }

    #[test]
    fn test_overlapping_ids_across_feeds() {
        let book = OrderBook::new();
        let mut a = order(7, Side::Bid, 100, 10);
        a.feed_id = 1;
        let mut b = order(7, Side::Bid, 100, 20);
        b.feed_id = 2;
        book.add(a);
        book.add(b);
        assert_eq!(book.level_size(Side::Bid, Price(100)), 30);
        assert!(book.delete(a.key()));
        assert_eq!(book.level_size(Side::Bid, Price(100)), 20);
    }

    #[test]
    fn test_for_each_level_order_and_clamp() {
        let book = OrderBook::new();
        book.add(order(1, Side::Bid, 100, 1));
        book.add(order(2, Side::Bid, 99, 2));
        book.add(order(3, Side::Bid, 101, 3));
        let mut seen = Vec::new();
        book.for_each_level(Side::Bid, 10, |p, sz, _| seen.push((p.0, sz)));
        assert_eq!(seen, vec![(101, 3), (100, 1), (99, 2)]);
    }
}
