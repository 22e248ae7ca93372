//! Captured order-book views evaluated by the key language.

use crate::book::key::Mode;

/// One price level. `orders` and `notional` are NaN when the view cannot
/// know them (aggregated feeds without counts).
#[derive(Debug, Clone, Copy)]
pub struct Level {
    pub price: f64,
    pub size: f64,
    pub orders: f64,
    pub notional: f64,
}

impl Level {
    pub fn new(price: f64, size: f64, orders: Option<u32>) -> Self {
        Self {
            price,
            size,
            orders: orders.map_or(f64::NAN, f64::from),
            notional: price * size,
        }
    }
}

/// Ordered best → worse.
#[derive(Debug, Clone, Default)]
pub struct Ladder {
    pub levels: Vec<Level>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Meta {
    pub seq: u64,
    pub epoch: u32,
    pub stale: bool,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub last_change_ms: i64,
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub bids: Ladder,
    pub asks: Ladder,
    pub meta: Meta,
}

/// Glue from a live book to capture-able snapshots; the manager implements
/// this once, and the evaluator/materializer stay decoupled from book types.
pub trait SnapshotSource: Send + Sync {
    /// Capture a view. When `price_band` is set the implementor may scan the
    /// band only; `max_levels` is a hint in that case.
    fn capture(
        &self,
        symbol: &str,
        max_levels: usize,
        mode: Mode,
        price_band: Option<(f64, f64)>,
    ) -> Snapshot;

    fn tick_size(&self, symbol: &str) -> f64;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Snapshot literal for evaluator tests: (price, size, orders) per level.
    pub fn snap(bids: &[(f64, f64, u32)], asks: &[(f64, f64, u32)]) -> Snapshot {
        let mk = |xs: &[(f64, f64, u32)]| Ladder {
            levels: xs
                .iter()
                .map(|&(p, s, o)| Level::new(p, s, Some(o)))
                .collect(),
        };
        let mut s = Snapshot {
            bids: mk(bids),
            asks: mk(asks),
            meta: Meta::default(),
        };
        s.meta.bid_levels = s.bids.levels.len();
        s.meta.ask_levels = s.asks.levels.len();
        s
    }
}
