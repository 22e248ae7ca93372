//! Resolves `ob.*` keys against live snapshot captures.
//!
//! Registered with the namespace provider registry under the `ob` prefix so
//! `AtomicAccessor` can serve order-book quantities it does not find in the
//! atomic store.

use crate::book::eval;
use crate::book::key::{self, Metric, ObKey};
use crate::book::snapshot::SnapshotSource;
use crate::store::ProviderRegistry;
use std::sync::Arc;

pub struct ObProvider {
    source: Arc<dyn SnapshotSource>,
    default_levels: usize,
}

impl ObProvider {
    pub fn new(source: Arc<dyn SnapshotSource>, default_levels: usize) -> Self {
        Self {
            source,
            default_levels: default_levels.max(1),
        }
    }

    /// Depth needed to answer a key without clamping away real levels.
    fn depth_for(&self, k: &ObKey) -> usize {
        let wanted = match &k.metric {
            Metric::Spread | Metric::Mid | Metric::Best { .. } => 1,
            Metric::LevelIdx { n, .. } | Metric::Cum { n, .. } => *n,
            Metric::VwapLevels { lv, .. }
            | Metric::ImbalanceLevels { lv }
            | Metric::RangeIdx { lv, .. } => lv.b,
            _ => self.default_levels,
        };
        wanted.max(self.default_levels)
    }

    fn band_for(k: &ObKey) -> Option<(f64, f64)> {
        match &k.metric {
            Metric::VwapBand { p1, p2, .. }
            | Metric::ImbalanceBand { p1, p2 }
            | Metric::RangePx { p1, p2, .. } => Some((*p1, *p2)),
            _ => None,
        }
    }

    /// Evaluate one key; unparseable or unavailable resolves to NaN.
    pub fn get(&self, symbol: &str, full_key: &str) -> f64 {
        let Ok(k) = key::parse(full_key) else {
            return f64::NAN;
        };
        let snap = self.source.capture(
            symbol,
            self.depth_for(&k),
            k.mode,
            Self::band_for(&k),
        );
        eval::eval(&snap, &k)
    }

    /// Install this provider under the `ob` namespace.
    pub fn install(self: Arc<Self>, registry: &ProviderRegistry) {
        let me = self.clone();
        registry.register("ob", move |symbol, key| me.get(symbol, key));
    }
}

/// The key profile materialized into the atomic store by default.
pub fn default_profile() -> Vec<String> {
    [
        "ob.best.bid.price",
        "ob.best.bid.size",
        "ob.best.ask.price",
        "ob.best.ask.size",
        "ob.spread",
        "ob.mid",
        "ob.cum.bid.levels.10.size",
        "ob.cum.ask.levels.10.size",
        "ob.imbalance.levels.1-10",
        "ob.vwap.bid.levels.1-10",
        "ob.vwap.ask.levels.1-10",
        "ob.meta.seq",
        "ob.meta.is_stale",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
