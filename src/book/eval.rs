//! Evaluation of parsed `ob.*` keys against a captured snapshot.
//!
//! Level indices clamp to the available depth; empty ladders make
//! best/mid/spread NaN rather than an error; imbalance with a non-positive
//! denominator is 0.

use crate::book::key::{LevelRange, Metric, ObKey, Reduce, Target};
use crate::book::snapshot::{Ladder, Level, Snapshot};
use crate::book::types::Side;

fn by_side(s: &Snapshot, side: Side) -> &Ladder {
    match side {
        Side::Bid => &s.bids,
        Side::Ask => &s.asks,
    }
}

fn attr(level: &Level, t: Target) -> f64 {
    match t {
        Target::Price => level.price,
        Target::Size => level.size,
        Target::Orders => level.orders,
        Target::Notional => level.notional,
    }
}

pub fn best_price(s: &Snapshot, side: Side) -> f64 {
    by_side(s, side)
        .levels
        .first()
        .map_or(f64::NAN, |l| l.price)
}

pub fn best_size(s: &Snapshot, side: Side) -> f64 {
    by_side(s, side).levels.first().map_or(f64::NAN, |l| l.size)
}

pub fn spread(s: &Snapshot) -> f64 {
    match (s.bids.levels.first(), s.asks.levels.first()) {
        (Some(b), Some(a)) => a.price - b.price,
        _ => f64::NAN,
    }
}

pub fn mid(s: &Snapshot) -> f64 {
    match (s.bids.levels.first(), s.asks.levels.first()) {
        (Some(b), Some(a)) => 0.5 * (a.price + b.price),
        _ => f64::NAN,
    }
}

/// 1-based level lookup, clamped to the last available level.
pub fn level_idx(s: &Snapshot, side: Side, n: usize, t: Target) -> f64 {
    let levels = &by_side(s, side).levels;
    if levels.is_empty() || n == 0 {
        return f64::NAN;
    }
    let idx = n.min(levels.len()) - 1;
    attr(&levels[idx], t)
}

/// Attribute of the level at an exact price. Absent levels read as empty:
/// size/orders/notional are 0, price is NaN.
pub fn level_px(s: &Snapshot, side: Side, px: f64, t: Target) -> f64 {
    let found = by_side(s, side)
        .levels
        .iter()
        .find(|l| (l.price - px).abs() < 1e-9);
    match (found, t) {
        (Some(l), t) => attr(l, t),
        (None, Target::Price) => f64::NAN,
        (None, _) => 0.0,
    }
}

/// Sum of a target over the best `n` levels; an empty book sums to 0.
pub fn cum_levels(s: &Snapshot, side: Side, n: usize, t: Target) -> f64 {
    by_side(s, side)
        .levels
        .iter()
        .take(n)
        .map(|l| attr(l, t))
        .sum()
}

fn range_rows<'a>(ladder: &'a Ladder, lv: LevelRange) -> &'a [Level] {
    let len = ladder.levels.len();
    let lo = lv.a.saturating_sub(1).min(len);
    let hi = lv.b.min(len);
    if lo >= hi {
        &[]
    } else {
        &ladder.levels[lo..hi]
    }
}

fn band_rows(ladder: &Ladder, p1: f64, p2: f64) -> Vec<Level> {
    ladder
        .levels
        .iter()
        .copied()
        .filter(|l| l.price >= p1 && l.price <= p2)
        .collect()
}

fn vwap_of(rows: &[Level]) -> (f64, f64) {
    let mut qsum = 0.0;
    let mut pxq = 0.0;
    for l in rows {
        qsum += l.size;
        pxq += l.price * l.size;
    }
    (pxq, qsum)
}

/// VWAP over a 1-based level range; zero quantity in range yields 0.
pub fn vwap_levels(s: &Snapshot, side: Side, lv: LevelRange) -> f64 {
    let (pxq, qsum) = vwap_of(range_rows(by_side(s, side), lv));
    if qsum > 0.0 {
        pxq / qsum
    } else {
        0.0
    }
}

/// VWAP over a price band; a band with no matching levels is NaN.
pub fn vwap_band(s: &Snapshot, side: Side, p1: f64, p2: f64) -> f64 {
    let rows = band_rows(by_side(s, side), p1, p2);
    if rows.is_empty() {
        return f64::NAN;
    }
    let (pxq, qsum) = vwap_of(&rows);
    if qsum > 0.0 {
        pxq / qsum
    } else {
        f64::NAN
    }
}

/// `(bid_q - ask_q) / (bid_q + ask_q)` with both sides restricted to the same
/// level range; denominator <= 0 yields 0.
pub fn imbalance_levels(s: &Snapshot, lv: LevelRange) -> f64 {
    let b: f64 = range_rows(&s.bids, lv).iter().map(|l| l.size).sum();
    let a: f64 = range_rows(&s.asks, lv).iter().map(|l| l.size).sum();
    let den = b + a;
    if den <= 0.0 {
        0.0
    } else {
        (b - a) / den
    }
}

/// Imbalance restricted to a price band on both sides.
pub fn imbalance_band(s: &Snapshot, p1: f64, p2: f64) -> f64 {
    let b: f64 = band_rows(&s.bids, p1, p2).iter().map(|l| l.size).sum();
    let a: f64 = band_rows(&s.asks, p1, p2).iter().map(|l| l.size).sum();
    let den = b + a;
    if den <= 0.0 {
        0.0
    } else {
        (b - a) / den
    }
}

fn reduce_rows(rows: &[Level], reduce: Reduce, target: Option<Target>) -> f64 {
    match reduce {
        Reduce::Count => rows.len() as f64,
        Reduce::Sum => rows
            .iter()
            .map(|l| target.map_or(f64::NAN, |t| attr(l, t)))
            .sum(),
        Reduce::Avg => {
            if rows.is_empty() {
                f64::NAN
            } else {
                rows.iter()
                    .map(|l| target.map_or(f64::NAN, |t| attr(l, t)))
                    .sum::<f64>()
                    / rows.len() as f64
            }
        }
        Reduce::Min => rows
            .iter()
            .map(|l| target.map_or(f64::NAN, |t| attr(l, t)))
            .fold(f64::NAN, f64::min),
        Reduce::Max => rows
            .iter()
            .map(|l| target.map_or(f64::NAN, |t| attr(l, t)))
            .fold(f64::NAN, f64::max),
    }
}

pub fn meta(s: &Snapshot, field: &str) -> f64 {
    match field {
        "seq" => s.meta.seq as f64,
        "epoch" => f64::from(s.meta.epoch),
        "is_stale" => {
            if s.meta.stale {
                1.0
            } else {
                0.0
            }
        }
        "last_change_ms" => s.meta.last_change_ms as f64,
        "levels.bid" => s.meta.bid_levels as f64,
        "levels.ask" => s.meta.ask_levels as f64,
        _ => f64::NAN,
    }
}

/// Core entry: evaluate one key against one snapshot.
pub fn eval(s: &Snapshot, k: &ObKey) -> f64 {
    match &k.metric {
        Metric::Spread => spread(s),
        Metric::Mid => mid(s),
        Metric::Best { side, attr: t } => match t {
            Target::Price => best_price(s, *side),
            _ => best_size(s, *side),
        },
        Metric::LevelIdx { side, n, attr } => level_idx(s, *side, *n, *attr),
        Metric::LevelPx { side, px, attr } => level_px(s, *side, *px, *attr),
        Metric::Cum { side, n, target } => cum_levels(s, *side, *n, *target),
        Metric::VwapLevels { side, lv } => vwap_levels(s, *side, *lv),
        Metric::VwapBand { side, p1, p2 } => vwap_band(s, *side, *p1, *p2),
        Metric::ImbalanceLevels { lv } => imbalance_levels(s, *lv),
        Metric::ImbalanceBand { p1, p2 } => imbalance_band(s, *p1, *p2),
        Metric::RangeIdx {
            side,
            lv,
            reduce,
            target,
        } => reduce_rows(range_rows(by_side(s, *side), *lv), *reduce, *target),
        Metric::RangePx {
            side,
            p1,
            p2,
            reduce,
            target,
        } => reduce_rows(&band_rows(by_side(s, *side), *p1, *p2), *reduce, *target),
        Metric::Meta { field } => meta(s, field),
    }
}
