//! Pure indicator kernels over price/volume series.
//!
//! Every function returns `None` when its precondition on the series length
//! is not met; the computer turns `None` into an omitted key.

/// Arithmetic mean of the last `n` values.
pub fn sma_last_n(xs: &[f64], n: usize) -> Option<f64> {
    if n == 0 || xs.len() < n {
        return None;
    }
    Some(xs[xs.len() - n..].iter().sum::<f64>() / n as f64)
}

pub fn min_last_n(xs: &[f64], n: usize) -> Option<f64> {
    if n == 0 || xs.len() < n {
        return None;
    }
    xs[xs.len() - n..]
        .iter()
        .copied()
        .fold(None, |acc: Option<f64>, x| {
            Some(acc.map_or(x, |a| a.min(x)))
        })
}

pub fn max_last_n(xs: &[f64], n: usize) -> Option<f64> {
    if n == 0 || xs.len() < n {
        return None;
    }
    xs[xs.len() - n..]
        .iter()
        .copied()
        .fold(None, |acc: Option<f64>, x| {
            Some(acc.map_or(x, |a| a.max(x)))
        })
}

/// Population standard deviation of the last `n` values.
pub fn stddev_last_n(xs: &[f64], n: usize) -> Option<f64> {
    let mean = sma_last_n(xs, n)?;
    let tail = &xs[xs.len() - n..];
    let var = tail.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n as f64;
    Some(var.sqrt())
}

pub fn median_last_n(xs: &[f64], n: usize) -> Option<f64> {
    if n == 0 || xs.len() < n {
        return None;
    }
    let mut tail: Vec<f64> = xs[xs.len() - n..].to_vec();
    tail.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(if n % 2 == 1 {
        tail[n / 2]
    } else {
        0.5 * (tail[n / 2 - 1] + tail[n / 2])
    })
}

/// EMA over the whole series: seeded with the SMA of the first `k` samples,
/// then iterated with alpha = 2/(k+1).
pub fn ema(xs: &[f64], k: usize) -> Option<f64> {
    if k == 0 || xs.len() < k {
        return None;
    }
    let alpha = 2.0 / (k as f64 + 1.0);
    let mut val = xs[..k].iter().sum::<f64>() / k as f64;
    for x in &xs[k..] {
        val = alpha * x + (1.0 - alpha) * val;
    }
    Some(val)
}

/// EMA value at every index from `k-1` to the end (prefix EMAs). Used to
/// derive the MACD line series.
fn ema_series(xs: &[f64], k: usize) -> Option<Vec<f64>> {
    if k == 0 || xs.len() < k {
        return None;
    }
    let alpha = 2.0 / (k as f64 + 1.0);
    let mut out = Vec::with_capacity(xs.len() - k + 1);
    let mut val = xs[..k].iter().sum::<f64>() / k as f64;
    out.push(val);
    for x in &xs[k..] {
        val = alpha * x + (1.0 - alpha) * val;
        out.push(val);
    }
    Some(out)
}

/// MACD line (`ema_fast - ema_slow`) and its signal (`signal_k`-EMA of the
/// line series). The signal needs at least `signal_k` line points.
pub fn macd(
    xs: &[f64],
    fast: usize,
    slow: usize,
    signal_k: usize,
) -> (Option<f64>, Option<f64>) {
    let (Some(fast_series), Some(slow_series)) = (ema_series(xs, fast), ema_series(xs, slow))
    else {
        return (None, None);
    };
    // Align both series on the indices where the slow EMA exists.
    let skip = slow.saturating_sub(fast);
    let line: Vec<f64> = fast_series[skip..]
        .iter()
        .zip(slow_series.iter())
        .map(|(f, s)| f - s)
        .collect();
    let last_line = line.last().copied();
    let signal = ema(&line, signal_k);
    (last_line, signal)
}

/// Simple-average RSI over the last `period` deltas. A zero average loss
/// substitutes a small epsilon (documented in tests).
pub fn rsi(xs: &[f64], period: usize) -> Option<f64> {
    if period == 0 || xs.len() < period + 1 {
        return None;
    }
    let mut gain = 0.0;
    let mut loss = 0.0;
    for i in xs.len() - period..xs.len() {
        let d = xs[i] - xs[i - 1];
        if d > 0.0 {
            gain += d;
        } else {
            loss += -d;
        }
    }
    let rs = gain / if loss > 0.0 { loss } else { 1e-6 };
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// Mean absolute successive difference over the last `period` deltas.
pub fn atr(xs: &[f64], period: usize) -> Option<f64> {
    if period == 0 || xs.len() < period + 1 {
        return None;
    }
    let mut sum = 0.0;
    for i in xs.len() - period..xs.len() {
        sum += (xs[i] - xs[i - 1]).abs();
    }
    Some(sum / period as f64)
}

/// Volume-weighted average price over the last `n` (price, volume) pairs.
/// Returns 0 when total volume is not positive (per the derived-key table).
pub fn vwap(prices: &[f64], volumes: &[f64], n: usize) -> Option<f64> {
    if n == 0 || prices.len() < n || volumes.len() < n {
        return None;
    }
    let p = &prices[prices.len() - n..];
    let v = &volumes[volumes.len() - n..];
    let pv: f64 = p.iter().zip(v.iter()).map(|(p, v)| p * v).sum();
    let vol: f64 = v.iter().sum();
    Some(if vol > 0.0 { pv / vol } else { 0.0 })
}

/// Cumulative signed volume by price direction, from the second sample on.
pub fn obv(prices: &[f64], volumes: &[f64]) -> Option<f64> {
    if prices.len() < 2 || volumes.len() != prices.len() {
        return None;
    }
    let mut acc = 0.0;
    for i in 1..prices.len() {
        if prices[i] > prices[i - 1] {
            acc += volumes[i];
        } else if prices[i] < prices[i - 1] {
            acc -= volumes[i];
        }
    }
    Some(acc)
}
