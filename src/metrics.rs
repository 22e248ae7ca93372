//! Process-wide metric registry.
//!
//! Component hot paths keep their own `AtomicU64` structs; this registry is
//! the named surface rendered at `/metrics.json` and mirrored into the
//! prometheus recorder when metrics are enabled.

use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct Counter {
    v: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, d: u64) {
        self.v.fetch_add(d, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.v.load(Ordering::Relaxed)
    }
}

/// Gauge stored as f64 bits in an AtomicU64.
#[derive(Default)]
pub struct Gauge {
    bits: AtomicU64,
}

impl Gauge {
    pub fn set(&self, x: f64) {
        self.bits.store(x.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[derive(Default)]
pub struct MetricRegistry {
    counters: Mutex<HashMap<String, Arc<Counter>>>,
    gauges: Mutex<HashMap<String, Arc<Gauge>>>,
}

impl MetricRegistry {
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        let mut m = self.counters.lock();
        m.entry(name.to_string()).or_default().clone()
    }

    pub fn gauge(&self, name: &str) -> Arc<Gauge> {
        let mut m = self.gauges.lock();
        m.entry(name.to_string()).or_default().clone()
    }

    pub fn hit(&self, name: &str) {
        self.counter(name).inc();
        metrics::counter!(name.to_string(), 1);
    }

    /// Flat JSON rendering of everything registered so far.
    pub fn snapshot_json(&self) -> serde_json::Value {
        let counters: serde_json::Map<String, serde_json::Value> = self
            .counters
            .lock()
            .iter()
            .map(|(k, c)| (k.clone(), serde_json::json!(c.get())))
            .collect();
        let gauges: serde_json::Map<String, serde_json::Value> = self
            .gauges
            .lock()
            .iter()
            .map(|(k, g)| (k.clone(), serde_json::json!(g.get())))
            .collect();
        serde_json::json!({ "counters": counters, "gauges": gauges })
    }
}

lazy_static! {
    static ref REGISTRY: MetricRegistry = MetricRegistry::default();
}

pub fn registry() -> &'static MetricRegistry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_and_gauge() {
        let reg = MetricRegistry::default();
        reg.counter("a").inc();
        reg.counter("a").add(2);
        reg.gauge("g").set(1.5);
        assert_eq!(reg.counter("a").get(), 3);
        assert_eq!(reg.gauge("g").get(), 1.5);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let reg = MetricRegistry::default();
        reg.counter("x").inc();
        reg.gauge("y").set(2.0);
        let snap = reg.snapshot_json();
        assert_eq!(snap["counters"]["x"], 1);
        assert_eq!(snap["gauges"]["y"], 2.0);
    }
}
