//! Fires a wildcard tick into its child on a fixed period.
//!
//! Scheduling rides the shared pool with timed sleeps; there is no dedicated
//! timer thread. `shutdown` stops rescheduling, though one in-flight tick
//! may still run.

use crate::models::{SymbolValue, Value, WILDCARD_SYMBOL};
use crate::nodes::Node;
use crate::rt::ThreadPool;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub const MIN_PERIOD_MS: u64 = 10;

pub struct Interval {
    period: Duration,
    child: Mutex<Option<Arc<dyn Node>>>,
    pool: Arc<ThreadPool>,
    running: AtomicBool,
    started: AtomicBool,
    weak: Weak<Interval>,
}

impl Interval {
    pub fn new(period_ms: u64, child: Arc<dyn Node>, pool: Arc<ThreadPool>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            period: Duration::from_millis(period_ms.max(MIN_PERIOD_MS)),
            child: Mutex::new(Some(child)),
            pool,
            running: AtomicBool::new(false),
            started: AtomicBool::new(false),
            weak: weak.clone(),
        })
    }

    /// Begin firing. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.running.store(true, Ordering::Release);
        self.schedule();
    }

    fn schedule(&self) {
        let Some(me) = self.weak.upgrade() else {
            return;
        };
        self.pool.post(move || me.fire_once());
    }

    fn fire_once(&self) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        std::thread::sleep(self.period);
        if !self.running.load(Ordering::Acquire) {
            return;
        }

        // a released child ends the loop even if running lags behind
        let Some(child) = self.child.lock().clone() else {
            return;
        };
        child.on_value(&SymbolValue {
            symbol: WILDCARD_SYMBOL.to_string(),
            value: Value::Int(0),
        });
        self.schedule();
    }
}

impl Node for Interval {
    /// Accepts no upstream input.
    fn on_value(&self, _sv: &SymbolValue) {}

    fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(child) = self.child.lock().take() {
            child.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Instant;

    struct Counter {
        fired: AtomicU64,
        wildcard_only: AtomicBool,
    }

    impl Counter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fired: AtomicU64::new(0),
                wildcard_only: AtomicBool::new(true),
            })
        }
    }

    impl Node for Counter {
        fn on_value(&self, sv: &SymbolValue) {
            if sv.symbol != WILDCARD_SYMBOL {
                self.wildcard_only.store(false, Ordering::Relaxed);
            }
            self.fired.fetch_add(1, Ordering::Relaxed);
        }
        fn shutdown(&self) {}
    }

    #[test]
    fn test_fires_wildcard_repeatedly() {
        let pool = Arc::new(ThreadPool::new(2));
        let counter = Counter::new();
        let interval = Interval::new(10, counter.clone(), pool.clone());
        interval.start();

        let deadline = Instant::now() + Duration::from_secs(2);
        while counter.fired.load(Ordering::Relaxed) < 3 {
            assert!(Instant::now() < deadline, "interval never fired");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(counter.wildcard_only.load(Ordering::Relaxed));
        interval.shutdown();
    }

    #[test]
    fn test_shutdown_stops_scheduling() {
        let pool = Arc::new(ThreadPool::new(2));
        let counter = Counter::new();
        let interval = Interval::new(10, counter.clone(), pool.clone());
        interval.start();

        let deadline = Instant::now() + Duration::from_secs(2);
        while counter.fired.load(Ordering::Relaxed) == 0 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }
        interval.shutdown();
        interval.shutdown();
        // one in-flight tick may still land after shutdown
        let at_stop = counter.fired.load(Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(80));
        assert!(counter.fired.load(Ordering::Relaxed) <= at_stop + 1);
    }

    #[test]
    fn test_period_floor() {
        let pool = Arc::new(ThreadPool::new(1));
        let counter = Counter::new();
        let interval = Interval::new(0, counter, pool);
        assert_eq!(interval.period, Duration::from_millis(MIN_PERIOD_MS));
    }
}
