//! Applies a function to per-symbol accumulated values.
//!
//! Trigger policy: once the per-symbol accumulator reaches `arity` values
//! (default 1, i.e. every input) the function is applied to the accumulated
//! values, the result forwarded, and the accumulator cleared for that
//! symbol.

use crate::models::{SymbolValue, Value};
use crate::nodes::Node;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type WorkerFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

pub struct Worker {
    f: WorkerFn,
    arity: usize,
    buffer: Mutex<HashMap<String, Vec<Value>>>,
    downstream: Mutex<Option<Arc<dyn Node>>>,
    stopping: AtomicBool,
}

impl Worker {
    pub fn new(f: WorkerFn, arity: usize, downstream: Arc<dyn Node>) -> Arc<Self> {
        Arc::new(Self {
            f,
            arity: arity.max(1),
            buffer: Mutex::new(HashMap::new()),
            downstream: Mutex::new(Some(downstream)),
            stopping: AtomicBool::new(false),
        })
    }
}

impl Node for Worker {
    fn on_value(&self, sv: &SymbolValue) {
        if self.stopping.load(Ordering::Acquire) {
            return;
        }

        let result = {
            let mut buffer = self.buffer.lock();
            let acc = buffer.entry(sv.symbol.clone()).or_default();
            acc.push(sv.value.clone());
            if acc.len() < self.arity {
                return;
            }
            let inputs = std::mem::take(acc);
            (self.f)(&inputs)
        };

        let down = self.downstream.lock().clone();
        if let Some(down) = down {
            down.on_value(&SymbolValue {
                symbol: sv.symbol.clone(),
                value: result,
            });
        }
    }

    fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        self.buffer.lock().clear();
        if let Some(down) = self.downstream.lock().take() {
            down.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sink {
        seen: Mutex<Vec<SymbolValue>>,
    }

    impl Sink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Node for Sink {
        fn on_value(&self, sv: &SymbolValue) {
            self.seen.lock().push(sv.clone());
        }
        fn shutdown(&self) {}
    }

    fn sum_fn() -> WorkerFn {
        Arc::new(|vals: &[Value]| {
            Value::Double(vals.iter().filter_map(Value::as_f64).sum())
        })
    }

    #[test]
    fn test_immediate_policy_fires_every_input() {
        let sink = Sink::new();
        let w = Worker::new(sum_fn(), 1, sink.clone());
        w.on_value(&SymbolValue::new("S", 1.0));
        w.on_value(&SymbolValue::new("S", 2.0));
        let seen = sink.seen.lock();
        assert_eq!(seen.len(), 2);
        // accumulator cleared after each application
        assert_eq!(seen[0].value, Value::Double(1.0));
        assert_eq!(seen[1].value, Value::Double(2.0));
    }

    #[test]
    fn test_arity_accumulates_then_clears() {
        let sink = Sink::new();
        let w = Worker::new(sum_fn(), 3, sink.clone());
        w.on_value(&SymbolValue::new("S", 1.0));
        w.on_value(&SymbolValue::new("S", 2.0));
        assert!(sink.seen.lock().is_empty());
        w.on_value(&SymbolValue::new("S", 3.0));
        assert_eq!(sink.seen.lock()[0].value, Value::Double(6.0));
        // next round starts fresh
        w.on_value(&SymbolValue::new("S", 10.0));
        assert_eq!(sink.seen.lock().len(), 1);
    }

    #[test]
    fn test_per_symbol_accumulators_are_independent() {
        let sink = Sink::new();
        let w = Worker::new(sum_fn(), 2, sink.clone());
        w.on_value(&SymbolValue::new("A", 1.0));
        w.on_value(&SymbolValue::new("B", 10.0));
        assert!(sink.seen.lock().is_empty());
        w.on_value(&SymbolValue::new("A", 2.0));
        let seen = sink.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].symbol, "A");
        assert_eq!(seen[0].value, Value::Double(3.0));
    }

    #[test]
    fn test_shutdown_drops_inputs() {
        let sink = Sink::new();
        let w = Worker::new(sum_fn(), 1, sink.clone());
        w.shutdown();
        w.on_value(&SymbolValue::new("S", 1.0));
        assert!(sink.seen.lock().is_empty());
    }
}
