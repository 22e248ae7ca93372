//! Buffers values per symbol and replays them individually once the buffer
//! reaches its arity.

use crate::models::SymbolValue;
use crate::nodes::Node;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Aggregate {
    arity: usize,
    buffer: Mutex<HashMap<String, Vec<SymbolValue>>>,
    downstream: Mutex<Option<Arc<dyn Node>>>,
    stopping: AtomicBool,
}

impl Aggregate {
    pub fn new(arity: usize, downstream: Arc<dyn Node>) -> Arc<Self> {
        Arc::new(Self {
            arity: arity.max(1),
            buffer: Mutex::new(HashMap::new()),
            downstream: Mutex::new(Some(downstream)),
            stopping: AtomicBool::new(false),
        })
    }
}

impl Node for Aggregate {
    fn on_value(&self, sv: &SymbolValue) {
        if self.stopping.load(Ordering::Acquire) {
            return;
        }

        let batch = {
            let mut buffer = self.buffer.lock();
            let acc = buffer.entry(sv.symbol.clone()).or_default();
            acc.push(sv.clone());
            if acc.len() < self.arity {
                return;
            }
            std::mem::take(acc)
        };

        let down = self.downstream.lock().clone();
        if let Some(down) = down {
            for v in &batch {
                down.on_value(v);
            }
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
    use crate::models::Value;

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

    #[test]
    fn test_replays_buffered_values_at_arity() {
        let sink = Sink::new();
        let agg = Aggregate::new(3, sink.clone());
        agg.on_value(&SymbolValue::new("S", 1.0));
        agg.on_value(&SymbolValue::new("S", 2.0));
        assert!(sink.seen.lock().is_empty());
        agg.on_value(&SymbolValue::new("S", 3.0));

        let seen = sink.seen.lock();
        assert_eq!(seen.len(), 3);
        let vals: Vec<f64> = seen.iter().filter_map(|sv| sv.value.as_f64()).collect();
        assert_eq!(vals, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_resets_after_replay() {
        let sink = Sink::new();
        let agg = Aggregate::new(2, sink.clone());
        for i in 0..5 {
            agg.on_value(&SymbolValue::new("S", i as f64));
        }
        // two complete rounds replayed, the fifth value still buffered
        assert_eq!(sink.seen.lock().len(), 4);
    }

    #[test]
    fn test_per_symbol_buffers() {
        let sink = Sink::new();
        let agg = Aggregate::new(2, sink.clone());
        agg.on_value(&SymbolValue::new("A", 1.0));
        agg.on_value(&SymbolValue::new("B", 2.0));
        assert!(sink.seen.lock().is_empty());
        agg.on_value(&SymbolValue::new("B", Value::Double(3.0)));
        let seen = sink.seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|sv| sv.symbol == "B"));
    }

    #[test]
    fn test_shutdown_idempotent() {
        let sink = Sink::new();
        let agg = Aggregate::new(1, sink.clone());
        agg.shutdown();
        agg.shutdown();
        agg.on_value(&SymbolValue::new("S", 1.0));
        assert!(sink.seen.lock().is_empty());
    }
}
