//! Routes each symbol to its own lazily created child graph.
//!
//! The wildcard symbol (interval ticks) fans out to every existing child and
//! never creates one.

use crate::models::{SymbolValue, WILDCARD_SYMBOL};
use crate::nodes::Node;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type ChildFactory = Arc<dyn Fn(&str) -> Option<Arc<dyn Node>> + Send + Sync>;

pub struct SymbolSplit {
    factory: ChildFactory,
    children: Mutex<HashMap<String, Arc<dyn Node>>>,
    stopping: AtomicBool,
}

impl SymbolSplit {
    pub fn new(factory: ChildFactory) -> Arc<Self> {
        Arc::new(Self {
            factory,
            children: Mutex::new(HashMap::new()),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }
}

impl Node for SymbolSplit {
    fn on_value(&self, sv: &SymbolValue) {
        if self.stopping.load(Ordering::Acquire) {
            return;
        }

        if sv.symbol == WILDCARD_SYMBOL {
            let children: Vec<Arc<dyn Node>> =
                self.children.lock().values().cloned().collect();
            for child in children {
                child.on_value(sv);
            }
            return;
        }

        let child = {
            let mut children = self.children.lock();
            match children.get(&sv.symbol) {
                Some(c) => Some(c.clone()),
                None => match (self.factory)(&sv.symbol) {
                    Some(c) => {
                        children.insert(sv.symbol.clone(), c.clone());
                        Some(c)
                    }
                    None => None,
                },
            }
        };
        if let Some(child) = child {
            child.on_value(sv);
        }
    }

    fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        let children = std::mem::take(&mut *self.children.lock());
        for child in children.into_values() {
            child.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct Sink {
        seen: Mutex<Vec<SymbolValue>>,
        shutdowns: AtomicU64,
    }

    impl Sink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                shutdowns: AtomicU64::new(0),
            })
        }
    }

    impl Node for Sink {
        fn on_value(&self, sv: &SymbolValue) {
            self.seen.lock().push(sv.clone());
        }
        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_lazy_child_per_symbol() {
        let sinks: Arc<Mutex<HashMap<String, Arc<Sink>>>> = Arc::new(Mutex::new(HashMap::new()));
        let sinks2 = sinks.clone();
        let split = SymbolSplit::new(Arc::new(move |symbol: &str| {
            let sink = Sink::new();
            sinks2.lock().insert(symbol.to_string(), sink.clone());
            Some(sink as Arc<dyn Node>)
        }));

        split.on_value(&SymbolValue::new("A", 1.0));
        split.on_value(&SymbolValue::new("B", 2.0));
        split.on_value(&SymbolValue::new("A", 3.0));

        assert_eq!(split.child_count(), 2);
        let sinks = sinks.lock();
        assert_eq!(sinks["A"].seen.lock().len(), 2);
        assert_eq!(sinks["B"].seen.lock().len(), 1);
    }

    #[test]
    fn test_wildcard_fans_to_existing_children_only() {
        let created = Arc::new(AtomicU64::new(0));
        let sink = Sink::new();
        let c = created.clone();
        let s = sink.clone();
        let split = SymbolSplit::new(Arc::new(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
            Some(s.clone() as Arc<dyn Node>)
        }));

        split.on_value(&SymbolValue::new("A", 1.0));
        split.on_value(&SymbolValue::new(WILDCARD_SYMBOL, 0));
        // the wildcard reached the existing child but created none
        assert_eq!(created.load(Ordering::Relaxed), 1);
        assert_eq!(split.child_count(), 1);
        assert_eq!(sink.seen.lock().len(), 2);
    }

    #[test]
    fn test_null_factory_result_is_skipped() {
        let split = SymbolSplit::new(Arc::new(|_| None));
        split.on_value(&SymbolValue::new("A", 1.0));
        assert_eq!(split.child_count(), 0);
    }

    #[test]
    fn test_shutdown_fans_out() {
        let sink = Sink::new();
        let s = sink.clone();
        let split = SymbolSplit::new(Arc::new(move |_| Some(s.clone() as Arc<dyn Node>)));
        split.on_value(&SymbolValue::new("A", 1.0));
        split.on_value(&SymbolValue::new("B", 1.0));
        split.shutdown();
        split.shutdown();
        // both children share one sink: two shutdown fan-outs, once
        assert_eq!(sink.shutdowns.load(Ordering::Relaxed), 2);
        assert_eq!(split.child_count(), 0);
    }
}
