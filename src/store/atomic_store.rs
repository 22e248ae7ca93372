//! Thread-safe (symbol, field) → value map.
//!
//! A reader observes either the previous or the new value of a field, never a
//! torn one. No field enumeration is exposed; consumers ask for what they
//! know about.

use crate::models::Value;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct AtomicStore {
    data: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl AtomicStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, symbol: &str, field: &str, value: Value) {
        let mut data = self.data.write();
        data.entry(symbol.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    /// Insert many fields for one symbol under a single writer pass.
    pub fn set_batch(&self, symbol: &str, fields: Vec<(String, Value)>) {
        if fields.is_empty() {
            return;
        }
        let mut data = self.data.write();
        let map = data.entry(symbol.to_string()).or_default();
        for (field, value) in fields {
            map.insert(field, value);
        }
    }

    pub fn get(&self, symbol: &str, field: &str) -> Option<Value> {
        self.data.read().get(symbol)?.get(field).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_last_writer_wins() {
        let store = AtomicStore::new();
        store.set("AAPL", "lastPrice", Value::Double(1.0));
        store.set("AAPL", "lastPrice", Value::Double(2.0));
        assert_eq!(store.get("AAPL", "lastPrice"), Some(Value::Double(2.0)));
        assert_eq!(store.get("AAPL", "missing"), None);
        assert_eq!(store.get("MSFT", "lastPrice"), None);
    }

    #[test]
    fn test_set_batch() {
        let store = AtomicStore::new();
        store.set_batch(
            "AAPL",
            vec![
                ("a".to_string(), Value::Int(1)),
                ("b".to_string(), Value::Int(2)),
            ],
        );
        assert_eq!(store.get("AAPL", "a"), Some(Value::Int(1)));
        assert_eq!(store.get("AAPL", "b"), Some(Value::Int(2)));
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        use std::sync::Arc;
        let store = Arc::new(AtomicStore::new());
        let w = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    store.set("S", "f", Value::Int(i));
                }
            })
        };
        for _ in 0..1000 {
            if let Some(Value::Int(i)) = store.get("S", "f") {
                assert!((0..1000).contains(&i));
            }
        }
        w.join().unwrap();
    }
}
