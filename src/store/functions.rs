//! Named pure functions `&[f64] -> f64` evaluated by the dispatcher on every
//! new sample of a (symbol, field) history.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub type AtomicFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("function not found: {0}")]
    NotFound(String),
}

/// Constructed once at startup and threaded through the dispatcher; tests can
/// instantiate independent registries in parallel.
#[derive(Default)]
pub struct FunctionRegistry {
    map: RwLock<HashMap<String, AtomicFn>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in reducers.
    pub fn with_builtins() -> Self {
        let reg = Self::new();
        reg.register("mean", |xs| {
            if xs.is_empty() {
                f64::NAN
            } else {
                xs.iter().sum::<f64>() / xs.len() as f64
            }
        });
        reg.register("sum", |xs| xs.iter().sum());
        reg.register("min", |xs| xs.iter().copied().fold(f64::NAN, f64::min));
        reg.register("max", |xs| xs.iter().copied().fold(f64::NAN, f64::max));
        reg.register("last", |xs| xs.last().copied().unwrap_or(f64::NAN));
        reg.register("first", |xs| xs.first().copied().unwrap_or(f64::NAN));
        reg.register("count", |xs| xs.len() as f64);
        reg.register("stddev", |xs| {
            if xs.is_empty() {
                return f64::NAN;
            }
            let mean = xs.iter().sum::<f64>() / xs.len() as f64;
            let var = xs.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / xs.len() as f64;
            var.sqrt()
        });
        reg
    }

    /// Register or replace.
    pub fn register(&self, name: &str, f: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) {
        self.map.write().insert(name.to_string(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Result<AtomicFn, RegistryError> {
        self.map
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Copy of all (name, fn) pairs; safe to iterate without holding the lock.
    pub fn snapshot(&self) -> Vec<(String, AtomicFn)> {
        self.map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins() {
        let reg = FunctionRegistry::with_builtins();
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert_eq!((reg.get("mean").unwrap())(&xs), 2.5);
        assert_eq!((reg.get("sum").unwrap())(&xs), 10.0);
        assert_eq!((reg.get("min").unwrap())(&xs), 1.0);
        assert_eq!((reg.get("max").unwrap())(&xs), 4.0);
        assert_eq!((reg.get("last").unwrap())(&xs), 4.0);
        assert_eq!((reg.get("first").unwrap())(&xs), 1.0);
        assert_eq!((reg.get("count").unwrap())(&xs), 4.0);
        let sd = (reg.get("stddev").unwrap())(&xs);
        assert!((sd - 1.118033988749895).abs() < 1e-12);
    }

    #[test]
    fn test_register_overwrites() {
        let reg = FunctionRegistry::new();
        reg.register("f", |_| 1.0);
        reg.register("f", |_| 2.0);
        assert_eq!((reg.get("f").unwrap())(&[]), 2.0);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let reg = FunctionRegistry::new();
        match reg.get("nope") {
            Err(e) => assert_eq!(e, RegistryError::NotFound("nope".to_string())),
            Ok(_) => panic!("expected NotFound error"),
        }
    }

    #[test]
    fn test_snapshot_is_detached() {
        let reg = FunctionRegistry::with_builtins();
        let snap = reg.snapshot();
        reg.register("extra", |_| 0.0);
        assert_eq!(snap.len(), 8);
    }
}
