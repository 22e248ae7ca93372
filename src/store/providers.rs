//! Namespace provider registry.
//!
//! Maps a key prefix (the segment before the first `.`) to a resolver
//! function. `AtomicAccessor` uses this to compose the atomic store with live
//! `ob.*` evaluation without coupling the two.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub type ProviderFn = Arc<dyn Fn(&str, &str) -> f64 + Send + Sync>;

#[derive(Default)]
pub struct ProviderRegistry {
    map: Mutex<HashMap<String, ProviderFn>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the resolver for a namespace, e.g. "ob".
    pub fn register(&self, ns: &str, f: impl Fn(&str, &str) -> f64 + Send + Sync + 'static) {
        self.map.lock().insert(ns.to_string(), Arc::new(f));
    }

    pub fn unregister(&self, ns: &str) -> bool {
        self.map.lock().remove(ns).is_some()
    }

    /// Resolve a key of the form `<ns>.<rest>` for a symbol.
    ///
    /// The provider is cloned out of the lock and invoked outside it so one
    /// slow provider cannot block other resolutions. A panicking provider or
    /// a non-finite result resolves to `None`.
    pub fn try_resolve(&self, symbol: &str, key: &str) -> Option<f64> {
        let dot = key.find('.')?;
        let ns = &key[..dot];

        let f = self.map.lock().get(ns).cloned()?;
        let v = catch_unwind(AssertUnwindSafe(|| f(symbol, key))).ok()?;
        if v.is_nan() {
            None
        } else {
            Some(v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_by_prefix() {
        let reg = ProviderRegistry::new();
        reg.register("ob", |sym, key| {
            assert_eq!(sym, "AAPL");
            assert_eq!(key, "ob.spread");
            0.25
        });
        assert_eq!(reg.try_resolve("AAPL", "ob.spread"), Some(0.25));
        assert_eq!(reg.try_resolve("AAPL", "ta.spread"), None);
        assert_eq!(reg.try_resolve("AAPL", "nodots"), None);
    }

    #[test]
    fn test_panicking_provider_is_unresolved() {
        let reg = ProviderRegistry::new();
        reg.register("bad", |_, _| panic!("provider bug"));
        assert_eq!(reg.try_resolve("S", "bad.key"), None);
    }

    #[test]
    fn test_nan_is_unresolved() {
        let reg = ProviderRegistry::new();
        reg.register("ob", |_, _| f64::NAN);
        assert_eq!(reg.try_resolve("S", "ob.mid"), None);
    }

    #[test]
    fn test_unregister() {
        let reg = ProviderRegistry::new();
        reg.register("ob", |_, _| 1.0);
        assert!(reg.unregister("ob"));
        assert!(!reg.unregister("ob"));
        assert_eq!(reg.try_resolve("S", "ob.mid"), None);
    }
}
