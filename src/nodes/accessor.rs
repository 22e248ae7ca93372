//! Pulls a named value for its configured symbol on every trigger.
//!
//! The incoming value is ignored; it is only the trigger (a raw tick, an
//! interval firing). The atomic store wins; on a store miss the namespace
//! provider registry is consulted; a double miss is silent.

use crate::models::{SymbolValue, Value};
use crate::nodes::Node;
use crate::store::{AtomicStore, ProviderRegistry};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct AtomicAccessor {
    symbol: String,
    field: String,
    store: Arc<AtomicStore>,
    providers: Arc<ProviderRegistry>,
    downstream: Mutex<Option<Arc<dyn Node>>>,
    stopping: AtomicBool,
}

impl AtomicAccessor {
    pub fn new(
        symbol: impl Into<String>,
        field: impl Into<String>,
        store: Arc<AtomicStore>,
        providers: Arc<ProviderRegistry>,
        downstream: Arc<dyn Node>,
    ) -> Arc<Self> {
        Arc::new(Self {
            symbol: symbol.into(),
            field: field.into(),
            store,
            providers,
            downstream: Mutex::new(Some(downstream)),
            stopping: AtomicBool::new(false),
        })
    }
}

impl Node for AtomicAccessor {
    fn on_value(&self, _trigger: &SymbolValue) {
        if self.stopping.load(Ordering::Acquire) {
            return;
        }

        let value = self.store.get(&self.symbol, &self.field).or_else(|| {
            self.providers
                .try_resolve(&self.symbol, &self.field)
                .map(Value::Double)
        });
        let Some(value) = value else {
            return;
        };

        let down = self.downstream.lock().clone();
        if let Some(down) = down {
            down.on_value(&SymbolValue {
                symbol: self.symbol.clone(),
                value,
            });
        }
    }

    fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(down) = self.downstream.lock().take() {
            down.shutdown();
        }
    }
}
