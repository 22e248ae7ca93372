//! Terminal node: hands results to the session's send callback.

use crate::models::SymbolValue;
use crate::nodes::Node;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::error;

pub type SendFn = Arc<dyn Fn(&str, &SymbolValue) -> anyhow::Result<()> + Send + Sync>;

pub struct Responder {
    send: Mutex<Option<SendFn>>,
    key: String,
    stopped: AtomicBool,
}

impl Responder {
    pub fn new(send: SendFn, key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            send: Mutex::new(Some(send)),
            key: key.into(),
            stopped: AtomicBool::new(false),
        })
    }
}

impl Node for Responder {
    fn on_value(&self, sv: &SymbolValue) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        // clone the callback out of the lock; send runs outside it
        let Some(send) = self.send.lock().clone() else {
            return;
        };
        if let Err(e) = send(&self.key, sv) {
            error!(key = %self.key, symbol = %sv.symbol, error = %e, "responder send failed");
        }
    }

    fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        *self.send.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;

    #[test]
    fn test_sends_with_key() {
        let seen: Arc<Mutex<Vec<(String, SymbolValue)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let r = Responder::new(
            Arc::new(move |key: &str, sv: &SymbolValue| {
                sink.lock().push((key.to_string(), sv.clone()));
                Ok(())
            }),
            "42",
        );
        r.on_value(&SymbolValue::new("S", 1.5));
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "42");
        assert_eq!(seen[0].1.value, Value::Double(1.5));
    }

    #[test]
    fn test_shutdown_releases_callback() {
        let count = Arc::new(Mutex::new(0u32));
        let c = count.clone();
        let r = Responder::new(
            Arc::new(move |_: &str, _: &SymbolValue| {
                *c.lock() += 1;
                Ok(())
            }),
            "k",
        );
        r.on_value(&SymbolValue::new("S", 1.0));
        r.shutdown();
        r.shutdown();
        r.on_value(&SymbolValue::new("S", 2.0));
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_send_error_is_swallowed() {
        let r = Responder::new(
            Arc::new(|_: &str, _: &SymbolValue| anyhow::bail!("session gone")),
            "k",
        );
        // must not panic or propagate
        r.on_value(&SymbolValue::new("S", 1.0));
    }
}
