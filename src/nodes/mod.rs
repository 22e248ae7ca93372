//! Processing nodes: the vertices of a request's compute graph.
//!
//! Ownership runs downstream: a node owns the nodes it feeds, the dispatcher
//! holds only weak handles to registered listeners, and `shutdown` releases
//! the downstream reference so a cancelled graph becomes collectable.
//! `shutdown` is idempotent and safe from any thread; nodes tolerate one
//! delivery after shutdown (already-posted pool tasks).

use crate::models::SymbolValue;

mod accessor;
mod aggregate;
mod interval;
mod listener;
mod responder;
mod symbol_split;
mod worker;

pub use accessor::AtomicAccessor;
pub use aggregate::Aggregate;
pub use interval::Interval;
pub use listener::Listener;
pub use responder::{Responder, SendFn};
pub use symbol_split::SymbolSplit;
pub use worker::{Worker, WorkerFn};

pub trait Node: Send + Sync {
    fn on_value(&self, sv: &SymbolValue);
    fn shutdown(&self);
}
