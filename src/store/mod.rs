//! Shared state: the atomic (symbol, field) → value store, raw tick
//! histories, the per-field function registry, and the namespace provider
//! registry that resolves symbolic keys (e.g. `ob.*`) to live values.

pub mod atomic_store;
pub mod functions;
pub mod history;
pub mod providers;

pub use atomic_store::AtomicStore;
pub use functions::{AtomicFn, FunctionRegistry, RegistryError};
pub use history::HistoryStore;
pub use providers::ProviderRegistry;
