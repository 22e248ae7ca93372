//! Real-time market-data compute server.
//!
//! Feeds stream ticks and L2 book events in; per-symbol histories and order
//! books stay hot; derived quantities recompute continuously; clients
//! subscribe over WebSocket with declarative processing graphs and receive
//! updates until they cancel or disconnect.

pub mod book;
pub mod config;
pub mod dispatch;
pub mod metrics;
pub mod models;
pub mod nodes;
pub mod rt;
pub mod server;
pub mod store;
pub mod ta;
pub mod tree;
