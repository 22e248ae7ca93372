//! Per-symbol limit order books, their manager (sequencing, staleness, delta
//! publication, tick-size quantization), and the `ob.*` key language
//! evaluated against captured snapshots.

pub mod eval;
pub mod key;
pub mod manager;
pub mod materializer;
pub mod order_book;
pub mod provider;
pub mod snapshot;
pub mod types;

pub use key::{KeyError, Mode, ObKey};
pub use manager::{BookDelta, LevelDelta, OrderBookManager};
pub use order_book::OrderBook;
pub use snapshot::{Ladder, Level, Meta, Snapshot, SnapshotSource};
pub use types::{Aggressor, FeedScope, LevelSnapshotEntry, Order, OrderKey, Price, Side};
