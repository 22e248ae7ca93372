//! Order-book value types.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

/// Trade aggressor; `Unknown` lets the book infer from top-of-book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggressor {
    Unknown,
    Buy,
    Sell,
}

/// Integer tick count. All prices inside the book are quantized; floating
/// point exists only at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Price(pub i64);

/// Feed scoping carried on every order so ids may overlap across feeds and
/// across session resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedScope {
    pub feed_id: u32,
    pub epoch: u32,
}

/// Uniqueness of live orders is over the whole key, not the raw id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OrderKey {
    pub id: u64,
    pub feed_id: u32,
    pub epoch: u32,
    pub synthetic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub id: u64,
    pub side: Side,
    pub price: Price,
    pub size: u64,
    /// Receive sequence or venue timestamp; changing it moves the order to
    /// the back of its level.
    pub priority: u64,
    pub feed_id: u32,
    pub epoch: u32,
    pub synthetic: bool,
}

impl Order {
    pub fn key(&self) -> OrderKey {
        OrderKey {
            id: self.id,
            feed_id: self.feed_id,
            epoch: self.epoch,
            synthetic: self.synthetic,
        }
    }
}

/// One aggregated-ladder entry in a snapshot message (prices already in
/// ticks).
#[derive(Debug, Clone, Copy)]
pub struct LevelSnapshotEntry {
    pub side: Side,
    pub price: Price,
    pub total_size: u64,
    pub order_count: Option<u32>,
}
