//! Per-symbol bounded history of raw ticks.

use crate::models::TickEntry;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

pub struct HistoryStore {
    max_len: usize,
    data: RwLock<HashMap<String, VecDeque<TickEntry>>>,
}

impl HistoryStore {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Append, evicting the oldest entry once over capacity.
    pub fn push(&self, symbol: &str, entry: TickEntry) {
        let mut data = self.data.write();
        let hist = data.entry(symbol.to_string()).or_default();
        hist.push_back(entry);
        while hist.len() > self.max_len {
            hist.pop_front();
        }
    }

    /// Snapshot copy; safe to hand to the atomic computer without locks.
    pub fn snapshot(&self, symbol: &str) -> Vec<TickEntry> {
        self.data
            .read()
            .get(symbol)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.data.read().get(symbol).map_or(0, |h| h.len())
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}
