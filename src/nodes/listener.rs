//! Dispatcher-facing entry node of a request graph.
//!
//! Values arrive on pool threads, land in a bounded queue (drop-oldest on
//! overflow), and a single-flight pump forwards them downstream in arrival
//! order for this (symbol, field).

use crate::dispatch::{ListenerId, MarketDispatcher};
use crate::models::SymbolValue;
use crate::nodes::Node;
use crate::rt::{BoundedQueue, ThreadPool};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

pub struct Listener {
    symbol: String,
    field: String,
    downstream: Mutex<Option<Arc<dyn Node>>>,
    pool: Arc<ThreadPool>,
    dispatcher: Arc<MarketDispatcher>,
    queue: BoundedQueue<SymbolValue>,
    scheduled: AtomicBool,
    stopping: AtomicBool,
    registration: Mutex<Option<ListenerId>>,
    weak: Weak<Listener>,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

impl Listener {
    pub fn new(
        symbol: impl Into<String>,
        field: impl Into<String>,
        downstream: Arc<dyn Node>,
        pool: Arc<ThreadPool>,
        dispatcher: Arc<MarketDispatcher>,
        queue_cap: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            symbol: symbol.into(),
            field: field.into(),
            downstream: Mutex::new(Some(downstream)),
            pool,
            dispatcher,
            queue: BoundedQueue::new(queue_cap.max(1)),
            scheduled: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            registration: Mutex::new(None),
            weak: weak.clone(),
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Register with the dispatcher. Construction does not subscribe; call
    /// this once the node is owned. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.stopping.load(Ordering::Acquire) {
            return;
        }
        let mut registration = self.registration.lock();
        if registration.is_some() {
            return;
        }
        let node: Arc<dyn Node> = self.clone();
        *registration = Some(
            self.dispatcher
                .register_listener(&self.symbol, &self.field, &node),
        );
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// At most one pump task is in flight at a time.
    fn schedule_pump(&self) {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(me) = self.weak.upgrade() else {
            return;
        };
        self.pool.post(move || me.pump());
    }

    fn pump(&self) {
        loop {
            while let Some(sv) = self.queue.try_pop() {
                if self.stopping.load(Ordering::Acquire) {
                    break;
                }
                let down = self.downstream.lock().clone();
                if let Some(down) = down {
                    down.on_value(&sv);
                }
            }

            self.scheduled.store(false, Ordering::Release);
            // values may have raced in after the drain; reclaim the flight
            // slot or leave it to the producer that will
            if self.stopping.load(Ordering::Acquire) || self.queue.is_empty() {
                return;
            }
            if self.scheduled.swap(true, Ordering::AcqRel) {
                return;
            }
        }
    }
}

impl Node for Listener {
    fn on_value(&self, sv: &SymbolValue) {
        if self.stopping.load(Ordering::Acquire) {
            return;
        }
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        if self.queue.push_evicting(sv.clone()).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.schedule_pump();
    }

    fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(id) = self.registration.lock().take() {
            self.dispatcher
                .unregister_listener(&self.symbol, &self.field, id);
        }
        if let Some(down) = self.downstream.lock().take() {
            down.shutdown();
        }
    }
}
