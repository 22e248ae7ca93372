//! Fixed-size OS-thread pool.
//!
//! All processing-node work runs here; the async transport hands off at the
//! boundary and never blocks on this pool. `drain` is the only blocking
//! operation: it waits until the queue is empty and no task is in flight.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::error;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<Job>>,
    work_cv: Condvar,
    idle_cv: Condvar,
    stopping: AtomicBool,
    in_flight: AtomicUsize,
    panicked: AtomicU64,
}

pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    joined: AtomicBool,
}

impl ThreadPool {
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            work_cv: Condvar::new(),
            idle_cv: Condvar::new(),
            stopping: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            panicked: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("tickmesh-pool-{i}"))
                .spawn(move || worker_loop(&shared))
                .expect("spawn pool worker");
            workers.push(handle);
        }

        Self {
            shared,
            workers: Mutex::new(workers),
            joined: AtomicBool::new(false),
        }
    }

    /// Enqueue a task. Silently dropped once shutdown has begun.
    pub fn post<F: FnOnce() + Send + 'static>(&self, task: F) {
        {
            let mut q = self.shared.queue.lock();
            if self.shared.stopping.load(Ordering::Acquire) {
                return;
            }
            q.push_back(Box::new(task));
        }
        self.shared.work_cv.notify_one();
    }

    /// Block until the queue is empty and every in-flight task has completed.
    /// Safe to call concurrently with `post`.
    pub fn drain(&self) {
        let mut q = self.shared.queue.lock();
        while !q.is_empty() || self.shared.in_flight.load(Ordering::Acquire) != 0 {
            self.shared.idle_cv.wait(&mut q);
        }
    }

    /// Drain, then stop and join all workers. Idempotent.
    pub fn shutdown(&self) {
        self.drain();
        {
            let _q = self.shared.queue.lock();
            self.shared.stopping.store(true, Ordering::Release);
        }
        self.shared.work_cv.notify_all();

        if self.joined.swap(true, Ordering::AcqRel) {
            return;
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for w in workers {
            let _ = w.join();
        }
    }

    /// Tasks whose closure panicked (caught at the task boundary).
    pub fn panicked_tasks(&self) -> u64 {
        self.shared.panicked.load(Ordering::Relaxed)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Do not drain on drop; just stop and join so teardown can't hang on
        // a wedged task queue.
        {
            let _q = self.shared.queue.lock();
            self.shared.stopping.store(true, Ordering::Release);
        }
        self.shared.work_cv.notify_all();
        if !self.joined.swap(true, Ordering::AcqRel) {
            let workers = std::mem::take(&mut *self.workers.lock());
            for w in workers {
                let _ = w.join();
            }
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut q = shared.queue.lock();
            loop {
                if let Some(job) = q.pop_front() {
                    shared.in_flight.fetch_add(1, Ordering::AcqRel);
                    break job;
                }
                if shared.stopping.load(Ordering::Acquire) {
                    return;
                }
                shared.work_cv.wait(&mut q);
            }
        };

        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            shared.panicked.fetch_add(1, Ordering::Relaxed);
            error!("pool task panicked; worker continues");
        }

        shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        // Wake drainers; they re-check queue + in-flight under the lock.
        let _q = shared.queue.lock();
        shared.idle_cv.notify_all();
    }
}
