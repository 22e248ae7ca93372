//! Ordered, idempotent process shutdown.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

type StepFn = Box<dyn FnOnce() + Send + 'static>;

struct Step {
    name: String,
    order: i32,
    run: StepFn,
}

/// Steps registered with `(name, order, fn)`; lower order stops earlier.
#[derive(Default)]
pub struct ShutdownCoordinator {
    steps: Mutex<Vec<Step>>,
    stopping: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_step(&self, name: impl Into<String>, order: i32, run: impl FnOnce() + Send + 'static) {
        self.steps.lock().push(Step {
            name: name.into(),
            order,
            run: Box::new(run),
        });
    }

    /// First call runs every step in ascending order, swallowing panics;
    /// later calls are no-ops.
    pub fn stop_all(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut steps = std::mem::take(&mut *self.steps.lock());
        steps.sort_by_key(|s| s.order);
        for step in steps {
            info!(step = %step.name, order = step.order, "shutdown step");
            if catch_unwind(AssertUnwindSafe(step.run)).is_err() {
                error!(step = %step.name, "shutdown step panicked; continuing");
            }
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn test_runs_in_ascending_order_once() {
        let coord = ShutdownCoordinator::new();
        let trace = Arc::new(Mutex::new(Vec::new()));

        for (name, order) in [("c", 30), ("a", 10), ("b", 20)] {
            let trace = trace.clone();
            coord.register_step(name, order, move || trace.lock().push(name));
        }

        coord.stop_all();
        coord.stop_all();
        assert_eq!(*trace.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_panicking_step_does_not_abort_sequence() {
        let coord = ShutdownCoordinator::new();
        let n = Arc::new(AtomicU32::new(0));
        coord.register_step("boom", 1, || panic!("boom"));
        let n2 = n.clone();
        coord.register_step("after", 2, move || {
            n2.fetch_add(1, Ordering::Relaxed);
        });
        coord.stop_all();
        assert_eq!(n.load(Ordering::Relaxed), 1);
    }
}
