#![forbid(unsafe_code)]

//! Deferred delivery of listener callbacks during a group commit.
//!
//! Committing a group ends the transaction of each cell in turn. A listener
//! that ran as soon as the first cell ended would observe the record half
//! committed, so the group commits inside a [`BatchScope`]. While a scope is
//! open, batched listeners are parked in a thread-local queue keyed by
//! listener; a listener parked twice keeps its first place and fires once.
//!
//! ```ignore
//! let _batch = BatchScope::new();
//! x.set_value(1.into())?;
//! x.set_value(3.into())?; // same listener, still one entry
//! drop(_batch);           // x listeners run once and read 3
//! ```
//!
//! # Invariants
//!
//! 1. Only the scope that opened the queue drains it.
//! 2. The queue is detached before draining; callbacks that write cells
//!    deliver their own notifications straight away.
//! 3. Parked callbacks run in the order their listener was first parked.
//!
//! # Failure Modes
//!
//! - **Callback panics while draining**: the rest still run, then the first
//!   panic resumes.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};

use tracing::{debug, debug_span};
use web_time::Instant;

type Parked = Box<dyn FnOnce()>;

#[derive(Default)]
struct Queue {
    depth: u32,
    parked: Vec<(usize, Parked)>,
}

impl Queue {
    fn park(&mut self, key: usize, callback: Parked) {
        match self.parked.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = callback,
            None => self.parked.push((key, callback)),
        }
    }

    fn drain(self) {
        if self.parked.is_empty() {
            return;
        }
        let notifications = self.parked.len() as u64;
        let started = Instant::now();
        let span = debug_span!(
            "fieldgroup.flush",
            notifications,
            duration_us = tracing::field::Empty
        );
        let _entered = span.enter();

        let mut first_panic: Option<Box<dyn Any + Send>> = None;
        for (_, callback) in self.parked {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
                first_panic.get_or_insert(payload);
            }
        }

        let duration_us = started.elapsed().as_micros() as u64;
        span.record("duration_us", duration_us);
        debug!(notifications, duration_us, "deferred notifications flushed");

        if let Some(payload) = first_panic {
            resume_unwind(payload);
        }
    }
}

thread_local! {
    static QUEUE: RefCell<Option<Queue>> = const { RefCell::new(None) };
}

/// Whether a [`BatchScope`] is open on this thread.
pub(crate) fn is_batching() -> bool {
    QUEUE.with(|q| q.borrow().is_some())
}

/// Park `callback` under `key` when a scope is open, otherwise run it.
pub(crate) fn park_or_run(key: usize, callback: impl FnOnce() + 'static) {
    let callback: Parked = Box::new(callback);
    let unparked = QUEUE.with(|q| match q.borrow_mut().as_mut() {
        Some(queue) => {
            queue.park(key, callback);
            None
        }
        None => Some(callback),
    });
    if let Some(callback) = unparked {
        callback();
    }
}

/// RAII guard that defers batched listeners until the outermost guard drops.
pub struct BatchScope {
    opened_queue: bool,
}

impl BatchScope {
    #[must_use]
    pub fn new() -> Self {
        let opened_queue = QUEUE.with(|q| {
            let mut q = q.borrow_mut();
            let opened = q.is_none();
            q.get_or_insert_with(Queue::default).depth += 1;
            opened
        });
        Self { opened_queue }
    }

    /// Listeners currently parked on this thread.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        QUEUE.with(|q| q.borrow().as_ref().map_or(0, |queue| queue.parked.len()))
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let done = QUEUE.with(|q| {
            let mut q = q.borrow_mut();
            let queue = q.as_mut()?;
            queue.depth -= 1;
            if queue.depth == 0 { q.take() } else { None }
        });
        if let Some(queue) = done {
            queue.drain();
        }
    }
}

impl std::fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope")
            .field("opened_queue", &self.opened_queue)
            .field("pending", &self.pending_count())
            .finish()
    }
}
