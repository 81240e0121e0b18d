#![forbid(unsafe_code)]

//! Change-listener bookkeeping shared by every cell.
//!
//! # Design
//!
//! A [`Listeners`] list stores callbacks as `Weak` references; the strong
//! `Rc` lives in the [`Subscription`] guard handed back to the caller, so
//! dropping the guard unsubscribes. Dead entries are pruned lazily on the
//! next notification.
//!
//! [`Observable`] is the optional capability a slot may implement. The
//! transactional wrapper asks a slot for it through
//! [`ValueSlot::as_observable`](super::cell::ValueSlot::as_observable)
//! instead of downcasting it.
//!
//! # Failure Modes
//!
//! - **Re-entrant edits**: callbacks run with no borrow held, so a listener
//!   may write to the same or another cell. The nested notification runs to
//!   completion before the outer loop resumes.
//! - **Subscriber leak**: guards stored indefinitely keep callbacks alive.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::value::Value;

/// A listener callback stored as a strong `Rc` inside its [`Subscription`].
pub(crate) type ListenerRc = Rc<dyn Fn(&Value)>;
type ListenerWeak = Weak<dyn Fn(&Value)>;

/// Optional change-notification capability of a slot.
pub trait Observable {
    /// Register `callback` as a change signal. The callback stays registered
    /// for as long as the returned guard lives.
    ///
    /// Signals are delivered synchronously at write time, even inside a
    /// [`BatchScope`](super::batch::BatchScope), so a wrapper can decide
    /// what to do from its state at the moment of the write.
    fn add_listener(&self, callback: Box<dyn Fn(&Value)>) -> Subscription;
}

/// When a listener runs relative to an open batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Queued and coalesced while a batch is open.
    Batched,
    /// Always runs at write time.
    Immediate,
}

struct Entry {
    callback: ListenerWeak,
    delivery: Delivery,
}

/// Ordered list of weakly-held listeners.
#[derive(Default)]
pub(crate) struct Listeners {
    entries: RefCell<Vec<Entry>>,
}

impl Listeners {
    /// Subscribe a listener whose notifications a batch may defer.
    pub(crate) fn subscribe(&self, callback: impl Fn(&Value) + 'static) -> Subscription {
        self.push(callback, Delivery::Batched)
    }

    /// Subscribe a change signal that bypasses batching.
    pub(crate) fn subscribe_immediate(
        &self,
        callback: impl Fn(&Value) + 'static,
    ) -> Subscription {
        self.push(callback, Delivery::Immediate)
    }

    fn push(&self, callback: impl Fn(&Value) + 'static, delivery: Delivery) -> Subscription {
        let strong: ListenerRc = Rc::new(callback);
        self.entries.borrow_mut().push(Entry {
            callback: Rc::downgrade(&strong),
            delivery,
        });
        // `Rc<dyn Fn>` cannot coerce to `Rc<dyn Any>`, so box the Rc itself.
        Subscription {
            _guard: Box::new(strong),
        }
    }

    /// Registered entries, including dead ones not yet pruned.
    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Notify live listeners in registration order and prune dead ones.
    ///
    /// Inside a [`BatchScope`](super::batch::BatchScope) batched listeners
    /// are queued and re-read `latest` at flush time; immediate listeners
    /// still run now.
    pub(crate) fn notify(&self, latest: impl Fn() -> Value + Clone + 'static) {
        let callbacks: Vec<(ListenerRc, Delivery)> = {
            let mut entries = self.entries.borrow_mut();
            entries.retain(|e| e.callback.strong_count() > 0);
            entries
                .iter()
                .filter_map(|e| e.callback.upgrade().map(|cb| (cb, e.delivery)))
                .collect()
        };

        if callbacks.is_empty() {
            return;
        }

        let batching = super::batch::is_batching();
        let value = latest();
        trace!(listeners = callbacks.len(), batching, %value, "value change delivered");
        for (cb, delivery) in callbacks {
            if batching && delivery == Delivery::Batched {
                let key = Rc::as_ptr(&cb) as *const () as usize;
                let latest = latest.clone();
                super::batch::park_or_run(key, move || cb(&latest()));
            } else {
                cb(&value);
            }
        }
    }
}

/// RAII guard for a listener callback.
///
/// Dropping the `Subscription` drops the strong `Rc`, so the `Weak` in the
/// listener list fails to upgrade from the next notification on.
pub struct Subscription {
    _guard: Box<dyn std::any::Any>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
