#![forbid(unsafe_code)]

//! Two-phase-commit wrapper around a non-transactional slot.
//!
//! # Design
//!
//! [`TransactionalCell`] writes straight through to the wrapped slot, so
//! `value()` always reflects the latest edit. What it buffers is the
//! *notification*: while a transaction is open, change signals from the
//! wrapped slot only mark a change as pending, and [`commit`] delivers at
//! most one notification carrying the value current at commit time.
//! [`rollback`] forces the wrapped slot back to the value captured by
//! [`start_transaction`] and drops the pending notification.
//!
//! Listeners of the wrapped slot itself still see every intermediate write,
//! including the reset performed by a rollback.
//!
//! # Invariants
//!
//! 1. A rollback point exists exactly while a transaction is open.
//! 2. While a transaction is open, no listener of the wrapper is called.
//! 3. `commit` fires at most one notification; `rollback` fires none.
//! 4. `rollback` always ends the transaction, even when the forced write
//!    fails or a listener unwinds.
//!
//! # Failure Modes
//!
//! - **Nested transactions**: calling `start_transaction` twice replaces the
//!   rollback point. This is logged at `warn` and otherwise allowed; callers
//!   must not nest.
//!
//! [`commit`]: TransactionalCell::commit
//! [`rollback`]: TransactionalCell::rollback
//! [`start_transaction`]: TransactionalCell::start_transaction

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{trace, warn};

use crate::error::CellError;
use crate::value::{TypeTag, Value};

use super::cell::ValueSlot;
use super::observable::{Listeners, Observable, Subscription};

struct TxInner {
    wrapped: Rc<dyn ValueSlot>,
    in_transaction: Cell<bool>,
    value_change_pending: Cell<bool>,
    value_before_transaction: RefCell<Option<Value>>,
    buffered: Cell<bool>,
    /// Whether `wrapped` reports its own changes; when it does not, the
    /// wrapper signals after each successful write.
    source_observed: Cell<bool>,
    listeners: Listeners,
    wrapped_subscription: RefCell<Option<Subscription>>,
}

impl TxInner {
    fn fire_value_change(self: &Rc<Self>) {
        if self.in_transaction.get() {
            self.value_change_pending.set(true);
            trace!("value change deferred until transaction end");
            return;
        }
        let weak: Weak<Self> = Rc::downgrade(self);
        self.listeners.notify(move || {
            weak.upgrade()
                .map(|inner| inner.wrapped.value())
                .unwrap_or_default()
        });
    }

    fn end_transaction(self: &Rc<Self>) {
        self.in_transaction.set(false);
        self.value_before_transaction.replace(None);
        if self.value_change_pending.replace(false) {
            self.fire_value_change();
        }
    }
}

/// Ends a rollback without flushing, whatever happens to the forced write.
struct RollbackFinish<'a>(&'a TxInner);

impl Drop for RollbackFinish<'_> {
    fn drop(&mut self) {
        self.0.value_change_pending.set(false);
        self.0.in_transaction.set(false);
        self.0.value_before_transaction.replace(None);
    }
}

/// Restores a lifted read-only flag.
struct RestoreReadOnly<'a>(&'a dyn ValueSlot);

impl Drop for RestoreReadOnly<'_> {
    fn drop(&mut self) {
        self.0.set_read_only(true);
    }
}

/// Transactional front for one record slot.
///
/// Cloning creates another handle to the same wrapper; the bound field and
/// the owning group share it this way.
#[derive(Clone)]
pub struct TransactionalCell {
    inner: Rc<TxInner>,
}

impl std::fmt::Debug for TransactionalCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalCell")
            .field("value", &self.inner.wrapped.value())
            .field("in_transaction", &self.inner.in_transaction.get())
            .field("value_change_pending", &self.inner.value_change_pending.get())
            .field("buffered", &self.inner.buffered.get())
            .finish()
    }
}

impl TransactionalCell {
    /// Wrap `wrapped`, forwarding its change signals when it has any.
    #[must_use]
    pub fn new(wrapped: Rc<dyn ValueSlot>) -> Self {
        let inner = Rc::new(TxInner {
            wrapped,
            in_transaction: Cell::new(false),
            value_change_pending: Cell::new(false),
            value_before_transaction: RefCell::new(None),
            buffered: Cell::new(true),
            source_observed: Cell::new(false),
            listeners: Listeners::default(),
            wrapped_subscription: RefCell::new(None),
        });

        if let Some(observable) = inner.wrapped.as_observable() {
            let weak = Rc::downgrade(&inner);
            let sub = observable.add_listener(Box::new(move |_: &Value| {
                if let Some(inner) = weak.upgrade() {
                    inner.fire_value_change();
                }
            }));
            inner.wrapped_subscription.replace(Some(sub));
            inner.source_observed.set(true);
        }

        Self { inner }
    }

    /// The slot this wrapper fronts.
    #[must_use]
    pub fn wrapped(&self) -> &Rc<dyn ValueSlot> {
        &self.inner.wrapped
    }

    /// Subscribe to transactional change notifications.
    pub fn subscribe(&self, callback: impl Fn(&Value) + 'static) -> Subscription {
        self.inner.listeners.subscribe(callback)
    }

    /// Record the current value as the rollback point and start deferring
    /// notifications.
    pub fn start_transaction(&self) {
        if self.inner.in_transaction.get() {
            warn!("start_transaction on a cell already in a transaction; rollback point replaced");
        }
        self.inner.in_transaction.set(true);
        let current = self.inner.wrapped.value();
        self.inner.value_before_transaction.replace(Some(current));
    }

    /// End the transaction, keeping the current value and delivering at most
    /// one deferred notification.
    pub fn commit(&self) {
        self.inner.end_transaction();
    }

    /// End the transaction and force the wrapped slot back to the rollback
    /// point, lifting its read-only flag for the write if needed.
    ///
    /// The transaction is over when this returns, whether or not the forced
    /// write succeeded. Outside a transaction this is a no-op.
    pub fn rollback(&self) -> Result<(), CellError> {
        if !self.inner.in_transaction.get() {
            return Ok(());
        }
        let _finish = RollbackFinish(&self.inner);
        let before = self
            .inner
            .value_before_transaction
            .borrow()
            .clone()
            .unwrap_or_default();
        self.force_write(before)
    }

    fn force_write(&self, value: Value) -> Result<(), CellError> {
        let wrapped = &*self.inner.wrapped;
        if wrapped.is_read_only() {
            wrapped.set_read_only(false);
            let _restore = RestoreReadOnly(wrapped);
            wrapped.set_value(value)
        } else {
            wrapped.set_value(value)
        }
    }

    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        self.inner.in_transaction.get()
    }

    #[must_use]
    pub fn is_value_change_pending(&self) -> bool {
        self.inner.value_change_pending.get()
    }

    /// Rollback point of the open transaction.
    #[must_use]
    pub fn value_before_transaction(&self) -> Option<Value> {
        self.inner.value_before_transaction.borrow().clone()
    }

    /// Whether the value differs from the rollback point.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.inner
            .value_before_transaction
            .borrow()
            .as_ref()
            .is_some_and(|before| *before != self.inner.wrapped.value())
    }

    /// Buffered (read-through/write-through off) mode pushed by the group.
    pub fn set_buffered(&self, buffered: bool) {
        self.inner.buffered.set(buffered);
    }

    #[must_use]
    pub fn is_buffered(&self) -> bool {
        self.inner.buffered.get()
    }

    /// Registered listeners, including dead ones not yet pruned.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Whether both handles point at the same wrapper.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl ValueSlot for TransactionalCell {
    fn value(&self) -> Value {
        self.inner.wrapped.value()
    }

    fn set_value(&self, value: Value) -> Result<(), CellError> {
        self.inner.wrapped.set_value(value)?;
        if !self.inner.source_observed.get() {
            self.inner.fire_value_change();
        }
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.inner.wrapped.is_read_only()
    }

    fn set_read_only(&self, read_only: bool) {
        self.inner.wrapped.set_read_only(read_only);
    }

    fn type_tag(&self) -> TypeTag {
        self.inner.wrapped.type_tag()
    }

    fn as_observable(&self) -> Option<&dyn Observable> {
        Some(self)
    }
}

impl Observable for TransactionalCell {
    fn add_listener(&self, callback: Box<dyn Fn(&Value)>) -> Subscription {
        self.inner.listeners.subscribe_immediate(callback)
    }
}
