#![forbid(unsafe_code)]

//! Per-slot value storage owned by a record.
//!
//! [`ValueSlot`] is the contract the binding layer needs from a record's
//! storage. [`ValueCell`] is the stock implementation: a shared,
//! version-tracked value with a read-only flag, a fixed [`TypeTag`] and
//! change notification.
//!
//! # Invariants
//!
//! 1. `version` increments by exactly 1 on each value-changing write.
//! 2. Writing a value equal to the current one is a no-op.
//! 3. A write to a read-only cell fails with `ReadOnlyViolation` and leaves
//!    the value untouched.
//! 4. Listeners are notified in registration order.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::CellError;
use crate::value::{TypeTag, Value};

use super::observable::{Listeners, Observable, Subscription};

/// Storage contract of a single record slot.
pub trait ValueSlot {
    /// Current value.
    fn value(&self) -> Value;

    /// Write `value`, failing when the slot is read-only or the type is wrong.
    fn set_value(&self, value: Value) -> Result<(), CellError>;

    fn is_read_only(&self) -> bool;

    fn set_read_only(&self, read_only: bool);

    fn type_tag(&self) -> TypeTag;

    /// Change-notification capability, when the slot has one.
    fn as_observable(&self) -> Option<&dyn Observable> {
        None
    }
}

struct CellInner {
    value: RefCell<Value>,
    type_tag: TypeTag,
    read_only: Cell<bool>,
    version: Cell<u64>,
    listeners: Listeners,
}

/// A shared, observable slot value.
///
/// Cloning a `ValueCell` creates a new handle to the **same** slot.
#[derive(Clone)]
pub struct ValueCell {
    inner: Rc<CellInner>,
}

impl std::fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCell")
            .field("value", &*self.inner.value.borrow())
            .field("type_tag", &self.inner.type_tag)
            .field("read_only", &self.inner.read_only.get())
            .field("version", &self.inner.version.get())
            .finish()
    }
}

impl ValueCell {
    /// Create a writable cell whose type is inferred from `value`
    /// (`Any` for `Null`).
    #[must_use]
    pub fn new(value: impl Into<Value>) -> Self {
        let value = value.into();
        let tag = value.type_tag().unwrap_or(TypeTag::Any);
        Self::from_parts(tag, value)
    }

    /// Create a writable cell with an explicit type.
    ///
    /// Returns `TypeMismatch` when `value` does not fit `type_tag`.
    pub fn typed(type_tag: TypeTag, value: impl Into<Value>) -> Result<Self, CellError> {
        let value = value.into();
        check_type(type_tag, &value)?;
        Ok(Self::from_parts(type_tag, value))
    }

    fn from_parts(type_tag: TypeTag, value: Value) -> Self {
        Self {
            inner: Rc::new(CellInner {
                value: RefCell::new(value),
                type_tag,
                read_only: Cell::new(false),
                version: Cell::new(0),
                listeners: Listeners::default(),
            }),
        }
    }

    /// Builder-style read-only flag.
    #[must_use]
    pub fn read_only(self) -> Self {
        self.inner.read_only.set(true);
        self
    }

    /// Subscribe to value changes. Dropping the guard unsubscribes.
    pub fn subscribe(&self, callback: impl Fn(&Value) + 'static) -> Subscription {
        self.inner.listeners.subscribe(callback)
    }

    /// Number of value-changing writes so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Registered listeners, including dead ones not yet pruned.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Whether both handles point at the same slot.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn notify(&self) {
        let weak = Rc::downgrade(&self.inner);
        self.inner.listeners.notify(move || {
            weak.upgrade()
                .map(|inner| inner.value.borrow().clone())
                .unwrap_or_default()
        });
    }
}

fn check_type(type_tag: TypeTag, value: &Value) -> Result<(), CellError> {
    if type_tag.accepts(value) {
        Ok(())
    } else {
        Err(CellError::TypeMismatch {
            expected: type_tag,
            found: value.type_tag().unwrap_or(TypeTag::Any),
        })
    }
}

impl ValueSlot for ValueCell {
    fn value(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    fn set_value(&self, value: Value) -> Result<(), CellError> {
        if self.inner.read_only.get() {
            return Err(CellError::ReadOnlyViolation {
                type_tag: self.inner.type_tag,
            });
        }
        check_type(self.inner.type_tag, &value)?;
        {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return Ok(());
            }
            *current = value;
        }
        self.inner.version.set(self.inner.version.get() + 1);
        self.notify();
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.inner.read_only.get()
    }

    fn set_read_only(&self, read_only: bool) {
        self.inner.read_only.set(read_only);
    }

    fn type_tag(&self) -> TypeTag {
        self.inner.type_tag
    }

    fn as_observable(&self) -> Option<&dyn Observable> {
        Some(self)
    }
}

impl Observable for ValueCell {
    fn add_listener(&self, callback: Box<dyn Fn(&Value)>) -> Subscription {
        self.inner.listeners.subscribe_immediate(callback)
    }
}
