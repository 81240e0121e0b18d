#![forbid(unsafe_code)]

//! The widget boundary.
//!
//! The group never renders anything. It drives fields through [`Field`]:
//! it installs a [`TransactionalCell`] as the value source, pushes the
//! enabled / read-only / buffering flags, and asks for local validation
//! before a commit.

use std::cell::{Cell, RefCell};
use std::fmt;

use crate::error::{CellError, InvalidValue};
use crate::reactive::{TransactionalCell, ValueSlot};
use crate::value::{TypeTag, Value};

/// Stable identity of a bound field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(pub u64);

impl FieldId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An interactive input the group can bind.
pub trait Field {
    fn id(&self) -> FieldId;

    /// Install (or clear) the cell the field reads and writes.
    fn set_value_source(&self, source: Option<TransactionalCell>);

    fn set_enabled(&self, enabled: bool);

    fn set_read_only(&self, read_only: bool);

    /// Buffering hint: read the source on every display when `true`.
    fn set_read_through(&self, read_through: bool);

    /// Buffering hint: push every edit to the source immediately when `true`.
    fn set_write_through(&self, write_through: bool);

    /// Local validation run before a group commit.
    fn validate(&self) -> Result<(), InvalidValue> {
        Ok(())
    }
}

type Validator = Box<dyn Fn(&Value) -> Result<(), InvalidValue>>;

/// A field without a visual representation.
///
/// It records every flag the group pushes onto it and edits its value
/// source directly, which makes it the natural stand-in for a widget in
/// headless runs and tests.
pub struct HeadlessField {
    id: FieldId,
    source: RefCell<Option<TransactionalCell>>,
    enabled: Cell<bool>,
    read_only: Cell<bool>,
    read_through: Cell<bool>,
    write_through: Cell<bool>,
    validator: Option<Validator>,
}

impl HeadlessField {
    #[must_use]
    pub fn new(id: FieldId) -> Self {
        Self {
            id,
            source: RefCell::new(None),
            enabled: Cell::new(true),
            read_only: Cell::new(false),
            read_through: Cell::new(true),
            write_through: Cell::new(true),
            validator: None,
        }
    }

    /// Attach a local validation rule.
    #[must_use]
    pub fn with_validator(
        mut self,
        validator: impl Fn(&Value) -> Result<(), InvalidValue> + 'static,
    ) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Displayed value, read from the source.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.source.borrow().as_ref().map(ValueSlot::value)
    }

    /// Edit the displayed value, writing through to the source.
    pub fn set_value(&self, value: impl Into<Value>) -> Result<(), CellError> {
        // Clone the handle so listeners triggered by the write may rebind us.
        let source = self.source.borrow().clone();
        let Some(source) = source else {
            return Err(CellError::NoValueSource);
        };
        if self.read_only.get() {
            return Err(CellError::ReadOnlyViolation {
                type_tag: source.type_tag(),
            });
        }
        source.set_value(value.into())
    }

    #[must_use]
    pub fn value_source(&self) -> Option<TransactionalCell> {
        self.source.borrow().clone()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only.get()
    }

    #[must_use]
    pub fn is_read_through(&self) -> bool {
        self.read_through.get()
    }

    #[must_use]
    pub fn is_write_through(&self) -> bool {
        self.write_through.get()
    }

    /// Declared type of the source, `Any` when unbound.
    #[must_use]
    pub fn type_tag(&self) -> TypeTag {
        self.source
            .borrow()
            .as_ref()
            .map_or(TypeTag::Any, ValueSlot::type_tag)
    }
}

impl fmt::Debug for HeadlessField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessField")
            .field("id", &self.id)
            .field("value", &self.value())
            .field("enabled", &self.enabled.get())
            .field("read_only", &self.read_only.get())
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

impl Field for HeadlessField {
    fn id(&self) -> FieldId {
        self.id
    }

    fn set_value_source(&self, source: Option<TransactionalCell>) {
        self.source.replace(source);
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    fn set_read_only(&self, read_only: bool) {
        self.read_only.set(read_only);
    }

    fn set_read_through(&self, read_through: bool) {
        self.read_through.set(read_through);
    }

    fn set_write_through(&self, write_through: bool) {
        self.write_through.set(write_through);
    }

    fn validate(&self) -> Result<(), InvalidValue> {
        match (&self.validator, self.value()) {
            (Some(validator), Some(value)) => validator(&value),
            _ => Ok(()),
        }
    }
}
