#![forbid(unsafe_code)]

//! One field bound to one record slot.

use std::rc::Rc;

use tracing::trace;

use crate::config::GroupConfig;
use crate::error::{BindingError, CellError};
use crate::field::{Field, FieldId};
use crate::reactive::{TransactionalCell, ValueSlot};
use crate::record::Record;

/// Pairs a field with a slot name and the transactional wrapper fronting
/// that slot on the current record.
///
/// The wrapper is absent while the group has no record; the pairing is
/// still recorded and resolves when a record arrives.
pub struct InputBinding {
    field: Rc<dyn Field>,
    slot_name: String,
    cell: Option<TransactionalCell>,
}

impl std::fmt::Debug for InputBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputBinding")
            .field("field", &self.field.id())
            .field("slot_name", &self.slot_name)
            .field("cell", &self.cell)
            .finish()
    }
}

/// Look up `slot_name` on `record` and wrap it in a fresh transactional cell.
pub(crate) fn resolve_cell(
    record: &dyn Record,
    slot_name: &str,
) -> Result<TransactionalCell, BindingError> {
    record
        .slot(slot_name)
        .map(TransactionalCell::new)
        .ok_or_else(|| BindingError::SlotNotFound {
            slot: slot_name.to_owned(),
        })
}

impl InputBinding {
    pub(crate) fn new(field: Rc<dyn Field>, slot_name: impl Into<String>) -> Self {
        Self {
            field,
            slot_name: slot_name.into(),
            cell: None,
        }
    }

    #[must_use]
    pub fn field(&self) -> &Rc<dyn Field> {
        &self.field
    }

    #[must_use]
    pub fn field_id(&self) -> FieldId {
        self.field.id()
    }

    #[must_use]
    pub fn slot_name(&self) -> &str {
        &self.slot_name
    }

    /// The wrapper fronting the slot, `None` while unresolved.
    #[must_use]
    pub fn cell(&self) -> Option<&TransactionalCell> {
        self.cell.as_ref()
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.cell.is_some()
    }

    /// Whether the field ends up read-only under a group-level flag.
    /// A read-only slot always wins.
    #[must_use]
    pub fn effective_read_only(&self, group_read_only: bool) -> bool {
        self.cell.as_ref().is_some_and(ValueSlot::is_read_only) || group_read_only
    }

    /// Install `cell` as the field's value source, replacing any previous one.
    pub(crate) fn attach(&mut self, cell: Option<TransactionalCell>) {
        self.field.set_value_source(cell.clone());
        self.cell = cell;
    }

    /// Roll back any open session and clear the field's value source.
    pub(crate) fn detach(&mut self) -> Result<(), CellError> {
        let result = self.cell.as_ref().map_or(Ok(()), TransactionalCell::rollback);
        self.attach(None);
        result
    }

    /// Push the group's flags onto the field and its cell.
    pub fn configure(&self, config: &GroupConfig) {
        if let Some(cell) = &self.cell {
            cell.set_buffered(config.buffered);
        }
        self.field.set_read_through(!config.buffered);
        self.field.set_write_through(!config.buffered);
        self.field.set_enabled(config.enabled);
        let read_only = self.effective_read_only(config.read_only);
        self.field.set_read_only(read_only);
        trace!(
            slot = %self.slot_name,
            buffered = config.buffered,
            enabled = config.enabled,
            read_only,
            "binding configured"
        );
    }
}
