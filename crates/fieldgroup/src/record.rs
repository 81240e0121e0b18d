#![forbid(unsafe_code)]

//! Backing records: named slots the group binds fields to.

use std::rc::Rc;

use crate::reactive::{ValueCell, ValueSlot};

/// Provider of named value slots.
///
/// The group resolves each bound slot name once per bind and once per
/// record rebind.
pub trait Record {
    /// The slot stored under `name`, if any.
    fn slot(&self, name: &str) -> Option<Rc<dyn ValueSlot>>;

    /// All slot names, in the record's own order.
    fn slot_names(&self) -> Vec<String>;
}

/// In-memory record of [`ValueCell`] slots, kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecord {
    slots: Vec<(String, ValueCell)>,
}

impl MemoryRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with_slot(mut self, name: impl Into<String>, cell: ValueCell) -> Self {
        self.insert(name, cell);
        self
    }

    /// Insert or replace the slot `name`, returning the previous cell.
    pub fn insert(&mut self, name: impl Into<String>, cell: ValueCell) -> Option<ValueCell> {
        let name = name.into();
        match self.slots.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, cell)),
            None => {
                self.slots.push((name, cell));
                None
            }
        }
    }

    /// Typed access to a slot's cell.
    #[must_use]
    pub fn cell(&self, name: &str) -> Option<&ValueCell> {
        self.slots.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Record for MemoryRecord {
    fn slot(&self, name: &str) -> Option<Rc<dyn ValueSlot>> {
        self.cell(name)
            .map(|cell| Rc::new(cell.clone()) as Rc<dyn ValueSlot>)
    }

    fn slot_names(&self) -> Vec<String> {
        self.slots.iter().map(|(n, _)| n.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn slots_resolve_to_shared_cells() {
        let record = MemoryRecord::new().with_slot("age", ValueCell::new(30));
        let slot = record.slot("age").expect("age exists");
        slot.set_value(31.into()).unwrap();
        assert_eq!(record.cell("age").unwrap().value(), Value::from(31));
        assert!(record.slot("missing").is_none());
    }

    #[test]
    fn insert_replaces_and_keeps_order() {
        let mut record = MemoryRecord::new()
            .with_slot("name", ValueCell::new("Ada"))
            .with_slot("age", ValueCell::new(36));
        let previous = record.insert("name", ValueCell::new("Grace"));
        assert_eq!(previous.map(|c| c.value()), Some(Value::from("Ada")));
        assert_eq!(record.slot_names(), vec!["name", "age"]);
        assert_eq!(record.len(), 2);
        assert!(!record.is_empty());
    }
}
