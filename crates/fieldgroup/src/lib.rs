#![forbid(unsafe_code)]

//! Buffered, all-or-nothing editing of record slots through bound fields.
//!
//! A [`BindingGroup`] pairs interactive fields with named slots of a
//! [`Record`], fronts each slot with a [`TransactionalCell`], and commits or
//! discards every pending edit as one unit, consulting a chain of
//! [`CommitHandler`]s before and after the data change.
//!
//! # This crate provides
//! - [`Value`] and [`TypeTag`], the dynamically typed slot payload.
//! - [`ValueCell`] and the [`ValueSlot`] / [`Observable`] contracts.
//! - [`TransactionalCell`], a two-phase-commit wrapper with deferred
//!   notification.
//! - [`Record`] with an in-memory [`MemoryRecord`].
//! - [`Field`], the widget boundary, with a [`HeadlessField`] for headless
//!   runs and tests.
//! - [`BindingGroup`], the commit/discard orchestrator, configured through
//!   [`GroupConfig`].
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use fieldgroup::{BindingGroup, FieldId, HeadlessField, MemoryRecord, ValueCell, Value};
//!
//! let record = MemoryRecord::new().with_slot("age", ValueCell::new(30));
//! let mut group = BindingGroup::with_record(Rc::new(record.clone()));
//! let age = Rc::new(HeadlessField::new(FieldId::new(1)));
//! group.bind(age.clone(), "age").unwrap();
//!
//! age.set_value(31).unwrap();
//! group.discard().unwrap();
//! assert_eq!(age.value(), Some(Value::from(30)));
//! ```

pub mod binding;
pub mod config;
pub mod error;
pub mod field;
pub mod group;
pub mod reactive;
pub mod record;
pub mod value;

pub use binding::InputBinding;
pub use config::GroupConfig;
pub use error::{BindingError, CellError, CommitAborted, CommitError, InvalidValue};
pub use field::{Field, FieldId, HeadlessField};
pub use group::{BindingGroup, CommitEvent, CommitHandler, CommitHandlerId, CommitPhase};
pub use reactive::{
    BatchScope, Observable, Subscription, TransactionalCell, ValueCell, ValueSlot,
};
pub use record::{MemoryRecord, Record};
pub use value::{TypeTag, Value};
