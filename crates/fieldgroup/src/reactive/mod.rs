#![forbid(unsafe_code)]

//! Observable cells and their transactional wrapper.
//!
//! - [`ValueCell`]: a record slot's storage, with read-only flag, type tag
//!   and change notification.
//! - [`ValueSlot`]: the storage contract any record slot implements.
//! - [`Observable`]: optional change-notification capability of a slot.
//! - [`TransactionalCell`]: two-phase-commit front for one slot that defers
//!   its own notifications while a transaction is open.
//! - [`BatchScope`]: RAII guard that defers and coalesces notifications
//!   until the outermost scope exits.
//!
//! # Architecture
//!
//! Cells use `Rc` handles with interior mutability for single-threaded
//! shared ownership between the record, the bound field and the group.
//! Listeners are stored as `Weak` callbacks and pruned lazily.
//!
//! # Invariants
//!
//! 1. Writes land immediately; only notifications are ever deferred.
//! 2. Listeners are notified in registration order.
//! 3. Writing a value equal to the current value is a no-op.
//! 4. No borrow is held while a listener runs, so listeners may edit cells.

pub mod batch;
pub mod cell;
pub mod observable;
pub mod transactional;

pub use batch::BatchScope;
pub use cell::{ValueCell, ValueSlot};
pub use observable::{Observable, Subscription};
pub use transactional::TransactionalCell;
