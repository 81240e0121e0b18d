#![forbid(unsafe_code)]

//! All-or-nothing editing of several record slots through bound fields.
//!
//! # Design
//!
//! A [`BindingGroup`] owns an ordered list of [`InputBinding`]s (insertion
//! order, unique by slot name and by field) and a chain of
//! [`CommitHandler`]s. Field edits go straight into each binding's
//! [`TransactionalCell`] and from there into the record; the group only
//! steps in to commit or discard.
//!
//! In buffered mode every resolved cell sits inside an open transaction (an
//! *edit session*) between commit cycles. Edits are therefore visible on
//! the record at once, but transactional listeners hear nothing until the
//! group commits, and [`discard`](BindingGroup::discard) can restore the
//! values seen before the first edit.
//!
//! # Commit protocol
//!
//! ```text
//! Idle ─► Validating ─► Committing ─────────────► Idle   (success)
//!              │             │
//!              │             └─► RollingBack ───► Idle   (pre-commit veto)
//!              └──────────────────────────────────► Idle   (invalid field)
//! ```
//!
//! 1. Every bound field validates locally; a failure aborts before any cell
//!    is touched.
//! 2. Buffered groups make sure every cell is inside a transaction.
//! 3. `pre_commit` runs on each handler in registration order. A veto rolls
//!    every cell back and is returned as [`CommitError::PreCommit`].
//! 4. Every cell commits inside one [`BatchScope`], so each cell's listeners
//!    hear at most one notification, after all cells hold their final value.
//! 5. `post_commit` runs on each handler in registration order. A failure is
//!    returned as [`CommitError::PostCommit`]; the data change stands.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Field invalid | `InvalidValue`, nothing touched |
//! | Pre-commit veto | Every cell rolled back, `PreCommit` |
//! | Veto rollback fails | `PreCommit` with `rollback_failure` set |
//! | Post-commit failure | Data kept, `PostCommit` |
//! | Rollback write fails | Logged; remaining cells still rolled back; first error returned |
//! | `commit`/`discard` re-entered | `InProgress` |

use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, debug_span, info, info_span, warn};
use web_time::Instant;

use crate::binding::{InputBinding, resolve_cell};
use crate::config::GroupConfig;
use crate::error::{BindingError, CellError, CommitAborted, CommitError};
use crate::field::{Field, FieldId};
use crate::reactive::{BatchScope, TransactionalCell};
use crate::record::Record;

/// Extension hook around a group commit.
///
/// Return [`CommitAborted`] to veto. Both hooks default to accepting.
pub trait CommitHandler {
    /// Called after validation, before any cell is committed.
    fn pre_commit(&self, event: &CommitEvent<'_>) -> Result<(), CommitAborted> {
        let _ = event;
        Ok(())
    }

    /// Called after every cell is committed.
    fn post_commit(&self, event: &CommitEvent<'_>) -> Result<(), CommitAborted> {
        let _ = event;
        Ok(())
    }
}

/// Context handed to commit handlers.
#[derive(Debug, Clone, Copy)]
pub struct CommitEvent<'a> {
    group: &'a BindingGroup,
}

impl<'a> CommitEvent<'a> {
    /// The group being committed.
    #[must_use]
    pub fn group(&self) -> &'a BindingGroup {
        self.group
    }
}

/// Registration handle returned by [`BindingGroup::add_commit_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitHandlerId(u64);

/// Where the group is in a commit or discard cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitPhase {
    #[default]
    Idle,
    Validating,
    Committing,
    RollingBack,
}

/// Returns the phase to `Idle` however the cycle ends.
struct PhaseGuard<'a>(&'a Cell<CommitPhase>);

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.set(CommitPhase::Idle);
    }
}

/// Binds fields to the slots of one record and commits their edits as a unit.
pub struct BindingGroup {
    record: Option<Rc<dyn Record>>,
    config: GroupConfig,
    bindings: Vec<InputBinding>,
    handlers: Vec<(CommitHandlerId, Rc<dyn CommitHandler>)>,
    next_handler_id: u64,
    phase: Cell<CommitPhase>,
}

impl std::fmt::Debug for BindingGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingGroup")
            .field("has_record", &self.record.is_some())
            .field("config", &self.config)
            .field("bindings", &self.bindings)
            .field("handler_count", &self.handlers.len())
            .field("phase", &self.phase.get())
            .finish()
    }
}

impl Default for BindingGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingGroup {
    /// Create an empty group with no record and default flags.
    #[must_use]
    pub fn new() -> Self {
        Self {
            record: None,
            config: GroupConfig::default(),
            bindings: Vec::new(),
            handlers: Vec::new(),
            next_handler_id: 0,
            phase: Cell::new(CommitPhase::Idle),
        }
    }

    /// Create an empty group over `record`.
    #[must_use]
    pub fn with_record(record: Rc<dyn Record>) -> Self {
        Self {
            record: Some(record),
            ..Self::new()
        }
    }

    /// Builder-style flags. Applies to bindings made afterwards; use the
    /// setters to cascade onto existing bindings.
    #[must_use]
    pub fn with_config(mut self, config: GroupConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn record(&self) -> Option<&Rc<dyn Record>> {
        self.record.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> GroupConfig {
        self.config
    }

    #[must_use]
    pub fn phase(&self) -> CommitPhase {
        self.phase.get()
    }

    // ---------------------------------------------------------------------
    // Binding
    // ---------------------------------------------------------------------

    /// Bind `field` to the slot `slot_name` of the current record.
    ///
    /// Binding the same field to the same slot again is a no-op. Binding a
    /// bound field to another free slot moves it; its previous binding is
    /// rolled back and removed.
    ///
    /// # Errors
    ///
    /// - `DuplicateBinding` when another field holds `slot_name`.
    /// - `SlotNotFound` when the record lacks the slot. The group is unchanged.
    /// - `NoRecordBound` when no record is set. The pairing **is** recorded
    ///   and resolves on the next [`set_record`](Self::set_record).
    pub fn bind(&mut self, field: Rc<dyn Field>, slot_name: &str) -> Result<(), BindingError> {
        let field_id = field.id();
        if let Some(existing) = self.binding(slot_name) {
            if existing.field_id() != field_id {
                return Err(BindingError::DuplicateBinding {
                    slot: slot_name.to_owned(),
                    bound_to: existing.field_id(),
                });
            }
            return match self.record {
                Some(_) => Ok(()),
                None => Err(BindingError::NoRecordBound {
                    slot: slot_name.to_owned(),
                }),
            };
        }

        let cell = match &self.record {
            Some(record) => Some(resolve_cell(record.as_ref(), slot_name)?),
            None => None,
        };

        if let Some(index) = self.position_of_field(field_id) {
            let mut previous = self.bindings.remove(index);
            debug!(
                field = %field_id,
                from = previous.slot_name(),
                to = slot_name,
                "field moved to another slot"
            );
            if let Err(err) = previous.detach() {
                warn!(slot = previous.slot_name(), error = %err, "rollback of moved binding failed");
            }
        }

        let resolved = cell.is_some();
        let mut binding = InputBinding::new(field, slot_name);
        binding.attach(cell);
        binding.configure(&self.config);
        if let Some(cell) = binding.cell() {
            self.open_session(cell);
        }
        self.bindings.push(binding);
        debug!(field = %field_id, slot = slot_name, resolved, "field bound");

        if resolved {
            Ok(())
        } else {
            Err(BindingError::NoRecordBound {
                slot: slot_name.to_owned(),
            })
        }
    }

    /// Remove the binding of `field`, rolling back its open edit session and
    /// clearing the field's value source.
    pub fn unbind(&mut self, field: FieldId) -> Result<(), BindingError> {
        let index = self
            .position_of_field(field)
            .ok_or(BindingError::NotBound { field })?;
        let mut binding = self.bindings.remove(index);
        if let Err(err) = binding.detach() {
            warn!(slot = binding.slot_name(), error = %err, "rollback on unbind failed");
        }
        debug!(field = %field, slot = binding.slot_name(), "field unbound");
        Ok(())
    }

    /// Replace the backing record and re-resolve every binding against it.
    ///
    /// All slots are resolved before anything changes: when one is missing
    /// the call fails with `SlotNotFound` and the group keeps its current
    /// record and cells. Open edit sessions on the outgoing cells are rolled
    /// back. `None` detaches every field but keeps the pairings.
    pub fn set_record(&mut self, record: Option<Rc<dyn Record>>) -> Result<(), BindingError> {
        let _span = debug_span!("fieldgroup.rebind", bindings = self.bindings.len()).entered();

        let cells: Vec<Option<TransactionalCell>> = match &record {
            Some(new_record) => self
                .bindings
                .iter()
                .map(|b| resolve_cell(new_record.as_ref(), b.slot_name()).map(Some))
                .collect::<Result<_, _>>()
                .inspect_err(|err| warn!(error = %err, "record rebind refused"))?,
            None => vec![None; self.bindings.len()],
        };

        for (binding, cell) in self.bindings.iter_mut().zip(cells) {
            if let Err(err) = binding.detach() {
                warn!(slot = binding.slot_name(), error = %err, "rollback of outgoing cell failed");
            }
            binding.attach(cell);
            binding.configure(&self.config);
        }
        self.record = record;
        self.open_sessions();
        debug!(resolved = self.record.is_some(), "record replaced");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Group-wide flags
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn is_buffered(&self) -> bool {
        self.config.buffered
    }

    /// Switch buffering. No handler runs and no edit is rolled back.
    ///
    /// Switching off closes every open edit session: edits stay on the
    /// record, each cell with a pending change notifies once, and later
    /// edits notify immediately. Switching on opens a session on every cell.
    pub fn set_buffered(&mut self, buffered: bool) {
        if buffered == self.config.buffered {
            return;
        }
        self.config.buffered = buffered;
        self.reconfigure();
        if buffered {
            self.open_sessions();
        } else {
            self.close_sessions();
        }
        debug!(buffered, "buffering changed");
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
        self.reconfigure();
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    /// Cascade a read-only flag; fields over read-only slots stay read-only.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.config.read_only = read_only;
        self.reconfigure();
    }

    fn reconfigure(&self) {
        for binding in &self.bindings {
            binding.configure(&self.config);
        }
        debug!(bindings = self.bindings.len(), config = ?self.config, "flags cascaded");
    }

    // ---------------------------------------------------------------------
    // Commit handlers
    // ---------------------------------------------------------------------

    /// Register a handler; handlers run in registration order.
    pub fn add_commit_handler(&mut self, handler: Rc<dyn CommitHandler>) -> CommitHandlerId {
        let id = CommitHandlerId(self.next_handler_id);
        self.next_handler_id += 1;
        self.handlers.push((id, handler));
        id
    }

    /// Unregister a handler. Returns `false` if it was not registered.
    pub fn remove_commit_handler(&mut self, id: CommitHandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(handler_id, _)| *handler_id != id);
        self.handlers.len() != before
    }

    #[must_use]
    pub fn commit_handler_count(&self) -> usize {
        self.handlers.len()
    }

    // ---------------------------------------------------------------------
    // Commit / discard
    // ---------------------------------------------------------------------

    /// Apply every edit as one transaction.
    ///
    /// See the module docs for the protocol. Only
    /// [`CommitError::PostCommit`] leaves the record changed.
    pub fn commit(&self) -> Result<(), CommitError> {
        let _phase = self.enter(CommitPhase::Validating)?;
        let started = Instant::now();
        let span = info_span!(
            "fieldgroup.commit",
            bindings = self.bindings.len(),
            handlers = self.handlers.len(),
            duration_us = tracing::field::Empty
        );
        let _entered = span.enter();
        let finish = || {
            let duration_us = started.elapsed().as_micros() as u64;
            span.record("duration_us", duration_us);
            duration_us
        };

        for binding in &self.bindings {
            if let Err(invalid) = binding.field().validate() {
                warn!(
                    slot = binding.slot_name(),
                    reason = %invalid,
                    "commit rejected by field validation"
                );
                finish();
                return Err(CommitError::InvalidValue {
                    slot: binding.slot_name().to_owned(),
                    reason: invalid.reason,
                });
            }
        }

        self.phase.set(CommitPhase::Committing);
        self.open_sessions();

        let event = CommitEvent { group: self };
        for (_, handler) in &self.handlers {
            if let Err(aborted) = handler.pre_commit(&event) {
                warn!(reason = aborted.reason(), "commit vetoed by pre-commit handler");
                self.phase.set(CommitPhase::RollingBack);
                let rollback_failure = self.rollback_all();
                self.open_sessions();
                finish();
                return Err(CommitError::PreCommit {
                    aborted,
                    rollback_failure,
                });
            }
        }

        {
            let _batch = BatchScope::new();
            for cell in self.cells() {
                cell.commit();
            }
            // Re-open before the flush so listener edits land in the new session.
            self.open_sessions();
        }

        for (_, handler) in &self.handlers {
            if let Err(aborted) = handler.post_commit(&event) {
                warn!(
                    reason = aborted.reason(),
                    "post-commit handler failed; committed values are kept"
                );
                finish();
                return Err(CommitError::PostCommit(aborted));
            }
        }

        let duration_us = finish();
        info!(
            bindings = self.bindings.len(),
            duration_us, "commit completed"
        );
        Ok(())
    }

    /// Roll back every cell to the value it held when its edit session
    /// opened. No handler runs.
    ///
    /// Every cell is rolled back even if one fails; the first failure is
    /// returned as [`CommitError::Rollback`].
    pub fn discard(&self) -> Result<(), CommitError> {
        let _phase = self.enter(CommitPhase::RollingBack)?;
        let _span = debug_span!("fieldgroup.discard", bindings = self.bindings.len()).entered();
        let failure = self.rollback_all();
        self.open_sessions();
        match failure {
            Some(err) => Err(CommitError::Rollback(err)),
            None => {
                debug!("edits discarded");
                Ok(())
            }
        }
    }

    fn enter(&self, phase: CommitPhase) -> Result<PhaseGuard<'_>, CommitError> {
        if self.phase.get() != CommitPhase::Idle {
            warn!(current = ?self.phase.get(), "commit or discard re-entered");
            return Err(CommitError::InProgress);
        }
        self.phase.set(phase);
        Ok(PhaseGuard(&self.phase))
    }

    /// Roll back every cell, returning the first failure.
    fn rollback_all(&self) -> Option<CellError> {
        let mut first = None;
        for binding in &self.bindings {
            let Some(cell) = binding.cell() else {
                continue;
            };
            if let Err(err) = cell.rollback() {
                warn!(slot = binding.slot_name(), error = %err, "rollback failed");
                first.get_or_insert(err);
            }
        }
        first
    }

    fn open_session(&self, cell: &TransactionalCell) {
        if self.config.buffered && !cell.is_in_transaction() {
            cell.start_transaction();
        }
    }

    fn open_sessions(&self) {
        for cell in self.cells() {
            self.open_session(cell);
        }
    }

    fn close_sessions(&self) {
        let _batch = BatchScope::new();
        for cell in self.cells().filter(|c| c.is_in_transaction()) {
            cell.commit();
        }
    }

    fn cells(&self) -> impl Iterator<Item = &TransactionalCell> {
        self.bindings.iter().filter_map(InputBinding::cell)
    }

    // ---------------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------------

    /// Whether any cell differs from the start of its edit session.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.cells().any(TransactionalCell::is_modified)
    }

    /// Whether every bound field passes local validation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.bindings.iter().all(|b| b.field().validate().is_ok())
    }

    /// Bindings in insertion order.
    pub fn bindings(&self) -> impl Iterator<Item = &InputBinding> {
        self.bindings.iter()
    }

    #[must_use]
    pub fn binding(&self, slot_name: &str) -> Option<&InputBinding> {
        self.bindings.iter().find(|b| b.slot_name() == slot_name)
    }

    /// Bound fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = &Rc<dyn Field>> {
        self.bindings.iter().map(InputBinding::field)
    }

    #[must_use]
    pub fn field_for(&self, slot_name: &str) -> Option<&Rc<dyn Field>> {
        self.binding(slot_name).map(InputBinding::field)
    }

    #[must_use]
    pub fn slot_for(&self, field: FieldId) -> Option<&str> {
        self.bindings
            .iter()
            .find(|b| b.field_id() == field)
            .map(InputBinding::slot_name)
    }

    /// The transactional cell bound to `slot_name`, if resolved.
    #[must_use]
    pub fn cell(&self, slot_name: &str) -> Option<&TransactionalCell> {
        self.binding(slot_name).and_then(InputBinding::cell)
    }

    /// Bound slot names in insertion order.
    pub fn bound_slot_names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(InputBinding::slot_name)
    }

    /// Record slots no field is bound to, in the record's order.
    #[must_use]
    pub fn unbound_slot_names(&self) -> Vec<String> {
        self.record.as_ref().map_or_else(Vec::new, |record| {
            record
                .slot_names()
                .into_iter()
                .filter(|name| self.binding(name).is_none())
                .collect()
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn position_of_field(&self, field: FieldId) -> Option<usize> {
        self.bindings.iter().position(|b| b.field_id() == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvalidValue;
    use crate::field::HeadlessField;
    use crate::reactive::{ValueCell, ValueSlot};
    use crate::record::MemoryRecord;
    use crate::value::Value;
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field as TraceField, Visit};
    use tracing_test::traced_test;

    fn person() -> (MemoryRecord, Rc<dyn Record>) {
        let record = MemoryRecord::new()
            .with_slot("name", ValueCell::new("Ada"))
            .with_slot("age", ValueCell::new(36))
            .with_slot("id", ValueCell::new(1).read_only());
        let shared: Rc<dyn Record> = Rc::new(record.clone());
        (record, shared)
    }

    fn field(id: u64) -> Rc<HeadlessField> {
        Rc::new(HeadlessField::new(FieldId::new(id)))
    }

    struct Veto;

    impl CommitHandler for Veto {
        fn pre_commit(&self, _event: &CommitEvent<'_>) -> Result<(), CommitAborted> {
            Err(CommitAborted::new("not today"))
        }
    }

    /// Records the group's phase and slot values seen by each hook.
    #[derive(Default)]
    struct Witness {
        seen: RefCell<Vec<(CommitPhase, Option<Value>)>>,
    }

    impl CommitHandler for Witness {
        fn pre_commit(&self, event: &CommitEvent<'_>) -> Result<(), CommitAborted> {
            let group = event.group();
            self.seen
                .borrow_mut()
                .push((group.phase(), group.cell("age").map(ValueSlot::value)));
            Ok(())
        }

        fn post_commit(&self, event: &CommitEvent<'_>) -> Result<(), CommitAborted> {
            self.pre_commit(event)
        }
    }

    /// Tries to commit the group from inside its own handler.
    struct Reenter {
        result: RefCell<Option<bool>>,
    }

    impl CommitHandler for Reenter {
        fn pre_commit(&self, event: &CommitEvent<'_>) -> Result<(), CommitAborted> {
            let nested = event.group().commit();
            self.result
                .replace(Some(matches!(nested, Err(CommitError::InProgress))));
            Ok(())
        }
    }

    #[test]
    fn bind_resolves_configures_and_opens_session() {
        let (_, record) = person();
        let mut group = BindingGroup::with_record(record);
        let name = field(1);
        group.bind(name.clone(), "name").unwrap();

        assert_eq!(name.value(), Some(Value::from("Ada")));
        assert!(!name.is_read_through());
        assert!(group.cell("name").unwrap().is_in_transaction());
        assert_eq!(group.slot_for(FieldId::new(1)), Some("name"));
        assert_eq!(group.field_for("name").unwrap().id(), FieldId::new(1));
    }

    #[test]
    fn duplicate_slot_is_rejected() {
        let (_, record) = person();
        let mut group = BindingGroup::with_record(record);
        group.bind(field(1), "name").unwrap();

        let err = group.bind(field(2), "name").unwrap_err();
        assert_eq!(
            err,
            BindingError::DuplicateBinding {
                slot: "name".into(),
                bound_to: FieldId::new(1)
            }
        );
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn rebinding_same_pair_is_idempotent() {
        let (_, record) = person();
        let mut group = BindingGroup::with_record(record);
        let name = field(1);
        group.bind(name.clone(), "name").unwrap();
        let before = group.cell("name").unwrap().clone();

        group.bind(name, "name").unwrap();
        assert!(before.ptr_eq(group.cell("name").unwrap()));
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn missing_slot_leaves_group_unchanged() {
        let (_, record) = person();
        let mut group = BindingGroup::with_record(record);
        let err = group.bind(field(1), "email").unwrap_err();
        assert_eq!(err, BindingError::SlotNotFound { slot: "email".into() });
        assert!(group.is_empty());
    }

    #[test]
    fn bind_without_record_is_deferred() {
        let mut group = BindingGroup::new();
        let age = field(1);
        let err = group.bind(age.clone(), "age").unwrap_err();
        assert_eq!(err, BindingError::NoRecordBound { slot: "age".into() });
        assert_eq!(group.len(), 1);
        assert!(!group.binding("age").unwrap().is_resolved());

        let (_, record) = person();
        group.set_record(Some(record)).unwrap();
        assert_eq!(age.value(), Some(Value::from(36)));
    }

    #[test]
    fn moving_a_field_rolls_back_its_old_slot() {
        let (cells, record) = person();
        let mut group = BindingGroup::with_record(record);
        let f = field(1);
        group.bind(f.clone(), "name").unwrap();
        f.set_value("Grace").unwrap();

        group.bind(f.clone(), "age").unwrap();
        assert_eq!(cells.cell("name").unwrap().value(), Value::from("Ada"));
        assert_eq!(group.bound_slot_names().collect::<Vec<_>>(), vec!["age"]);
        assert_eq!(f.value(), Some(Value::from(36)));
    }

    #[test]
    fn unbind_detaches_field() {
        let (_, record) = person();
        let mut group = BindingGroup::with_record(record);
        let f = field(1);
        group.bind(f.clone(), "age").unwrap();
        group.unbind(FieldId::new(1)).unwrap();
        assert_eq!(f.value(), None);
        assert_eq!(
            group.unbind(FieldId::new(1)),
            Err(BindingError::NotBound {
                field: FieldId::new(1)
            })
        );
    }

    #[test]
    fn unbound_slot_names_follow_record_order() {
        let (_, record) = person();
        let mut group = BindingGroup::with_record(record);
        group.bind(field(1), "age").unwrap();
        assert_eq!(group.unbound_slot_names(), vec!["name", "id"]);
        assert!(BindingGroup::new().unbound_slot_names().is_empty());
    }

    #[test]
    fn commit_runs_handlers_around_cell_commit() {
        let (_, record) = person();
        let mut group = BindingGroup::with_record(record);
        let age = field(1);
        group.bind(age.clone(), "age").unwrap();
        let witness = Rc::new(Witness::default());
        group.add_commit_handler(witness.clone());

        age.set_value(37).unwrap();
        group.commit().unwrap();

        assert_eq!(
            *witness.seen.borrow(),
            vec![
                (CommitPhase::Committing, Some(Value::from(37))),
                (CommitPhase::Committing, Some(Value::from(37))),
            ]
        );
        assert_eq!(group.phase(), CommitPhase::Idle);
        assert!(!group.is_modified());
    }

    #[test]
    fn pre_commit_veto_restores_values() {
        let (cells, record) = person();
        let mut group = BindingGroup::with_record(record);
        let age = field(1);
        group.bind(age.clone(), "age").unwrap();
        group.add_commit_handler(Rc::new(Veto));

        age.set_value(99).unwrap();
        let err = group.commit().unwrap_err();
        assert!(matches!(
            err,
            CommitError::PreCommit { ref aborted, rollback_failure: None }
                if aborted.reason() == "not today"
        ));
        assert_eq!(cells.cell("age").unwrap().value(), Value::from(36));
        assert_eq!(group.phase(), CommitPhase::Idle);
    }

    #[test]
    fn removed_handler_no_longer_vetoes() {
        let (_, record) = person();
        let mut group = BindingGroup::with_record(record);
        group.bind(field(1), "age").unwrap();
        let id = group.add_commit_handler(Rc::new(Veto));
        assert!(group.remove_commit_handler(id));
        assert!(!group.remove_commit_handler(id));
        assert_eq!(group.commit_handler_count(), 0);
        group.commit().unwrap();
    }

    #[test]
    fn invalid_field_aborts_before_handlers() {
        let (cells, record) = person();
        let mut group = BindingGroup::with_record(record);
        let age = Rc::new(
            HeadlessField::new(FieldId::new(1)).with_validator(|v| match v.as_int() {
                Some(n) if n < 150 => Ok(()),
                _ => Err(InvalidValue::new("implausible age")),
            }),
        );
        group.bind(age.clone(), "age").unwrap();
        let witness = Rc::new(Witness::default());
        group.add_commit_handler(witness.clone());

        age.set_value(200).unwrap();
        assert!(!group.is_valid());
        let err = group.commit().unwrap_err();
        assert!(matches!(
            err,
            CommitError::InvalidValue { ref slot, ref reason }
                if slot == "age" && reason == "implausible age"
        ));
        assert!(witness.seen.borrow().is_empty());
        assert_eq!(
            cells.cell("age").unwrap().value(),
            Value::from(200),
            "pre-flight failure leaves edits in place"
        );
        assert!(group.cell("age").unwrap().is_in_transaction());
    }

    #[test]
    fn reentrant_commit_is_refused() {
        let (_, record) = person();
        let mut group = BindingGroup::with_record(record);
        group.bind(field(1), "age").unwrap();
        let reenter = Rc::new(Reenter {
            result: RefCell::new(None),
        });
        group.add_commit_handler(reenter.clone());

        group.commit().unwrap();
        assert_eq!(*reenter.result.borrow(), Some(true));
    }

    #[test]
    fn discard_restores_and_reopens_session() {
        let (cells, record) = person();
        let mut group = BindingGroup::with_record(record);
        let name = field(1);
        group.bind(name.clone(), "name").unwrap();

        name.set_value("Grace").unwrap();
        assert!(group.is_modified());
        group.discard().unwrap();

        assert_eq!(cells.cell("name").unwrap().value(), Value::from("Ada"));
        assert_eq!(name.value(), Some(Value::from("Ada")));
        assert!(group.cell("name").unwrap().is_in_transaction());
        assert!(!group.is_modified());
    }

    #[test]
    fn unbuffered_edits_notify_immediately_and_discard_is_noop() {
        let (cells, record) = person();
        let mut group = BindingGroup::with_record(record).with_config(GroupConfig::unbuffered());
        let age = field(1);
        group.bind(age.clone(), "age").unwrap();
        assert!(age.is_read_through());

        let hits = Rc::new(Cell::new(0u32));
        let h = Rc::clone(&hits);
        let _sub = group.cell("age").unwrap().subscribe(move |_| h.set(h.get() + 1));

        age.set_value(40).unwrap();
        assert_eq!(hits.get(), 1);
        group.discard().unwrap();
        assert_eq!(cells.cell("age").unwrap().value(), Value::from(40));
    }

    #[test]
    fn switching_buffering_off_closes_sessions() {
        let (cells, record) = person();
        let mut group = BindingGroup::with_record(record);
        let age = field(1);
        group.bind(age.clone(), "age").unwrap();
        let hits = Rc::new(Cell::new(0u32));
        let h = Rc::clone(&hits);
        let _sub = group.cell("age").unwrap().subscribe(move |_| h.set(h.get() + 1));
        age.set_value(50).unwrap();

        group.set_buffered(false);
        assert!(age.is_write_through());
        assert!(!group.cell("age").unwrap().is_buffered());
        assert!(!group.cell("age").unwrap().is_in_transaction());
        assert_eq!(hits.get(), 1, "pending change delivered once");
        assert_eq!(cells.cell("age").unwrap().value(), Value::from(50));
        assert!(!group.is_modified());

        age.set_value(51).unwrap();
        assert_eq!(hits.get(), 2);
        group.discard().unwrap();
        assert_eq!(cells.cell("age").unwrap().value(), Value::from(51));

        group.set_buffered(true);
        assert!(group.cell("age").unwrap().is_in_transaction());
        age.set_value(52).unwrap();
        assert_eq!(hits.get(), 2);
        group.discard().unwrap();
        assert_eq!(cells.cell("age").unwrap().value(), Value::from(51));
    }

    #[test]
    fn enabled_and_read_only_cascade() {
        let (_, record) = person();
        let mut group = BindingGroup::with_record(record);
        let age = field(1);
        let id = field(2);
        group.bind(age.clone(), "age").unwrap();
        group.bind(id.clone(), "id").unwrap();

        group.set_enabled(false);
        assert!(!age.is_enabled() && !id.is_enabled());

        group.set_read_only(true);
        assert!(age.is_read_only() && id.is_read_only());
        group.set_read_only(false);
        assert!(!age.is_read_only());
        assert!(id.is_read_only(), "read-only slot wins");
        assert!(!group.is_read_only());
    }

    #[test]
    fn rebind_to_record_missing_a_slot_changes_nothing() {
        let (cells, record) = person();
        let mut group = BindingGroup::with_record(record);
        let name = field(1);
        let age = field(2);
        group.bind(name.clone(), "name").unwrap();
        group.bind(age.clone(), "age").unwrap();
        name.set_value("Grace").unwrap();

        let partial: Rc<dyn Record> =
            Rc::new(MemoryRecord::new().with_slot("name", ValueCell::new("Linus")));
        let err = group.set_record(Some(partial)).unwrap_err();
        assert_eq!(err, BindingError::SlotNotFound { slot: "age".into() });
        assert_eq!(name.value(), Some(Value::from("Grace")));
        assert_eq!(cells.cell("name").unwrap().value(), Value::from("Grace"));
    }

    #[test]
    fn rebind_rolls_back_old_record_and_resolves_new() {
        let (old_cells, record) = person();
        let mut group = BindingGroup::with_record(record);
        let name = field(1);
        group.bind(name.clone(), "name").unwrap();
        name.set_value("Grace").unwrap();

        let next = MemoryRecord::new().with_slot("name", ValueCell::new("Linus"));
        group.set_record(Some(Rc::new(next.clone()))).unwrap();

        assert_eq!(old_cells.cell("name").unwrap().value(), Value::from("Ada"));
        assert_eq!(name.value(), Some(Value::from("Linus")));
        name.set_value("Ken").unwrap();
        assert_eq!(next.cell("name").unwrap().value(), Value::from("Ken"));

        group.set_record(None).unwrap();
        assert_eq!(name.value(), None);
        assert_eq!(next.cell("name").unwrap().value(), Value::from("Linus"));
        assert_eq!(group.len(), 1);
    }

    #[traced_test]
    #[test]
    fn veto_is_logged() {
        let (_, record) = person();
        let mut group = BindingGroup::with_record(record);
        group.bind(field(1), "age").unwrap();
        group.add_commit_handler(Rc::new(Veto));
        let _ = group.commit();
        assert!(logs_contain("commit vetoed by pre-commit handler"));
    }

    #[traced_test]
    #[test]
    fn successful_commit_is_logged() {
        let (_, record) = person();
        let mut group = BindingGroup::with_record(record);
        group.bind(field(1), "age").unwrap();
        group.commit().unwrap();
        assert!(logs_contain("commit completed"));
    }

    #[derive(Default)]
    struct CountVisitor {
        bindings: Option<u64>,
        handlers: Option<u64>,
    }

    impl Visit for CountVisitor {
        fn record_u64(&mut self, field: &TraceField, value: u64) {
            match field.name() {
                "bindings" => self.bindings = Some(value),
                "handlers" => self.handlers = Some(value),
                _ => {}
            }
        }

        fn record_i64(&mut self, field: &TraceField, value: i64) {
            if value >= 0 {
                self.record_u64(field, value as u64);
            }
        }

        fn record_debug(&mut self, _field: &TraceField, _value: &dyn std::fmt::Debug) {}
    }

    struct CommitSpanSubscriber {
        next_id: AtomicU64,
        spans: Arc<Mutex<Vec<(u64, u64)>>>,
    }

    impl tracing::Subscriber for CommitSpanSubscriber {
        fn enabled(&self, _metadata: &tracing::Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, attrs: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            if attrs.metadata().name() == "fieldgroup.commit" {
                let mut visitor = CountVisitor::default();
                attrs.record(&mut visitor);
                self.spans.lock().expect("span capture lock").push((
                    visitor.bindings.unwrap_or(0),
                    visitor.handlers.unwrap_or(0),
                ));
            }
            tracing::span::Id::from_u64(self.next_id.fetch_add(1, Ordering::Relaxed))
        }

        fn record(&self, _span: &tracing::span::Id, _values: &tracing::span::Record<'_>) {}

        fn record_follows_from(&self, _span: &tracing::span::Id, _follows: &tracing::span::Id) {}

        fn event(&self, _event: &tracing::Event<'_>) {}

        fn enter(&self, _span: &tracing::span::Id) {}

        fn exit(&self, _span: &tracing::span::Id) {}
    }

    #[test]
    fn commit_span_reports_binding_and_handler_counts() {
        let (_, record) = person();
        let mut group = BindingGroup::with_record(record);
        group.bind(field(1), "name").unwrap();
        group.bind(field(2), "age").unwrap();
        group.add_commit_handler(Rc::new(Witness::default()));

        let spans = Arc::new(Mutex::new(Vec::new()));
        let subscriber = CommitSpanSubscriber {
            next_id: AtomicU64::new(1),
            spans: Arc::clone(&spans),
        };
        {
            let _guard = tracing::subscriber::set_default(subscriber);
            group.commit().unwrap();
        }
        assert_eq!(*spans.lock().expect("span capture lock"), vec![(2, 1)]);
    }
}
