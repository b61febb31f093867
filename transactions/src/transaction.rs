//! Transactions: ordered groups of operations committed as one history entry.
//!
//! A [`Transaction`] collects the operations pushed while it is the innermost
//! open scope of a [`TransactionStack`](crate::TransactionStack). Nested
//! transactions are stored as entries of their parent at the position where
//! they were closed, so the overall order is the same as if the child's
//! operations had been pushed into the parent directly.
//!
//! ```text
//! begin T1 ─ push a ─ begin T2 ─ push b ─ push c ─ end T2 ─ push d ─ end T1
//!
//! T1: [ a, T2: [ b, c ], d ]
//!     redo order: a b c d
//!     undo order: d c b a
//! ```

use std::fmt;

use crate::error::{TransactionResult, UsageError};
use crate::operation::{Direction, Editable, Operation, OperationRecord};

/// Unique identifier of a transaction within its stack.
///
/// Identifiers are allocated monotonically and never reused by a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub(crate) u64);

impl TransactionId {
    /// Returns the raw identifier value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to an open transaction, returned by
/// [`TransactionStack::begin_transaction`](crate::TransactionStack::begin_transaction).
///
/// The handle is a plain identifier; ending the transaction goes through the
/// stack that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle {
    id: TransactionId,
}

impl TransactionHandle {
    pub(crate) fn new(id: TransactionId) -> Self {
        Self { id }
    }

    /// Identifier of the transaction this handle refers to.
    pub fn id(self) -> TransactionId {
        self.id
    }
}

/// How an open transaction is ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndAction {
    /// Keep the transaction: append it to the history, or to its parent when nested.
    Commit,
    /// Roll the transaction back immediately and drop it.
    Discard,
}

pub(crate) enum Entry<T: Editable> {
    Operation(OperationRecord<T>),
    Nested(Transaction<T>),
}

impl<T: Editable> Entry<T> {
    /// Returns `true` if something in this entry still has to run in `direction`.
    fn is_pending(&self, direction: Direction) -> bool {
        match self {
            Entry::Operation(record) => record.can_run(direction),
            Entry::Nested(child) => child.is_pending(direction),
        }
    }

    fn run(
        &mut self,
        direction: Direction,
        target: &mut T,
        transaction: TransactionId,
        position: usize,
    ) -> TransactionResult {
        match self {
            Entry::Operation(record) => record.run(direction, target, transaction, position),
            Entry::Nested(child) => child.run(direction, target),
        }
    }
}

/// An ordered group of operations and nested transactions.
///
/// Open transactions live on the stack's scope stack and accept operations;
/// closed transactions are immutable and only ever replayed as a whole.
pub struct Transaction<T: Editable> {
    id: TransactionId,
    description: Option<String>,
    entries: Vec<Entry<T>>,
    depth: usize,
    closed: bool,
}

impl<T: Editable> Transaction<T> {
    pub(crate) fn new(id: TransactionId, description: Option<String>, depth: usize) -> Self {
        Self {
            id,
            description,
            entries: Vec::new(),
            depth,
            closed: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Human-readable label for history UIs.
    ///
    /// Falls back to the description of the first operation, then to
    /// `"Transaction"` for a transaction without operations.
    pub fn description(&self) -> &str {
        if let Some(description) = &self.description {
            return description;
        }
        self.first_operation_description().unwrap_or("Transaction")
    }

    /// Nesting depth at which the transaction was opened (0 for a root).
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of direct entries (operations and nested transactions).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the transaction holds no operation, at any depth.
    pub fn is_empty(&self) -> bool {
        self.operation_count() == 0
    }

    /// Number of operations, counting those of nested transactions.
    pub fn operation_count(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| match entry {
                Entry::Operation(_) => 1,
                Entry::Nested(child) => child.operation_count(),
            })
            .sum()
    }

    /// Descriptions of all operations in redo order, nested ones spliced in.
    pub fn operation_descriptions(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(self.entries.len());
        self.collect_descriptions(&mut out);
        out
    }

    fn collect_descriptions<'a>(&'a self, out: &mut Vec<&'a str>) {
        for entry in &self.entries {
            match entry {
                Entry::Operation(record) => out.push(record.description()),
                Entry::Nested(child) => child.collect_descriptions(out),
            }
        }
    }

    fn first_operation_description(&self) -> Option<&str> {
        self.entries.iter().find_map(|entry| match entry {
            Entry::Operation(record) => Some(record.description()),
            Entry::Nested(child) => child.first_operation_description(),
        })
    }

    /// Appends an operation whose effect is already applied.
    ///
    /// With `merge` set, the previous operation entry may absorb `operation`.
    pub(crate) fn push_operation(
        &mut self,
        operation: Box<dyn Operation<T>>,
        merge: bool,
    ) -> TransactionResult {
        if self.closed {
            return Err(UsageError::TransactionClosed(self.id).into());
        }

        let operation = match self.entries.last_mut() {
            Some(Entry::Operation(last)) if merge => match last.try_merge(operation) {
                None => {
                    log::trace!("Merged operation into \"{}\" in {}", last.description(), self.id);
                    return Ok(());
                }
                Some(returned) => returned,
            },
            _ => operation,
        };

        log::trace!("Pushed \"{}\" into {}", operation.description(), self.id);
        self.entries.push(Entry::Operation(OperationRecord::new(operation)));
        Ok(())
    }

    /// Splices a committed child transaction into this one.
    pub(crate) fn push_nested(&mut self, child: Transaction<T>) -> TransactionResult {
        if self.closed {
            return Err(UsageError::TransactionClosed(self.id).into());
        }
        self.entries.push(Entry::Nested(child));
        Ok(())
    }

    /// Seals the transaction. Operations are frozen and no longer merge.
    pub(crate) fn close(&mut self) {
        self.closed = true;
        for entry in &mut self.entries {
            match entry {
                Entry::Operation(record) => record.freeze(),
                Entry::Nested(child) => child.close(),
            }
        }
    }

    /// Runs every pending entry in `direction`: reverse push order for undo,
    /// push order for redo.
    ///
    /// If an entry fails, the entries that already ran are run in the
    /// opposite direction (most recent first) so the transaction returns to
    /// the state it had before the call, and the failure is returned. The
    /// failing operation itself is not retried.
    pub(crate) fn run(&mut self, direction: Direction, target: &mut T) -> TransactionResult {
        let len = self.entries.len();
        let mut completed = Vec::with_capacity(len);

        for step in 0..len {
            let index = match direction {
                Direction::Undo => len - 1 - step,
                Direction::Redo => step,
            };
            if !self.entries[index].is_pending(direction) {
                continue;
            }
            if let Err(err) = self.entries[index].run(direction, target, self.id, index) {
                log::warn!("{direction} of {} failed: {err}", self.id);
                self.compensate(&completed, direction.opposite(), target);
                return Err(err);
            }
            completed.push(index);
        }
        Ok(())
    }

    fn compensate(&mut self, completed: &[usize], direction: Direction, target: &mut T) {
        for &index in completed.iter().rev() {
            if let Err(err) = self.entries[index].run(direction, target, self.id, index) {
                log::error!(
                    "Could not restore {} after a failed {}: {err}",
                    self.id,
                    direction.opposite()
                );
                return;
            }
        }
    }

    /// Returns `true` if an entry of this transaction still has to run in `direction`.
    fn is_pending(&self, direction: Direction) -> bool {
        self.entries.iter().any(|entry| entry.is_pending(direction))
    }
}

impl<T: Editable> fmt::Debug for Transaction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("description", &self.description())
            .field("entries", &self.entries.len())
            .field("operations", &self.operation_count())
            .field("depth", &self.depth)
            .field("closed", &self.closed)
            .finish()
    }
}

impl From<TransactionHandle> for TransactionId {
    fn from(handle: TransactionHandle) -> Self {
        handle.id
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::TransactionError;
    use crate::operation::{OperationError, OperationResult};

    /// Target that records every call in order.
    #[derive(Default)]
    struct Journal {
        calls: Vec<String>,
    }

    impl Editable for Journal {}

    #[derive(Debug)]
    struct Step {
        name: &'static str,
    }

    impl Operation<Journal> for Step {
        fn undo(&mut self, target: &mut Journal) -> OperationResult {
            target.calls.push(format!("undo {}", self.name));
            Ok(())
        }

        fn redo(&mut self, target: &mut Journal) -> OperationResult {
            target.calls.push(format!("redo {}", self.name));
            Ok(())
        }

        fn description(&self) -> &str {
            self.name
        }
    }

    /// Fails on the given direction while `armed` is set.
    #[derive(Debug)]
    struct Flaky {
        name: &'static str,
        fail_on: Direction,
        armed: Arc<Mutex<bool>>,
    }

    impl Flaky {
        fn attempt(&self, direction: Direction, target: &mut Journal) -> OperationResult {
            if direction == self.fail_on && *self.armed.lock().unwrap() {
                return Err(OperationError::Custom(format!("{} refused", self.name)));
            }
            target.calls.push(format!("{direction} {}", self.name));
            Ok(())
        }
    }

    impl Operation<Journal> for Flaky {
        fn undo(&mut self, target: &mut Journal) -> OperationResult {
            self.attempt(Direction::Undo, target)
        }

        fn redo(&mut self, target: &mut Journal) -> OperationResult {
            self.attempt(Direction::Redo, target)
        }

        fn description(&self) -> &str {
            self.name
        }
    }

    fn transaction(id: u64) -> Transaction<Journal> {
        Transaction::new(TransactionId(id), None, 0)
    }

    fn push(tx: &mut Transaction<Journal>, name: &'static str) {
        tx.push_operation(Box::new(Step { name }), true).unwrap();
    }

    #[test]
    fn undo_runs_in_reverse_order() {
        let mut journal = Journal::default();
        let mut tx = transaction(1);
        push(&mut tx, "a");
        push(&mut tx, "b");
        push(&mut tx, "c");
        tx.close();

        tx.run(Direction::Undo, &mut journal).unwrap();
        assert_eq!(journal.calls, ["undo c", "undo b", "undo a"]);
    }

    #[test]
    fn redo_runs_in_push_order() {
        let mut journal = Journal::default();
        let mut tx = transaction(1);
        push(&mut tx, "a");
        push(&mut tx, "b");
        push(&mut tx, "c");
        tx.close();

        tx.run(Direction::Undo, &mut journal).unwrap();
        journal.calls.clear();
        tx.run(Direction::Redo, &mut journal).unwrap();
        assert_eq!(journal.calls, ["redo a", "redo b", "redo c"]);
    }

    #[test]
    fn nested_entries_are_spliced_in_order() {
        let mut journal = Journal::default();
        let mut parent = transaction(1);
        push(&mut parent, "a");

        let mut child = Transaction::new(TransactionId(2), None, 1);
        push(&mut child, "b");
        push(&mut child, "c");
        child.close();
        parent.push_nested(child).unwrap();

        push(&mut parent, "d");
        parent.close();

        assert_eq!(parent.operation_descriptions(), ["a", "b", "c", "d"]);
        assert_eq!(parent.operation_count(), 4);
        assert_eq!(parent.len(), 3);

        parent.run(Direction::Undo, &mut journal).unwrap();
        assert_eq!(journal.calls, ["undo d", "undo c", "undo b", "undo a"]);
    }

    #[test]
    fn closed_transaction_rejects_operations() {
        let mut tx = transaction(3);
        tx.close();
        let err = tx
            .push_operation(Box::new(Step { name: "late" }), true)
            .unwrap_err();
        assert_eq!(
            err,
            TransactionError::Usage(UsageError::TransactionClosed(TransactionId(3)))
        );
        assert!(tx.is_empty());
    }

    #[test]
    fn description_fallbacks() {
        let mut tx = transaction(1);
        assert_eq!(tx.description(), "Transaction");
        push(&mut tx, "Paint");
        assert_eq!(tx.description(), "Paint");

        let named = Transaction::<Journal>::new(TransactionId(2), Some("Align".into()), 0);
        assert_eq!(named.description(), "Align");
    }

    #[test]
    fn failed_undo_restores_completed_operations() {
        let armed = Arc::new(Mutex::new(true));
        let mut journal = Journal::default();
        let mut tx = transaction(5);
        push(&mut tx, "a");
        tx.push_operation(
            Box::new(Flaky {
                name: "b",
                fail_on: Direction::Undo,
                armed: armed.clone(),
            }),
            true,
        )
        .unwrap();
        push(&mut tx, "c");
        tx.close();

        let err = tx.run(Direction::Undo, &mut journal).unwrap_err();
        assert!(matches!(
            err,
            TransactionError::OperationFailed {
                transaction: TransactionId(5),
                position: 1,
                direction: Direction::Undo,
                ..
            }
        ));
        // c was undone, then re-applied; a never ran
        assert_eq!(journal.calls, ["undo c", "redo c"]);

        *armed.lock().unwrap() = false;
        journal.calls.clear();
        tx.run(Direction::Undo, &mut journal).unwrap();
        assert_eq!(journal.calls, ["undo c", "undo b", "undo a"]);
    }

    #[test]
    fn failed_restore_keeps_operation_states_consistent() {
        let undo_armed = Arc::new(Mutex::new(true));
        let redo_armed = Arc::new(Mutex::new(true));
        let mut journal = Journal::default();
        let mut tx = transaction(4);
        push(&mut tx, "a");
        for (name, fail_on, armed) in [
            ("b", Direction::Undo, undo_armed.clone()),
            ("c", Direction::Redo, redo_armed.clone()),
        ] {
            tx.push_operation(
                Box::new(Flaky {
                    name,
                    fail_on,
                    armed,
                }),
                true,
            )
            .unwrap();
        }
        tx.close();

        // c is undone, b fails, and re-applying c fails as well
        let err = tx.run(Direction::Undo, &mut journal).unwrap_err();
        assert!(matches!(
            err,
            TransactionError::OperationFailed {
                position: 1,
                direction: Direction::Undo,
                ..
            }
        ));
        assert_eq!(journal.calls, ["undo c"]);

        // A retry skips c, which is already undone
        *undo_armed.lock().unwrap() = false;
        journal.calls.clear();
        tx.run(Direction::Undo, &mut journal).unwrap();
        assert_eq!(journal.calls, ["undo b", "undo a"]);

        *redo_armed.lock().unwrap() = false;
        journal.calls.clear();
        tx.run(Direction::Redo, &mut journal).unwrap();
        assert_eq!(journal.calls, ["redo a", "redo b", "redo c"]);
    }

    #[test]
    fn nested_failure_is_reported_by_the_child() {
        let armed = Arc::new(Mutex::new(true));
        let mut journal = Journal::default();
        let mut parent = transaction(1);
        push(&mut parent, "a");

        let mut child = Transaction::new(TransactionId(2), None, 1);
        child
            .push_operation(
                Box::new(Flaky {
                    name: "b",
                    fail_on: Direction::Undo,
                    armed,
                }),
                true,
            )
            .unwrap();
        push(&mut child, "c");
        child.close();
        parent.push_nested(child).unwrap();
        push(&mut parent, "d");
        parent.close();

        let err = parent.run(Direction::Undo, &mut journal).unwrap_err();
        assert!(matches!(
            err,
            TransactionError::OperationFailed {
                transaction: TransactionId(2),
                position: 0,
                ..
            }
        ));
        assert_eq!(journal.calls, ["undo d", "undo c", "redo c", "redo d"]);
    }

    #[test]
    fn merge_coalesces_only_while_open() {
        #[derive(Debug)]
        struct SetValue {
            old_value: i32,
            new_value: i32,
        }

        impl Operation<Journal> for SetValue {
            fn undo(&mut self, target: &mut Journal) -> OperationResult {
                target.calls.push(format!("set {}", self.old_value));
                Ok(())
            }

            fn redo(&mut self, target: &mut Journal) -> OperationResult {
                target.calls.push(format!("set {}", self.new_value));
                Ok(())
            }

            fn description(&self) -> &str {
                "Set value"
            }

            fn merge(&mut self, other: &dyn Operation<Journal>) -> bool {
                if let Some(other) = other.as_any().downcast_ref::<SetValue>() {
                    self.new_value = other.new_value;
                    return true;
                }
                false
            }
        }

        let mut journal = Journal::default();
        let mut tx = transaction(1);
        for (old_value, new_value) in [(0, 10), (10, 20), (20, 30)] {
            tx.push_operation(Box::new(SetValue { old_value, new_value }), true)
                .unwrap();
        }
        assert_eq!(tx.operation_count(), 1);

        tx.push_operation(Box::new(SetValue { old_value: 30, new_value: 40 }), false)
            .unwrap();
        assert_eq!(tx.operation_count(), 2);
        tx.close();

        tx.run(Direction::Undo, &mut journal).unwrap();
        assert_eq!(journal.calls, ["set 30", "set 0"]);
    }

    #[test]
    fn transaction_id_display() {
        assert_eq!(TransactionId(12).to_string(), "#12");
        assert_eq!(TransactionHandle::new(TransactionId(3)).id().value(), 3);
    }
}
