//! Bounded undo/redo history of transactions.
//!
//! [`TransactionStack`] keeps closed transactions in a [`VecDeque`] with a
//! cursor. Entries before the cursor are done (undoable), entries from the
//! cursor on are undone (redoable).
//!
//! ```text
//! commit T1..T4 (capacity 3)      [T2 T3 T4]|        T1 evicted
//! undo x2                         [T2|T3 T4]
//! redo                            [T2 T3|T4]
//! commit T5                       [T2 T3 T5]|        T4 truncated
//! ```
//!
//! Open transactions live on a separate stack of scopes. The top scope is the
//! innermost transaction and receives every pushed operation; ending it moves
//! it into its parent, or into the history when it is a root.
//!
//! # Failures
//!
//! When an operation fails during undo or redo, the cursor does not move and
//! the operations of that transaction that already ran are run back, so the
//! call behaves as if it never happened. The error names the transaction and
//! the position of the failing operation.

use std::collections::VecDeque;
use std::fmt;

use crate::config::{EmptyTransactionPolicy, StackConfig};
use crate::error::{TransactionError, TransactionResult, UsageError};
use crate::event::{DiscardReason, ObserverId, StackEvent, StackObserver};
use crate::operation::{Direction, Editable, Operation};
use crate::transaction::{EndAction, Transaction, TransactionHandle, TransactionId};

/// Manages an undo/redo history of transactions.
///
/// # Example
///
/// ```ignore
/// let mut stack = TransactionStack::new(50)?;
/// let mut scene = MyScene::new();
///
/// let tx = stack.begin_transaction_with("Align selection")?;
/// for entity in selection {
///     stack.execute(Box::new(MoveEntity::new(entity, target_pos)), &mut scene)?;
/// }
/// stack.commit_transaction(tx)?;
///
/// stack.undo(&mut scene)?;
/// stack.redo(&mut scene)?;
/// ```
pub struct TransactionStack<T: Editable> {
    history: VecDeque<Transaction<T>>,
    cursor: usize,
    open: Vec<Transaction<T>>,
    config: StackConfig,
    next_id: u64,
    /// Cursor position of the last save.
    ///
    /// `None` when never saved, or when the saved state became unreachable
    /// (evicted, or on a truncated redo branch).
    save_point: Option<usize>,
    observers: Vec<(ObserverId, Box<dyn StackObserver>)>,
    next_observer: u64,
    disposed: bool,
}

impl<T: Editable> TransactionStack<T> {
    /// Creates an empty stack retaining at most `capacity` transactions.
    ///
    /// Returns [`TransactionError::InvalidCapacity`] for a zero capacity.
    pub fn new(capacity: usize) -> TransactionResult<Self> {
        Self::with_config(StackConfig::with_capacity(capacity))
    }

    /// Creates an empty stack from a full configuration.
    pub fn with_config(config: StackConfig) -> TransactionResult<Self> {
        config.validate()?;
        log::debug!(
            "Created transaction stack: capacity {}, empty transactions {:?}",
            config.capacity,
            config.empty_transactions
        );
        Ok(Self {
            history: VecDeque::with_capacity(config.capacity.min(64)),
            cursor: 0,
            open: Vec::new(),
            config,
            next_id: 1,
            save_point: Some(0),
            observers: Vec::new(),
            next_observer: 0,
            disposed: false,
        })
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Opens a transaction.
    ///
    /// With no transaction open this starts a root transaction; otherwise the
    /// new transaction is nested in the innermost open one.
    pub fn begin_transaction(&mut self) -> TransactionResult<TransactionHandle> {
        self.open_scope(None)
    }

    /// Opens a transaction with a description for history UIs.
    pub fn begin_transaction_with(
        &mut self,
        description: impl Into<String>,
    ) -> TransactionResult<TransactionHandle> {
        self.open_scope(Some(description.into()))
    }

    fn open_scope(&mut self, description: Option<String>) -> TransactionResult<TransactionHandle> {
        self.ensure_live()?;
        let id = TransactionId(self.next_id);
        self.next_id += 1;
        let depth = self.open.len();
        log::trace!("Opened transaction {id} at depth {depth}");
        self.open.push(Transaction::new(id, description, depth));
        Ok(TransactionHandle::new(id))
    }

    /// Ends the innermost open transaction.
    ///
    /// `target` is only touched by [`EndAction::Discard`], which rolls the
    /// transaction back.
    pub fn end_transaction(
        &mut self,
        handle: TransactionHandle,
        action: EndAction,
        target: &mut T,
    ) -> TransactionResult {
        match action {
            EndAction::Commit => self.commit_transaction(handle),
            EndAction::Discard => self.discard_transaction(handle, target),
        }
    }

    /// Closes the innermost open transaction and keeps it.
    ///
    /// A root transaction enters the history: the redo side is truncated and
    /// the oldest transaction is evicted if the stack is full. A nested
    /// transaction is spliced into its parent. Empty transactions follow the
    /// configured [`EmptyTransactionPolicy`].
    pub fn commit_transaction(&mut self, handle: TransactionHandle) -> TransactionResult {
        let mut transaction = self.take_innermost(handle)?;
        transaction.close();

        if transaction.is_empty() && self.config.empty_transactions == EmptyTransactionPolicy::Drop
        {
            log::debug!("Dropped empty transaction {}", transaction.id());
            return Ok(());
        }

        if let Some(parent) = self.open.last_mut() {
            log::trace!("Nested {} into {}", transaction.id(), parent.id());
            return parent.push_nested(transaction);
        }

        self.record(transaction);
        Ok(())
    }

    /// Rolls back the innermost open transaction and drops it.
    ///
    /// Its operations are undone in reverse order and disposed; nothing enters
    /// the history. If an operation fails, the transaction is restored and
    /// stays open, and the failure is returned.
    pub fn discard_transaction(
        &mut self,
        handle: TransactionHandle,
        target: &mut T,
    ) -> TransactionResult {
        let mut transaction = self.take_innermost(handle)?;
        if let Err(err) = transaction.run(Direction::Undo, target) {
            self.open.push(transaction);
            return Err(err);
        }

        let id = transaction.id();
        log::debug!("Rolled back transaction {id}");
        drop(transaction);
        self.notify(StackEvent::Discarded {
            transaction: id,
            reason: DiscardReason::RolledBack,
        });
        Ok(())
    }

    /// Pops the innermost open transaction if `handle` refers to it.
    fn take_innermost(&mut self, handle: TransactionHandle) -> TransactionResult<Transaction<T>> {
        self.ensure_live()?;
        let id = handle.id();
        let innermost = self
            .open
            .last()
            .map(Transaction::id)
            .ok_or(UsageError::UnknownTransaction(id))?;

        if innermost != id {
            if self.open.iter().any(|t| t.id() == id) {
                return Err(UsageError::NotInnermost {
                    handle: id,
                    innermost,
                }
                .into());
            }
            return Err(UsageError::UnknownTransaction(id).into());
        }

        self.open
            .pop()
            .ok_or_else(|| UsageError::UnknownTransaction(id).into())
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Pushes an operation whose effect is already applied into the innermost
    /// open transaction.
    ///
    /// Returns [`UsageError::NoOpenTransaction`] if no transaction is open.
    pub fn push_operation(&mut self, operation: Box<dyn Operation<T>>) -> TransactionResult {
        self.ensure_live()?;
        let merge = self.config.merge_operations;
        let scope = self
            .open
            .last_mut()
            .ok_or(UsageError::NoOpenTransaction)?;
        scope.push_operation(operation, merge)
    }

    /// Applies an operation to the target and records it.
    ///
    /// Inside an open transaction the operation joins the innermost one.
    /// Otherwise it is committed as a transaction of its own. If applying
    /// fails, nothing is recorded.
    pub fn execute(
        &mut self,
        mut operation: Box<dyn Operation<T>>,
        target: &mut T,
    ) -> TransactionResult {
        self.ensure_live()?;
        let implicit = if self.open.is_empty() {
            Some(self.begin_transaction()?)
        } else {
            None
        };
        let (transaction, position) = self
            .open
            .last()
            .map(|scope| (scope.id(), scope.len()))
            .ok_or(UsageError::NoOpenTransaction)?;

        if let Err(source) = operation.redo(target) {
            if implicit.is_some() {
                self.open.pop();
            }
            return Err(TransactionError::OperationFailed {
                transaction,
                position,
                direction: Direction::Redo,
                description: operation.description().to_owned(),
                source,
            });
        }

        self.push_operation(operation)?;
        if let Some(handle) = implicit {
            self.commit_transaction(handle)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Undo / redo
    // ------------------------------------------------------------------

    /// Undoes the transaction behind the cursor.
    ///
    /// Returns `Ok(None)` when there is nothing to undo. On failure the
    /// cursor stays where it was, so the failed history entry is still the
    /// one at `cursor() - 1`.
    pub fn undo(&mut self, target: &mut T) -> TransactionResult<Option<TransactionId>> {
        self.ensure_live()?;
        self.ensure_idle("undo")?;
        if self.cursor == 0 {
            log::trace!("Nothing to undo");
            return Ok(None);
        }

        let index = self.cursor - 1;
        let Some(transaction) = self.history.get_mut(index) else {
            return Ok(None);
        };
        transaction.run(Direction::Undo, target)?;
        let id = transaction.id();
        log::debug!("Undid transaction {id} \"{}\"", transaction.description());

        self.cursor = index;
        self.notify(StackEvent::Undone { transaction: id });
        Ok(Some(id))
    }

    /// Redoes the transaction ahead of the cursor.
    ///
    /// Returns `Ok(None)` when there is nothing to redo. On failure the
    /// cursor stays where it was, so the failed history entry is still the
    /// one at `cursor()`.
    pub fn redo(&mut self, target: &mut T) -> TransactionResult<Option<TransactionId>> {
        self.ensure_live()?;
        self.ensure_idle("redo")?;
        let index = self.cursor;
        let Some(transaction) = self.history.get_mut(index) else {
            log::trace!("Nothing to redo");
            return Ok(None);
        };
        transaction.run(Direction::Redo, target)?;
        let id = transaction.id();
        log::debug!("Redid transaction {id} \"{}\"", transaction.description());

        self.cursor = index + 1;
        self.notify(StackEvent::Redone { transaction: id });
        Ok(Some(id))
    }

    // ------------------------------------------------------------------
    // History management
    // ------------------------------------------------------------------

    /// Disposes every transaction and resets the cursor.
    ///
    /// If the current state was the saved state, it remains so after
    /// clearing. Otherwise the save point is lost.
    pub fn clear(&mut self) -> TransactionResult {
        self.ensure_live()?;
        self.ensure_idle("clear")?;
        self.dispose_history();
        self.notify(StackEvent::Cleared);
        Ok(())
    }

    /// Disposes all transactions, including open ones, and retires the stack.
    ///
    /// Every later call that changes the stack fails with
    /// [`TransactionError::Disposed`]. Calling `dispose` again is a no-op.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if !self.open.is_empty() {
            log::warn!(
                "Disposing transaction stack with {} open transaction(s)",
                self.open.len()
            );
        }
        self.open.clear();
        self.dispose_history();
        self.notify(StackEvent::Cleared);
        self.observers.clear();
        self.disposed = true;
        log::debug!("Disposed transaction stack");
    }

    fn dispose_history(&mut self) {
        self.save_point = if self.save_point == Some(self.cursor) {
            Some(0)
        } else {
            None
        };
        log::debug!("Clearing {} transaction(s)", self.history.len());
        self.history.clear();
        self.cursor = 0;
    }

    /// Changes the capacity bound.
    ///
    /// Shrinking evicts the oldest done transactions. Redoable transactions
    /// are never evicted: a capacity below [`redo_count`](Self::redo_count) is
    /// rejected and nothing changes.
    pub fn set_capacity(&mut self, capacity: usize) -> TransactionResult {
        self.ensure_live()?;
        if capacity == 0 {
            return Err(TransactionError::InvalidCapacity(capacity));
        }
        let redo_count = self.redo_count();
        if capacity < redo_count {
            return Err(TransactionError::CapacityBelowRedo {
                requested: capacity,
                redo_count,
            });
        }

        while self.history.len() > capacity {
            self.evict_oldest();
        }
        if self.config.capacity != capacity {
            self.config.capacity = capacity;
            self.notify(StackEvent::CapacityChanged { capacity });
        }
        Ok(())
    }

    fn record(&mut self, transaction: Transaction<T>) {
        self.truncate_redo();
        while self.history.len() >= self.config.capacity {
            self.evict_oldest();
        }

        let id = transaction.id();
        let description = transaction.description().to_owned();
        self.history.push_back(transaction);
        self.cursor = self.history.len();
        log::debug!(
            "Committed transaction {id} \"{description}\" ({}/{})",
            self.history.len(),
            self.config.capacity
        );
        self.notify(StackEvent::Committed {
            transaction: id,
            description,
        });
    }

    /// Drops every transaction after the cursor.
    fn truncate_redo(&mut self) {
        if self.cursor >= self.history.len() {
            return;
        }
        if let Some(save_point) = self.save_point
            && save_point > self.cursor
        {
            self.save_point = None;
        }

        let truncated: Vec<_> = self.history.drain(self.cursor..).collect();
        for transaction in truncated {
            let id = transaction.id();
            log::debug!("Truncated transaction {id}");
            drop(transaction);
            self.notify(StackEvent::Discarded {
                transaction: id,
                reason: DiscardReason::Truncated,
            });
        }
    }

    /// Drops the oldest transaction of the done side.
    fn evict_oldest(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let Some(transaction) = self.history.pop_front() else {
            return;
        };
        self.cursor -= 1;
        self.save_point = match self.save_point {
            Some(0) | None => None,
            Some(save_point) => Some(save_point - 1),
        };

        let id = transaction.id();
        log::debug!("Evicted transaction {id}");
        drop(transaction);
        self.notify(StackEvent::Discarded {
            transaction: id,
            reason: DiscardReason::Evicted,
        });
    }

    // ------------------------------------------------------------------
    // Save point
    // ------------------------------------------------------------------

    /// Records the current state as the saved state.
    pub fn mark_saved(&mut self) {
        self.save_point = Some(self.cursor);
    }

    /// Returns `true` if the current state differs from the last saved state.
    ///
    /// Also `true` if [`mark_saved`](Self::mark_saved) was never called after
    /// a change, or if the saved state is unreachable (evicted or on a
    /// truncated redo branch).
    pub fn has_unsaved_changes(&self) -> bool {
        self.save_point != Some(self.cursor)
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Registers an observer notified after every history change.
    pub fn subscribe(&mut self, observer: impl StackObserver + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Removes an observer. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        self.observers.len() != before
    }

    fn notify(&mut self, event: StackEvent) {
        for (_, observer) in &mut self.observers {
            observer.on_event(&event);
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Returns `true` if there are transactions that can be undone.
    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    /// Returns `true` if there are transactions that can be redone.
    pub fn can_redo(&self) -> bool {
        self.cursor < self.history.len()
    }

    /// Number of done transactions (behind the cursor).
    pub fn undo_count(&self) -> usize {
        self.cursor
    }

    /// Number of undone transactions (ahead of the cursor).
    pub fn redo_count(&self) -> usize {
        self.history.len() - self.cursor
    }

    /// Position of the cursor, in `0..=len()`.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of transactions in the history.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.history.len() >= self.config.capacity
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Returns `true` while at least one transaction is open.
    pub fn is_transaction_in_progress(&self) -> bool {
        !self.open.is_empty()
    }

    /// Number of open transactions (nesting depth of the next push).
    pub fn open_depth(&self) -> usize {
        self.open.len()
    }

    /// The innermost open transaction, if any.
    pub fn current_transaction(&self) -> Option<TransactionId> {
        self.open.last().map(Transaction::id)
    }

    /// Closed transactions in history order, oldest first.
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction<T>> {
        self.history.iter()
    }

    /// Returns the transaction at `index` in history order.
    pub fn get(&self, index: usize) -> Option<&Transaction<T>> {
        self.history.get(index)
    }

    /// Descriptions of undoable transactions, most recent first.
    pub fn undo_descriptions(&self) -> impl Iterator<Item = &str> {
        self.history
            .range(..self.cursor)
            .rev()
            .map(Transaction::description)
    }

    /// Descriptions of redoable transactions, next to redo first.
    pub fn redo_descriptions(&self) -> impl Iterator<Item = &str> {
        self.history
            .range(self.cursor..)
            .map(Transaction::description)
    }

    fn ensure_live(&self) -> TransactionResult {
        if self.disposed {
            return Err(TransactionError::Disposed);
        }
        Ok(())
    }

    fn ensure_idle(&self, action: &'static str) -> TransactionResult {
        if !self.open.is_empty() {
            return Err(UsageError::TransactionInProgress(action).into());
        }
        Ok(())
    }
}

impl<T: Editable> fmt::Debug for TransactionStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionStack")
            .field("len", &self.history.len())
            .field("cursor", &self.cursor)
            .field("capacity", &self.config.capacity)
            .field("open_depth", &self.open.len())
            .field("save_point", &self.save_point)
            .field("observers", &self.observers.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}
