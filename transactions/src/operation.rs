//! Editable targets and reversible operations.
//!
//! This module defines the caller-facing half of the transaction system:
//!
//! - [`Editable`]: marker trait for types that operations mutate
//! - [`Operation`]: a reversible unit of change (Command pattern)
//! - [`OperationError`] / [`OperationResult`]: error handling for operations
//!
//! Operations are self-contained: each implementation stores whatever data it
//! needs (target identifiers, old/new values, pixel buffers, etc.). The target
//! itself is never owned by an operation; it is lent to [`Operation::undo`] and
//! [`Operation::redo`] by the [`TransactionStack`](crate::TransactionStack).
//!
//! The crate-private [`OperationRecord`] wraps every pushed operation and
//! enforces its lifecycle (`Done ↔ Undone → Disposed`).

use std::any::Any;
use std::fmt;

use thiserror::Error;

use crate::error::{TransactionError, TransactionResult, UsageError};
use crate::transaction::TransactionId;

/// Helper trait for downcasting trait objects to concrete types.
///
/// Automatically implemented for all `'static` types. Used by
/// [`Operation::merge`] to downcast `&dyn Operation<T>` to the concrete
/// operation type.
pub trait AsAny: 'static {
    /// Returns a reference to `self` as `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T: 'static> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Marker trait for types that serve as editing targets.
///
/// Implement this on any type that operations can mutate: an ECS world,
/// a scene graph, a texture editor, a plain counter in tests.
pub trait Editable: 'static {}

/// Error reported by an operation's own undo/redo logic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// The target object was not found.
    #[error("target not found: {0}")]
    TargetNotFound(String),
    /// The target is in an invalid state for this operation.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// A custom error with a description.
    #[error("{0}")]
    Custom(String),
}

/// Result type for operation callbacks.
pub type OperationResult<T = ()> = Result<T, OperationError>;

/// A reversible unit of change.
///
/// An operation captures enough state to reverse a mutation that has already
/// been applied to the target, and to apply it again afterwards. Operations
/// are pushed into the innermost open transaction of a
/// [`TransactionStack`](crate::TransactionStack) and are owned by it from
/// then on.
///
/// # Contract
///
/// - `undo` followed by `redo` must leave the target in a state equivalent to
///   never having undone.
/// - The stack never calls `undo` twice in a row or `redo` on an operation
///   that is already applied.
/// - [`dispose`](Self::dispose) is called exactly once, when the owning
///   transaction leaves the stack. Neither `undo` nor `redo` is called after it.
///
/// # Merging
///
/// Operations that represent incremental changes (each mouse move during a
/// drag) can override [`merge`](Self::merge) so that consecutive operations
/// of the same open transaction coalesce into one. An absorbed operation is
/// disposed right after the merge and never runs.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug)]
/// struct MoveEntity {
///     entity: Entity,
///     old_pos: Vec3,
///     new_pos: Vec3,
/// }
///
/// impl Operation<World> for MoveEntity {
///     fn undo(&mut self, target: &mut World) -> OperationResult {
///         target.set_position(self.entity, self.old_pos);
///         Ok(())
///     }
///
///     fn redo(&mut self, target: &mut World) -> OperationResult {
///         target.set_position(self.entity, self.new_pos);
///         Ok(())
///     }
///
///     fn description(&self) -> &str {
///         "Move entity"
///     }
/// }
/// ```
pub trait Operation<T: Editable>: fmt::Debug + AsAny + Send {
    /// Reverses the operation's effect on the target.
    fn undo(&mut self, target: &mut T) -> OperationResult;

    /// Re-applies the operation's effect on the target.
    ///
    /// Also used by [`TransactionStack::execute`](crate::TransactionStack::execute)
    /// to apply a fresh operation for the first time.
    fn redo(&mut self, target: &mut T) -> OperationResult;

    /// A short, human-readable description for display in the edit menu.
    fn description(&self) -> &str;

    /// Releases captured resources (large buffers kept only for undo).
    ///
    /// Default: does nothing.
    fn dispose(&mut self) {}

    /// Tries to absorb `other`, the operation pushed right after this one.
    ///
    /// Returns `true` if `self` now covers `other`'s effect as well. The stack
    /// then disposes `other`. Use [`AsAny::as_any`] to downcast it:
    ///
    /// ```ignore
    /// fn merge(&mut self, other: &dyn Operation<World>) -> bool {
    ///     match other.as_any().downcast_ref::<Self>() {
    ///         Some(other) if other.entity == self.entity => {
    ///             self.new_pos = other.new_pos;
    ///             true
    ///         }
    ///         _ => false,
    ///     }
    /// }
    /// ```
    ///
    /// Returns `false` by default (no merging).
    fn merge(&mut self, _other: &dyn Operation<T>) -> bool {
        false
    }
}

/// Direction of a traversal over recorded operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Reverse effects, last operation first.
    Undo,
    /// Re-apply effects, first operation first.
    Redo,
}

impl Direction {
    /// The direction that cancels this one.
    pub fn opposite(self) -> Self {
        match self {
            Self::Undo => Self::Redo,
            Self::Redo => Self::Undo,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undo => write!(f, "undo"),
            Self::Redo => write!(f, "redo"),
        }
    }
}

/// Lifecycle state of a recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperationState {
    /// The effect is applied to the target.
    Done,
    /// The effect has been reversed.
    Undone,
    /// Resources released; the operation can no longer run.
    Disposed,
}

impl OperationState {
    /// The state an operation must be in before running in `direction`.
    fn expected_before(direction: Direction) -> Self {
        match direction {
            Direction::Undo => Self::Done,
            Direction::Redo => Self::Undone,
        }
    }

    fn after(direction: Direction) -> Self {
        match direction {
            Direction::Undo => Self::Undone,
            Direction::Redo => Self::Done,
        }
    }
}

/// A pushed operation together with its lifecycle bookkeeping.
///
/// Dropping a record disposes the wrapped operation if that has not happened
/// yet, so every path that removes a transaction from the stack releases its
/// resources exactly once.
pub(crate) struct OperationRecord<T: Editable> {
    operation: Box<dyn Operation<T>>,
    state: OperationState,
    frozen: bool,
}

impl<T: Editable> OperationRecord<T> {
    /// Wraps an operation whose effect is already applied.
    pub(crate) fn new(operation: Box<dyn Operation<T>>) -> Self {
        Self {
            operation,
            state: OperationState::Done,
            frozen: false,
        }
    }

    /// Prevents further merging into this operation.
    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    pub(crate) fn description(&self) -> &str {
        self.operation.description()
    }

    /// Returns `true` if running in `direction` would be a valid transition.
    pub(crate) fn can_run(&self, direction: Direction) -> bool {
        self.state == OperationState::expected_before(direction)
    }

    /// Runs the operation in `direction`, enforcing the lifecycle.
    ///
    /// `transaction` and `position` locate the record for error reporting.
    /// On an operation failure the state is left untouched.
    pub(crate) fn run(
        &mut self,
        direction: Direction,
        target: &mut T,
        transaction: TransactionId,
        position: usize,
    ) -> TransactionResult {
        match self.state {
            OperationState::Disposed => return Err(TransactionError::Disposed),
            state if state != OperationState::expected_before(direction) => {
                return Err(UsageError::InvalidOperationState {
                    description: self.operation.description().to_owned(),
                    direction,
                }
                .into());
            }
            _ => {}
        }

        let result = match direction {
            Direction::Undo => self.operation.undo(target),
            Direction::Redo => self.operation.redo(target),
        };
        result.map_err(|source| TransactionError::OperationFailed {
            transaction,
            position,
            direction,
            description: self.operation.description().to_owned(),
            source,
        })?;
        self.state = OperationState::after(direction);
        Ok(())
    }

    /// Tries to absorb `other` into this operation. Frozen records never merge.
    ///
    /// Returns `None` once `other` is absorbed and disposed, otherwise hands
    /// it back untouched.
    pub(crate) fn try_merge(
        &mut self,
        mut other: Box<dyn Operation<T>>,
    ) -> Option<Box<dyn Operation<T>>> {
        if self.frozen || self.state != OperationState::Done {
            return Some(other);
        }
        if !self.operation.merge(&*other) {
            return Some(other);
        }
        other.dispose();
        None
    }

    /// Releases the operation's resources. Idempotent.
    pub(crate) fn dispose(&mut self) {
        if self.state != OperationState::Disposed {
            self.operation.dispose();
            self.state = OperationState::Disposed;
        }
    }
}

impl<T: Editable> Drop for OperationRecord<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T: Editable> fmt::Debug for OperationRecord<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRecord")
            .field("operation", &self.operation)
            .field("state", &self.state)
            .field("frozen", &self.frozen)
            .finish()
    }
}
