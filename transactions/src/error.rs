//! Transaction stack error types.

use thiserror::Error;

use crate::operation::{Direction, OperationError};
use crate::transaction::TransactionId;

/// Violations of the stack's call-ordering contract.
///
/// The stack rejects the call and leaves its state unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("no transaction is open")]
    NoOpenTransaction,
    #[error("transaction {handle} cannot end while nested transaction {innermost} is open")]
    NotInnermost {
        handle: TransactionId,
        innermost: TransactionId,
    },
    #[error("transaction {0} is not open on this stack")]
    UnknownTransaction(TransactionId),
    #[error("transaction {0} is closed")]
    TransactionClosed(TransactionId),
    #[error("cannot {0} while a transaction is in progress")]
    TransactionInProgress(&'static str),
    #[error("cannot {direction} operation \"{description}\" in its current state")]
    InvalidOperationState {
        description: String,
        direction: Direction,
    },
}

/// Errors reported by the transaction stack.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("invalid capacity {0}: a transaction stack must retain at least one transaction")]
    InvalidCapacity(usize),
    #[error("capacity {requested} is below the {redo_count} redoable transactions")]
    CapacityBelowRedo { requested: usize, redo_count: usize },
    #[error(
        "{direction} failed in transaction {transaction} at operation {position} (\"{description}\"): {source}"
    )]
    OperationFailed {
        /// Innermost transaction holding the operation. For an operation of a
        /// nested transaction this is the nested scope's id, not the id of
        /// the history entry being undone or redone.
        transaction: TransactionId,
        /// Index among the direct entries of `transaction`.
        position: usize,
        direction: Direction,
        description: String,
        #[source]
        source: OperationError,
    },
    #[error("transaction stack or operation has been disposed")]
    Disposed,
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type TransactionResult<T = ()> = Result<T, TransactionError>;
