//! Construction functions for transaction stacks.

use crate::config::StackConfig;
use crate::error::TransactionResult;
use crate::operation::Editable;
use crate::stack::TransactionStack;

/// Creates an empty stack retaining at most `capacity` transactions.
///
/// The capacity can be changed later with
/// [`TransactionStack::set_capacity`]. A zero capacity is rejected.
pub fn create_stack<T: Editable>(capacity: usize) -> TransactionResult<TransactionStack<T>> {
    TransactionStack::new(capacity)
}

/// Creates an empty stack from a configuration, typically one read with
/// [`load_config`](crate::load_config).
pub fn create_stack_from_config<T: Editable>(
    config: StackConfig,
) -> TransactionResult<TransactionStack<T>> {
    TransactionStack::with_config(config)
}
