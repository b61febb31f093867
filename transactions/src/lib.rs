//! # RedLilium Transactions
//!
//! Transaction-based undo/redo for editors.
//!
//! Edits are recorded as [`Operation`]s, grouped into [`Transaction`]s that
//! are undone and redone as a whole. A [`TransactionStack`] keeps a bounded
//! history of closed transactions and a cursor separating the done ones from
//! the undone ones.
//!
//! - [`Operation`]: a reversible unit of change (Command pattern)
//! - [`Transaction`]: an ordered group of operations, possibly nested
//! - [`TransactionStack`]: bounded undo/redo history with nesting and save-point tracking
//! - [`StackEvent`] / [`EventQueue`]: change notifications for history UIs
//! - [`StackConfig`]: capacity and policies, loadable from TOML
//!
//! # Nesting
//!
//! Opening a transaction while another is open nests it. The nested
//! transaction only becomes part of the history when the outer one commits,
//! and its operations run as if they had been pushed into the outer one
//! directly. Transactions end innermost first.
//!
//! ```ignore
//! let mut stack = create_stack(100)?;
//!
//! let outer = stack.begin_transaction_with("Import")?;
//! stack.execute(Box::new(AddMesh::new(mesh)), &mut scene)?;
//! let inner = stack.begin_transaction()?;
//! stack.execute(Box::new(AssignMaterial::new(mesh, material)), &mut scene)?;
//! stack.commit_transaction(inner)?;
//! stack.commit_transaction(outer)?;
//!
//! stack.undo(&mut scene)?; // reverts both, material first
//! ```

mod config;
mod error;
mod event;
mod factory;
mod operation;
mod stack;
mod transaction;

pub use config::{DEFAULT_CAPACITY, EmptyTransactionPolicy, StackConfig, load_config};
pub use error::{TransactionError, TransactionResult, UsageError};
pub use event::{DiscardReason, EventQueue, ObserverId, StackEvent, StackObserver};
pub use factory::{create_stack, create_stack_from_config};
pub use operation::{AsAny, Direction, Editable, Operation, OperationError, OperationResult};
pub use stack::TransactionStack;
pub use transaction::{EndAction, Transaction, TransactionHandle, TransactionId};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
