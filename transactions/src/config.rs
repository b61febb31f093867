//! Stack configuration, loadable from TOML.
//!
//! ```toml
//! [history]
//! capacity = 200
//! empty_transactions = "record"
//! merge_operations = false
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{TransactionError, TransactionResult};

/// Default maximum number of transactions kept in history.
pub const DEFAULT_CAPACITY: usize = 100;

/// What happens when a transaction without operations is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyTransactionPolicy {
    /// The transaction is dropped: it does not enter history, does not
    /// truncate the redo side and does not count against the capacity.
    #[default]
    Drop,
    /// The transaction is recorded like any other; undoing it is a no-op.
    Record,
}

/// Configuration of a [`TransactionStack`](crate::TransactionStack).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StackConfig {
    /// Maximum number of transactions kept in history.
    pub capacity: usize,
    pub empty_transactions: EmptyTransactionPolicy,
    /// Whether consecutive operations of an open transaction may be merged.
    pub merge_operations: bool,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            empty_transactions: EmptyTransactionPolicy::default(),
            merge_operations: true,
        }
    }
}

/// Document layout accepted by [`StackConfig::from_toml_str`]: the settings
/// live under a `[history]` table so they can share a file with other editor
/// settings.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    history: StackConfig,
}

impl StackConfig {
    /// Creates a configuration with the given capacity and default policies.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_empty_transactions(mut self, policy: EmptyTransactionPolicy) -> Self {
        self.empty_transactions = policy;
        self
    }

    #[must_use]
    pub fn with_merge_operations(mut self, merge: bool) -> Self {
        self.merge_operations = merge;
        self
    }

    /// Rejects a zero capacity.
    pub fn validate(&self) -> TransactionResult {
        if self.capacity == 0 {
            return Err(TransactionError::InvalidCapacity(self.capacity));
        }
        Ok(())
    }

    /// Parses the `[history]` table of a TOML document and validates it.
    ///
    /// A missing table yields the defaults.
    pub fn from_toml_str(content: &str) -> TransactionResult<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| TransactionError::Config(e.to_string()))?;
        file.history.validate()?;
        Ok(file.history)
    }
}

/// Loads a stack configuration from a TOML file.
pub fn load_config(path: &Path) -> TransactionResult<StackConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| TransactionError::Config(format!("failed to read {}: {e}", path.display())))?;
    let config = StackConfig::from_toml_str(&content).map_err(|e| match e {
        TransactionError::Config(msg) => {
            TransactionError::Config(format!("failed to parse {}: {msg}", path.display()))
        }
        other => other,
    })?;
    log::debug!(
        "Loaded history config from {}: capacity {}",
        path.display(),
        config.capacity
    );
    Ok(config)
}
