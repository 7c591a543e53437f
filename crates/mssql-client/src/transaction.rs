//! Transaction tracking.
//!
//! The server reports transaction boundaries with ENVCHANGE tokens. A begun
//! transaction's 8-byte descriptor must be stamped into the ALL_HEADERS of
//! every later request until it commits or rolls back.

use tds_protocol::EnvChange;

pub use tds_protocol::IsolationLevel;

/// Descriptor of the active transaction, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TransactionState {
    descriptor: Option<u64>,
}

impl TransactionState {
    /// Descriptor for ALL_HEADERS; 0 outside a transaction.
    pub(crate) fn descriptor(&self) -> u64 {
        self.descriptor.unwrap_or(0)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.descriptor.is_some()
    }

    /// Track a transaction ENVCHANGE. Other changes are ignored.
    pub(crate) fn apply(&mut self, env: &EnvChange) {
        match env {
            EnvChange::BeginTransaction { descriptor } => {
                tracing::debug!(descriptor = descriptor, "transaction started");
                self.descriptor = Some(*descriptor);
            }
            EnvChange::CommitTransaction { .. } => {
                tracing::debug!("transaction committed");
                self.descriptor = None;
            }
            EnvChange::RollbackTransaction { .. } => {
                tracing::debug!("transaction rolled back");
                self.descriptor = None;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_follows_env_changes() {
        let mut state = TransactionState::default();
        assert_eq!(state.descriptor(), 0);
        assert!(!state.is_active());

        state.apply(&EnvChange::BeginTransaction {
            descriptor: 0x0100_0000_0000_00AA,
        });
        assert!(state.is_active());
        assert_eq!(state.descriptor(), 0x0100_0000_0000_00AA);

        state.apply(&EnvChange::Database {
            new: "tempdb".into(),
            old: "master".into(),
        });
        assert!(state.is_active());

        state.apply(&EnvChange::CommitTransaction {
            descriptor: 0x0100_0000_0000_00AA,
        });
        assert!(!state.is_active());
        assert_eq!(state.descriptor(), 0);
    }

    #[test]
    fn test_rollback_clears_descriptor() {
        let mut state = TransactionState::default();
        state.apply(&EnvChange::BeginTransaction { descriptor: 7 });
        state.apply(&EnvChange::RollbackTransaction { descriptor: 7 });
        assert!(!state.is_active());
    }
}
