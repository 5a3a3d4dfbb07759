// ============================================================================
// Transaction State Management
// ============================================================================
//
// A write transaction owns the store's writer gate for its whole lifetime and
// mutates a private copy of the committed state. Commit publishes the copy,
// rollback drops it, so a failed transaction leaves no partial state.
//
// ============================================================================

use super::Change;
use crate::core::{DbError, Result};
use crate::storage::state::{Sequence, StoreState};
use tokio::sync::OwnedMutexGuard;

/// Unique identifier for a transaction within one store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state
///
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// A serialized write transaction over a private working state.
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    working: StoreState,
    changes: Vec<Change>,
    start_time: std::time::Instant,
    /// Held until the transaction is committed or dropped.
    _writer: OwnedMutexGuard<()>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, base: StoreState, writer: OwnedMutexGuard<()>) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            working: base,
            changes: Vec::new(),
            start_time: std::time::Instant::now(),
            _writer: writer,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The working state, including this transaction's own changes.
    pub fn data(&self) -> &StoreState {
        &self.working
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Apply a change to the working state and record it for the WAL.
    pub fn apply(&mut self, change: Change) -> Result<usize> {
        if !self.state.is_active() {
            return Err(DbError::ExecutionError(format!(
                "Cannot apply change: transaction {} is {}",
                self.id, self.state
            )));
        }
        let affected = change.apply(&mut self.working)?;
        self.changes.push(change);
        Ok(affected)
    }

    /// Increment-and-read of a named id sequence.
    pub fn allocate_id(&mut self, seq: Sequence) -> Result<u64> {
        let next = self.working.sequence(seq)? + 1;
        self.apply(Change::SetSequence { seq, value: next })?;
        Ok(next)
    }

    pub(crate) fn mark_committed(&mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(DbError::ExecutionError(format!(
                "Cannot commit: transaction {} is already {}",
                self.id, self.state
            )));
        }
        self.state = TransactionState::Committed;
        Ok(())
    }

    pub(crate) fn mark_aborted(&mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(DbError::ExecutionError(format!(
                "Cannot rollback: transaction {} is already {}",
                self.id, self.state
            )));
        }
        self.changes.clear();
        self.state = TransactionState::Aborted;
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (StoreState, Vec<Change>, OwnedMutexGuard<()>) {
        (self.working, self.changes, self._writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn transaction(base: StoreState) -> Transaction {
        let gate = Arc::new(Mutex::new(()));
        let guard = gate.try_lock_owned().unwrap();
        Transaction::new(TransactionId(1), base, guard)
    }

    #[test]
    fn test_allocate_id_is_monotonic() {
        let mut txn = transaction(StoreState::new());
        assert_eq!(txn.allocate_id(Sequence::RunId).unwrap(), 1);
        assert_eq!(txn.allocate_id(Sequence::RunId).unwrap(), 2);
        assert_eq!(txn.allocate_id(Sequence::WorksetId).unwrap(), 1);
        assert_eq!(txn.change_count(), 3);
    }

    #[test]
    fn test_missing_sequence_is_malformed() {
        let mut base = StoreState::new();
        base.drop_sequence(Sequence::RunId);
        let mut txn = transaction(base);
        let err = txn.allocate_id(Sequence::RunId).unwrap_err();
        assert!(matches!(err, DbError::Malformed(_)));
        assert!(err.is_precondition());
        assert_eq!(txn.change_count(), 0);
    }

    #[test]
    fn test_transaction_lifecycle() {
        let mut txn = transaction(StoreState::new());
        assert!(txn.state().is_active());
        txn.mark_committed().unwrap();
        assert!(txn.state().is_terminal());
        assert!(txn.mark_committed().is_err());
        assert!(txn.allocate_id(Sequence::RunId).is_err());
    }

    #[test]
    fn test_rollback_clears_changes() {
        let mut txn = transaction(StoreState::new());
        txn.allocate_id(Sequence::ModelId).unwrap();
        txn.mark_aborted().unwrap();
        assert_eq!(txn.change_count(), 0);
        assert_eq!(txn.state(), TransactionState::Aborted);
    }
}
