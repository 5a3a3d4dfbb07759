// ============================================================================
// Transaction Manager
// ============================================================================

use super::{Transaction, TransactionId};
use crate::core::Result;
use crate::storage::persistence::{PersistenceManager, WalEntry};
use crate::storage::state::StoreState;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{Level, event};

pub struct TransactionManager {
    // Last committed state. Readers clone it, which is cheap for `im` maps.
    committed: RwLock<StoreState>,

    // Serializes write transactions. A transaction holds the owned guard from
    // `begin` until it is committed or dropped.
    writer: Arc<Mutex<()>>,

    next_txn_id: AtomicU64,

    persistence: Option<Mutex<PersistenceManager>>,
}

impl TransactionManager {
    pub fn new(state: StoreState, persistence: Option<PersistenceManager>) -> Self {
        Self {
            committed: RwLock::new(state),
            writer: Arc::new(Mutex::new(())),
            next_txn_id: AtomicU64::new(1),
            persistence: persistence.map(Mutex::new),
        }
    }

    /// Wait for the writer gate, then start a transaction over the latest
    /// committed state.
    pub async fn begin(&self) -> Result<Transaction> {
        let guard = self.writer.clone().lock_owned().await;
        let base = self.committed.read().await.clone();
        let id = TransactionId(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        event!(Level::TRACE, txn = %id, "transaction started");
        Ok(Transaction::new(id, base, guard))
    }

    /// Consistent read-only view of the committed state.
    pub async fn snapshot(&self) -> StoreState {
        self.committed.read().await.clone()
    }

    /// Log the change list, then publish the working state. If logging fails
    /// the committed state is untouched and the error is returned.
    pub async fn commit(&self, mut txn: Transaction) -> Result<TransactionId> {
        txn.mark_committed()?;
        let id = txn.id();
        let elapsed = txn.duration();
        let (working, changes, writer) = txn.into_parts();

        if changes.is_empty() {
            event!(Level::TRACE, txn = %id, "empty transaction committed");
            return Ok(id);
        }

        let change_count = changes.len();
        let ddl = changes.iter().filter(|c| c.is_ddl()).count();
        let tables = changes
            .iter()
            .filter_map(|c| c.table_name())
            .collect::<BTreeSet<_>>()
            .len();
        let mut needs_checkpoint = false;
        if let Some(persistence) = &self.persistence {
            let mut persistence = persistence.lock().await;
            persistence.log(&WalEntry::Commit {
                txn_id: id.as_u64(),
                changes,
            })?;
            needs_checkpoint = persistence.needs_checkpoint();
        }

        {
            let mut committed = self.committed.write().await;
            *committed = working;
        }
        drop(writer);
        event!(
            Level::DEBUG,
            txn = %id,
            changes = change_count,
            ddl,
            tables,
            elapsed_us = elapsed.as_micros() as u64,
            "transaction committed"
        );

        if needs_checkpoint {
            // The commit is already in the WAL.
            if let Err(e) = self.checkpoint().await {
                event!(Level::ERROR, txn = %id, error = %e, "automatic checkpoint failed");
            }
        }
        Ok(id)
    }

    /// Discard the working state and release the writer gate.
    pub fn rollback(&self, mut txn: Transaction) -> Result<TransactionId> {
        txn.mark_aborted()?;
        let id = txn.id();
        event!(Level::DEBUG, txn = %id, "transaction rolled back");
        Ok(id)
    }

    /// Write a snapshot of the committed state and truncate the WAL.
    ///
    /// Holds the writer gate so no commit can slip in between the snapshot
    /// and the truncation.
    pub async fn checkpoint(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let _writer = self.writer.lock().await;
        let state = self.committed.read().await.clone();
        let mut persistence = persistence.lock().await;
        persistence.checkpoint(&state)?;
        event!(
            Level::INFO,
            runs = state.runs().count(),
            tables = state.tables().count(),
            "checkpoint written"
        );
        Ok(())
    }

    pub fn is_durable(&self) -> bool {
        self.persistence.is_some()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_txn_id", &self.next_txn_id.load(Ordering::SeqCst))
            .field("durable", &self.is_durable())
            .finish()
    }
}
