// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Write transactions are serialized by a single writer gate and work on a
// copy-on-write clone of the committed store state.
//
// Design Patterns Used:
// - State Pattern: Transaction state management (Active, Committed, Aborted)
// - Command Pattern: every mutation is a `Change`, replayed from the WAL
// - Copy-on-Write: `im` persistent maps make the working copy cheap
//
// ============================================================================

pub mod change;
pub mod manager;
pub mod state;

pub use change::Change;
pub use manager::TransactionManager;
pub use state::{Transaction, TransactionId, TransactionState};
