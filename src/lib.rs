// ============================================================================
// simvault Library
// ============================================================================
//
// Persistence layer for microsimulation runs: models, runs, worksets and the
// values runs produce, with content-addressed sharing of identical values
// between runs.
//
// ============================================================================

pub mod config;
pub mod core;
pub mod digest;
pub mod facade;
pub mod registry;
pub mod storage;
pub mod transaction;
pub mod values;

// Re-export main types for convenience
pub use config::StoreConfig;
pub use core::{
    AccumulatorCell, DataType, DbError, ExpressionCell, Hid, MicrodataRow, ModelId, ParameterCell,
    Result, RunId, RunStatus, Value, ValueKind, ValueSet, ValueTypeKey, WorksetId,
};
pub use digest::FloatFormat;
pub use facade::{RunStore, StoreStats};
pub use registry::{EntityDef, ModelDef};
pub use storage::{Binding, DurabilityMode, ModelRecord, RunRecord, WorksetRecord};
pub use values::{
    DeleteReport, OutputTableValues, UnlinkReport, WriteDisposition, WriteOutcome,
};
