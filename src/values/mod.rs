// ============================================================================
// Run Values
// ============================================================================
//
// Content-addressed storage of run values. A run's value set for one value
// type is bound to the run through a binding row; the rows themselves live
// once per distinct content under the canonical (smallest) root run.
//
// ============================================================================

pub mod delete;
pub mod read;
pub mod rebase;
pub mod write;

pub use delete::{
    BodyReport, DeleteReport, MetaReport, Reparented, UnlinkReport, delete_run, delete_run_body,
    delete_run_meta, tombstone, unlink_run,
};
pub use read::{
    OutputTableValues, binding, read_microdata, read_output_table, read_parameter,
    resolve_physical_owner, run_generations,
};
pub use rebase::RebaseReport;
pub use write::{WriteDisposition, WriteOutcome, write_values};

use crate::config::StoreConfig;
use crate::digest::FloatFormat;

/// Settings the value paths take from the store configuration.
#[derive(Debug, Clone, Copy)]
pub struct ValueOptions {
    pub float_format: FloatFormat,
    pub max_identifier_len: usize,
}

impl Default for ValueOptions {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for ValueOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            float_format: config.float_format,
            max_identifier_len: config.max_identifier_len,
        }
    }
}
