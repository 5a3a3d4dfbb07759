pub mod database;
pub mod stats;

pub use database::RunStore;
pub use stats::{BindingStats, StoreStats};
