pub mod binding;
pub mod catalog;
pub mod persistence;
pub mod state;
pub mod table;

pub use binding::{Binding, BindingTable};
pub use catalog::{
    AttributeMeta, Catalog, EntityMeta, GenerationMeta, ModelRecord, OutputTableMeta, ParameterMeta,
    physical_table_name,
};
pub use persistence::{DurabilityMode, PersistenceManager};
pub use state::{RunRecord, Sequence, StoreState, WorksetRecord};
pub use table::{PhysicalRow, RowKey, Table, TableRole, TableSchema};
