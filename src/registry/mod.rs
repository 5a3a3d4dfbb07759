//! Collaborators of the value paths: the model catalog, the run registry and
//! the workset registry.

pub mod model;
pub mod runs;

pub use model::{
    EntityDef, ModelDef, OutputTableDef, ParameterDef, entity_hid, parameter_hid, register_model,
    table_hid,
};
pub use runs::{
    create_run, create_workset, finalize_run_digest, set_run_option, set_run_text,
    update_run_status,
};
