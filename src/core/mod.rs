pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use types::{
    AccumulatorCell, ExpressionCell, Hid, MicrodataRow, ModelId, ParameterCell, RunId, RunStatus,
    ValueKind, ValueSet, ValueTypeKey, WorksetId,
};
pub use value::{DataType, Value};
