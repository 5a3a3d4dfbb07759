use super::{DbError, Result, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type RunId = u64;
pub type ModelId = u64;
pub type WorksetId = u64;
/// Stable key of a parameter, output table, entity or entity generation.
pub type Hid = u64;

/// Run lifecycle state.
///
/// ```text
/// Init ─> Progress ⇄ Wait ─> Done | Exit | Error ─> Deleted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Init,
    Progress,
    Wait,
    Done,
    Exit,
    Error,
    Deleted,
}

impl RunStatus {
    /// Completed runs are the only ones allowed to own or share values.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Done | Self::Exit | Self::Error)
    }

    pub fn is_terminal(&self) -> bool {
        self.is_completed() || *self == Self::Deleted
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Init, Progress | Wait | Done | Exit | Error) => true,
            (Progress, Wait | Done | Exit | Error) => true,
            (Wait, Progress | Done | Exit | Error) => true,
            (Done | Exit | Error, Deleted) => true,
            _ => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Init => "i",
            Self::Progress => "p",
            Self::Wait => "w",
            Self::Done => "s",
            Self::Exit => "x",
            Self::Error => "e",
            Self::Deleted => "d",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Progress => "progress",
            Self::Wait => "wait",
            Self::Done => "done",
            Self::Exit => "exit",
            Self::Error => "error",
            Self::Deleted => "deleted",
        };
        write!(f, "{}", name)
    }
}

/// Family of run values; each family has its own binding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueKind {
    Parameter,
    OutputTable,
    EntityGeneration,
}

impl ValueKind {
    pub const ALL: [ValueKind; 3] = [
        ValueKind::Parameter,
        ValueKind::OutputTable,
        ValueKind::EntityGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parameter => "parameter",
            Self::OutputTable => "table",
            Self::EntityGeneration => "generation",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ValueKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "parameter" | "param" => Ok(Self::Parameter),
            "table" | "output_table" => Ok(Self::OutputTable),
            "generation" | "entity" | "microdata" => Ok(Self::EntityGeneration),
            other => Err(DbError::InvalidArgument(format!(
                "unknown value kind '{}'",
                other
            ))),
        }
    }
}

/// Identifies what is shared between runs: a parameter, an output table or an
/// entity generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueTypeKey {
    pub kind: ValueKind,
    pub hid: Hid,
}

impl ValueTypeKey {
    pub fn parameter(hid: Hid) -> Self {
        Self { kind: ValueKind::Parameter, hid }
    }

    pub fn output_table(hid: Hid) -> Self {
        Self { kind: ValueKind::OutputTable, hid }
    }

    pub fn generation(hid: Hid) -> Self {
        Self { kind: ValueKind::EntityGeneration, hid }
    }
}

impl fmt::Display for ValueTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.hid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterCell {
    pub sub_id: i32,
    pub dims: Vec<i32>,
    pub value: Value,
}

impl ParameterCell {
    pub fn new(sub_id: i32, dims: Vec<i32>, value: impl Into<Value>) -> Self {
        Self { sub_id, dims, value: value.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorCell {
    pub acc_id: i32,
    pub sub_id: i32,
    pub dims: Vec<i32>,
    pub value: Value,
}

impl AccumulatorCell {
    pub fn new(acc_id: i32, sub_id: i32, dims: Vec<i32>, value: impl Into<Value>) -> Self {
        Self { acc_id, sub_id, dims, value: value.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionCell {
    pub expr_id: i32,
    pub dims: Vec<i32>,
    pub value: Value,
}

impl ExpressionCell {
    pub fn new(expr_id: i32, dims: Vec<i32>, value: impl Into<Value>) -> Self {
        Self { expr_id, dims, value: value.into() }
    }
}

/// One entity instance: its key and attribute values in attribute id order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicrodataRow {
    pub key: u64,
    pub attrs: Vec<Value>,
}

impl MicrodataRow {
    pub fn new(key: u64, attrs: Vec<Value>) -> Self {
        Self { key, attrs }
    }
}

/// A complete value set produced by a run for one value type.
///
/// Cells must already be in canonical order (ascending sub-value id, then
/// ascending dimension ids); digests are order sensitive.
#[derive(Debug, Clone)]
pub enum ValueSet {
    Parameter {
        hid: Hid,
        cells: Vec<ParameterCell>,
    },
    OutputTable {
        hid: Hid,
        accumulators: Vec<AccumulatorCell>,
        expressions: Vec<ExpressionCell>,
    },
    Microdata {
        entity_hid: Hid,
        attr_ids: Vec<i32>,
        rows: Vec<MicrodataRow>,
    },
}

impl ValueSet {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Parameter { .. } => ValueKind::Parameter,
            Self::OutputTable { .. } => ValueKind::OutputTable,
            Self::Microdata { .. } => ValueKind::EntityGeneration,
        }
    }

    pub fn cell_count(&self) -> usize {
        match self {
            Self::Parameter { cells, .. } => cells.len(),
            Self::OutputTable { accumulators, expressions, .. } => {
                accumulators.len() + expressions.len()
            }
            Self::Microdata { rows, .. } => rows.len(),
        }
    }
}
