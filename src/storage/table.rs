use crate::core::{DbError, Hid, Result, RunId, Value, ValueKind};
use serde::{Deserialize, Serialize};

/// Primary key of a physical row: the owning run, then the type-specific
/// discriminators (sub id / acc id / expr id / entity key) and dimension ids.
///
/// Ordering by this key yields the canonical cell order for a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    pub run_id: RunId,
    pub ids: Vec<i64>,
}

impl RowKey {
    pub fn new(run_id: RunId, ids: Vec<i64>) -> Self {
        Self { run_id, ids }
    }
}

pub type PhysicalRow = (RowKey, Vec<Value>);

/// What a physical table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableRole {
    ParameterValues,
    Accumulators,
    Expressions,
    Microdata,
}

impl TableRole {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::ParameterValues => ValueKind::Parameter,
            Self::Accumulators | Self::Expressions => ValueKind::OutputTable,
            Self::Microdata => ValueKind::EntityGeneration,
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Self::ParameterValues => "p",
            Self::Accumulators => "a",
            Self::Expressions => "v",
            Self::Microdata => "g",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    role: TableRole,
    hid: Hid,
    /// Number of leading id columns of every row key.
    key_width: usize,
    /// Number of value columns of every row.
    value_width: usize,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, role: TableRole, hid: Hid, key_width: usize, value_width: usize) -> Self {
        Self {
            name: name.into(),
            role,
            hid,
            key_width,
            value_width,
        }
    }
    pub fn name(&self) -> &str { &self.name }
    pub fn role(&self) -> TableRole { self.role }
    pub fn hid(&self) -> Hid { self.hid }
    pub fn key_width(&self) -> usize { self.key_width }
    pub fn value_width(&self) -> usize { self.value_width }
}

/// One physical value table. Rows are only ever stored under a root run id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    schema: TableSchema,
    rows: im::OrdMap<RowKey, Vec<Value>>,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: im::OrdMap::new(),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Insert a batch of rows. Fails without changes if any key is malformed
    /// or already present.
    pub fn insert_rows(&mut self, rows: &[PhysicalRow]) -> Result<usize> {
        for (key, values) in rows {
            self.validate_row(key, values)?;
            if self.rows.contains_key(key) {
                return Err(DbError::ExecutionError(format!(
                    "Duplicate row {:?} for run {} in table '{}'",
                    key.ids, key.run_id, self.schema.name
                )));
            }
        }
        let mut staged = self.rows.clone();
        for (key, values) in rows {
            if staged.insert(key.clone(), values.clone()).is_some() {
                return Err(DbError::InvalidArgument(format!(
                    "Duplicate cell {:?} in write to table '{}'",
                    key.ids, self.schema.name
                )));
            }
        }
        self.rows = staged;
        Ok(rows.len())
    }

    /// Move every row owned by `from` to `to`. Returns the number of rows moved.
    pub fn rehome(&mut self, from: RunId, to: RunId) -> Result<usize> {
        let moving = self.scan_run(from);
        if moving.is_empty() {
            return Ok(0);
        }
        if self.count_run(to) > 0 {
            return Err(DbError::Integrity(format!(
                "Table '{}' already holds rows for run {}, cannot move rows of run {} onto it",
                self.schema.name, to, from
            )));
        }
        for (key, values) in &moving {
            self.rows.remove(key);
            self.rows.insert(RowKey::new(to, key.ids.clone()), values.clone());
        }
        Ok(moving.len())
    }

    pub fn delete_run(&mut self, run_id: RunId) -> usize {
        let keys: Vec<RowKey> = self.run_range(run_id).map(|(k, _)| k.clone()).collect();
        for key in &keys {
            self.rows.remove(key);
        }
        keys.len()
    }

    /// Rows of one run in canonical key order.
    pub fn scan_run(&self, run_id: RunId) -> Vec<PhysicalRow> {
        self.run_range(run_id)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn count_run(&self, run_id: RunId) -> usize {
        self.run_range(run_id).count()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Distinct run ids that own rows in this table.
    pub fn owners(&self) -> Vec<RunId> {
        let mut owners: Vec<RunId> = Vec::new();
        for key in self.rows.keys() {
            if owners.last() != Some(&key.run_id) {
                owners.push(key.run_id);
            }
        }
        owners
    }

    fn run_range(&self, run_id: RunId) -> impl Iterator<Item = (&RowKey, &Vec<Value>)> {
        self.rows
            .range(RowKey::new(run_id, Vec::new())..)
            .take_while(move |(k, _)| k.run_id == run_id)
    }

    fn validate_row(&self, key: &RowKey, values: &[Value]) -> Result<()> {
        if key.ids.len() != self.schema.key_width {
            return Err(DbError::ExecutionError(format!(
                "Expected {} key columns in table '{}', got {}",
                self.schema.key_width,
                self.schema.name,
                key.ids.len()
            )));
        }
        if values.len() != self.schema.value_width {
            return Err(DbError::ExecutionError(format!(
                "Expected {} value columns in table '{}', got {}",
                self.schema.value_width,
                self.schema.name,
                values.len()
            )));
        }
        Ok(())
    }
}
