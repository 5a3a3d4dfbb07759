//! The complete logical content of a store.
//!
//! Every collection is an `im` persistent map, so cloning a state for a write
//! transaction shares structure with the committed state.

use super::binding::BindingTable;
use super::catalog::Catalog;
use super::table::Table;
use crate::core::{DbError, Hid, ModelId, Result, RunId, RunStatus, ValueKind, ValueTypeKey, WorksetId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named id sequences. Each is a row of the sequence table, incremented and
/// read inside the allocating transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sequence {
    ModelId,
    RunId,
    WorksetId,
    ParameterHid,
    TableHid,
    EntityHid,
    GenerationHid,
}

impl Sequence {
    pub const ALL: [Sequence; 7] = [
        Sequence::ModelId,
        Sequence::RunId,
        Sequence::WorksetId,
        Sequence::ParameterHid,
        Sequence::TableHid,
        Sequence::EntityHid,
        Sequence::GenerationHid,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ModelId => "model_id",
            Self::RunId => "run_id",
            Self::WorksetId => "workset_id",
            Self::ParameterHid => "parameter_hid",
            Self::TableHid => "table_hid",
            Self::EntityHid => "entity_hid",
            Self::GenerationHid => "generation_hid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub model_id: ModelId,
    pub name: String,
    pub sub_count: u32,
    pub status: RunStatus,
    pub run_digest: Option<String>,
    pub value_digest: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorksetRecord {
    pub workset_id: WorksetId,
    pub model_id: ModelId,
    pub name: String,
    pub base_run_id: Option<RunId>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreState {
    sequences: im::OrdMap<Sequence, u64>,
    pub(crate) catalog: Catalog,
    runs: im::OrdMap<RunId, RunRecord>,
    run_options: im::OrdMap<(RunId, String), String>,
    run_texts: im::OrdMap<(RunId, String), String>,
    worksets: im::OrdMap<WorksetId, WorksetRecord>,
    run_parameters: BindingTable,
    run_tables: BindingTable,
    run_entities: BindingTable,
    tables: im::OrdMap<String, Table>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreState {
    /// Empty store with every id sequence seeded at zero.
    pub fn new() -> Self {
        Self {
            sequences: Sequence::ALL.iter().map(|s| (*s, 0u64)).collect(),
            catalog: Catalog::new(),
            runs: im::OrdMap::new(),
            run_options: im::OrdMap::new(),
            run_texts: im::OrdMap::new(),
            worksets: im::OrdMap::new(),
            run_parameters: BindingTable::new(ValueKind::Parameter),
            run_tables: BindingTable::new(ValueKind::OutputTable),
            run_entities: BindingTable::new(ValueKind::EntityGeneration),
            tables: im::OrdMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Sequences
    // ------------------------------------------------------------------

    pub fn sequence(&self, seq: Sequence) -> Result<u64> {
        self.sequences.get(&seq).copied().ok_or_else(|| {
            DbError::Malformed(format!("id sequence '{}' is missing", seq.name()))
        })
    }

    pub(crate) fn set_sequence(&mut self, seq: Sequence, value: u64) -> Result<()> {
        let current = self.sequence(seq)?;
        if value < current {
            return Err(DbError::Malformed(format!(
                "id sequence '{}' cannot move back from {} to {}",
                seq.name(),
                current,
                value
            )));
        }
        self.sequences.insert(seq, value);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn drop_sequence(&mut self, seq: Sequence) {
        self.sequences.remove(&seq);
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Physical tables holding the rows of one value type.
    pub fn physical_tables(&self, key: ValueTypeKey) -> Result<Vec<String>> {
        match key.kind {
            ValueKind::Parameter => Ok(vec![self.catalog.parameter(key.hid)?.table.clone()]),
            ValueKind::OutputTable => {
                let meta = self.catalog.output_table(key.hid)?;
                Ok(vec![meta.acc_table.clone(), meta.expr_table.clone()])
            }
            ValueKind::EntityGeneration => Ok(vec![self.catalog.generation(key.hid)?.table.clone()]),
        }
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    pub fn run(&self, run_id: RunId) -> Result<&RunRecord> {
        self.runs
            .get(&run_id)
            .ok_or_else(|| DbError::NotFound(format!("Run {}", run_id)))
    }

    pub fn runs(&self) -> impl Iterator<Item = &RunRecord> {
        self.runs.values()
    }

    pub(crate) fn put_run(&mut self, run: RunRecord) {
        self.runs.insert(run.run_id, run);
    }

    pub(crate) fn remove_run(&mut self, run_id: RunId) -> Result<RunRecord> {
        self.runs
            .remove(&run_id)
            .ok_or_else(|| DbError::NotFound(format!("Run {}", run_id)))
    }

    pub fn run_options(&self, run_id: RunId) -> Vec<(String, String)> {
        self.run_options
            .range((run_id, String::new())..)
            .take_while(|((r, _), _)| *r == run_id)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn put_run_option(&mut self, run_id: RunId, key: String, value: String) {
        self.run_options.insert((run_id, key), value);
    }

    pub(crate) fn remove_run_options(&mut self, run_id: RunId) -> usize {
        let keys: Vec<(RunId, String)> = self
            .run_options
            .range((run_id, String::new())..)
            .take_while(|((r, _), _)| *r == run_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            self.run_options.remove(key);
        }
        keys.len()
    }

    pub fn run_texts(&self, run_id: RunId) -> Vec<(String, String)> {
        self.run_texts
            .range((run_id, String::new())..)
            .take_while(|((r, _), _)| *r == run_id)
            .map(|((_, lang), descr)| (lang.clone(), descr.clone()))
            .collect()
    }

    pub(crate) fn put_run_text(&mut self, run_id: RunId, lang: String, descr: String) {
        self.run_texts.insert((run_id, lang), descr);
    }

    pub(crate) fn remove_run_texts(&mut self, run_id: RunId) -> usize {
        let keys: Vec<(RunId, String)> = self
            .run_texts
            .range((run_id, String::new())..)
            .take_while(|((r, _), _)| *r == run_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            self.run_texts.remove(key);
        }
        keys.len()
    }

    // ------------------------------------------------------------------
    // Worksets
    // ------------------------------------------------------------------

    pub fn workset(&self, workset_id: WorksetId) -> Result<&WorksetRecord> {
        self.worksets
            .get(&workset_id)
            .ok_or_else(|| DbError::NotFound(format!("Workset {}", workset_id)))
    }

    pub fn worksets_based_on(&self, run_id: RunId) -> Vec<WorksetRecord> {
        self.worksets
            .values()
            .filter(|w| w.base_run_id == Some(run_id))
            .cloned()
            .collect()
    }

    pub fn workset_count(&self) -> usize {
        self.worksets.len()
    }

    pub(crate) fn put_workset(&mut self, workset: WorksetRecord) {
        self.worksets.insert(workset.workset_id, workset);
    }

    // ------------------------------------------------------------------
    // Bindings
    // ------------------------------------------------------------------

    pub fn bindings(&self, kind: ValueKind) -> &BindingTable {
        match kind {
            ValueKind::Parameter => &self.run_parameters,
            ValueKind::OutputTable => &self.run_tables,
            ValueKind::EntityGeneration => &self.run_entities,
        }
    }

    pub(crate) fn bindings_mut(&mut self, kind: ValueKind) -> &mut BindingTable {
        match kind {
            ValueKind::Parameter => &mut self.run_parameters,
            ValueKind::OutputTable => &mut self.run_tables,
            ValueKind::EntityGeneration => &mut self.run_entities,
        }
    }

    /// Number of bindings a run holds across all three families.
    pub fn binding_count_for_run(&self, run_id: RunId) -> usize {
        ValueKind::ALL
            .iter()
            .map(|kind| self.bindings(*kind).count_for_run(run_id))
            .sum()
    }

    // ------------------------------------------------------------------
    // Physical tables
    // ------------------------------------------------------------------

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::NotFound(format!("Table '{}'", name)))
    }

    pub(crate) fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DbError::NotFound(format!("Table '{}'", name)))
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub(crate) fn create_table(&mut self, table: Table) -> Result<()> {
        let name = table.schema().name().to_string();
        if self.tables.contains_key(&name) {
            return Err(DbError::ExecutionError(format!("Table '{}' already exists", name)));
        }
        self.tables.insert(name, table);
        Ok(())
    }

    pub(crate) fn drop_table(&mut self, name: &str) -> Result<Table> {
        self.tables
            .remove(name)
            .ok_or_else(|| DbError::NotFound(format!("Table '{}'", name)))
    }

    /// Rows a run physically owns for one value type.
    pub fn physical_row_count(&self, key: ValueTypeKey, run_id: RunId) -> Result<usize> {
        let mut total = 0;
        for name in self.physical_tables(key)? {
            total += self.table(&name)?.count_run(run_id);
        }
        Ok(total)
    }

    /// Rows of one value type across every owner.
    pub fn physical_row_total(&self, key: ValueTypeKey) -> Result<usize> {
        let mut total = 0;
        for name in self.physical_tables(key)? {
            total += self.table(&name)?.row_count();
        }
        Ok(total)
    }

    /// Check the dedup invariants across all binding tables and physical
    /// tables: roots hold the rows, dependents hold none.
    pub fn verify(&self) -> Result<()> {
        for kind in ValueKind::ALL {
            let bindings = self.bindings(kind);
            bindings.verify()?;
            let mut hids: Vec<Hid> = Vec::new();
            for b in bindings.iter() {
                if !self.runs.contains_key(&b.run_id) {
                    return Err(DbError::Integrity(format!(
                        "{} hid {} is bound to run {} which does not exist",
                        kind, b.hid, b.run_id
                    )));
                }
                if bindings.root_of(b.hid, &b.digest) == Some(b.run_id)
                    && self.runs.get(&b.run_id).map(|r| r.status) == Some(RunStatus::Deleted)
                {
                    return Err(DbError::Integrity(format!(
                        "{} hid {} is indexed to deleted run {}",
                        kind, b.hid, b.run_id
                    )));
                }
                if !b.is_root() {
                    let key = ValueTypeKey { kind, hid: b.hid };
                    if self.physical_row_count(key, b.run_id)? != 0 {
                        return Err(DbError::Integrity(format!(
                            "run {} holds physical rows for {} but is based on run {}",
                            b.run_id, key, b.base_run_id
                        )));
                    }
                }
                if !hids.contains(&b.hid) {
                    hids.push(b.hid);
                }
            }
            for hid in hids {
                let key = ValueTypeKey { kind, hid };
                for name in self.physical_tables(key)? {
                    for owner in self.table(&name)?.owners() {
                        match bindings.get(owner, hid) {
                            Some(b) if b.is_root() => {}
                            _ => {
                                return Err(DbError::Integrity(format!(
                                    "table '{}' holds rows for run {} which is not a root of {}",
                                    name, owner, key
                                )));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
