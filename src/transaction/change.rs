// ============================================================================
// Transaction Change Log
// ============================================================================
//
// Every mutation of a store goes through a Change. A write transaction applies
// changes to its private working state and records them; commit appends the
// list to the WAL, and recovery replays the same list through `apply`.
//
// ============================================================================

use crate::core::{Hid, Result, RunId, ValueKind};
use crate::storage::binding::Binding;
use crate::storage::catalog::{EntityMeta, GenerationMeta, ModelRecord, OutputTableMeta, ParameterMeta};
use crate::storage::state::{RunRecord, Sequence, StoreState, WorksetRecord};
use crate::storage::table::{PhysicalRow, Table, TableSchema};
use serde::{Deserialize, Serialize};

/// A single mutation of the store state.
///
/// `apply` either performs the whole change or fails without modifying the
/// state, so a failed change never leaves a half-applied working copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Change {
    SetSequence { seq: Sequence, value: u64 },

    PutModel(ModelRecord),
    PutParameter(ParameterMeta),
    PutOutputTable(OutputTableMeta),
    PutEntity(EntityMeta),
    PutGeneration(GenerationMeta),
    RemoveGeneration { hid: Hid },

    CreateTable { schema: TableSchema },
    DropTable { name: String },

    PutRun(RunRecord),
    RemoveRun { run_id: RunId },
    PutRunOption { run_id: RunId, key: String, value: String },
    RemoveRunOptions { run_id: RunId },
    PutRunText { run_id: RunId, lang: String, descr: String },
    RemoveRunTexts { run_id: RunId },

    PutWorkset(WorksetRecord),

    PutBinding { kind: ValueKind, binding: Binding },
    RemoveBinding { kind: ValueKind, run_id: RunId, hid: Hid },
    SetRoot { kind: ValueKind, hid: Hid, digest: String, root: RunId },
    ClearRoot { kind: ValueKind, hid: Hid, digest: String },

    InsertRows { table: String, rows: Vec<PhysicalRow> },
    RehomeRows { table: String, from: RunId, to: RunId },
    DeleteRows { table: String, run_id: RunId },
}

impl Change {
    /// Apply to `state`, returning the number of rows or records affected.
    pub fn apply(&self, state: &mut StoreState) -> Result<usize> {
        match self {
            Change::SetSequence { seq, value } => {
                state.set_sequence(*seq, *value)?;
                Ok(1)
            }
            Change::PutModel(model) => {
                state.catalog.put_model(model.clone());
                Ok(1)
            }
            Change::PutParameter(meta) => {
                state.catalog.put_parameter(meta.clone());
                Ok(1)
            }
            Change::PutOutputTable(meta) => {
                state.catalog.put_output_table(meta.clone());
                Ok(1)
            }
            Change::PutEntity(meta) => {
                state.catalog.put_entity(meta.clone());
                Ok(1)
            }
            Change::PutGeneration(meta) => {
                state.catalog.put_generation(meta.clone());
                Ok(1)
            }
            Change::RemoveGeneration { hid } => {
                state.catalog.remove_generation(*hid)?;
                Ok(1)
            }
            Change::CreateTable { schema } => {
                state.create_table(Table::new(schema.clone()))?;
                Ok(1)
            }
            Change::DropTable { name } => {
                let dropped = state.drop_table(name)?;
                Ok(dropped.row_count())
            }
            Change::PutRun(run) => {
                state.put_run(run.clone());
                Ok(1)
            }
            Change::RemoveRun { run_id } => {
                state.remove_run(*run_id)?;
                Ok(1)
            }
            Change::PutRunOption { run_id, key, value } => {
                state.put_run_option(*run_id, key.clone(), value.clone());
                Ok(1)
            }
            Change::RemoveRunOptions { run_id } => Ok(state.remove_run_options(*run_id)),
            Change::PutRunText { run_id, lang, descr } => {
                state.put_run_text(*run_id, lang.clone(), descr.clone());
                Ok(1)
            }
            Change::RemoveRunTexts { run_id } => Ok(state.remove_run_texts(*run_id)),
            Change::PutWorkset(workset) => {
                state.put_workset(workset.clone());
                Ok(1)
            }
            Change::PutBinding { kind, binding } => {
                state.bindings_mut(*kind).put(binding.clone());
                Ok(1)
            }
            Change::RemoveBinding { kind, run_id, hid } => {
                state.bindings_mut(*kind).remove(*run_id, *hid)?;
                Ok(1)
            }
            Change::SetRoot { kind, hid, digest, root } => {
                state.bindings_mut(*kind).set_root(*hid, digest, *root);
                Ok(1)
            }
            Change::ClearRoot { kind, hid, digest } => {
                state.bindings_mut(*kind).clear_root(*hid, digest);
                Ok(1)
            }
            Change::InsertRows { table, rows } => state.table_mut(table)?.insert_rows(rows),
            Change::RehomeRows { table, from, to } => state.table_mut(table)?.rehome(*from, *to),
            Change::DeleteRows { table, run_id } => Ok(state.table_mut(table)?.delete_run(*run_id)),
        }
    }

    /// Physical table touched by this change, if any.
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Change::CreateTable { schema } => Some(schema.name()),
            Change::DropTable { name } => Some(name),
            Change::InsertRows { table, .. }
            | Change::RehomeRows { table, .. }
            | Change::DeleteRows { table, .. } => Some(table),
            _ => None,
        }
    }

    pub fn is_ddl(&self) -> bool {
        matches!(self, Change::CreateTable { .. } | Change::DropTable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::storage::table::{RowKey, TableRole};

    fn schema() -> TableSchema {
        TableSchema::new("income_p12345678", TableRole::ParameterValues, 1, 1, 1)
    }

    #[test]
    fn test_table_changes() {
        let mut state = StoreState::new();
        Change::CreateTable { schema: schema() }.apply(&mut state).unwrap();

        let rows = vec![(RowKey::new(3, vec![0]), vec![Value::Float(1.0)])];
        let insert = Change::InsertRows { table: "income_p12345678".into(), rows };
        assert_eq!(insert.apply(&mut state).unwrap(), 1);

        let rehome = Change::RehomeRows { table: "income_p12345678".into(), from: 3, to: 2 };
        assert_eq!(rehome.apply(&mut state).unwrap(), 1);
        assert_eq!(state.table("income_p12345678").unwrap().count_run(2), 1);

        let drop = Change::DropTable { name: "income_p12345678".into() };
        assert!(drop.is_ddl());
        assert_eq!(drop.table_name(), Some("income_p12345678"));
        assert_eq!(drop.apply(&mut state).unwrap(), 1);
        assert!(!state.table_exists("income_p12345678"));
    }

    #[test]
    fn test_failed_change_leaves_state_untouched() {
        let mut state = StoreState::new();
        let insert = Change::InsertRows {
            table: "missing".into(),
            rows: vec![(RowKey::new(1, vec![0]), vec![Value::Null])],
        };
        assert!(insert.apply(&mut state).is_err());
        assert_eq!(state.tables().count(), 0);

        let backwards = Change::SetSequence { seq: Sequence::RunId, value: 5 };
        backwards.apply(&mut state).unwrap();
        let err = Change::SetSequence { seq: Sequence::RunId, value: 4 }.apply(&mut state);
        assert!(err.is_err());
        assert_eq!(state.sequence(Sequence::RunId).unwrap(), 5);
    }
}
