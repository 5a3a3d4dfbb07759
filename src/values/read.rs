//! Read path: every read resolves the physical owner through the run's
//! binding first, then scans the owner's rows.

use crate::core::{
    AccumulatorCell, DbError, ExpressionCell, Hid, MicrodataRow, ParameterCell, Result, RunId,
    Value, ValueKind, ValueTypeKey,
};
use crate::storage::binding::Binding;
use crate::storage::state::StoreState;
use crate::storage::table::PhysicalRow;
use serde::Serialize;

/// Run id under which the rows of `(run_id, key)` physically live.
pub fn resolve_physical_owner(state: &StoreState, run_id: RunId, key: ValueTypeKey) -> Result<RunId> {
    Ok(binding(state, run_id, key)?.base_run_id)
}

pub fn binding(state: &StoreState, run_id: RunId, key: ValueTypeKey) -> Result<Binding> {
    state.run(run_id)?;
    Ok(state.bindings(key.kind).require(run_id, key.hid)?.clone())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutputTableValues {
    pub accumulators: Vec<AccumulatorCell>,
    pub expressions: Vec<ExpressionCell>,
}

fn narrow(id: i64, table: &str) -> Result<i32> {
    i32::try_from(id).map_err(|_| {
        DbError::Malformed(format!("id column value {} in table '{}' is out of range", id, table))
    })
}

fn dims(ids: &[i64], table: &str) -> Result<Vec<i32>> {
    ids.iter().map(|id| narrow(*id, table)).collect()
}

fn single_value(row: PhysicalRow, table: &str) -> Result<(Vec<i64>, Value)> {
    let (key, mut values) = row;
    match values.pop() {
        Some(value) if values.is_empty() => Ok((key.ids, value)),
        _ => Err(DbError::Malformed(format!("table '{}' row has no single value column", table))),
    }
}

/// Parameter cells of a run, in canonical order.
pub fn read_parameter(state: &StoreState, run_id: RunId, hid: Hid) -> Result<Vec<ParameterCell>> {
    let owner = resolve_physical_owner(state, run_id, ValueTypeKey::parameter(hid))?;
    let table = &state.catalog().parameter(hid)?.table;
    state
        .table(table)?
        .scan_run(owner)
        .into_iter()
        .map(|row| {
            let (ids, value) = single_value(row, table)?;
            let (sub_id, rest) = ids
                .split_first()
                .ok_or_else(|| DbError::Malformed(format!("table '{}' row has no sub id", table)))?;
            Ok(ParameterCell::new(narrow(*sub_id, table)?, dims(rest, table)?, value))
        })
        .collect()
}

pub fn read_output_table(state: &StoreState, run_id: RunId, hid: Hid) -> Result<OutputTableValues> {
    let owner = resolve_physical_owner(state, run_id, ValueTypeKey::output_table(hid))?;
    let meta = state.catalog().output_table(hid)?;

    let accumulators = state
        .table(&meta.acc_table)?
        .scan_run(owner)
        .into_iter()
        .map(|row| {
            let table = &meta.acc_table;
            let (ids, value) = single_value(row, table)?;
            if ids.len() < 2 {
                return Err(DbError::Malformed(format!("table '{}' row is missing ids", table)));
            }
            Ok(AccumulatorCell::new(
                narrow(ids[0], table)?,
                narrow(ids[1], table)?,
                dims(&ids[2..], table)?,
                value,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let expressions = state
        .table(&meta.expr_table)?
        .scan_run(owner)
        .into_iter()
        .map(|row| {
            let table = &meta.expr_table;
            let (ids, value) = single_value(row, table)?;
            let (expr_id, rest) = ids
                .split_first()
                .ok_or_else(|| DbError::Malformed(format!("table '{}' row has no expression id", table)))?;
            Ok(ExpressionCell::new(narrow(*expr_id, table)?, dims(rest, table)?, value))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(OutputTableValues {
        accumulators,
        expressions,
    })
}

/// Microdata rows of a run for one entity generation, ordered by entity key.
pub fn read_microdata(state: &StoreState, run_id: RunId, generation_hid: Hid) -> Result<Vec<MicrodataRow>> {
    let owner = resolve_physical_owner(state, run_id, ValueTypeKey::generation(generation_hid))?;
    let table = &state.catalog().generation(generation_hid)?.table;
    state
        .table(table)?
        .scan_run(owner)
        .into_iter()
        .map(|(key, attrs)| {
            let entity_key = key
                .ids
                .first()
                .and_then(|k| u64::try_from(*k).ok())
                .ok_or_else(|| DbError::Malformed(format!("table '{}' row has no entity key", table)))?;
            Ok(MicrodataRow::new(entity_key, attrs))
        })
        .collect()
}

/// Entity generations a run has microdata for.
pub fn run_generations(state: &StoreState, run_id: RunId, entity_hid: Hid) -> Result<Vec<Hid>> {
    state.run(run_id)?;
    let bindings = state.bindings(ValueKind::EntityGeneration);
    Ok(state
        .catalog()
        .generations()
        .filter(|g| g.entity_hid == entity_hid && bindings.get(run_id, g.hid).is_some())
        .map(|g| g.hid)
        .collect())
}
