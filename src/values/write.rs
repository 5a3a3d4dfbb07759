//! Write/dedup path: bind a run's value set to the canonical physical copy of
//! its content, materializing rows only when no equal copy exists.

use super::rebase::rebase_group;
use super::ValueOptions;
use crate::core::{
    AccumulatorCell, DbError, ExpressionCell, Hid, MicrodataRow, ParameterCell, Result, RunId,
    ValueSet, ValueTypeKey,
};
use crate::digest::{self, AttributeShape};
use crate::storage::binding::Binding;
use crate::storage::catalog::{AttributeMeta, GenerationMeta, physical_table_name};
use crate::storage::state::{Sequence, StoreState};
use crate::storage::table::{PhysicalRow, RowKey, TableRole, TableSchema};
use crate::transaction::{Change, Transaction};
use serde::Serialize;
use tracing::{Level, event};

/// How a value set ended up bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WriteDisposition {
    /// No equal content existed; this run now owns the rows.
    Materialized,
    /// Equal content already existed under a smaller run; no rows written.
    Attached,
    /// Equal content existed under a larger run; its rows were re-homed to
    /// this run, which became the canonical root.
    Adopted,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub key: ValueTypeKey,
    pub digest: String,
    pub base_run_id: RunId,
    pub disposition: WriteDisposition,
    pub rows_written: usize,
    pub rows_rehomed: usize,
    pub bindings_rebased: usize,
}

impl WriteOutcome {
    pub fn is_root(&self) -> bool {
        self.disposition != WriteDisposition::Attached
    }
}

/// Digest and physical rows of a value set, per target table.
struct PreparedValues {
    key: ValueTypeKey,
    digest: String,
    rows: Vec<(String, Vec<PhysicalRow>)>,
}

/// Bind `values` to `run_id`. The run must be completed and must not have
/// values for the same value type yet.
pub fn write_values(
    tx: &mut Transaction,
    run_id: RunId,
    values: &ValueSet,
    options: ValueOptions,
) -> Result<WriteOutcome> {
    let run = tx.data().run(run_id)?;
    if !run.status.is_completed() {
        return Err(DbError::PreconditionFailed(format!(
            "run {} is {}, only a done, exit or error run can write values",
            run_id, run.status
        )));
    }

    let prepared = match values {
        ValueSet::Parameter { hid, cells } => prepare_parameter(tx.data(), run_id, *hid, cells, options)?,
        ValueSet::OutputTable {
            hid,
            accumulators,
            expressions,
        } => prepare_output_table(tx.data(), run_id, *hid, accumulators, expressions, options)?,
        ValueSet::Microdata {
            entity_hid,
            attr_ids,
            rows,
        } => prepare_microdata(tx, run_id, *entity_hid, attr_ids, rows, options)?,
    };

    bind(tx, run_id, prepared)
}

fn bind(tx: &mut Transaction, run_id: RunId, prepared: PreparedValues) -> Result<WriteOutcome> {
    let PreparedValues { key, digest, rows } = prepared;

    if tx.data().bindings(key.kind).get(run_id, key.hid).is_some() {
        return Err(DbError::AlreadyBound {
            run_id,
            key: key.to_string(),
        });
    }

    // Tentative self-ownership, then attach to the canonical root if any.
    tx.apply(Change::PutBinding {
        kind: key.kind,
        binding: Binding {
            run_id,
            hid: key.hid,
            base_run_id: run_id,
            digest: digest.clone(),
        },
    })?;

    let root = tx.data().bindings(key.kind).root_of(key.hid, &digest);
    let outcome = match root {
        None => {
            tx.apply(Change::SetRoot {
                kind: key.kind,
                hid: key.hid,
                digest: digest.clone(),
                root: run_id,
            })?;
            let mut rows_written = 0;
            for (table, rows) in rows {
                if rows.is_empty() {
                    continue;
                }
                rows_written += tx.apply(Change::InsertRows { table, rows })?;
            }
            WriteOutcome {
                key,
                digest,
                base_run_id: run_id,
                disposition: WriteDisposition::Materialized,
                rows_written,
                rows_rehomed: 0,
                bindings_rebased: 0,
            }
        }
        Some(root) if root < run_id => {
            tx.apply(Change::PutBinding {
                kind: key.kind,
                binding: Binding {
                    run_id,
                    hid: key.hid,
                    base_run_id: root,
                    digest: digest.clone(),
                },
            })?;
            WriteOutcome {
                key,
                digest,
                base_run_id: root,
                disposition: WriteDisposition::Attached,
                rows_written: 0,
                rows_rehomed: 0,
                bindings_rebased: 0,
            }
        }
        Some(root) if root > run_id => {
            let moved = rebase_group(tx, key, Some(digest.as_str()), root, run_id)?;
            WriteOutcome {
                key,
                digest,
                base_run_id: run_id,
                disposition: WriteDisposition::Adopted,
                rows_written: 0,
                rows_rehomed: moved.rows_moved,
                bindings_rebased: moved.bindings_rebased,
            }
        }
        Some(_) => {
            return Err(DbError::Integrity(format!(
                "{} digest {} is indexed to run {} which had no binding",
                key, digest, run_id
            )));
        }
    };

    event!(
        Level::DEBUG,
        run_id,
        key = %outcome.key,
        base_run_id = outcome.base_run_id,
        disposition = ?outcome.disposition,
        "run values bound"
    );
    Ok(outcome)
}

fn id_column(value: i32) -> i64 {
    value as i64
}

fn prepare_parameter(
    state: &StoreState,
    run_id: RunId,
    hid: Hid,
    cells: &[ParameterCell],
    options: ValueOptions,
) -> Result<PreparedValues> {
    let meta = state.catalog().parameter(hid)?;
    let digest = digest::parameter_digest(&meta.shape(), cells, options.float_format)?;

    let rows = cells
        .iter()
        .map(|cell| {
            let mut ids = Vec::with_capacity(cell.dims.len() + 1);
            ids.push(id_column(cell.sub_id));
            ids.extend(cell.dims.iter().copied().map(id_column));
            (RowKey::new(run_id, ids), vec![cell.value.clone()])
        })
        .collect();

    Ok(PreparedValues {
        key: ValueTypeKey::parameter(hid),
        digest,
        rows: vec![(meta.table.clone(), rows)],
    })
}

fn prepare_output_table(
    state: &StoreState,
    run_id: RunId,
    hid: Hid,
    accumulators: &[AccumulatorCell],
    expressions: &[ExpressionCell],
    options: ValueOptions,
) -> Result<PreparedValues> {
    let meta = state.catalog().output_table(hid)?;
    if let Some(cell) = accumulators
        .iter()
        .find(|c| c.acc_id < 0 || c.acc_id as usize >= meta.acc_count)
    {
        return Err(DbError::InvalidArgument(format!(
            "accumulator id {} is out of range for output table '{}'",
            cell.acc_id, meta.name
        )));
    }
    if let Some(cell) = expressions
        .iter()
        .find(|c| c.expr_id < 0 || c.expr_id as usize >= meta.expr_count)
    {
        return Err(DbError::InvalidArgument(format!(
            "expression id {} is out of range for output table '{}'",
            cell.expr_id, meta.name
        )));
    }

    let digest = digest::output_table_digest(&meta.shape(), accumulators, expressions, options.float_format)?;

    let acc_rows = accumulators
        .iter()
        .map(|cell| {
            let mut ids = Vec::with_capacity(cell.dims.len() + 2);
            ids.push(id_column(cell.acc_id));
            ids.push(id_column(cell.sub_id));
            ids.extend(cell.dims.iter().copied().map(id_column));
            (RowKey::new(run_id, ids), vec![cell.value.clone()])
        })
        .collect();
    let expr_rows = expressions
        .iter()
        .map(|cell| {
            let mut ids = Vec::with_capacity(cell.dims.len() + 1);
            ids.push(id_column(cell.expr_id));
            ids.extend(cell.dims.iter().copied().map(id_column));
            (RowKey::new(run_id, ids), vec![cell.value.clone()])
        })
        .collect();

    Ok(PreparedValues {
        key: ValueTypeKey::output_table(hid),
        digest,
        rows: vec![
            (meta.acc_table.clone(), acc_rows),
            (meta.expr_table.clone(), expr_rows),
        ],
    })
}

fn prepare_microdata(
    tx: &mut Transaction,
    run_id: RunId,
    entity_hid: Hid,
    attr_ids: &[i32],
    rows: &[MicrodataRow],
    options: ValueOptions,
) -> Result<PreparedValues> {
    let entity = tx.data().catalog().entity(entity_hid)?.clone();
    if attr_ids.is_empty() {
        return Err(DbError::InvalidArgument(format!(
            "microdata for entity '{}' names no attributes",
            entity.name
        )));
    }
    if attr_ids.windows(2).any(|w| w[0] >= w[1]) {
        return Err(DbError::InvalidArgument(format!(
            "microdata attribute ids for entity '{}' must be strictly ascending",
            entity.name
        )));
    }
    let attributes = attr_ids
        .iter()
        .map(|id| {
            entity.attribute(*id).cloned().ok_or_else(|| {
                DbError::NotFound(format!("Attribute {} of entity '{}'", id, entity.name))
            })
        })
        .collect::<Result<Vec<AttributeMeta>>>()?;
    let shapes: Vec<AttributeShape<'_>> = attributes.iter().map(|a| a.shape()).collect();

    let generation_digest = digest::generation_digest(&entity.name, &entity.digest, &shapes)?;
    let digest = digest::microdata_digest(&entity.name, &generation_digest, &shapes, rows, options.float_format)?;

    let existing = tx
        .data()
        .catalog()
        .generation_by_digest(entity_hid, &generation_digest)
        .cloned();
    let generation = match existing {
        Some(generation) => generation,
        None => {
            let hid = tx.allocate_id(Sequence::GenerationHid)?;
            let table = physical_table_name(
                &entity.name,
                TableRole::Microdata,
                &generation_digest,
                options.max_identifier_len,
            )?;
            tx.apply(Change::CreateTable {
                schema: TableSchema::new(table.clone(), TableRole::Microdata, hid, 1, attributes.len()),
            })?;
            let generation = GenerationMeta {
                hid,
                entity_hid,
                digest: generation_digest,
                attributes: attributes.clone(),
                table,
            };
            tx.apply(Change::PutGeneration(generation.clone()))?;
            event!(Level::DEBUG, entity = %entity.name, generation_hid = hid, "entity generation created");
            generation
        }
    };

    let physical = rows
        .iter()
        .map(|row| {
            let key = i64::try_from(row.key).map_err(|_| {
                DbError::InvalidArgument(format!("entity key {} is out of range", row.key))
            })?;
            Ok((RowKey::new(run_id, vec![key]), row.attrs.clone()))
        })
        .collect::<Result<Vec<PhysicalRow>>>()?;

    Ok(PreparedValues {
        key: ValueTypeKey::generation(generation.hid),
        digest,
        rows: vec![(generation.table, physical)],
    })
}
