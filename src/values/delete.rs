//! Delete/reclaim path.
//!
//! A run is removed in three phases, each safe to run in its own transaction:
//!
//! ```text
//! unlink_run        tombstone the run, hand shared content to the smallest live dependent
//! delete_run_body   drop rows and bindings the run still owns, drop orphaned generations
//! delete_run_meta   remove options, texts and the run record once no binding is left
//! ```
//!
//! `delete_run` runs all three inside one transaction.

use super::rebase::rebase_group;
use crate::core::{DbError, Hid, Result, RunId, RunStatus, ValueKind, ValueTypeKey};
use crate::storage::binding::Binding;
use crate::storage::state::{RunRecord, WorksetRecord};
use crate::transaction::{Change, Transaction};
use chrono::Utc;
use serde::Serialize;
use tracing::{Level, event};

/// Name and digest sentinel written over a deleted run's identity.
pub fn tombstone(run_id: RunId) -> String {
    format!("deleted_{}", run_id)
}

#[derive(Debug, Clone, Serialize)]
pub struct Reparented {
    pub key: ValueTypeKey,
    pub new_root: RunId,
    pub rows_moved: usize,
    pub bindings_rebased: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UnlinkReport {
    /// The run was already tombstoned; nothing changed.
    pub already_unlinked: bool,
    pub worksets_cleared: usize,
    pub reparented: Vec<Reparented>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BodyReport {
    pub rows_deleted: usize,
    pub bindings_removed: usize,
    pub generations_dropped: Vec<Hid>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetaReport {
    pub options_removed: usize,
    pub texts_removed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub run_id: RunId,
    pub unlink: UnlinkReport,
    pub body: BodyReport,
    pub meta: MetaReport,
}

/// Phase A: make the run invisible to dedup and move every content class it
/// roots for other runs to the smallest dependent that is not itself
/// unlinked. A second call on an already unlinked run changes nothing.
pub fn unlink_run(tx: &mut Transaction, run_id: RunId) -> Result<UnlinkReport> {
    let run = tx.data().run(run_id)?.clone();
    if run.status == RunStatus::Deleted {
        event!(Level::DEBUG, run_id, "run already unlinked");
        return Ok(UnlinkReport {
            already_unlinked: true,
            ..Default::default()
        });
    }
    if !run.status.can_transition_to(RunStatus::Deleted) {
        return Err(DbError::PreconditionFailed(format!(
            "run {} is {}, only a done, exit or error run can be deleted",
            run_id, run.status
        )));
    }

    let mut report = UnlinkReport::default();
    let now = Utc::now();

    tx.apply(Change::PutRun(RunRecord {
        name: tombstone(run_id),
        updated_at: now,
        ..run.clone()
    }))?;

    for workset in tx.data().worksets_based_on(run_id) {
        tx.apply(Change::PutWorkset(WorksetRecord {
            base_run_id: None,
            updated_at: now,
            ..workset
        }))?;
        report.worksets_cleared += 1;
    }

    for kind in ValueKind::ALL {
        let owned: Vec<Binding> = tx
            .data()
            .bindings(kind)
            .for_run(run_id)
            .into_iter()
            .filter(|b| b.is_root())
            .collect();

        for binding in owned {
            let key = ValueTypeKey { kind, hid: binding.hid };
            let dependents = tx.data().bindings(kind).dependents(binding.hid, run_id);
            let mut live = Vec::with_capacity(dependents.len());
            for dependent in &dependents {
                if tx.data().run(*dependent)?.status != RunStatus::Deleted {
                    live.push(*dependent);
                }
            }

            // Only a live run may become the canonical root. Unlinked
            // dependents follow the rows wherever they go.
            if let Some(new_root) = live.into_iter().min() {
                let moved = rebase_group(tx, key, Some(binding.digest.as_str()), run_id, new_root)?;
                event!(
                    Level::DEBUG,
                    run_id,
                    key = %key,
                    new_root,
                    rows = moved.rows_moved,
                    "content re-parented"
                );
                report.reparented.push(Reparented {
                    key,
                    new_root,
                    rows_moved: moved.rows_moved,
                    bindings_rebased: moved.bindings_rebased,
                });
                continue;
            }

            if tx.data().bindings(kind).root_of(binding.hid, &binding.digest) == Some(run_id) {
                tx.apply(Change::ClearRoot {
                    kind,
                    hid: binding.hid,
                    digest: binding.digest.clone(),
                })?;
            }
            if let Some(heir) = dependents.into_iter().min() {
                // Every dependent is unlinked: the rows go to one of them,
                // unindexed, and are purged with that run's body.
                let moved = rebase_group(tx, key, None, run_id, heir)?;
                event!(
                    Level::DEBUG,
                    run_id,
                    key = %key,
                    heir,
                    rows = moved.rows_moved,
                    "content handed to unlinked dependent"
                );
            }
        }

        // Tombstone every digest of the run so it can never match again.
        for binding in tx.data().bindings(kind).for_run(run_id) {
            tx.apply(Change::PutBinding {
                kind,
                binding: Binding {
                    digest: tombstone(run_id),
                    ..binding
                },
            })?;
        }
    }

    let run = tx.data().run(run_id)?.clone();
    tx.apply(Change::PutRun(RunRecord {
        status: RunStatus::Deleted,
        run_digest: Some(tombstone(run_id)),
        value_digest: Some(tombstone(run_id)),
        updated_at: now,
        ..run
    }))?;

    Ok(report)
}

/// Phase B: delete the rows the run still owns, its bindings, and any entity
/// generation no run refers to any more.
pub fn delete_run_body(tx: &mut Transaction, run_id: RunId) -> Result<BodyReport> {
    require_deleted(tx, run_id, "body")?;
    let mut report = BodyReport::default();

    for kind in ValueKind::ALL {
        for binding in tx.data().bindings(kind).for_run(run_id) {
            let key = ValueTypeKey { kind, hid: binding.hid };
            if binding.is_root() {
                let dependents = tx.data().bindings(kind).dependents(binding.hid, run_id);
                for dependent in &dependents {
                    if tx.data().run(*dependent)?.status != RunStatus::Deleted {
                        return Err(DbError::Integrity(format!(
                            "run {} still roots {} for live run {} after unlink",
                            run_id, key, dependent
                        )));
                    }
                }
                match dependents.into_iter().min() {
                    // Unlinked dependents still reference the rows until
                    // their own body is deleted.
                    Some(heir) => {
                        rebase_group(tx, key, None, run_id, heir)?;
                    }
                    None => {
                        for table in tx.data().physical_tables(key)? {
                            report.rows_deleted += tx.apply(Change::DeleteRows { table, run_id })?;
                        }
                    }
                }
                if tx.data().bindings(kind).root_of(binding.hid, &binding.digest) == Some(run_id) {
                    tx.apply(Change::ClearRoot {
                        kind,
                        hid: binding.hid,
                        digest: binding.digest.clone(),
                    })?;
                }
            }
            tx.apply(Change::RemoveBinding {
                kind,
                run_id,
                hid: binding.hid,
            })?;
            report.bindings_removed += 1;

            if kind == ValueKind::EntityGeneration
                && tx.data().bindings(kind).count_for_hid(binding.hid) == 0
            {
                drop_generation(tx, binding.hid)?;
                report.generations_dropped.push(binding.hid);
            }
        }
    }

    Ok(report)
}

/// An unreferenced generation loses its physical table and its metadata.
/// The reference count is taken inside the caller's transaction, so no
/// writer can bind to the generation between the check and the drop.
fn drop_generation(tx: &mut Transaction, hid: Hid) -> Result<()> {
    let table = tx.data().catalog().generation(hid)?.table.clone();
    let rows = tx.data().table(&table)?.row_count();
    if rows != 0 {
        return Err(DbError::Integrity(format!(
            "generation {} has no bindings but table '{}' still holds {} rows",
            hid, table, rows
        )));
    }
    tx.apply(Change::DropTable { name: table.clone() })?;
    tx.apply(Change::RemoveGeneration { hid })?;
    event!(Level::DEBUG, generation_hid = hid, table = %table, "entity generation dropped");
    Ok(())
}

/// Phase C: remove the run's own metadata. Refuses while any binding of the
/// run remains.
pub fn delete_run_meta(tx: &mut Transaction, run_id: RunId) -> Result<MetaReport> {
    require_deleted(tx, run_id, "metadata")?;

    let remaining = tx.data().binding_count_for_run(run_id);
    if remaining != 0 {
        return Err(DbError::Integrity(format!(
            "run {} still has {} value bindings, refusing to delete its metadata",
            run_id, remaining
        )));
    }

    let options_removed = tx.apply(Change::RemoveRunOptions { run_id })?;
    let texts_removed = tx.apply(Change::RemoveRunTexts { run_id })?;
    tx.apply(Change::RemoveRun { run_id })?;
    Ok(MetaReport {
        options_removed,
        texts_removed,
    })
}

/// All three phases in one transaction.
pub fn delete_run(tx: &mut Transaction, run_id: RunId) -> Result<DeleteReport> {
    let unlink = unlink_run(tx, run_id)?;
    let body = delete_run_body(tx, run_id)?;
    let meta = delete_run_meta(tx, run_id)?;
    Ok(DeleteReport {
        run_id,
        unlink,
        body,
        meta,
    })
}

fn require_deleted(tx: &Transaction, run_id: RunId, phase: &str) -> Result<()> {
    let run = tx.data().run(run_id)?;
    if run.status != RunStatus::Deleted {
        return Err(DbError::PreconditionFailed(format!(
            "run {} is {}, unlink it before deleting its {}",
            run_id, run.status, phase
        )));
    }
    Ok(())
}
