//! Run and workset registry.

use crate::core::{DbError, ModelId, Result, RunId, RunStatus, ValueKind, ValueTypeKey, WorksetId};
use crate::digest;
use crate::storage::state::{RunRecord, Sequence, WorksetRecord};
use crate::transaction::{Change, Transaction};
use chrono::Utc;
use tracing::{Level, event};

pub fn create_run(tx: &mut Transaction, model_id: ModelId, name: &str, sub_count: u32) -> Result<RunRecord> {
    tx.data().catalog().model(model_id)?;
    if name.trim().is_empty() {
        return Err(DbError::InvalidArgument("run name must not be empty".into()));
    }
    if sub_count == 0 {
        return Err(DbError::InvalidArgument("a run needs at least one sub-value".into()));
    }

    let run_id = tx.allocate_id(Sequence::RunId)?;
    let now = Utc::now();
    let run = RunRecord {
        run_id,
        model_id,
        name: name.to_string(),
        sub_count,
        status: RunStatus::Init,
        run_digest: None,
        value_digest: None,
        created_at: now,
        updated_at: now,
    };
    tx.apply(Change::PutRun(run.clone()))?;
    Ok(run)
}

/// Move a run along its lifecycle. Setting the current status again only
/// touches the update time. `deleted` is reachable through the delete path
/// only.
pub fn update_run_status(tx: &mut Transaction, run_id: RunId, status: RunStatus) -> Result<RunRecord> {
    let run = tx.data().run(run_id)?.clone();
    if status == RunStatus::Deleted {
        return Err(DbError::PreconditionFailed(format!(
            "run {} can only become deleted through run deletion",
            run_id
        )));
    }
    if run.status != status && !run.status.can_transition_to(status) {
        return Err(DbError::PreconditionFailed(format!(
            "run {} cannot move from {} to {}",
            run_id, run.status, status
        )));
    }
    let updated = RunRecord {
        status,
        updated_at: Utc::now(),
        ..run
    };
    tx.apply(Change::PutRun(updated.clone()))?;
    Ok(updated)
}

fn require_live(tx: &Transaction, run_id: RunId) -> Result<()> {
    let run = tx.data().run(run_id)?;
    if run.status == RunStatus::Deleted {
        return Err(DbError::PreconditionFailed(format!("run {} is deleted", run_id)));
    }
    Ok(())
}

pub fn set_run_option(tx: &mut Transaction, run_id: RunId, key: &str, value: &str) -> Result<()> {
    require_live(tx, run_id)?;
    if key.is_empty() {
        return Err(DbError::InvalidArgument("run option key must not be empty".into()));
    }
    tx.apply(Change::PutRunOption {
        run_id,
        key: key.to_string(),
        value: value.to_string(),
    })?;
    Ok(())
}

pub fn set_run_text(tx: &mut Transaction, run_id: RunId, lang: &str, descr: &str) -> Result<()> {
    require_live(tx, run_id)?;
    if lang.is_empty() {
        return Err(DbError::InvalidArgument("run text language must not be empty".into()));
    }
    tx.apply(Change::PutRunText {
        run_id,
        lang: lang.to_string(),
        descr: descr.to_string(),
    })?;
    Ok(())
}

/// Compute and store the run identity and value digests from the run's
/// value bindings. Only a completed run has final values.
pub fn finalize_run_digest(tx: &mut Transaction, run_id: RunId) -> Result<RunRecord> {
    let run = tx.data().run(run_id)?.clone();
    if !run.status.is_completed() {
        return Err(DbError::PreconditionFailed(format!(
            "run {} is {}, its values are not final",
            run_id, run.status
        )));
    }
    let model_digest = tx.data().catalog().model(run.model_id)?.digest.clone();

    let mut values = Vec::new();
    for kind in ValueKind::ALL {
        for binding in tx.data().bindings(kind).for_run(run_id) {
            values.push((ValueTypeKey { kind, hid: binding.hid }, binding.digest));
        }
    }
    let value_digest = digest::run_value_digest(&values)?;
    let run_digest = digest::run_digest(&model_digest, run.sub_count, run.status, &values)?;

    let updated = RunRecord {
        run_digest: Some(run_digest),
        value_digest: Some(value_digest),
        updated_at: Utc::now(),
        ..run
    };
    tx.apply(Change::PutRun(updated.clone()))?;
    event!(Level::DEBUG, run_id, values = values.len(), "run digest finalized");
    Ok(updated)
}

/// Create a workset, optionally based on a completed run of the same model.
pub fn create_workset(
    tx: &mut Transaction,
    model_id: ModelId,
    name: &str,
    base_run_id: Option<RunId>,
) -> Result<WorksetRecord> {
    tx.data().catalog().model(model_id)?;
    if name.trim().is_empty() {
        return Err(DbError::InvalidArgument("workset name must not be empty".into()));
    }
    if let Some(base) = base_run_id {
        let run = tx.data().run(base)?;
        if run.model_id != model_id {
            return Err(DbError::InvalidArgument(format!(
                "run {} belongs to model {}, not {}",
                base, run.model_id, model_id
            )));
        }
        if !run.status.is_completed() {
            return Err(DbError::PreconditionFailed(format!(
                "workset base run {} is {}",
                base, run.status
            )));
        }
    }

    let workset_id: WorksetId = tx.allocate_id(Sequence::WorksetId)?;
    let workset = WorksetRecord {
        workset_id,
        model_id,
        name: name.to_string(),
        base_run_id,
        updated_at: Utc::now(),
    };
    tx.apply(Change::PutWorkset(workset.clone()))?;
    Ok(workset)
}
