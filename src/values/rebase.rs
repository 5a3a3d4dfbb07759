//! Moving a content class from one root run to another.

use crate::core::{Result, RunId, ValueTypeKey};
use crate::storage::binding::Binding;
use crate::transaction::{Change, Transaction};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebaseReport {
    pub rows_moved: usize,
    pub bindings_rebased: usize,
}

/// Move the physical rows of `key` from `old_root` to `new_root` and point
/// every binding based on `old_root` (its own included) at `new_root`. With
/// `index` set, the canonical entry for that digest moves to `new_root` too;
/// without it the caller owns the index.
///
/// Rows, bindings and the index move inside the caller's transaction, so the
/// class is never observed half moved.
pub(crate) fn rebase_group(
    tx: &mut Transaction,
    key: ValueTypeKey,
    index: Option<&str>,
    old_root: RunId,
    new_root: RunId,
) -> Result<RebaseReport> {
    let mut report = RebaseReport::default();

    for table in tx.data().physical_tables(key)? {
        report.rows_moved += tx.apply(Change::RehomeRows {
            table,
            from: old_root,
            to: new_root,
        })?;
    }

    let based: Vec<Binding> = tx.data().bindings(key.kind).based_on(key.hid, old_root);
    for binding in based {
        tx.apply(Change::PutBinding {
            kind: key.kind,
            binding: Binding {
                base_run_id: new_root,
                ..binding
            },
        })?;
        report.bindings_rebased += 1;
    }

    if let Some(digest) = index {
        tx.apply(Change::SetRoot {
            kind: key.kind,
            hid: key.hid,
            digest: digest.to_string(),
            root: new_root,
        })?;
    }
    Ok(report)
}
