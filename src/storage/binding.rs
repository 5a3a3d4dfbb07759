//! Binding tables: `(run_id, hid) -> (base_run_id, digest)`, one per value family.
//!
//! Besides the bindings themselves each table keeps a unique index
//! `(hid, digest) -> root run id`. A content class has at most one root; the
//! write path attaches to it instead of searching for the smallest run id.

use crate::core::{DbError, Hid, Result, RunId, ValueKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub run_id: RunId,
    pub hid: Hid,
    pub base_run_id: RunId,
    pub digest: String,
}

impl Binding {
    pub fn is_root(&self) -> bool {
        self.base_run_id == self.run_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingTable {
    kind: ValueKind,
    rows: im::OrdMap<(RunId, Hid), Binding>,
    roots: im::OrdMap<(Hid, String), RunId>,
}

impl BindingTable {
    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            rows: im::OrdMap::new(),
            roots: im::OrdMap::new(),
        }
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn get(&self, run_id: RunId, hid: Hid) -> Option<&Binding> {
        self.rows.get(&(run_id, hid))
    }

    pub fn require(&self, run_id: RunId, hid: Hid) -> Result<&Binding> {
        self.get(run_id, hid).ok_or_else(|| {
            DbError::NotFound(format!("Run {} binding for {} hid {}", run_id, self.kind, hid))
        })
    }

    /// Canonical root of a content class, if one exists.
    pub fn root_of(&self, hid: Hid, digest: &str) -> Option<RunId> {
        self.roots.get(&(hid, digest.to_string())).copied()
    }

    /// All bindings of one run, ordered by hid.
    pub fn for_run(&self, run_id: RunId) -> Vec<Binding> {
        self.rows
            .range((run_id, 0)..)
            .take_while(|((r, _), _)| *r == run_id)
            .map(|(_, b)| b.clone())
            .collect()
    }

    pub fn count_for_run(&self, run_id: RunId) -> usize {
        self.rows
            .range((run_id, 0)..)
            .take_while(|((r, _), _)| *r == run_id)
            .count()
    }

    /// Run ids bound to `hid` whose physical owner is `root`, the root itself excluded.
    pub fn dependents(&self, hid: Hid, root: RunId) -> Vec<RunId> {
        self.rows
            .values()
            .filter(|b| b.hid == hid && b.base_run_id == root && b.run_id != root)
            .map(|b| b.run_id)
            .collect()
    }

    /// Every binding whose physical owner is `root` for `hid`, the root's own included.
    pub fn based_on(&self, hid: Hid, root: RunId) -> Vec<Binding> {
        self.rows
            .values()
            .filter(|b| b.hid == hid && b.base_run_id == root)
            .cloned()
            .collect()
    }

    /// Number of bindings referencing `hid` from any run.
    pub fn count_for_hid(&self, hid: Hid) -> usize {
        self.rows.values().filter(|b| b.hid == hid).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn root_count(&self) -> usize {
        self.rows.values().filter(|b| b.is_root()).count()
    }

    pub(crate) fn put(&mut self, binding: Binding) {
        self.rows.insert((binding.run_id, binding.hid), binding);
    }

    pub(crate) fn remove(&mut self, run_id: RunId, hid: Hid) -> Result<Binding> {
        self.rows.remove(&(run_id, hid)).ok_or_else(|| {
            DbError::NotFound(format!("Run {} binding for {} hid {}", run_id, self.kind, hid))
        })
    }

    pub(crate) fn set_root(&mut self, hid: Hid, digest: &str, root: RunId) {
        self.roots.insert((hid, digest.to_string()), root);
    }

    pub(crate) fn clear_root(&mut self, hid: Hid, digest: &str) {
        self.roots.remove(&(hid, digest.to_string()));
    }

    /// Check the dedup invariants: every root index entry points at a root
    /// binding with that digest, and every binding's base is a root binding.
    pub fn verify(&self) -> Result<()> {
        for ((hid, digest), root) in self.roots.iter() {
            match self.get(*root, *hid) {
                Some(b) if b.is_root() && &b.digest == digest => {}
                _ => {
                    return Err(DbError::Integrity(format!(
                        "{} hid {} digest {} indexed to run {} which is not its root",
                        self.kind, hid, digest, root
                    )));
                }
            }
        }
        for b in self.rows.values() {
            if b.is_root() {
                continue;
            }
            match self.get(b.base_run_id, b.hid) {
                Some(base) if base.is_root() => {}
                _ => {
                    return Err(DbError::Integrity(format!(
                        "run {} {} hid {} is based on run {} which is not a root",
                        b.run_id, self.kind, b.hid, b.base_run_id
                    )));
                }
            }
        }
        Ok(())
    }
}
