use crate::core::{RunStatus, ValueKind};
use crate::storage::state::StoreState;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct BindingStats {
    pub kind: ValueKind,
    pub bindings: usize,
    pub roots: usize,
    /// Bindings served by another run's rows
    pub shared: usize,
}

/// Store-wide counters.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub models: usize,
    pub runs: usize,
    pub runs_by_status: BTreeMap<String, usize>,
    pub worksets: usize,
    pub generations: usize,
    pub physical_tables: usize,
    pub physical_rows: usize,
    pub bindings: Vec<BindingStats>,
}

impl StoreStats {
    pub fn collect(state: &StoreState) -> Self {
        let mut runs_by_status = BTreeMap::new();
        for run in state.runs() {
            *runs_by_status.entry(run.status.to_string()).or_insert(0) += 1;
        }

        let bindings = ValueKind::ALL
            .iter()
            .map(|kind| {
                let table = state.bindings(*kind);
                let roots = table.root_count();
                BindingStats {
                    kind: *kind,
                    bindings: table.len(),
                    roots,
                    shared: table.len() - roots,
                }
            })
            .collect();

        Self {
            models: state.catalog().model_count(),
            runs: state.runs().count(),
            runs_by_status,
            worksets: state.workset_count(),
            generations: state.catalog().generations().count(),
            physical_tables: state.tables().count(),
            physical_rows: state.tables().map(|t| t.row_count()).sum(),
            bindings,
        }
    }

    pub fn runs_with_status(&self, status: RunStatus) -> usize {
        self.runs_by_status.get(&status.to_string()).copied().unwrap_or(0)
    }

    /// Bindings that did not need their own physical copy.
    pub fn shared_bindings(&self) -> usize {
        self.bindings.iter().map(|b| b.shared).sum()
    }
}
