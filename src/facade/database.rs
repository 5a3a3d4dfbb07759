use crate::config::StoreConfig;
use crate::core::{
    AccumulatorCell, ExpressionCell, Hid, MicrodataRow, ModelId, ParameterCell, Result,
    RunId, RunStatus, ValueSet, ValueTypeKey, WorksetId,
};
use crate::facade::stats::StoreStats;
use crate::registry::{self, ModelDef};
use crate::storage::binding::Binding;
use crate::storage::catalog::ModelRecord;
use crate::storage::persistence::PersistenceManager;
use crate::storage::state::{RunRecord, StoreState, WorksetRecord};
use crate::transaction::{Transaction, TransactionManager};
use crate::values::{
    self, BodyReport, DeleteReport, MetaReport, OutputTableValues, UnlinkReport, ValueOptions,
    WriteOutcome,
};
use tracing::{Level, Span, event, info_span};

/// An embedded run-value store.
///
/// Share it between tasks behind an `Arc`. Mutations are serialized; reads
/// work on a consistent snapshot of the last commit.
///
/// # Examples
///
/// ```
/// use simvault::{DataType, ModelDef, RunStatus, RunStore};
///
/// # tokio_test::block_on(async {
/// let store = RunStore::in_memory();
/// let model = store
///     .register_model(&ModelDef::new("riskpaths", "m1").parameter("ageSex", "p1", 2, DataType::Float))
///     .await
///     .unwrap();
/// let run = store.create_run(model.model_id, "baseline", 1).await.unwrap();
/// store.update_run_status(run.run_id, RunStatus::Done).await.unwrap();
/// # });
/// ```
pub struct RunStore {
    config: StoreConfig,
    options: ValueOptions,
    manager: TransactionManager,
}

impl RunStore {
    /// Purely in-memory store with the default configuration
    pub fn in_memory() -> Self {
        Self::with_state(StoreConfig::new(), StoreState::new(), None)
    }

    /// Open a store, recovering snapshot and WAL from the data directory if
    /// the configuration is durable.
    ///
    /// ```no_run
    /// # use simvault::{RunStore, StoreConfig};
    /// # tokio_test::block_on(async {
    /// let config = StoreConfig::from_url("simvault:///var/lib/sim?durability=sync").unwrap();
    /// let store = RunStore::open(config).await.unwrap();
    /// # });
    /// ```
    pub async fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let Some(dir) = config.data_dir.clone().filter(|_| config.is_durable()) else {
            return Ok(Self::with_state(config, StoreState::new(), None));
        };

        let span = info_span!("simvault.open", data_dir = %dir.display());
        let _enter = span.enter();

        let mut persistence = PersistenceManager::new(&dir, config.durability)?;
        persistence.wal_mut().set_checkpoint_threshold(config.checkpoint_threshold);
        let state = match persistence.recover()? {
            Some(state) => {
                state.verify()?;
                event!(Level::INFO, runs = state.runs().count(), "store recovered");
                state
            }
            None => StoreState::new(),
        };
        Ok(Self::with_state(config, state, Some(persistence)))
    }

    fn with_state(config: StoreConfig, state: StoreState, persistence: Option<PersistenceManager>) -> Self {
        Self {
            options: ValueOptions::from(&config),
            config,
            manager: TransactionManager::new(state, persistence),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Run `f` in one write transaction: commit on `Ok`, roll back on `Err`.
    pub async fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        self.transact_in(Span::none(), f).await
    }

    async fn transact_in<T, F>(&self, span: Span, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        let mut txn = self.manager.begin().await?;
        let result = {
            let _enter = span.enter();
            f(&mut txn)
        };
        match result {
            Ok(value) => {
                self.manager.commit(txn).await?;
                Ok(value)
            }
            Err(err) => {
                self.manager.rollback(txn)?;
                let _enter = span.enter();
                if err.is_integrity() {
                    event!(Level::ERROR, error = %err, "integrity violation, transaction rolled back");
                } else {
                    event!(Level::DEBUG, error = %err, "transaction rolled back");
                }
                Err(err)
            }
        }
    }

    /// Consistent view of the last committed state.
    pub async fn snapshot(&self) -> StoreState {
        self.manager.snapshot().await
    }

    pub async fn checkpoint(&self) -> Result<()> {
        self.manager.checkpoint().await
    }

    // ------------------------------------------------------------------
    // Model catalog
    // ------------------------------------------------------------------

    pub async fn register_model(&self, def: &ModelDef) -> Result<ModelRecord> {
        let span = info_span!("simvault.model.register", model = %def.name);
        let options = self.options;
        self.transact_in(span, |tx| registry::register_model(tx, def, options))
            .await
    }

    pub async fn parameter_hid(&self, model_id: ModelId, name: &str) -> Result<Hid> {
        registry::parameter_hid(&self.snapshot().await, model_id, name)
    }

    pub async fn table_hid(&self, model_id: ModelId, name: &str) -> Result<Hid> {
        registry::table_hid(&self.snapshot().await, model_id, name)
    }

    pub async fn entity_hid(&self, model_id: ModelId, name: &str) -> Result<Hid> {
        registry::entity_hid(&self.snapshot().await, model_id, name)
    }

    // ------------------------------------------------------------------
    // Runs and worksets
    // ------------------------------------------------------------------

    pub async fn create_run(&self, model_id: ModelId, name: &str, sub_count: u32) -> Result<RunRecord> {
        let span = info_span!("simvault.run.create", model_id, name = %name);
        self.transact_in(span, |tx| registry::create_run(tx, model_id, name, sub_count))
            .await
    }

    pub async fn update_run_status(&self, run_id: RunId, status: RunStatus) -> Result<RunRecord> {
        let span = info_span!("simvault.run.status", run_id, status = %status);
        self.transact_in(span, |tx| registry::update_run_status(tx, run_id, status))
            .await
    }

    pub async fn set_run_option(&self, run_id: RunId, key: &str, value: &str) -> Result<()> {
        self.transact(|tx| registry::set_run_option(tx, run_id, key, value))
            .await
    }

    pub async fn set_run_text(&self, run_id: RunId, lang: &str, descr: &str) -> Result<()> {
        self.transact(|tx| registry::set_run_text(tx, run_id, lang, descr))
            .await
    }

    pub async fn finalize_run_digest(&self, run_id: RunId) -> Result<RunRecord> {
        let span = info_span!("simvault.run.finalize", run_id);
        self.transact_in(span, |tx| registry::finalize_run_digest(tx, run_id))
            .await
    }

    pub async fn run(&self, run_id: RunId) -> Result<RunRecord> {
        Ok(self.snapshot().await.run(run_id)?.clone())
    }

    pub async fn list_runs(&self) -> Vec<RunRecord> {
        self.snapshot().await.runs().cloned().collect()
    }

    pub async fn run_options(&self, run_id: RunId) -> Result<Vec<(String, String)>> {
        let state = self.snapshot().await;
        state.run(run_id)?;
        Ok(state.run_options(run_id))
    }

    pub async fn create_workset(
        &self,
        model_id: ModelId,
        name: &str,
        base_run_id: Option<RunId>,
    ) -> Result<WorksetRecord> {
        self.transact(|tx| registry::create_workset(tx, model_id, name, base_run_id))
            .await
    }

    pub async fn workset(&self, workset_id: WorksetId) -> Result<WorksetRecord> {
        Ok(self.snapshot().await.workset(workset_id)?.clone())
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Bind a value set to a completed run, deduplicating by content digest.
    pub async fn write_values(&self, run_id: RunId, set: ValueSet) -> Result<WriteOutcome> {
        let span = info_span!(
            "simvault.values.write",
            run_id,
            kind = %set.kind(),
            cells = set.cell_count()
        );
        let options = self.options;
        self.transact_in(span, |tx| values::write_values(tx, run_id, &set, options))
            .await
    }

    pub async fn write_parameter(&self, run_id: RunId, hid: Hid, cells: Vec<ParameterCell>) -> Result<WriteOutcome> {
        self.write_values(run_id, ValueSet::Parameter { hid, cells }).await
    }

    pub async fn write_output_table(
        &self,
        run_id: RunId,
        hid: Hid,
        accumulators: Vec<AccumulatorCell>,
        expressions: Vec<ExpressionCell>,
    ) -> Result<WriteOutcome> {
        self.write_values(
            run_id,
            ValueSet::OutputTable {
                hid,
                accumulators,
                expressions,
            },
        )
        .await
    }

    pub async fn write_microdata(
        &self,
        run_id: RunId,
        entity_hid: Hid,
        attr_ids: Vec<i32>,
        rows: Vec<MicrodataRow>,
    ) -> Result<WriteOutcome> {
        self.write_values(
            run_id,
            ValueSet::Microdata {
                entity_hid,
                attr_ids,
                rows,
            },
        )
        .await
    }

    // ------------------------------------------------------------------
    // Delete path
    // ------------------------------------------------------------------

    /// Delete a run: unlink and re-parent, drop its data, drop its metadata,
    /// all in one transaction.
    pub async fn delete_run(&self, run_id: RunId) -> Result<DeleteReport> {
        let span = info_span!("simvault.run.delete", run_id);
        let report = self
            .transact_in(span.clone(), |tx| values::delete_run(tx, run_id))
            .await?;
        let _enter = span.enter();
        event!(
            Level::INFO,
            reparented = report.unlink.reparented.len(),
            rows_deleted = report.body.rows_deleted,
            generations_dropped = report.body.generations_dropped.len(),
            "run deleted"
        );
        Ok(report)
    }

    pub async fn unlink_run(&self, run_id: RunId) -> Result<UnlinkReport> {
        let span = info_span!("simvault.run.unlink", run_id);
        self.transact_in(span, |tx| values::unlink_run(tx, run_id)).await
    }

    pub async fn delete_run_body(&self, run_id: RunId) -> Result<BodyReport> {
        let span = info_span!("simvault.run.delete_body", run_id);
        self.transact_in(span, |tx| values::delete_run_body(tx, run_id)).await
    }

    pub async fn delete_run_meta(&self, run_id: RunId) -> Result<MetaReport> {
        let span = info_span!("simvault.run.delete_meta", run_id);
        self.transact_in(span, |tx| values::delete_run_meta(tx, run_id)).await
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    pub async fn resolve_physical_owner(&self, run_id: RunId, key: ValueTypeKey) -> Result<RunId> {
        values::resolve_physical_owner(&self.snapshot().await, run_id, key)
    }

    pub async fn binding(&self, run_id: RunId, key: ValueTypeKey) -> Result<Binding> {
        values::binding(&self.snapshot().await, run_id, key)
    }

    pub async fn read_parameter(&self, run_id: RunId, hid: Hid) -> Result<Vec<ParameterCell>> {
        values::read_parameter(&self.snapshot().await, run_id, hid)
    }

    pub async fn read_output_table(&self, run_id: RunId, hid: Hid) -> Result<OutputTableValues> {
        values::read_output_table(&self.snapshot().await, run_id, hid)
    }

    pub async fn read_microdata(&self, run_id: RunId, generation_hid: Hid) -> Result<Vec<MicrodataRow>> {
        values::read_microdata(&self.snapshot().await, run_id, generation_hid)
    }

    pub async fn run_generations(&self, run_id: RunId, entity_hid: Hid) -> Result<Vec<Hid>> {
        values::run_generations(&self.snapshot().await, run_id, entity_hid)
    }

    /// Rows physically stored under `run_id` for one value type.
    pub async fn physical_row_count(&self, key: ValueTypeKey, run_id: RunId) -> Result<usize> {
        self.snapshot().await.physical_row_count(key, run_id)
    }

    /// Rows of one value type across all owners.
    pub async fn physical_row_total(&self, key: ValueTypeKey) -> Result<usize> {
        self.snapshot().await.physical_row_total(key)
    }

    pub async fn stats(&self) -> StoreStats {
        StoreStats::collect(&self.snapshot().await)
    }

    /// Check bindings and physical rows against the dedup invariants.
    pub async fn verify(&self) -> Result<()> {
        self.snapshot().await.verify().map_err(|err| {
            event!(Level::ERROR, error = %err, "store verification failed");
            err
        })
    }
}

impl Default for RunStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for RunStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStore")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .finish()
    }
}
