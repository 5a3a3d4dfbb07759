#![allow(dead_code)]

use simvault::{
    DataType, EntityDef, Hid, ModelDef, ModelRecord, ParameterCell, RunId, RunStatus, RunStore,
};

pub const PARAM: &str = "ageSex";
pub const TABLE: &str = "salarySex";
pub const ENTITY: &str = "Person";

pub fn model_def() -> ModelDef {
    ModelDef::new("riskpaths", "model-digest-1")
        .parameter(PARAM, "param-digest-age-sex", 2, DataType::Float)
        .parameter("startYear", "param-digest-start-year", 0, DataType::Integer)
        .output_table(TABLE, "table-digest-salary-sex", 1, 2, 2)
        .entity(
            EntityDef::new(ENTITY, "entity-digest-person")
                .attribute(0, "age", DataType::Integer, "type-int")
                .attribute(1, "income", DataType::Float, "type-double")
                .attribute(2, "isOld", DataType::Boolean, "type-bool"),
        )
}

pub struct Fixture {
    pub store: RunStore,
    pub model: ModelRecord,
    pub param: Hid,
    pub table: Hid,
    pub entity: Hid,
}

pub async fn fixture() -> Fixture {
    let store = RunStore::in_memory();
    fixture_on(store).await
}

pub async fn fixture_on(store: RunStore) -> Fixture {
    let model = store.register_model(&model_def()).await.unwrap();
    let param = store.parameter_hid(model.model_id, PARAM).await.unwrap();
    let table = store.table_hid(model.model_id, TABLE).await.unwrap();
    let entity = store.entity_hid(model.model_id, ENTITY).await.unwrap();
    Fixture {
        store,
        model,
        param,
        table,
        entity,
    }
}

impl Fixture {
    /// Create a run and move it to `done`.
    pub async fn done_run(&self, name: &str) -> RunId {
        let run = self.store.create_run(self.model.model_id, name, 1).await.unwrap();
        self.store.update_run_status(run.run_id, RunStatus::Done).await.unwrap();
        run.run_id
    }

    /// Create runs that never complete until the next run id is `next`.
    pub async fn skip_to_run(&self, next: RunId) {
        loop {
            let run = self.store.create_run(self.model.model_id, "scratch", 1).await.unwrap();
            if run.run_id + 1 >= next {
                break;
            }
        }
    }
}

pub fn age_sex(a: f64, b: f64) -> Vec<ParameterCell> {
    vec![
        ParameterCell::new(0, vec![0, 0], a),
        ParameterCell::new(0, vec![0, 1], b),
    ]
}
