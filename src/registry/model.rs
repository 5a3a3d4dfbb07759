//! Model catalog: registers model definitions and assigns stable hids.
//!
//! A value type whose structural digest is already known keeps its hid and
//! its physical tables, so runs of different models that share a schema
//! element also share its storage.

use crate::core::{DataType, DbError, Hid, ModelId, Result};
use crate::storage::catalog::{
    AttributeMeta, EntityMeta, ModelRecord, OutputTableMeta, ParameterMeta, physical_table_name,
};
use crate::storage::state::{Sequence, StoreState};
use crate::storage::table::{TableRole, TableSchema};
use crate::transaction::{Change, Transaction};
use crate::values::ValueOptions;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    pub digest: String,
    pub rank: usize,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputTableDef {
    pub name: String,
    pub digest: String,
    pub rank: usize,
    pub acc_count: usize,
    pub expr_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    pub digest: String,
    pub attributes: Vec<AttributeMeta>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            digest: digest.into(),
            attributes: Vec::new(),
        }
    }

    pub fn attribute(mut self, id: i32, name: impl Into<String>, data_type: DataType, type_digest: impl Into<String>) -> Self {
        self.attributes.push(AttributeMeta {
            id,
            name: name.into(),
            data_type,
            type_digest: type_digest.into(),
        });
        self
    }
}

/// A model definition as supplied by the model compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    pub name: String,
    pub digest: String,
    pub parameters: Vec<ParameterDef>,
    pub tables: Vec<OutputTableDef>,
    pub entities: Vec<EntityDef>,
}

impl ModelDef {
    pub fn new(name: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            digest: digest.into(),
            parameters: Vec::new(),
            tables: Vec::new(),
            entities: Vec::new(),
        }
    }

    pub fn parameter(mut self, name: impl Into<String>, digest: impl Into<String>, rank: usize, data_type: DataType) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            digest: digest.into(),
            rank,
            data_type,
        });
        self
    }

    pub fn output_table(
        mut self,
        name: impl Into<String>,
        digest: impl Into<String>,
        rank: usize,
        acc_count: usize,
        expr_count: usize,
    ) -> Self {
        self.tables.push(OutputTableDef {
            name: name.into(),
            digest: digest.into(),
            rank,
            acc_count,
            expr_count,
        });
        self
    }

    pub fn entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.digest.is_empty() {
            return Err(DbError::InvalidArgument("model name and digest must not be empty".into()));
        }
        unique_names("parameter", self.parameters.iter().map(|p| (&p.name, &p.digest)))?;
        unique_names("output table", self.tables.iter().map(|t| (&t.name, &t.digest)))?;
        unique_names("entity", self.entities.iter().map(|e| (&e.name, &e.digest)))?;
        for entity in &self.entities {
            let mut ids = HashSet::new();
            for attr in &entity.attributes {
                if !ids.insert(attr.id) {
                    return Err(DbError::InvalidArgument(format!(
                        "entity '{}' declares attribute id {} twice",
                        entity.name, attr.id
                    )));
                }
            }
        }
        Ok(())
    }
}

fn unique_names<'a>(what: &str, items: impl Iterator<Item = (&'a String, &'a String)>) -> Result<()> {
    let mut seen = HashSet::new();
    for (name, digest) in items {
        if name.is_empty() || digest.is_empty() {
            return Err(DbError::InvalidArgument(format!("{} name and digest must not be empty", what)));
        }
        if !seen.insert(name.as_str()) {
            return Err(DbError::InvalidArgument(format!("{} '{}' is declared twice", what, name)));
        }
    }
    Ok(())
}

fn create_table(tx: &mut Transaction, name: &str, role: TableRole, digest: &str, hid: Hid, key_width: usize, options: ValueOptions) -> Result<String> {
    let table = physical_table_name(name, role, digest, options.max_identifier_len)?;
    if tx.data().table_exists(&table) {
        return Err(DbError::ExecutionError(format!(
            "physical table name '{}' for {} is already taken",
            table, name
        )));
    }
    tx.apply(Change::CreateTable {
        schema: TableSchema::new(table.clone(), role, hid, key_width, 1),
    })?;
    Ok(table)
}

/// Register a model, reusing hids and physical tables of value types whose
/// digest is already known. Registering the same model digest twice returns
/// the existing record.
pub fn register_model(tx: &mut Transaction, def: &ModelDef, options: ValueOptions) -> Result<ModelRecord> {
    def.validate()?;
    if let Some(existing) = tx.data().catalog().model_by_digest(&def.digest) {
        return Ok(existing.clone());
    }

    let model_id = tx.allocate_id(Sequence::ModelId)?;
    let mut parameters = im::OrdMap::new();
    let mut tables = im::OrdMap::new();
    let mut entities = im::OrdMap::new();

    for p in &def.parameters {
        let existing = tx.data().catalog().parameter_by_digest(&p.digest).cloned();
        let hid = match existing {
            Some(meta) if meta.rank == p.rank && meta.data_type == p.data_type => meta.hid,
            Some(meta) => {
                return Err(DbError::InvalidArgument(format!(
                    "parameter '{}' digest {} is already registered with a different shape",
                    p.name, meta.digest
                )));
            }
            None => {
                let hid = tx.allocate_id(Sequence::ParameterHid)?;
                let table = create_table(tx, &p.name, TableRole::ParameterValues, &p.digest, hid, p.rank + 1, options)?;
                tx.apply(Change::PutParameter(ParameterMeta {
                    hid,
                    name: p.name.clone(),
                    digest: p.digest.clone(),
                    rank: p.rank,
                    data_type: p.data_type,
                    table,
                }))?;
                hid
            }
        };
        parameters.insert(p.name.clone(), hid);
    }

    for t in &def.tables {
        let existing = tx.data().catalog().output_table_by_digest(&t.digest).cloned();
        let hid = match existing {
            Some(meta) => meta.hid,
            None => {
                let hid = tx.allocate_id(Sequence::TableHid)?;
                let acc_table = create_table(tx, &t.name, TableRole::Accumulators, &t.digest, hid, t.rank + 2, options)?;
                let expr_table = create_table(tx, &t.name, TableRole::Expressions, &t.digest, hid, t.rank + 1, options)?;
                tx.apply(Change::PutOutputTable(OutputTableMeta {
                    hid,
                    name: t.name.clone(),
                    digest: t.digest.clone(),
                    rank: t.rank,
                    acc_count: t.acc_count,
                    expr_count: t.expr_count,
                    acc_table,
                    expr_table,
                }))?;
                hid
            }
        };
        tables.insert(t.name.clone(), hid);
    }

    for e in &def.entities {
        let existing = tx.data().catalog().entity_by_digest(&e.digest).cloned();
        let hid = match existing {
            Some(meta) => meta.hid,
            None => {
                let hid = tx.allocate_id(Sequence::EntityHid)?;
                let mut attributes = e.attributes.clone();
                attributes.sort_by_key(|a| a.id);
                tx.apply(Change::PutEntity(EntityMeta {
                    hid,
                    name: e.name.clone(),
                    digest: e.digest.clone(),
                    attributes,
                }))?;
                hid
            }
        };
        entities.insert(e.name.clone(), hid);
    }

    let record = ModelRecord {
        model_id,
        name: def.name.clone(),
        digest: def.digest.clone(),
        parameters,
        tables,
        entities,
        created_at: Utc::now(),
    };
    tx.apply(Change::PutModel(record.clone()))?;
    Ok(record)
}

pub fn parameter_hid(state: &StoreState, model_id: ModelId, name: &str) -> Result<Hid> {
    let model = state.catalog().model(model_id)?;
    model
        .parameters
        .get(name)
        .copied()
        .ok_or_else(|| DbError::NotFound(format!("Parameter '{}' of model {}", name, model.name)))
}

pub fn table_hid(state: &StoreState, model_id: ModelId, name: &str) -> Result<Hid> {
    let model = state.catalog().model(model_id)?;
    model
        .tables
        .get(name)
        .copied()
        .ok_or_else(|| DbError::NotFound(format!("Output table '{}' of model {}", name, model.name)))
}

pub fn entity_hid(state: &StoreState, model_id: ModelId, name: &str) -> Result<Hid> {
    let model = state.catalog().model(model_id)?;
    model
        .entities
        .get(name)
        .copied()
        .ok_or_else(|| DbError::NotFound(format!("Entity '{}' of model {}", name, model.name)))
}
