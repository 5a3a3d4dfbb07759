//! Model metadata known to the store: parameters, output tables, entities and
//! entity generations, plus deterministic physical table naming.

use super::table::TableRole;
use crate::core::{DataType, DbError, Hid, ModelId, Result};
use crate::digest::{AttributeShape, ValueShape};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref NON_IDENT: Regex = Regex::new(r"[^A-Za-z0-9_]").unwrap();
}

/// Shortest digest prefix used in physical table names.
const NAME_DIGEST_LEN: usize = 8;

/// Deterministic physical table name: sanitized value-type name, role suffix
/// and a digest prefix, truncated to fit `max_len`.
pub fn physical_table_name(name: &str, role: TableRole, digest: &str, max_len: usize) -> Result<String> {
    let digest: String = NON_IDENT
        .replace_all(digest, "")
        .chars()
        .take(NAME_DIGEST_LEN)
        .collect();
    let tail = format!("_{}{}", role.suffix(), digest);
    if tail.len() + 1 > max_len {
        return Err(DbError::InvalidArgument(format!(
            "identifier limit {} is too small for table names",
            max_len
        )));
    }

    let mut prefix = NON_IDENT.replace_all(name, "_").into_owned();
    if prefix.is_empty() || prefix.starts_with(|c: char| c.is_ascii_digit()) {
        prefix.insert(0, 't');
    }
    prefix.truncate(max_len - tail.len());
    Ok(format!("{}{}", prefix, tail))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMeta {
    pub id: i32,
    pub name: String,
    pub data_type: DataType,
    pub type_digest: String,
}

impl AttributeMeta {
    pub fn shape(&self) -> AttributeShape<'_> {
        AttributeShape {
            id: self.id,
            name: &self.name,
            data_type: self.data_type,
            type_digest: &self.type_digest,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterMeta {
    pub hid: Hid,
    pub name: String,
    pub digest: String,
    pub rank: usize,
    pub data_type: DataType,
    pub table: String,
}

impl ParameterMeta {
    pub fn shape(&self) -> ValueShape<'_> {
        ValueShape {
            name: &self.name,
            digest: &self.digest,
            rank: self.rank,
            data_type: self.data_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputTableMeta {
    pub hid: Hid,
    pub name: String,
    pub digest: String,
    pub rank: usize,
    pub acc_count: usize,
    pub expr_count: usize,
    pub acc_table: String,
    pub expr_table: String,
}

impl OutputTableMeta {
    pub fn shape(&self) -> ValueShape<'_> {
        ValueShape {
            name: &self.name,
            digest: &self.digest,
            rank: self.rank,
            data_type: DataType::Float,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMeta {
    pub hid: Hid,
    pub name: String,
    pub digest: String,
    pub attributes: Vec<AttributeMeta>,
}

impl EntityMeta {
    pub fn attribute(&self, id: i32) -> Option<&AttributeMeta> {
        self.attributes.iter().find(|a| a.id == id)
    }
}

/// A schema-level identity of microdata: one entity with one attribute subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationMeta {
    pub hid: Hid,
    pub entity_hid: Hid,
    pub digest: String,
    pub attributes: Vec<AttributeMeta>,
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub model_id: ModelId,
    pub name: String,
    pub digest: String,
    pub parameters: im::OrdMap<String, Hid>,
    pub tables: im::OrdMap<String, Hid>,
    pub entities: im::OrdMap<String, Hid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    models: im::OrdMap<ModelId, ModelRecord>,
    parameters: im::OrdMap<Hid, ParameterMeta>,
    tables: im::OrdMap<Hid, OutputTableMeta>,
    entities: im::OrdMap<Hid, EntityMeta>,
    generations: im::OrdMap<Hid, GenerationMeta>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(&self, model_id: ModelId) -> Result<&ModelRecord> {
        self.models
            .get(&model_id)
            .ok_or_else(|| DbError::NotFound(format!("Model {}", model_id)))
    }

    pub fn model_by_digest(&self, digest: &str) -> Option<&ModelRecord> {
        self.models.values().find(|m| m.digest == digest)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelRecord> {
        self.models.values()
    }

    pub fn parameter(&self, hid: Hid) -> Result<&ParameterMeta> {
        self.parameters
            .get(&hid)
            .ok_or_else(|| DbError::NotFound(format!("Parameter hid {}", hid)))
    }

    pub fn parameter_by_digest(&self, digest: &str) -> Option<&ParameterMeta> {
        self.parameters.values().find(|p| p.digest == digest)
    }

    pub fn output_table(&self, hid: Hid) -> Result<&OutputTableMeta> {
        self.tables
            .get(&hid)
            .ok_or_else(|| DbError::NotFound(format!("Output table hid {}", hid)))
    }

    pub fn output_table_by_digest(&self, digest: &str) -> Option<&OutputTableMeta> {
        self.tables.values().find(|t| t.digest == digest)
    }

    pub fn entity(&self, hid: Hid) -> Result<&EntityMeta> {
        self.entities
            .get(&hid)
            .ok_or_else(|| DbError::NotFound(format!("Entity hid {}", hid)))
    }

    pub fn entity_by_digest(&self, digest: &str) -> Option<&EntityMeta> {
        self.entities.values().find(|e| e.digest == digest)
    }

    pub fn generation(&self, hid: Hid) -> Result<&GenerationMeta> {
        self.generations
            .get(&hid)
            .ok_or_else(|| DbError::NotFound(format!("Entity generation hid {}", hid)))
    }

    pub fn generation_by_digest(&self, entity_hid: Hid, digest: &str) -> Option<&GenerationMeta> {
        self.generations
            .values()
            .find(|g| g.entity_hid == entity_hid && g.digest == digest)
    }

    pub fn generations(&self) -> impl Iterator<Item = &GenerationMeta> {
        self.generations.values()
    }

    pub(crate) fn put_model(&mut self, model: ModelRecord) {
        self.models.insert(model.model_id, model);
    }

    pub(crate) fn put_parameter(&mut self, meta: ParameterMeta) {
        self.parameters.insert(meta.hid, meta);
    }

    pub(crate) fn put_output_table(&mut self, meta: OutputTableMeta) {
        self.tables.insert(meta.hid, meta);
    }

    pub(crate) fn put_entity(&mut self, meta: EntityMeta) {
        self.entities.insert(meta.hid, meta);
    }

    pub(crate) fn put_generation(&mut self, meta: GenerationMeta) {
        self.generations.insert(meta.hid, meta);
    }

    pub(crate) fn remove_generation(&mut self, hid: Hid) -> Result<GenerationMeta> {
        self.generations
            .remove(&hid)
            .ok_or_else(|| DbError::NotFound(format!("Entity generation hid {}", hid)))
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }
}
