//! Content digests for run values, run identity and entity generations.
//!
//! Every digest is an MD5 over a stream of text lines: a header line naming
//! the digest family, the value-type name and its structural digest, a column
//! line, then one line per cell. The engine hashes cells in the order given;
//! callers are responsible for presenting them in canonical order (ascending
//! sub-value id, then ascending dimension ids). The same values in a different
//! order produce a different digest.

use crate::core::{
    AccumulatorCell, DataType, DbError, ExpressionCell, MicrodataRow, ParameterCell, Result,
    RunStatus, Value, ValueTypeKey,
};
use md5::{Digest as Md5Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};

/// Text encoding of floating point cells.
///
/// `Shortest` is lossless. Fixed formats let writers that round differently
/// agree on a digest, but only writers using the same format ever match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FloatFormat {
    #[default]
    Shortest,
    Fixed(usize),
    Scientific(usize),
}

impl FloatFormat {
    /// Parse `shortest`, `fixed:<digits>` or `sci:<digits>`.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim().to_ascii_lowercase();
        if spec == "shortest" {
            return Ok(Self::Shortest);
        }
        let (kind, digits) = spec
            .split_once(':')
            .ok_or_else(|| DbError::InvalidArgument(format!("invalid float format '{}'", spec)))?;
        let digits: usize = digits
            .parse()
            .map_err(|_| DbError::InvalidArgument(format!("invalid float precision '{}'", digits)))?;
        match kind {
            "fixed" => Ok(Self::Fixed(digits)),
            "sci" | "scientific" => Ok(Self::Scientific(digits)),
            _ => Err(DbError::InvalidArgument(format!("invalid float format '{}'", spec))),
        }
    }

    fn write(&self, out: &mut String, value: f64) -> fmt::Result {
        if value.is_nan() {
            return out.write_str("NaN");
        }
        if value.is_infinite() {
            return out.write_str(if value > 0.0 { "Infinity" } else { "-Infinity" });
        }
        match self {
            Self::Shortest => write!(out, "{}", value),
            Self::Fixed(digits) => write!(out, "{:.*}", digits, value),
            Self::Scientific(digits) => write!(out, "{:.*e}", digits, value),
        }
    }
}

/// Header tokens keep digests of different families from ever colliding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderToken {
    Parameter,
    OutputTable,
    Microdata,
    Run,
    RunValues,
    EntityGeneration,
}

impl HeaderToken {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Parameter => "parameter_values",
            Self::OutputTable => "output_table_values",
            Self::Microdata => "entity_microdata",
            Self::Run => "run_identity",
            Self::RunValues => "run_values",
            Self::EntityGeneration => "entity_generation",
        }
    }
}

/// Structural description of the value type being hashed.
#[derive(Debug, Clone, Copy)]
pub struct ValueShape<'a> {
    pub name: &'a str,
    pub digest: &'a str,
    pub rank: usize,
    pub data_type: DataType,
}

enum Field<'a> {
    Int(i64),
    Str(&'a str),
    Cell(&'a Value),
}

/// Streaming line writer over an MD5 hasher.
pub struct DigestWriter {
    hasher: Md5,
    float_format: FloatFormat,
    line: String,
}

impl DigestWriter {
    pub fn new(token: HeaderToken, name: &str, structural_digest: &str, float_format: FloatFormat) -> Result<Self> {
        let mut writer = Self {
            hasher: Md5::new(),
            float_format,
            line: String::new(),
        };
        writer.line(&[
            Field::Str(token.as_str()),
            Field::Str(name),
            Field::Str(structural_digest),
        ])?;
        Ok(writer)
    }

    fn line(&mut self, fields: &[Field<'_>]) -> Result<()> {
        self.line.clear();
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                self.line.push(',');
            }
            match field {
                Field::Int(v) => write!(self.line, "{}", v)?,
                Field::Str(s) => write_quoted(&mut self.line, s)?,
                Field::Cell(v) => self.write_cell(v)?,
            }
        }
        self.line.push('\n');
        self.hasher.update(self.line.as_bytes());
        Ok(())
    }

    fn write_cell(&mut self, value: &Value) -> fmt::Result {
        match value {
            Value::Null => self.line.write_str("NULL"),
            Value::Integer(i) => write!(self.line, "{}", i),
            Value::Float(f) => self.float_format.write(&mut self.line, *f),
            Value::Boolean(b) => self.line.write_str(if *b { "true" } else { "false" }),
            Value::Text(s) => {
                // Text cells are always quoted so that "NULL" never matches a null.
                self.line.push('"');
                for ch in s.chars() {
                    if ch == '"' {
                        self.line.push('"');
                    }
                    self.line.push(ch);
                }
                self.line.push('"');
                Ok(())
            }
        }
    }

    fn columns(&mut self, names: &[String]) -> Result<()> {
        let fields: Vec<Field<'_>> = names.iter().map(|n| Field::Str(n.as_str())).collect();
        self.line(&fields)
    }

    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

fn write_quoted(out: &mut String, s: &str) -> fmt::Result {
    if s.contains([',', '"', '\n', '\r']) {
        out.push('"');
        for ch in s.chars() {
            if ch == '"' {
                out.push('"');
            }
            out.push(ch);
        }
        out.push('"');
        Ok(())
    } else {
        out.write_str(s)
    }
}

fn dim_columns(rank: usize) -> impl Iterator<Item = String> {
    (0..rank).map(|i| format!("dim{}", i))
}

fn check_cell(shape: &ValueShape<'_>, dims: &[i32], value: &Value, what: &str) -> Result<()> {
    if dims.len() != shape.rank {
        return Err(DbError::Digest(format!(
            "{} '{}' has rank {}, cell has {} dimensions",
            what,
            shape.name,
            shape.rank,
            dims.len()
        )));
    }
    if !shape.data_type.is_compatible(value) {
        return Err(DbError::Digest(format!(
            "unsupported {} value for {} '{}' of type {}",
            value.type_name(),
            what,
            shape.name,
            shape.data_type
        )));
    }
    Ok(())
}

pub fn parameter_digest(shape: &ValueShape<'_>, cells: &[ParameterCell], float_format: FloatFormat) -> Result<String> {
    let mut writer = DigestWriter::new(HeaderToken::Parameter, shape.name, shape.digest, float_format)?;

    let mut columns = vec!["sub_id".to_string()];
    columns.extend(dim_columns(shape.rank));
    columns.push("param_value".to_string());
    writer.columns(&columns)?;

    let mut fields = Vec::with_capacity(shape.rank + 2);
    for cell in cells {
        check_cell(shape, &cell.dims, &cell.value, "parameter")?;
        fields.clear();
        fields.push(Field::Int(cell.sub_id as i64));
        fields.extend(cell.dims.iter().map(|d| Field::Int(*d as i64)));
        fields.push(Field::Cell(&cell.value));
        writer.line(&fields)?;
    }
    Ok(writer.finish())
}

/// Accumulators are hashed first, then expressions, each with its own column line.
pub fn output_table_digest(
    shape: &ValueShape<'_>,
    accumulators: &[AccumulatorCell],
    expressions: &[ExpressionCell],
    float_format: FloatFormat,
) -> Result<String> {
    let mut writer = DigestWriter::new(HeaderToken::OutputTable, shape.name, shape.digest, float_format)?;

    let mut columns = vec!["acc_id".to_string(), "sub_id".to_string()];
    columns.extend(dim_columns(shape.rank));
    columns.push("acc_value".to_string());
    writer.columns(&columns)?;

    let mut fields = Vec::with_capacity(shape.rank + 3);
    for cell in accumulators {
        check_cell(shape, &cell.dims, &cell.value, "output table")?;
        fields.clear();
        fields.push(Field::Int(cell.acc_id as i64));
        fields.push(Field::Int(cell.sub_id as i64));
        fields.extend(cell.dims.iter().map(|d| Field::Int(*d as i64)));
        fields.push(Field::Cell(&cell.value));
        writer.line(&fields)?;
    }

    let mut columns = vec!["expr_id".to_string()];
    columns.extend(dim_columns(shape.rank));
    columns.push("expr_value".to_string());
    writer.columns(&columns)?;

    for cell in expressions {
        check_cell(shape, &cell.dims, &cell.value, "output table")?;
        fields.clear();
        fields.push(Field::Int(cell.expr_id as i64));
        fields.extend(cell.dims.iter().map(|d| Field::Int(*d as i64)));
        fields.push(Field::Cell(&cell.value));
        writer.line(&fields)?;
    }
    Ok(writer.finish())
}

/// Attribute as seen by the generation and microdata digests.
#[derive(Debug, Clone, Copy)]
pub struct AttributeShape<'a> {
    pub id: i32,
    pub name: &'a str,
    pub data_type: DataType,
    pub type_digest: &'a str,
}

/// Schema identity of an entity generation: entity digest plus the ordered
/// attribute (name, type digest) list.
pub fn generation_digest(entity_name: &str, entity_digest: &str, attrs: &[AttributeShape<'_>]) -> Result<String> {
    let mut writer = DigestWriter::new(
        HeaderToken::EntityGeneration,
        entity_name,
        entity_digest,
        FloatFormat::Shortest,
    )?;
    writer.columns(&["attr_id".to_string(), "attr_name".to_string(), "type_digest".to_string()])?;
    for attr in attrs {
        writer.line(&[
            Field::Int(attr.id as i64),
            Field::Str(attr.name),
            Field::Str(attr.type_digest),
        ])?;
    }
    Ok(writer.finish())
}

pub fn microdata_digest(
    entity_name: &str,
    generation_digest: &str,
    attrs: &[AttributeShape<'_>],
    rows: &[MicrodataRow],
    float_format: FloatFormat,
) -> Result<String> {
    let mut writer = DigestWriter::new(HeaderToken::Microdata, entity_name, generation_digest, float_format)?;

    let mut columns = vec!["entity_key".to_string()];
    columns.extend(attrs.iter().map(|a| a.name.to_string()));
    writer.columns(&columns)?;

    let mut fields = Vec::with_capacity(attrs.len() + 1);
    for row in rows {
        if row.attrs.len() != attrs.len() {
            return Err(DbError::Digest(format!(
                "entity '{}' row {} has {} attributes, expected {}",
                entity_name,
                row.key,
                row.attrs.len(),
                attrs.len()
            )));
        }
        for (attr, value) in attrs.iter().zip(row.attrs.iter()) {
            if !attr.data_type.is_compatible(value) {
                return Err(DbError::Digest(format!(
                    "unsupported {} value for attribute '{}' of type {}",
                    value.type_name(),
                    attr.name,
                    attr.data_type
                )));
            }
        }
        let key = i64::try_from(row.key).map_err(|_| {
            DbError::Digest(format!("entity key {} is out of range", row.key))
        })?;
        fields.clear();
        fields.push(Field::Int(key));
        fields.extend(row.attrs.iter().map(Field::Cell));
        writer.line(&fields)?;
    }
    Ok(writer.finish())
}

fn write_value_digests(writer: &mut DigestWriter, values: &[(ValueTypeKey, String)]) -> Result<()> {
    let mut ordered: Vec<&(ValueTypeKey, String)> = values.iter().collect();
    ordered.sort_by_key(|(key, _)| *key);

    writer.columns(&["kind".to_string(), "hid".to_string(), "value_digest".to_string()])?;
    for (key, digest) in ordered {
        let hid = i64::try_from(key.hid)
            .map_err(|_| DbError::Digest(format!("hid {} is out of range", key.hid)))?;
        writer.line(&[Field::Str(key.kind.as_str()), Field::Int(hid), Field::Str(digest)])?;
    }
    Ok(())
}

/// Digest over every value-type digest of a run, ordered by value-type key.
pub fn run_value_digest(values: &[(ValueTypeKey, String)]) -> Result<String> {
    let mut writer = DigestWriter::new(HeaderToken::RunValues, "", "", FloatFormat::Shortest)?;
    write_value_digests(&mut writer, values)?;
    Ok(writer.finish())
}

/// Run identity: run metadata plus every value-type digest of the run.
pub fn run_digest(
    model_digest: &str,
    sub_count: u32,
    status: RunStatus,
    values: &[(ValueTypeKey, String)],
) -> Result<String> {
    let mut writer = DigestWriter::new(HeaderToken::Run, "", model_digest, FloatFormat::Shortest)?;
    writer.line(&[Field::Int(sub_count as i64), Field::Str(status.code())])?;
    write_value_digests(&mut writer, values)?;
    Ok(writer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> ValueShape<'static> {
        ValueShape {
            name: "ageSex",
            digest: "a1b2c3",
            rank: 2,
            data_type: DataType::Float,
        }
    }

    fn cells() -> Vec<ParameterCell> {
        vec![
            ParameterCell::new(0, vec![0, 0], 1.5),
            ParameterCell::new(0, vec![0, 1], 2.5),
        ]
    }

    #[test]
    fn test_digest_is_deterministic_hex() {
        let a = parameter_digest(&shape(), &cells(), FloatFormat::Shortest).unwrap();
        let b = parameter_digest(&shape(), &cells(), FloatFormat::Shortest).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_digest_is_order_sensitive() {
        let mut reversed = cells();
        reversed.reverse();
        let a = parameter_digest(&shape(), &cells(), FloatFormat::Shortest).unwrap();
        let b = parameter_digest(&shape(), &reversed, FloatFormat::Shortest).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_structural_digest_changes_content_digest() {
        let other = ValueShape { digest: "ffff", ..shape() };
        let a = parameter_digest(&shape(), &cells(), FloatFormat::Shortest).unwrap();
        let b = parameter_digest(&other, &cells(), FloatFormat::Shortest).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fixed_float_format_merges_close_values() {
        let near = vec![
            ParameterCell::new(0, vec![0, 0], 1.5000001),
            ParameterCell::new(0, vec![0, 1], 2.5),
        ];
        let exact_a = parameter_digest(&shape(), &cells(), FloatFormat::Shortest).unwrap();
        let exact_b = parameter_digest(&shape(), &near, FloatFormat::Shortest).unwrap();
        assert_ne!(exact_a, exact_b);

        let fixed_a = parameter_digest(&shape(), &cells(), FloatFormat::Fixed(4)).unwrap();
        let fixed_b = parameter_digest(&shape(), &near, FloatFormat::Fixed(4)).unwrap();
        assert_eq!(fixed_a, fixed_b);
    }

    #[test]
    fn test_null_and_text_null_differ() {
        let text_shape = ValueShape { data_type: DataType::Text, rank: 0, ..shape() };
        let null = vec![ParameterCell::new(0, vec![], Value::Null)];
        let text = vec![ParameterCell::new(0, vec![], "NULL")];
        assert_ne!(
            parameter_digest(&text_shape, &null, FloatFormat::Shortest).unwrap(),
            parameter_digest(&text_shape, &text, FloatFormat::Shortest).unwrap()
        );
    }

    #[test]
    fn test_unsupported_value_aborts() {
        let bad = vec![ParameterCell::new(0, vec![0, 0], "oops")];
        let err = parameter_digest(&shape(), &bad, FloatFormat::Shortest).unwrap_err();
        assert!(matches!(err, DbError::Digest(_)));

        let wrong_rank = vec![ParameterCell::new(0, vec![0], 1.0)];
        assert!(parameter_digest(&shape(), &wrong_rank, FloatFormat::Shortest).is_err());
    }

    #[test]
    fn test_header_tokens_separate_families() {
        let run_values = run_value_digest(&[]).unwrap();
        let generation = generation_digest("", "", &[]).unwrap();
        assert_ne!(run_values, generation);
    }

    #[test]
    fn test_run_value_digest_ignores_input_order() {
        let a = vec![
            (ValueTypeKey::parameter(1), "aa".to_string()),
            (ValueTypeKey::output_table(1), "bb".to_string()),
        ];
        let b = vec![a[1].clone(), a[0].clone()];
        assert_eq!(run_value_digest(&a).unwrap(), run_value_digest(&b).unwrap());
    }

    #[test]
    fn test_generation_digest_depends_on_attributes() {
        let age = AttributeShape { id: 0, name: "age", data_type: DataType::Integer, type_digest: "t1" };
        let income = AttributeShape { id: 1, name: "income", data_type: DataType::Float, type_digest: "t2" };
        let one = generation_digest("Person", "e1", &[age]).unwrap();
        let two = generation_digest("Person", "e1", &[age, income]).unwrap();
        assert_ne!(one, two);
    }

    #[test]
    fn test_float_format_parse() {
        assert_eq!(FloatFormat::parse("shortest").unwrap(), FloatFormat::Shortest);
        assert_eq!(FloatFormat::parse("fixed:6").unwrap(), FloatFormat::Fixed(6));
        assert_eq!(FloatFormat::parse("sci:15").unwrap(), FloatFormat::Scientific(15));
        assert!(FloatFormat::parse("hex:2").is_err());
    }
}
