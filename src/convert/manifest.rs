//! CUR manifest decoding and column schema derivation.
//!
//! The manifest, not the CSV header, is authoritative: its column order
//! fixes CSV field positions, and skipped positions still consume a field
//! in every incoming row.

use std::collections::HashSet;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde::Deserialize;
use snafu::prelude::*;

use crate::error::{InvalidSnafu, ManifestError};

/// Columns the CUR carries as numbers; everything else is a string.
const DOUBLE_COLUMNS: [&str; 13] = [
    "lineitem/usageamount",
    "lineitem/normalizationfactor",
    "lineitem/normalizedusageamount",
    "lineitem/unblendedrate",
    "lineitem/unblendedcost",
    "lineitem/blendedrate",
    "lineitem/blendedcost",
    "pricing/publicondemandcost",
    "pricing/publicondemandrate",
    "reservation/normalizedunitsperreservation",
    "reservation/totalreservednormalizedunits",
    "reservation/totalreservedunits",
    "reservation/unitsperreservation",
];

/// The JSON manifest AWS writes next to each monthly report.
#[derive(Debug, Deserialize)]
pub struct Manifest {
    pub columns: Vec<ManifestColumn>,
    #[serde(rename = "reportKeys")]
    pub report_keys: Vec<String>,
}

/// One `{category, name}` column entry.
#[derive(Debug, Deserialize)]
pub struct ManifestColumn {
    pub category: String,
    pub name: String,
}

impl Manifest {
    /// Decode a manifest body; `bucket`/`key` feed error context.
    pub fn from_slice(bytes: &[u8], bucket: &str, key: &str) -> Result<Self, ManifestError> {
        serde_json::from_slice(bytes).context(InvalidSnafu {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

/// Physical type of an emitted Parquet column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Utf8,
    Double,
}

/// One manifest position: canonical name, type, and whether the position
/// is a duplicate that must be skipped while still consuming a CSV field.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub raw_name: String,
    pub canonical_name: String,
    pub column_type: ColumnType,
    pub skip: bool,
}

/// An emitted column projected for the query engine's DDL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurColumn {
    pub name: String,
    pub column_type: &'static str,
}

/// The positional column schema derived from a manifest.
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    columns: Vec<ColumnDescriptor>,
}

impl ColumnSchema {
    /// Canonicalize, de-duplicate (first wins), and type each position.
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut seen = HashSet::new();
        let columns = manifest
            .columns
            .iter()
            .map(|column| {
                let raw_name = format!("{}/{}", column.category, column.name);
                let canonical_name = canonicalize(&raw_name);
                let skip = !seen.insert(canonical_name.clone());
                let column_type = if DOUBLE_COLUMNS.contains(&canonical_name.as_str()) {
                    ColumnType::Double
                } else {
                    ColumnType::Utf8
                };
                ColumnDescriptor {
                    raw_name,
                    canonical_name,
                    column_type,
                    skip,
                }
            })
            .collect();
        Self { columns }
    }

    /// All positions in manifest order, skipped ones included.
    pub fn descriptors(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Positions emitted to Parquet, in manifest order.
    pub fn emitted(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| !c.skip)
    }

    /// Field count every shard row must carry (skips included).
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Arrow schema of the emitted columns; every field is nullable.
    pub fn to_arrow(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .emitted()
            .map(|column| {
                let data_type = match column.column_type {
                    ColumnType::Utf8 => DataType::Utf8,
                    ColumnType::Double => DataType::Float64,
                };
                Field::new(&column.canonical_name, data_type, true)
            })
            .collect();
        Arc::new(Schema::new(fields))
    }

    /// Emitted columns as `(name, STRING | DOUBLE)` pairs for table DDL.
    pub fn cur_columns(&self) -> Vec<CurColumn> {
        self.emitted()
            .map(|column| CurColumn {
                name: column.canonical_name.clone(),
                column_type: match column.column_type {
                    ColumnType::Utf8 => "STRING",
                    ColumnType::Double => "DOUBLE",
                },
            })
            .collect()
    }
}

/// Lowercase and replace every character outside `[a-z0-9/]` with `_`.
pub fn canonicalize(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '/' => c,
            _ => '_',
        })
        .collect()
}
