// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Cube and flat table descriptors consumed at setup.

use datafusion::arrow::datatypes::{DataType, TimeUnit};
use log::error;
use serde::Deserialize;

use crate::error::{CubistError, Result};

/// Descriptor of a cube as far as the fact distinct columns stage needs it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CubeDesc {
    pub name: String,
    /// Metadata format version the cube was created with, e.g. `2.6.0`.
    #[serde(default)]
    pub version: Option<String>,
    /// Row key columns, first column first.
    pub row_key: Vec<String>,
    pub dictionary_columns: Vec<DictionaryColumnDesc>,
    /// Every cuboid the cube builds.
    pub cuboids: Vec<u64>,
    #[serde(default)]
    pub mandatory_cuboids: Vec<u64>,
    #[serde(default)]
    pub partition_column: Option<String>,
    #[serde(default)]
    pub segments: Vec<SegmentDesc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DictionaryColumnDesc {
    pub name: String,
    pub data_type: String,
    /// Ultra high cardinality columns are spread over several shards.
    #[serde(default)]
    pub uhc: bool,
    /// Overrides the configured default shard multiplier for a UHC column.
    #[serde(default)]
    pub shard_multiplier: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SegmentDesc {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
}

/// Column layout of the flattened fact table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlatTableDesc {
    pub columns: Vec<String>,
}

impl FlatTableDesc {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    fn require_column(&self, name: &str, role: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            CubistError::Configuration(format!(
                "{role} column '{name}' is not part of the flat table"
            ))
        })
    }
}

/// A dictionary column bound to its flat table ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryColumn {
    pub name: String,
    pub ordinal: usize,
    pub data_type: DataType,
    pub uhc: bool,
    pub shard_multiplier: Option<usize>,
}

impl CubeDesc {
    /// Looks up a segment, logging the known segments when it is missing.
    pub fn segment(&self, segment_id: &str) -> Result<&SegmentDesc> {
        match self.segments.iter().find(|s| s.id == segment_id) {
            Some(segment) => Ok(segment),
            None => {
                error!("Failed to find segment {segment_id} in cube {}", self.name);
                for s in &self.segments {
                    error!("{} with status {}", s.name, s.status);
                }
                Err(CubistError::Configuration(format!(
                    "segment {segment_id} not found in cube {}",
                    self.name
                )))
            }
        }
    }

    /// Major component of the metadata version, if it can be parsed.
    pub fn version_major(&self) -> Option<u32> {
        let version = self.version.as_deref()?;
        let major = version.trim().split('.').next()?;
        let digits: String = major.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }

    pub fn dictionary_columns(&self, flat: &FlatTableDesc) -> Result<Vec<DictionaryColumn>> {
        self.dictionary_columns
            .iter()
            .map(|c| -> Result<DictionaryColumn> {
                Ok(DictionaryColumn {
                    name: c.name.clone(),
                    ordinal: flat.require_column(&c.name, "dictionary")?,
                    data_type: parse_data_type(&c.data_type)?,
                    uhc: c.uhc,
                    shard_multiplier: c.shard_multiplier,
                })
            })
            .collect()
    }

    /// Flat table ordinals of the row key columns, in row key order.
    pub fn row_key_ordinals(&self, flat: &FlatTableDesc) -> Result<Vec<usize>> {
        self.row_key
            .iter()
            .map(|name| flat.require_column(name, "row key"))
            .collect()
    }

    /// Flat table ordinal of the partition column, `None` when the cube is not
    /// partitioned or the column is not carried by the flat table.
    pub fn partition_ordinal(&self, flat: &FlatTableDesc) -> Option<usize> {
        self.partition_column
            .as_deref()
            .and_then(|name| flat.column_index(name))
    }
}

/// Maps a SQL type name such as `varchar(256)` or `decimal(19,4)` to an Arrow type.
pub fn parse_data_type(name: &str) -> Result<DataType> {
    let lower = name.trim().to_ascii_lowercase();
    let (base, params) = match lower.split_once('(') {
        Some((base, rest)) => (base.trim(), rest.strip_suffix(')').map(str::trim)),
        None => (lower.as_str(), None),
    };
    let data_type = match base {
        "tinyint" => DataType::Int8,
        "smallint" => DataType::Int16,
        "int" | "integer" => DataType::Int32,
        "bigint" | "long" => DataType::Int64,
        "float" | "real" => DataType::Float32,
        "double" => DataType::Float64,
        "decimal" | "numeric" => {
            let (precision, scale) = match params {
                Some(p) => parse_decimal_params(p).ok_or_else(|| {
                    CubistError::Configuration(format!("invalid decimal type '{name}'"))
                })?,
                None => (19, 4),
            };
            DataType::Decimal128(precision, scale)
        }
        "varchar" | "char" | "string" => DataType::Utf8,
        "date" => DataType::Date32,
        "timestamp" | "datetime" => DataType::Timestamp(TimeUnit::Millisecond, None),
        "boolean" | "bool" => DataType::Boolean,
        _ => {
            return Err(CubistError::Configuration(format!(
                "unsupported data type '{name}'"
            )))
        }
    };
    Ok(data_type)
}

fn parse_decimal_params(params: &str) -> Option<(u8, i8)> {
    let mut parts = params.split(',').map(str::trim);
    let precision = parts.next()?.parse().ok()?;
    let scale = match parts.next() {
        Some(s) => s.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((precision, scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube() -> CubeDesc {
        CubeDesc {
            name: "sales".to_string(),
            version: Some("2.6.0".to_string()),
            row_key: vec!["CAL_DT".to_string(), "SELLER_ID".to_string()],
            dictionary_columns: vec![DictionaryColumnDesc {
                name: "SELLER_ID".to_string(),
                data_type: "bigint".to_string(),
                uhc: true,
                shard_multiplier: None,
            }],
            cuboids: vec![3],
            mandatory_cuboids: vec![],
            partition_column: Some("CAL_DT".to_string()),
            segments: vec![SegmentDesc {
                id: "seg-1".to_string(),
                name: "20240101000000_20240201000000".to_string(),
                status: "NEW".to_string(),
            }],
        }
    }

    fn flat() -> FlatTableDesc {
        FlatTableDesc::new(vec![
            "cal_dt".to_string(),
            "price".to_string(),
            "seller_id".to_string(),
        ])
    }

    #[test]
    fn resolves_columns_case_insensitively() -> Result<()> {
        let cube = cube();
        let columns = cube.dictionary_columns(&flat())?;
        assert_eq!(columns[0].ordinal, 2);
        assert_eq!(columns[0].data_type, DataType::Int64);
        assert!(columns[0].uhc);
        assert_eq!(cube.row_key_ordinals(&flat())?, vec![0, 2]);
        assert_eq!(cube.partition_ordinal(&flat()), Some(0));
        Ok(())
    }

    #[test]
    fn missing_column_is_a_configuration_error() {
        let flat = FlatTableDesc::new(vec!["cal_dt".to_string()]);
        assert!(matches!(
            cube().dictionary_columns(&flat),
            Err(CubistError::Configuration(_))
        ));
        assert!(cube().row_key_ordinals(&flat).is_err());
    }

    #[test]
    fn segment_lookup() {
        let cube = cube();
        assert_eq!(cube.segment("seg-1").unwrap().status, "NEW");
        assert!(matches!(
            cube.segment("seg-2"),
            Err(CubistError::Configuration(_))
        ));
    }

    #[test]
    fn version_major() {
        let mut cube = cube();
        assert_eq!(cube.version_major(), Some(2));
        cube.version = Some("1.6.0-SNAPSHOT".to_string());
        assert_eq!(cube.version_major(), Some(1));
        cube.version = Some("unknown".to_string());
        assert_eq!(cube.version_major(), None);
        cube.version = None;
        assert_eq!(cube.version_major(), None);
    }

    #[test]
    fn data_types() -> Result<()> {
        assert_eq!(parse_data_type("INTEGER")?, DataType::Int32);
        assert_eq!(parse_data_type("varchar(256)")?, DataType::Utf8);
        assert_eq!(parse_data_type("decimal(10, 2)")?, DataType::Decimal128(10, 2));
        assert_eq!(parse_data_type("decimal")?, DataType::Decimal128(19, 4));
        assert_eq!(parse_data_type("date")?, DataType::Date32);
        assert!(parse_data_type("decimal(x)").is_err());
        assert!(parse_data_type("hllc(10)").is_err());
        Ok(())
    }
}
