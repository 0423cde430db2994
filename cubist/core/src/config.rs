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

//! Cubist configuration

use std::collections::HashMap;
use std::result;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{CubistError, Result};

use datafusion::arrow::datatypes::DataType;

/// enable cuboid statistics collection and partition range detection
pub const CUBIST_STATS_ENABLED: &str = "cubist.statistics.enabled";
/// percentage of rows (by row index mod 100) fed to the cuboid sketches
pub const CUBIST_STATS_SAMPLING_PERCENT: &str = "cubist.statistics.sampling_percent";
/// HyperLogLog precision, the sketch has 2^p registers
pub const CUBIST_STATS_HLL_PRECISION: &str = "cubist.statistics.hll_precision";
/// number of cuboids one statistics calculator is sized for
pub const CUBIST_STATS_CUBOIDS_PER_CALCULATOR: &str =
    "cubist.statistics.cuboids_per_calculator";
/// upper bound on statistics calculator threads
pub const CUBIST_STATS_MAX_CALCULATORS: &str = "cubist.statistics.max_calculators";
/// bounded queue capacity per statistics calculator
pub const CUBIST_STATS_QUEUE_CAPACITY: &str = "cubist.statistics.queue_capacity";
/// number of cuboids one sketch merging shard is sized for
pub const CUBIST_STATS_CUBOIDS_PER_HLL_SHARD: &str =
    "cubist.statistics.cuboids_per_hll_shard";
/// upper bound on sketch merging shards
pub const CUBIST_STATS_MAX_HLL_SHARDS: &str = "cubist.statistics.max_hll_shards";
/// default shard multiplier for ultra high cardinality columns
pub const CUBIST_UHC_SHARD_MULTIPLIER: &str = "cubist.uhc.shard_multiplier";
/// when enabled mandatory cuboids are sampled as well
pub const CUBIST_PLANNER_ENABLED: &str = "cubist.planner.enabled";
/// hard limit for the encoded size of a single key
pub const CUBIST_KEY_MAX_BYTES: &str = "cubist.key.max_bytes";

/// Smallest supported HyperLogLog precision.
pub const MIN_HLL_PRECISION: usize = 4;
/// Largest supported HyperLogLog precision.
pub const MAX_HLL_PRECISION: usize = 18;

pub type ParseResult<T> = result::Result<T, String>;

static CONFIG_ENTRIES: LazyLock<HashMap<String, ConfigEntry>> = LazyLock::new(|| {
    let entries = vec![
        ConfigEntry::new(CUBIST_STATS_ENABLED.to_string(),
                         "Collect cuboid statistics and partition column values".to_string(),
                         DataType::Boolean, Some(false.to_string())),
        ConfigEntry::new(CUBIST_STATS_SAMPLING_PERCENT.to_string(),
                         "Percentage of rows sampled into the cuboid sketches (0-100)".to_string(),
                         DataType::UInt32, Some(100.to_string())),
        ConfigEntry::new(CUBIST_STATS_HLL_PRECISION.to_string(),
                         "Precision of the cuboid HyperLogLog sketches".to_string(),
                         DataType::UInt32, Some(14.to_string())),
        ConfigEntry::new(CUBIST_STATS_CUBOIDS_PER_CALCULATOR.to_string(),
                         "Cuboids handled per statistics calculator thread, values <= 0 force a single thread".to_string(),
                         DataType::Int64, Some(100.to_string())),
        ConfigEntry::new(CUBIST_STATS_MAX_CALCULATORS.to_string(),
                         "Maximum number of statistics calculator threads".to_string(),
                         DataType::UInt32, Some(1.to_string())),
        ConfigEntry::new(CUBIST_STATS_QUEUE_CAPACITY.to_string(),
                         "Rows buffered per statistics calculator before the producer blocks".to_string(),
                         DataType::UInt32, Some(2000.to_string())),
        ConfigEntry::new(CUBIST_STATS_CUBOIDS_PER_HLL_SHARD.to_string(),
                         "Cuboids per sketch merging shard".to_string(),
                         DataType::UInt32, Some(100.to_string())),
        ConfigEntry::new(CUBIST_STATS_MAX_HLL_SHARDS.to_string(),
                         "Maximum number of sketch merging shards".to_string(),
                         DataType::UInt32, Some(1.to_string())),
        ConfigEntry::new(CUBIST_UHC_SHARD_MULTIPLIER.to_string(),
                         "Shards per ultra high cardinality column unless the column overrides it".to_string(),
                         DataType::UInt32, Some(3.to_string())),
        ConfigEntry::new(CUBIST_PLANNER_ENABLED.to_string(),
                         "Also collect statistics for mandatory cuboids".to_string(),
                         DataType::Boolean, Some(false.to_string())),
        ConfigEntry::new(CUBIST_KEY_MAX_BYTES.to_string(),
                         "Maximum encoded key size in bytes".to_string(),
                         DataType::UInt64, Some((16 * 1024 * 1024).to_string())),
    ];
    entries
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect::<HashMap<_, _>>()
});

/// Configuration option meta-data
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    name: String,
    description: String,
    data_type: DataType,
    default_value: Option<String>,
}

impl ConfigEntry {
    fn new(
        name: String,
        description: String,
        data_type: DataType,
        default_value: Option<String>,
    ) -> Self {
        Self {
            name,
            description,
            data_type,
            default_value,
        }
    }

    /// Human readable description of the option.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Default value, if any.
    pub fn default_value(&self) -> Option<&str> {
        self.default_value.as_deref()
    }
}

/// Cubist configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CubistConfig {
    /// Settings stored in map for easy serde
    settings: HashMap<String, String>,
}

impl Default for CubistConfig {
    fn default() -> Self {
        Self {
            settings: HashMap::new(),
        }
    }
}

impl CubistConfig {
    /// Create a new configuration based on key-value pairs
    pub fn with_settings(settings: HashMap<String, String>) -> Result<Self> {
        let supported_entries = CubistConfig::valid_entries();
        for name in settings.keys() {
            if !supported_entries.contains_key(name) {
                return Err(CubistError::Configuration(format!(
                    "configuration key `{name}` does not exist"
                )));
            }
        }
        for (name, entry) in supported_entries {
            if let Some(v) = settings.get(name) {
                // validate that we can parse the user-supplied value
                Self::parse_value(v.as_str(), entry.data_type.clone()).map_err(|e| CubistError::Configuration(format!("Failed to parse user-supplied value '{v}' for configuration setting '{name}': {e}")))?;
            } else if let Some(v) = entry.default_value.clone() {
                Self::parse_value(v.as_str(), entry.data_type.clone()).map_err(|e| CubistError::Configuration(format!("Failed to parse default value '{v}' for configuration setting '{name}': {e}")))?;
            }
        }

        let config = Self { settings };
        config.validate_ranges()?;
        Ok(config)
    }

    /// Sets a single option, validating it the same way construction does.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut settings = self.settings.clone();
        settings.insert(key.to_string(), value.to_string());
        *self = Self::with_settings(settings)?;
        Ok(())
    }

    pub fn parse_value(val: &str, data_type: DataType) -> ParseResult<()> {
        match data_type {
            DataType::UInt32 => {
                val.parse::<u32>().map_err(|e| format!("{e:?}"))?;
            }
            DataType::UInt64 => {
                val.parse::<u64>().map_err(|e| format!("{e:?}"))?;
            }
            DataType::Int64 => {
                val.parse::<i64>().map_err(|e| format!("{e:?}"))?;
            }
            DataType::Boolean => {
                val.parse::<bool>().map_err(|e| format!("{e:?}"))?;
            }
            DataType::Utf8 => {}
            _ => {
                return Err(format!("not support data type: {data_type}"));
            }
        }

        Ok(())
    }

    fn validate_ranges(&self) -> Result<()> {
        let sampling = self.sampling_percent();
        if sampling > 100 {
            return Err(CubistError::Configuration(format!(
                "'{CUBIST_STATS_SAMPLING_PERCENT}' must be within 0..=100, got {sampling}"
            )));
        }
        let precision = self.hll_precision();
        if !(MIN_HLL_PRECISION..=MAX_HLL_PRECISION).contains(&precision) {
            return Err(CubistError::Configuration(format!(
                "'{CUBIST_STATS_HLL_PRECISION}' must be within {MIN_HLL_PRECISION}..={MAX_HLL_PRECISION}, got {precision}"
            )));
        }
        for key in [
            CUBIST_STATS_MAX_CALCULATORS,
            CUBIST_STATS_QUEUE_CAPACITY,
            CUBIST_STATS_CUBOIDS_PER_HLL_SHARD,
            CUBIST_STATS_MAX_HLL_SHARDS,
            CUBIST_KEY_MAX_BYTES,
        ] {
            if self.get_setting::<usize>(key) == 0 {
                return Err(CubistError::Configuration(format!(
                    "'{key}' must be greater than 0"
                )));
            }
        }
        Ok(())
    }

    // All available configuration options
    pub fn valid_entries() -> &'static HashMap<String, ConfigEntry> {
        &CONFIG_ENTRIES
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    pub fn statistics_enabled(&self) -> bool {
        self.get_setting(CUBIST_STATS_ENABLED)
    }

    pub fn sampling_percent(&self) -> usize {
        self.get_setting(CUBIST_STATS_SAMPLING_PERCENT)
    }

    pub fn hll_precision(&self) -> usize {
        self.get_setting(CUBIST_STATS_HLL_PRECISION)
    }

    /// May be zero or negative, which the engine treats as "one calculator".
    pub fn cuboids_per_calculator(&self) -> i64 {
        self.get_setting(CUBIST_STATS_CUBOIDS_PER_CALCULATOR)
    }

    pub fn max_calculators(&self) -> usize {
        self.get_setting(CUBIST_STATS_MAX_CALCULATORS)
    }

    pub fn queue_capacity(&self) -> usize {
        self.get_setting(CUBIST_STATS_QUEUE_CAPACITY)
    }

    pub fn cuboids_per_hll_shard(&self) -> usize {
        self.get_setting(CUBIST_STATS_CUBOIDS_PER_HLL_SHARD)
    }

    pub fn max_hll_shards(&self) -> usize {
        self.get_setting(CUBIST_STATS_MAX_HLL_SHARDS)
    }

    pub fn uhc_shard_multiplier(&self) -> usize {
        self.get_setting(CUBIST_UHC_SHARD_MULTIPLIER)
    }

    pub fn planner_enabled(&self) -> bool {
        self.get_setting(CUBIST_PLANNER_ENABLED)
    }

    pub fn key_max_bytes(&self) -> usize {
        self.get_setting(CUBIST_KEY_MAX_BYTES)
    }

    fn get_setting<T: FromStr + Default>(&self, key: &str) -> T {
        // values are validated in the constructor, so the fallback is unreachable
        self.settings
            .get(key)
            .map(String::as_str)
            .or_else(|| {
                Self::valid_entries()
                    .get(key)
                    .and_then(|e| e.default_value.as_deref())
            })
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}
