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

//! Output shard planning.
//!
//! Dictionary shards are addressed by the leading byte of a key, so all of
//! them must fit in one byte. With statistics enabled the two marker bytes
//! are reserved, one extra shard receives partition column values and
//! `hll_shard_base` shards merge cuboid sketches:
//!
//! ```text
//! [0, dictionary_shards)                   dictionary values, shard = leading byte
//! dictionary_shards                        partition column values
//! dictionary_shards + 1 + cuboid % base    cuboid sketches
//! ```

use log::info;

use crate::error::{CubistError, Result};
use crate::metadata::DictionaryColumn;
use crate::sortable_key::{KeyRef, MARK_FOR_HLL, MARK_FOR_PARTITION_COL};

/// Shards addressable by the leading key byte.
pub const MAX_DICTIONARY_SHARDS: usize = 255;

/// Contiguous shards owned by one dictionary column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRange {
    pub begin: u8,
    pub count: u8,
}

impl ShardRange {
    pub fn contains(&self, shard: u8) -> bool {
        shard >= self.begin && (shard - self.begin) < self.count
    }

    pub fn is_multi_shard(&self) -> bool {
        self.count > 1
    }
}

/// Shard layout of one fact distinct columns job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlan {
    ranges: Vec<ShardRange>,
    dictionary_shards: usize,
    hll_shard_base: Option<usize>,
}

impl ShardPlan {
    /// Plans shards for `columns`, in order. UHC columns take their own
    /// multiplier or `default_uhc_multiplier`. `hll_shard_base` is `Some`
    /// when statistics are collected.
    pub fn try_new(
        columns: &[DictionaryColumn],
        default_uhc_multiplier: usize,
        hll_shard_base: Option<usize>,
    ) -> Result<Self> {
        let mut multipliers = Vec::with_capacity(columns.len());
        for column in columns {
            let multiplier = if column.uhc {
                column.shard_multiplier.unwrap_or(default_uhc_multiplier)
            } else {
                1
            };
            if multiplier == 0 {
                return Err(CubistError::Configuration(format!(
                    "shard multiplier of column {} must be greater than 0",
                    column.name
                )));
            }
            if multiplier > MAX_DICTIONARY_SHARDS {
                return Err(CubistError::Configuration(format!(
                    "shard multiplier {multiplier} of column {} exceeds the max shard number {MAX_DICTIONARY_SHARDS}",
                    column.name
                )));
            }
            multipliers.push(multiplier);
        }

        let dictionary_shards = reducer_count(&multipliers);
        if dictionary_shards > MAX_DICTIONARY_SHARDS {
            return Err(CubistError::Configuration(format!(
                "The max shard number for fact distinct columns is {MAX_DICTIONARY_SHARDS}, \
                 but now it is {dictionary_shards}, decrease the UHC shard multiplier"
            )));
        }
        if hll_shard_base.is_some() && dictionary_shards > MARK_FOR_PARTITION_COL as usize {
            return Err(CubistError::Configuration(format!(
                "{dictionary_shards} dictionary shards collide with the statistics marker bytes, \
                 at most {MARK_FOR_PARTITION_COL} are allowed when statistics are enabled"
            )));
        }
        if hll_shard_base == Some(0) {
            return Err(CubistError::Configuration(
                "HyperLogLog shard base must be greater than 0".to_string(),
            ));
        }

        let mut begin = 0usize;
        let ranges = multipliers
            .iter()
            .map(|m| {
                // bounded by the shard count check above
                let range = ShardRange {
                    begin: begin as u8,
                    count: *m as u8,
                };
                begin += m;
                range
            })
            .collect();

        let plan = Self {
            ranges,
            dictionary_shards,
            hll_shard_base,
        };
        info!(
            "Planned {} dictionary shards, {} shards in total",
            plan.dictionary_shards,
            plan.total_shards()
        );
        Ok(plan)
    }

    /// Shard range of the dictionary column at `index`.
    pub fn range(&self, index: usize) -> Option<ShardRange> {
        self.ranges.get(index).copied()
    }

    pub fn ranges(&self) -> &[ShardRange] {
        &self.ranges
    }

    pub fn dictionary_shards(&self) -> usize {
        self.dictionary_shards
    }

    pub fn hll_shard_base(&self) -> Option<usize> {
        self.hll_shard_base
    }

    pub fn total_shards(&self) -> usize {
        self.dictionary_shards + self.hll_shard_base.map_or(0, |base| 1 + base)
    }

    /// Shard that receives the record keyed by `key`.
    pub fn shard_for_key(&self, key: KeyRef<'_>) -> Result<usize> {
        let leading = key.leading_byte();
        match (self.hll_shard_base, leading) {
            (Some(base), MARK_FOR_HLL) => {
                let cuboid_id = key.cuboid_id().ok_or_else(|| {
                    CubistError::Internal("sketch record without a cuboid id".to_string())
                })?;
                Ok(self.dictionary_shards + 1 + (cuboid_id % base as u64) as usize)
            }
            (Some(_), MARK_FOR_PARTITION_COL) => Ok(self.dictionary_shards),
            (_, shard) if (shard as usize) < self.dictionary_shards => Ok(shard as usize),
            (_, shard) => Err(CubistError::Internal(format!(
                "leading byte {shard} does not address any of the {} dictionary shards",
                self.dictionary_shards
            ))),
        }
    }
}

/// Dictionary shard count: one per column plus `multiplier - 1` extra shards
/// per multi-shard column.
pub fn reducer_count(multipliers: &[usize]) -> usize {
    multipliers
        .iter()
        .fold(0usize, |count, m| count.saturating_add((*m).max(1)))
}

/// Number of shards merging cuboid sketches.
pub fn hll_shard_base(num_cuboids: usize, cuboids_per_shard: usize, max_shards: usize) -> usize {
    let per_shard = cuboids_per_shard.max(1);
    let base = num_cuboids.saturating_sub(1) / per_shard + 1;
    base.min(max_shards).max(1)
}
