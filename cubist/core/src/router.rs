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

//! Routes dictionary column values to their shards.

use log::info;

use crate::error::{CubistError, Result};
use crate::hash::non_negative_hash;
use crate::metadata::DictionaryColumn;
use crate::row_source::FlatRow;
use crate::shard_plan::{ShardPlan, ShardRange};
use crate::sink::KeySink;
use crate::sortable_key::{KeyBuffer, KeyFamily, MARK_FOR_PARTITION_COL};

/// Rows whose routing is logged.
const SAMPLE_ROWS: usize = 10;

#[derive(Debug, Clone)]
struct RoutedColumn {
    name: String,
    ordinal: usize,
    family: KeyFamily,
    range: ShardRange,
}

/// Shard of `value` within `range`.
pub fn shard_for(range: ShardRange, value: &str) -> u8 {
    if range.is_multi_shard() {
        // count is at least 2 here and the result stays below begin + count
        range.begin + (non_negative_hash(value) % range.count as u32) as u8
    } else {
        range.begin
    }
}

/// Emits one `(key, empty)` record per non-null dictionary value of a row,
/// plus the partition value when statistics are collected.
#[derive(Debug)]
pub struct DistinctValueRouter {
    columns: Vec<RoutedColumn>,
    partition_ordinal: Option<usize>,
    buffer: KeyBuffer,
    rows_routed: usize,
}

impl DistinctValueRouter {
    /// `columns` must be in the order they were planned in. A partition
    /// ordinal should only be passed when statistics are enabled.
    pub fn try_new(
        columns: &[DictionaryColumn],
        plan: &ShardPlan,
        partition_ordinal: Option<usize>,
        key_max_bytes: usize,
    ) -> Result<Self> {
        if columns.len() != plan.ranges().len() {
            return Err(CubistError::Internal(format!(
                "shard plan covers {} columns but {} dictionary columns were given",
                plan.ranges().len(),
                columns.len()
            )));
        }
        let columns = columns
            .iter()
            .zip(plan.ranges())
            .map(|(column, range)| RoutedColumn {
                name: column.name.clone(),
                ordinal: column.ordinal,
                family: KeyFamily::for_data_type(&column.data_type),
                range: *range,
            })
            .collect();
        Ok(Self {
            columns,
            partition_ordinal,
            buffer: KeyBuffer::new(key_max_bytes),
            rows_routed: 0,
        })
    }

    /// Routes one row and returns the number of records emitted.
    ///
    /// A value too large to encode fails the row before anything is emitted.
    pub fn route(&mut self, row: &FlatRow, sink: &mut dyn KeySink) -> Result<usize> {
        let partition_value = self.partition_ordinal.and_then(|ordinal| row.get(ordinal));
        for value in self
            .columns
            .iter()
            .filter_map(|column| row.get(column.ordinal))
            .chain(partition_value)
        {
            self.buffer.check_fits(value.len())?;
        }

        let log_sample = self.rows_routed < SAMPLE_ROWS;
        let mut emitted = 0;

        for column in &self.columns {
            let Some(value) = row.get(column.ordinal) else {
                continue;
            };
            let shard = shard_for(column.range, value);
            let key = self
                .buffer
                .encode(shard, value.as_bytes(), column.family)?;
            if log_sample {
                info!("Sample output: {} {value:?} -> shard {shard}", column.name);
            }
            sink.emit(key, &[])?;
            emitted += 1;
        }

        if let Some(value) = partition_value {
            let key = self
                .buffer
                .encode(MARK_FOR_PARTITION_COL, value.as_bytes(), KeyFamily::Text)?;
            sink.emit(key, &[])?;
            emitted += 1;
        }

        self.rows_routed += 1;
        Ok(emitted)
    }

    pub fn rows_routed(&self) -> usize {
        self.rows_routed
    }
}
