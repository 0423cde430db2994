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

//! The fact distinct columns map task.
//!
//! A [`FactDistinctMapper`] is built once per input split. Every raw unit is
//! parsed into flat rows, each row is routed to the dictionary shards, and
//! sampled rows are handed to the cuboid statistics engine. [`finish`] drains
//! the engine and appends one sketch record per cuboid to the key stream.
//!
//! [`finish`]: FactDistinctMapper::finish

use std::collections::BTreeSet;

use datafusion::physical_plan::metrics::{
    self, ExecutionPlanMetricsSet, MetricBuilder, MetricsSet,
};
use log::info;

use crate::config::CubistConfig;
use crate::error::{CubistError, Result};
use crate::metadata::{CubeDesc, FlatTableDesc};
use crate::router::DistinctValueRouter;
use crate::row_source::{FlatRow, RowSource};
use crate::shard_plan::{self, ShardPlan};
use crate::sink::KeySink;
use crate::sortable_key::SortableKey;
use crate::stats::{CuboidStatsEngine, SamplingAlgorithm};

/// Counters of one map task.
struct MapperMetrics {
    /// Size of the parsed rows as raw text
    raw_bytes: metrics::Count,
    input_rows: metrics::Count,
    sampled_rows: metrics::Count,
    output_records: metrics::Count,
}

impl MapperMetrics {
    fn new(metrics: &ExecutionPlanMetricsSet, partition: usize) -> Self {
        let raw_bytes = MetricBuilder::new(metrics).counter("raw_bytes", partition);
        let input_rows = MetricBuilder::new(metrics).counter("input_rows", partition);
        let sampled_rows = MetricBuilder::new(metrics).counter("sampled_rows", partition);
        let output_records = MetricBuilder::new(metrics).counter("output_records", partition);
        Self {
            raw_bytes,
            input_rows,
            sampled_rows,
            output_records,
        }
    }
}

struct Statistics {
    engine: CuboidStatsEngine,
    sampling_percent: usize,
}

/// Totals reported by [`FactDistinctMapper::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapperSummary {
    pub rows: usize,
    pub sampled_rows: usize,
    pub raw_bytes: usize,
    /// Records emitted, sketch records included.
    pub records: usize,
    pub cuboids: usize,
}

pub struct FactDistinctMapper {
    plan: ShardPlan,
    router: DistinctValueRouter,
    statistics: Option<Statistics>,
    row_count: usize,
    finished: bool,
    metrics: ExecutionPlanMetricsSet,
    mapper_metrics: MapperMetrics,
}

impl FactDistinctMapper {
    /// Validates the cube against the flat table and prepares routing and
    /// statistics. Every configuration error surfaces here.
    pub fn try_new(
        cube: &CubeDesc,
        segment_id: &str,
        flat_table: &FlatTableDesc,
        config: &CubistConfig,
    ) -> Result<Self> {
        Self::try_new_for_partition(cube, segment_id, flat_table, config, 0)
    }

    /// Like [`FactDistinctMapper::try_new`], reporting metrics under `partition`.
    pub fn try_new_for_partition(
        cube: &CubeDesc,
        segment_id: &str,
        flat_table: &FlatTableDesc,
        config: &CubistConfig,
        partition: usize,
    ) -> Result<Self> {
        let segment = cube.segment(segment_id)?;
        info!(
            "Setting up fact distinct columns for cube {} segment {}",
            cube.name, segment.name
        );
        let columns = cube.dictionary_columns(flat_table)?;

        let mut statistics = None;
        let mut hll_shard_base = None;
        let mut partition_ordinal = None;
        if config.statistics_enabled() {
            let row_key_ordinals = cube.row_key_ordinals(flat_table)?;
            let cuboid_ids = cuboid_ids(cube, config.planner_enabled());
            hll_shard_base = Some(shard_plan::hll_shard_base(
                cuboid_ids.len(),
                config.cuboids_per_hll_shard(),
                config.max_hll_shards(),
            ));
            partition_ordinal = cube.partition_ordinal(flat_table);
            if partition_ordinal.is_none() {
                info!("Partition column is not on the flat table, skip partition values");
            }

            let algorithm = SamplingAlgorithm::for_cube(cube);
            let engine =
                CuboidStatsEngine::try_new(&cuboid_ids, row_key_ordinals, algorithm, config)?;
            info!(
                "Collecting statistics of {} cuboids with {} calculators, sampling {}% of rows",
                cuboid_ids.len(),
                engine.num_calculators(),
                config.sampling_percent()
            );
            statistics = Some(Statistics {
                engine,
                sampling_percent: config.sampling_percent(),
            });
        }

        let plan = ShardPlan::try_new(&columns, config.uhc_shard_multiplier(), hll_shard_base)?;
        let router = DistinctValueRouter::try_new(
            &columns,
            &plan,
            partition_ordinal,
            config.key_max_bytes(),
        )?;

        // threads start only once nothing else can fail
        if let Some(statistics) = statistics.as_mut() {
            statistics.engine.start()?;
        }

        let metrics = ExecutionPlanMetricsSet::new();
        let mapper_metrics = MapperMetrics::new(&metrics, partition);
        Ok(Self {
            plan,
            router,
            statistics,
            row_count: 0,
            finished: false,
            metrics,
            mapper_metrics,
        })
    }

    pub fn shard_plan(&self) -> &ShardPlan {
        &self.plan
    }

    /// Rows processed so far.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Parses one raw unit and processes its rows. Returns the number of rows.
    pub fn map(
        &mut self,
        raw: &[u8],
        source: &dyn RowSource,
        sink: &mut dyn KeySink,
    ) -> Result<usize> {
        let rows = source.parse(raw)?;
        for row in &rows {
            self.map_row(row, sink)?;
        }
        Ok(rows.len())
    }

    /// Processes one flat row.
    ///
    /// A row whose value cannot be encoded is rejected as a whole: nothing is
    /// emitted, counted or sampled for it. Errors raised by the sink itself
    /// leave the records emitted so far in place.
    pub fn map_row(&mut self, row: &FlatRow, sink: &mut dyn KeySink) -> Result<()> {
        if self.finished {
            return Err(CubistError::Internal(
                "cannot map rows after the mapper finished".to_string(),
            ));
        }
        let emitted = self.router.route(row, sink)?;
        self.mapper_metrics.raw_bytes.add(row.raw_size_in_bytes());
        self.mapper_metrics.input_rows.add(1);
        self.mapper_metrics.output_records.add(emitted);

        if let Some(statistics) = &self.statistics {
            if self.row_count % 100 < statistics.sampling_percent {
                statistics.engine.submit(row)?;
                self.mapper_metrics.sampled_rows.add(1);
            }
        }
        self.row_count += 1;
        Ok(())
    }

    /// Drains the statistics engine and emits one sketch record per cuboid.
    pub fn finish(&mut self, sink: &mut dyn KeySink) -> Result<MapperSummary> {
        if self.finished {
            return Err(CubistError::Internal(
                "the mapper already finished".to_string(),
            ));
        }
        self.finished = true;

        let mut cuboids = 0;
        if let Some(statistics) = self.statistics.as_mut() {
            statistics.engine.complete()?;
            let mut registers = Vec::new();
            for (cuboid_id, counter) in statistics.engine.results()? {
                let key = SortableKey::for_cuboid(*cuboid_id);
                registers.clear();
                counter.write_registers(&mut registers);
                sink.emit(key.as_key_ref(), &registers)?;
                cuboids += 1;
            }
            self.mapper_metrics.output_records.add(cuboids);
        }

        let summary = MapperSummary {
            rows: self.mapper_metrics.input_rows.value(),
            sampled_rows: self.mapper_metrics.sampled_rows.value(),
            raw_bytes: self.mapper_metrics.raw_bytes.value(),
            records: self.mapper_metrics.output_records.value(),
            cuboids,
        };
        info!("Fact distinct columns mapper finished: {summary:?}");
        Ok(summary)
    }

    pub fn metrics(&self) -> MetricsSet {
        self.metrics.clone_inner()
    }
}

/// Cuboids to collect statistics for, ascending and without duplicates.
fn cuboid_ids(cube: &CubeDesc, planner_enabled: bool) -> Vec<u64> {
    let mut ids: BTreeSet<u64> = cube.cuboids.iter().copied().collect();
    if planner_enabled {
        ids.extend(cube.mandatory_cuboids.iter().copied());
    }
    ids.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CUBIST_KEY_MAX_BYTES, CUBIST_PLANNER_ENABLED, CUBIST_STATS_ENABLED,
        CUBIST_STATS_SAMPLING_PERCENT, CUBIST_UHC_SHARD_MULTIPLIER,
    };
    use crate::metadata::{DictionaryColumnDesc, SegmentDesc};
    use crate::row_source::DelimitedRowSource;
    use crate::sink::InMemoryShuffle;
    use crate::sortable_key::{MARK_FOR_HLL, MARK_FOR_PARTITION_COL};

    fn cube() -> CubeDesc {
        CubeDesc {
            name: "sales".to_string(),
            version: Some("3.1.0".to_string()),
            row_key: vec!["SELLER".to_string(), "DT".to_string()],
            dictionary_columns: vec![
                DictionaryColumnDesc {
                    name: "SELLER".to_string(),
                    data_type: "varchar(32)".to_string(),
                    uhc: false,
                    shard_multiplier: None,
                },
                DictionaryColumnDesc {
                    name: "PRICE".to_string(),
                    data_type: "bigint".to_string(),
                    uhc: true,
                    shard_multiplier: Some(2),
                },
            ],
            cuboids: vec![0b11, 0b10, 0b01],
            mandatory_cuboids: vec![0b11, 0],
            partition_column: Some("DT".to_string()),
            segments: vec![SegmentDesc {
                id: "seg-1".to_string(),
                name: "20240101_20240201".to_string(),
                status: "NEW".to_string(),
            }],
        }
    }

    fn flat_table() -> FlatTableDesc {
        FlatTableDesc::new(vec![
            "SELLER".to_string(),
            "PRICE".to_string(),
            "DT".to_string(),
        ])
    }

    fn config(settings: &[(&str, &str)]) -> CubistConfig {
        let mut config = CubistConfig::default();
        for (key, value) in settings {
            config.set(key, value).unwrap();
        }
        config
    }

    fn rows(n: usize) -> Vec<FlatRow> {
        (0..n)
            .map(|i| {
                FlatRow::from(vec![
                    Some(format!("s{}", i % 5)),
                    if i % 4 == 0 { None } else { Some((i % 50).to_string()) },
                    Some(format!("2024-01-{:02}", i % 3 + 1)),
                ])
            })
            .collect()
    }

    #[test]
    fn dictionary_only() {
        let mut mapper =
            FactDistinctMapper::try_new(&cube(), "seg-1", &flat_table(), &config(&[])).unwrap();
        assert_eq!(mapper.shard_plan().total_shards(), 3);
        let mut sink = InMemoryShuffle::new(mapper.shard_plan().clone());
        for row in rows(200) {
            mapper.map_row(&row, &mut sink).unwrap();
        }
        let summary = mapper.finish(&mut sink).unwrap();

        assert_eq!(summary.rows, 200);
        assert_eq!(summary.sampled_rows, 0);
        assert_eq!(summary.cuboids, 0);
        // 200 sellers plus 150 non-null prices
        assert_eq!(summary.records, 350);
        assert_eq!(sink.shard_sizes()[0], 5);
        // all 50 prices occur in some row with a non-null price
        assert_eq!(sink.shard_sizes()[1] + sink.shard_sizes()[2], 50);
    }

    #[test]
    fn statistics_sample_by_row_index() {
        let config = config(&[
            (CUBIST_STATS_ENABLED, "true"),
            (CUBIST_STATS_SAMPLING_PERCENT, "30"),
        ]);
        let mut mapper =
            FactDistinctMapper::try_new(&cube(), "seg-1", &flat_table(), &config).unwrap();
        // 3 dictionary shards, partition shard, one sketch shard
        assert_eq!(mapper.shard_plan().total_shards(), 5);
        let mut sink = InMemoryShuffle::new(mapper.shard_plan().clone());
        for row in rows(250) {
            mapper.map_row(&row, &mut sink).unwrap();
        }
        let summary = mapper.finish(&mut sink).unwrap();

        // rows 0..30, 100..130 and 200..230
        assert_eq!(summary.sampled_rows, 90);
        assert_eq!(summary.cuboids, 3);
        assert_eq!(sink.shard_sizes()[3], 3);
        let partitions = sink.shard(3).unwrap();
        assert!(partitions
            .keys()
            .all(|k| k.leading_byte() == MARK_FOR_PARTITION_COL));

        let sketches = sink.cuboid_sketches().unwrap();
        assert_eq!(sketches.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        // row key is (SELLER, DT): 0b10 is SELLER alone, 0b01 is DT alone
        assert!(sketches[&0b10].estimate().abs_diff(5) <= 1);
        assert!(sketches[&0b01].estimate().abs_diff(3) <= 1);
        assert!(sketches[&0b11].estimate().abs_diff(15) <= 1);
    }

    #[test]
    fn planner_adds_mandatory_cuboids() {
        let config = config(&[
            (CUBIST_STATS_ENABLED, "true"),
            (CUBIST_PLANNER_ENABLED, "true"),
        ]);
        let mut mapper =
            FactDistinctMapper::try_new(&cube(), "seg-1", &flat_table(), &config).unwrap();
        let mut sink = InMemoryShuffle::new(mapper.shard_plan().clone());
        mapper.map_row(&rows(1)[0], &mut sink).unwrap();
        let summary = mapper.finish(&mut sink).unwrap();
        assert_eq!(summary.cuboids, 4);
        let hll_records = sink
            .shard(4)
            .unwrap()
            .keys()
            .filter(|k| k.leading_byte() == MARK_FOR_HLL)
            .count();
        assert_eq!(hll_records, 4);
    }

    #[test]
    fn raw_bytes_metric() {
        let mut mapper =
            FactDistinctMapper::try_new(&cube(), "seg-1", &flat_table(), &config(&[])).unwrap();
        let mut sink = InMemoryShuffle::new(mapper.shard_plan().clone());
        let source = DelimitedRowSource::new(b',');
        let rows = mapper
            .map(b"abc,12,2024-01-01\nxy,\\N,2024-01-02\n", &source, &mut sink)
            .unwrap();
        assert_eq!(rows, 2);
        let summary = mapper.finish(&mut sink).unwrap();
        // (3 + 2 + 10) + 3 and (2 + 1 + 10) + 3
        assert_eq!(summary.raw_bytes, 18 + 16);

        let metrics = mapper.metrics();
        let raw_bytes = metrics
            .iter()
            .find(|m| m.value().name() == "raw_bytes")
            .map(|m| m.value().as_usize());
        assert_eq!(raw_bytes, Some(34));
    }

    #[test]
    fn configuration_errors_surface_at_setup() {
        let err = FactDistinctMapper::try_new(&cube(), "seg-9", &flat_table(), &config(&[]));
        assert!(matches!(err, Err(CubistError::Configuration(_))));

        let mut too_wide = cube();
        too_wide.dictionary_columns[1].shard_multiplier = None;
        let config = config(&[(CUBIST_UHC_SHARD_MULTIPLIER, "255")]);
        let err = FactDistinctMapper::try_new(&too_wide, "seg-1", &flat_table(), &config);
        assert!(matches!(err, Err(CubistError::Configuration(_))));

        let missing = FlatTableDesc::new(vec!["SELLER".to_string()]);
        let err = FactDistinctMapper::try_new(&cube(), "seg-1", &missing, &CubistConfig::default());
        assert!(matches!(err, Err(CubistError::Configuration(_))));
    }

    #[test]
    fn rejected_row_keeps_sampling_aligned() {
        let config = config(&[
            (CUBIST_STATS_ENABLED, "true"),
            (CUBIST_STATS_SAMPLING_PERCENT, "1"),
            (CUBIST_KEY_MAX_BYTES, "8"),
        ]);
        let mut mapper =
            FactDistinctMapper::try_new(&cube(), "seg-1", &flat_table(), &config).unwrap();
        let mut sink = InMemoryShuffle::new(mapper.shard_plan().clone());

        // the seller fits, the price does not
        let oversized = FlatRow::from(vec![Some("s1"), Some("123456789"), Some("2024-01-01")]);
        let err = mapper.map_row(&oversized, &mut sink);
        assert!(matches!(err, Err(CubistError::General(_))));
        assert_eq!(mapper.row_count(), 0);
        assert_eq!(sink.records_received(), 0);

        // the next row is still row 0 and therefore sampled
        mapper
            .map_row(&FlatRow::from(vec![Some("s2"), Some("7"), Some("d")]), &mut sink)
            .unwrap();
        let summary = mapper.finish(&mut sink).unwrap();
        assert_eq!(summary.rows, 1);
        assert_eq!(summary.sampled_rows, 1);
        // 2 + 1 + 1 bytes plus three delimiters
        assert_eq!(summary.raw_bytes, 7);
    }

    #[test]
    fn finished_mapper_rejects_rows() {
        let mut mapper =
            FactDistinctMapper::try_new(&cube(), "seg-1", &flat_table(), &config(&[])).unwrap();
        let mut sink = InMemoryShuffle::new(mapper.shard_plan().clone());
        mapper.finish(&mut sink).unwrap();
        assert!(mapper.map_row(&rows(1)[0], &mut sink).is_err());
        assert!(mapper.finish(&mut sink).is_err());
    }
}
