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

//! End-to-end tests of the fact distinct columns map task.
//!
//! A small cube is deserialized from JSON, a flat table is fed through the
//! delimited row source, and the in-memory shuffle stands in for the
//! downstream sort.

#[cfg(test)]
mod fact_distinct_tests {
    use cubist_core::config::{
        CUBIST_STATS_CUBOIDS_PER_CALCULATOR, CUBIST_STATS_CUBOIDS_PER_HLL_SHARD,
        CUBIST_STATS_ENABLED, CUBIST_STATS_MAX_CALCULATORS, CUBIST_STATS_MAX_HLL_SHARDS,
        CUBIST_STATS_QUEUE_CAPACITY,
    };
    use cubist_core::hash::string_hash;
    use cubist_core::sortable_key::{MARK_FOR_HLL, MARK_FOR_PARTITION_COL};
    use cubist_core::{
        CubeDesc, CubistConfig, CubistError, DelimitedRowSource, FactDistinctMapper,
        FlatTableDesc, InMemoryShuffle,
    };
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    /// Row key (REGION, CATEGORY, SELLER); three dictionary columns, BUYER
    /// spread over four shards.
    fn cube(version: &str) -> CubeDesc {
        let json = format!(
            r#"{{
                "name": "orders",
                "version": "{version}",
                "row_key": ["REGION", "CATEGORY", "SELLER"],
                "dictionary_columns": [
                    {{"name": "REGION", "data_type": "varchar(16)"}},
                    {{"name": "QUANTITY", "data_type": "int"}},
                    {{"name": "BUYER", "data_type": "string", "uhc": true, "shard_multiplier": 4}}
                ],
                "cuboids": [7, 6, 5, 4, 3, 2, 1],
                "partition_column": "ORDER_DATE",
                "segments": [
                    {{"id": "a1", "name": "20240101_20240201", "status": "READY"}},
                    {{"id": "b2", "name": "20240201_20240301", "status": "NEW"}}
                ]
            }}"#
        );
        serde_json::from_str(&json).unwrap()
    }

    fn flat_table() -> FlatTableDesc {
        FlatTableDesc::new(
            ["ORDER_DATE", "REGION", "CATEGORY", "SELLER", "QUANTITY", "BUYER"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    fn lines(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| {
                let buyer = if i % 7 == 0 {
                    "\\N".to_string()
                } else {
                    format!("buyer-{}", i % 300)
                };
                format!(
                    "2024-02-{:02}|r{}|c{}|s{}|{}|{buyer}\n",
                    i % 28 + 1,
                    i % 4,
                    i % 6,
                    i % 25,
                    i % 120
                )
            })
            .collect()
    }

    fn stats_config() -> CubistConfig {
        let mut config = CubistConfig::default();
        for (key, value) in [
            (CUBIST_STATS_ENABLED, "true"),
            (CUBIST_STATS_CUBOIDS_PER_CALCULATOR, "2"),
            (CUBIST_STATS_MAX_CALCULATORS, "3"),
            (CUBIST_STATS_QUEUE_CAPACITY, "16"),
            (CUBIST_STATS_CUBOIDS_PER_HLL_SHARD, "3"),
            (CUBIST_STATS_MAX_HLL_SHARDS, "2"),
        ] {
            config.set(key, value).unwrap();
        }
        config
    }

    fn run(cube: &CubeDesc, config: &CubistConfig, input: &[String]) -> InMemoryShuffle {
        let mut mapper = FactDistinctMapper::try_new(cube, "b2", &flat_table(), config).unwrap();
        let mut shuffle = InMemoryShuffle::new(mapper.shard_plan().clone());
        let source = DelimitedRowSource::new(b'|');
        // feed the input in several raw units
        for unit in input.chunks(97) {
            mapper.map(unit.concat().as_bytes(), &source, &mut shuffle).unwrap();
        }
        let summary = mapper.finish(&mut shuffle).unwrap();
        assert_eq!(summary.rows, input.len());
        shuffle
    }

    #[test]
    fn dictionary_values_land_in_their_shards() {
        let shuffle = run(&cube("3.0.0"), &CubistConfig::default(), &lines(1000));
        let plan = shuffle.plan();
        assert_eq!(plan.dictionary_shards(), 6);
        assert_eq!(plan.total_shards(), 6);

        let sizes = shuffle.shard_sizes();
        assert_eq!(sizes[0], 4);
        assert_eq!(sizes[1], 120);
        // 300 buyers over shards 2..6
        assert_eq!(sizes[2..].iter().sum::<usize>(), 300);

        for shard in 2..6 {
            for key in shuffle.shard(shard).unwrap().keys() {
                let value = std::str::from_utf8(key.value()).unwrap();
                let expected = 2 + (string_hash(value) & 0x7fff_ffff) % 4;
                assert_eq!(shard as i32, expected, "{value}");
            }
        }

        // integer values come out in numeric order
        let quantities: Vec<i64> = shuffle
            .shard(1)
            .unwrap()
            .keys()
            .map(|k| std::str::from_utf8(k.value()).unwrap().parse().unwrap())
            .collect();
        assert_eq!(quantities, (0..120).collect::<Vec<i64>>());
    }

    #[test]
    fn statistics_records_follow_the_dictionary_shards() {
        for version in ["1.6.0", "2.5.1"] {
            let shuffle = run(&cube(version), &stats_config(), &lines(1000));
            let plan = shuffle.plan();
            // seven cuboids, three per sketch shard, at most two sketch shards
            assert_eq!(plan.hll_shard_base(), Some(2));
            assert_eq!(plan.total_shards(), 6 + 1 + 2);

            let partitions = shuffle.shard(6).unwrap();
            assert_eq!(partitions.len(), 28);
            assert!(partitions
                .keys()
                .all(|k| k.leading_byte() == MARK_FOR_PARTITION_COL));

            for shard in 7..9 {
                for key in shuffle.shard(shard).unwrap().keys() {
                    assert_eq!(key.leading_byte(), MARK_FOR_HLL);
                    let cuboid = key.cuboid_id().unwrap();
                    assert_eq!(7 + (cuboid % 2) as usize, shard);
                }
            }

            let sketches = shuffle.cuboid_sketches().unwrap();
            assert_eq!(sketches.len(), 7, "{version}");
            let estimate = |cuboid: u64| sketches[&cuboid].estimate();
            // REGION, CATEGORY and SELLER have 4, 6 and 25 values
            assert_eq!(estimate(0b100), 4, "{version}");
            assert_eq!(estimate(0b010), 6, "{version}");
            assert!(estimate(0b001).abs_diff(25) <= 1, "{version}");
            // (i % 4, i % 6) has 12 combinations, (i % 6, i % 25) has 150
            assert!(estimate(0b110).abs_diff(12) <= 1, "{version}");
            assert!(estimate(0b011).abs_diff(150) <= 3, "{version}");
            assert!(estimate(0b111).abs_diff(300) <= 6, "{version}");
        }
    }

    #[test]
    fn row_order_does_not_change_sketches() {
        let cube = cube("2.5.1");
        let mut input = lines(600);
        let expected = run(&cube, &stats_config(), &input)
            .cuboid_sketches()
            .unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        input.shuffle(&mut rng);
        let shuffled = run(&cube, &stats_config(), &input)
            .cuboid_sketches()
            .unwrap();
        assert_eq!(shuffled, expected);
    }

    #[test]
    fn too_many_shards_fail_before_any_row() {
        let mut cube = cube("3.0.0");
        cube.dictionary_columns[2].shard_multiplier = Some(253);
        // 2 + 253 fits the byte budget but collides with the marker bytes
        assert!(
            FactDistinctMapper::try_new(&cube, "b2", &flat_table(), &CubistConfig::default())
                .is_ok()
        );
        let err = FactDistinctMapper::try_new(&cube, "b2", &flat_table(), &stats_config());
        assert!(matches!(err, Err(CubistError::Configuration(_))));

        cube.dictionary_columns[2].shard_multiplier = Some(254);
        let err =
            FactDistinctMapper::try_new(&cube, "b2", &flat_table(), &CubistConfig::default());
        assert!(matches!(err, Err(CubistError::Configuration(_))));
    }

    #[test]
    fn unknown_segment() {
        let err = FactDistinctMapper::try_new(
            &cube("3.0.0"),
            "zz",
            &flat_table(),
            &CubistConfig::default(),
        );
        assert!(matches!(err, Err(CubistError::Configuration(_))));
    }
}
