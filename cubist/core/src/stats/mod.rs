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

//! Sampled cuboid cardinality statistics.
//!
//! Cuboids are split into disjoint slices at construction, one per
//! calculator thread. Each calculator owns its slice's sketches outright, so
//! sampled rows are the only thing shared, through each calculator's bounded
//! queue.

pub mod calculator;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};

use crate::config::CubistConfig;
use crate::error::{CubistError, Result};
use crate::metadata::CubeDesc;
use crate::row_source::FlatRow;
use crate::sketch::HllCounter;

use calculator::{CuboidSlice, StatsCalculator};

/// How row key values are combined into the hash fed to a cuboid sketch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingAlgorithm {
    /// Hash of the concatenated 32-bit column hashes, used by cubes created
    /// before format version 2.
    Legacy,
    /// Sum of 64-bit column hashes offset by the row key position.
    Current,
}

impl SamplingAlgorithm {
    pub fn for_cube(cube: &CubeDesc) -> Self {
        match cube.version_major() {
            Some(major) if major < 2 => {
                info!(
                    "Found cube version {:?}. Use legacy algorithm for cuboid sampling.",
                    cube.version
                );
                SamplingAlgorithm::Legacy
            }
            Some(_) => {
                info!(
                    "Found cube version {:?}. Use current algorithm for cuboid sampling.",
                    cube.version
                );
                SamplingAlgorithm::Current
            }
            None => {
                warn!(
                    "Cannot parse cube version {:?}, use current algorithm for cuboid sampling",
                    cube.version
                );
                SamplingAlgorithm::Current
            }
        }
    }
}

/// Row key positions selected by `cuboid_id`. The highest of the
/// `num_row_key` bits is the first row key column.
pub fn cuboid_bitset(cuboid_id: u64, num_row_key: usize) -> Result<Vec<usize>> {
    if num_row_key > 64 || (num_row_key < 64 && cuboid_id >> num_row_key != 0) {
        return Err(CubistError::Configuration(format!(
            "cuboid {cuboid_id} does not fit a row key of {num_row_key} columns"
        )));
    }
    Ok((0..num_row_key)
        .filter(|i| cuboid_id & (1u64 << (num_row_key - 1 - i)) != 0)
        .collect())
}

/// Number of calculator threads for `num_cuboids` cuboids.
pub fn calculator_count(num_cuboids: usize, cuboids_per_calculator: i64, max: usize) -> usize {
    if cuboids_per_calculator <= 0 {
        warn!("cuboids per calculator is {cuboids_per_calculator}, should be larger than 0");
        info!("Will use single thread for cuboid statistics calculation");
        return 1;
    }
    let unit = cuboids_per_calculator as usize;
    (num_cuboids.saturating_sub(1) / unit + 1).min(max).max(1)
}

/// Lifecycle of a [`CuboidStatsEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Draining,
    Completed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Pool of calculators estimating per-cuboid cardinality from sampled rows.
pub struct CuboidStatsEngine {
    state: EngineState,
    algorithm: SamplingAlgorithm,
    row_key_ordinals: Arc<[usize]>,
    queue_capacity: usize,
    stop: Arc<AtomicBool>,
    pending: Vec<CuboidSlice>,
    calculators: Vec<StatsCalculator>,
    results: BTreeMap<u64, HllCounter>,
}

impl CuboidStatsEngine {
    /// Splits `cuboid_ids` into calculator slices. `row_key_ordinals` maps
    /// row key positions to flat table ordinals.
    pub fn try_new(
        cuboid_ids: &[u64],
        row_key_ordinals: Vec<usize>,
        algorithm: SamplingAlgorithm,
        config: &CubistConfig,
    ) -> Result<Self> {
        let num_row_key = row_key_ordinals.len();
        let members = cuboid_ids
            .iter()
            .map(|id| cuboid_bitset(*id, num_row_key))
            .collect::<Result<Vec<_>>>()?;
        let counters = cuboid_ids
            .iter()
            .map(|_| HllCounter::try_new(config.hll_precision()))
            .collect::<Result<Vec<_>>>()?;

        let n = cuboid_ids.len();
        let num_calculators = calculator_count(
            n,
            config.cuboids_per_calculator(),
            config.max_calculators(),
        );
        let split = (n / num_calculators).max(1);
        let mut pending = Vec::with_capacity(num_calculators);
        for i in 0..num_calculators {
            let start = i * split;
            if start >= n {
                break;
            }
            let end = if i == num_calculators - 1 {
                n
            } else {
                (i + 1) * split
            };
            pending.push(CuboidSlice {
                ids: cuboid_ids[start..end].to_vec(),
                members: members[start..end].to_vec(),
                counters: counters[start..end].to_vec(),
            });
        }

        Ok(Self {
            state: EngineState::Idle,
            algorithm,
            row_key_ordinals: Arc::from(row_key_ordinals),
            queue_capacity: config.queue_capacity(),
            stop: Arc::new(AtomicBool::new(false)),
            pending,
            calculators: Vec::new(),
            results: BTreeMap::new(),
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn algorithm(&self) -> SamplingAlgorithm {
        self.algorithm
    }

    /// Number of calculators, planned or running.
    pub fn num_calculators(&self) -> usize {
        self.pending.len() + self.calculators.len()
    }

    /// Starts one thread per slice.
    pub fn start(&mut self) -> Result<()> {
        self.expect_state(EngineState::Idle, "start")?;
        for (id, slice) in std::mem::take(&mut self.pending).into_iter().enumerate() {
            let calculator = StatsCalculator::start(
                id,
                slice,
                self.row_key_ordinals.clone(),
                self.algorithm,
                self.queue_capacity,
                self.stop.clone(),
            )?;
            self.calculators.push(calculator);
        }
        self.state = EngineState::Running;
        Ok(())
    }

    /// Hands a sampled row to every calculator, blocking while any queue is full.
    pub fn submit(&self, row: &FlatRow) -> Result<()> {
        self.expect_state(EngineState::Running, "submit")?;
        let row = Arc::new(row.clone());
        for calculator in &self.calculators {
            calculator.put_row(row.clone());
        }
        Ok(())
    }

    /// Signals stop and joins every calculator. All rows submitted before the
    /// call are reflected in the results.
    pub fn complete(&mut self) -> Result<()> {
        if self.state == EngineState::Completed {
            return Ok(());
        }
        self.expect_state(EngineState::Running, "complete")?;
        self.state = EngineState::Draining;
        self.stop.store(true, Ordering::Release);
        for calculator in &mut self.calculators {
            if let Some(slice) = calculator.wait_for_completion() {
                self.results
                    .extend(slice.ids.into_iter().zip(slice.counters));
            }
        }
        self.state = EngineState::Completed;
        info!(
            "Cuboid statistics completed for {} cuboids",
            self.results.len()
        );
        Ok(())
    }

    /// Final sketch per cuboid id, available once completed.
    pub fn results(&self) -> Result<&BTreeMap<u64, HllCounter>> {
        self.expect_state(EngineState::Completed, "read results")?;
        Ok(&self.results)
    }

    pub fn into_results(mut self) -> Result<BTreeMap<u64, HllCounter>> {
        self.expect_state(EngineState::Completed, "read results")?;
        // Drop only joins running calculators, a completed engine has none
        Ok(std::mem::take(&mut self.results))
    }

    fn expect_state(&self, expected: EngineState, action: &str) -> Result<()> {
        if self.state != expected {
            return Err(CubistError::Internal(format!(
                "cannot {action} cuboid statistics in state {}, expected {expected}",
                self.state
            )));
        }
        Ok(())
    }
}

impl Drop for CuboidStatsEngine {
    fn drop(&mut self) {
        if self.state == EngineState::Running {
            self.stop.store(true, Ordering::Release);
            for calculator in &mut self.calculators {
                calculator.wait_for_completion();
            }
        }
    }
}
