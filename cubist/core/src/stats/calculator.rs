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

//! Background worker that folds sampled rows into the sketches of the
//! cuboids it owns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info};

use crate::error::Result;
use crate::hash::{self, LEGACY_HASH_BYTES};
use crate::row_source::FlatRow;
use crate::sketch::HllCounter;

use super::SamplingAlgorithm;

const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Cuboids owned by one calculator, with one sketch per cuboid.
#[derive(Debug, Clone)]
pub struct CuboidSlice {
    pub ids: Vec<u64>,
    /// Row key positions of each cuboid, ascending.
    pub members: Vec<Vec<usize>>,
    pub counters: Vec<HllCounter>,
}

/// Wrapping sum of the adjusted column hashes of a cuboid's members.
pub fn cuboid_hash(column_hashes: &[u64], members: &[usize]) -> u64 {
    members
        .iter()
        .fold(0u64, |sum, m| sum.wrapping_add(column_hashes[*m]))
}

/// Per-row hashing state, selected once per job.
enum RowKeyHasher {
    Legacy {
        column_hashes: Vec<[u8; LEGACY_HASH_BYTES]>,
        cuboid_bytes: Vec<u8>,
    },
    Current {
        column_hashes: Vec<u64>,
    },
}

impl RowKeyHasher {
    fn new(algorithm: SamplingAlgorithm, num_row_key: usize) -> Self {
        match algorithm {
            SamplingAlgorithm::Legacy => RowKeyHasher::Legacy {
                column_hashes: vec![[0; LEGACY_HASH_BYTES]; num_row_key],
                cuboid_bytes: Vec::with_capacity(num_row_key * LEGACY_HASH_BYTES),
            },
            SamplingAlgorithm::Current => RowKeyHasher::Current {
                column_hashes: vec![0; num_row_key],
            },
        }
    }

    fn update(&mut self, row: &FlatRow, row_key_ordinals: &[usize], slice: &mut CuboidSlice) {
        match self {
            RowKeyHasher::Legacy {
                column_hashes,
                cuboid_bytes,
            } => {
                for (i, ordinal) in row_key_ordinals.iter().enumerate() {
                    column_hashes[i] = match row.get(*ordinal) {
                        Some(value) => hash::hash32(value.as_bytes()),
                        None => hash::hash32(&0i32.to_le_bytes()),
                    };
                }
                for (members, counter) in slice.members.iter().zip(slice.counters.iter_mut()) {
                    cuboid_bytes.clear();
                    for m in members {
                        cuboid_bytes.extend_from_slice(&column_hashes[*m]);
                    }
                    counter.add_bytes(&hash::hash32(cuboid_bytes.as_slice()));
                }
            }
            RowKeyHasher::Current { column_hashes } => {
                for (i, ordinal) in row_key_ordinals.iter().enumerate() {
                    let value = row.get(*ordinal).unwrap_or("0");
                    // the ordinal tells (a, b) apart from (b, a)
                    column_hashes[i] = hash::hash64(value.as_bytes()).wrapping_add(i as u64);
                }
                for (members, counter) in slice.members.iter().zip(slice.counters.iter_mut()) {
                    counter.add_hash(cuboid_hash(column_hashes.as_slice(), members));
                }
            }
        }
    }
}

/// Handle of a running calculator thread.
pub struct StatsCalculator {
    id: usize,
    num_cuboids: usize,
    sender: Option<SyncSender<Arc<FlatRow>>>,
    handle: Option<JoinHandle<CuboidSlice>>,
}

impl StatsCalculator {
    /// Spawns the calculator thread. The slice is moved into the thread and
    /// handed back by [`StatsCalculator::wait_for_completion`].
    pub fn start(
        id: usize,
        slice: CuboidSlice,
        row_key_ordinals: Arc<[usize]>,
        algorithm: SamplingAlgorithm,
        queue_capacity: usize,
        stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        let (tx, rx) = sync_channel(queue_capacity);
        let num_cuboids = slice.ids.len();
        let hasher = RowKeyHasher::new(algorithm, row_key_ordinals.len());
        info!("cuboid stats calculator:{id} started, handle cuboids number:{num_cuboids}");
        let handle = thread::Builder::new()
            .name(format!("cuboid-stats-{id}"))
            .spawn(move || run(id, rx, stop, slice, hasher, &row_key_ordinals))?;
        Ok(Self {
            id,
            num_cuboids,
            sender: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queues a row, blocking while the queue is full.
    pub fn put_row(&self, row: Arc<FlatRow>) {
        match &self.sender {
            Some(sender) => {
                if let Err(e) = sender.send(row) {
                    error!("cuboid stats calculator:{} stopped accepting rows: {e}", self.id);
                }
            }
            None => error!(
                "cuboid stats calculator:{} received a row after completion",
                self.id
            ),
        }
    }

    /// Closes the queue and joins the thread. Rows queued before the call are
    /// processed first. Returns `None` if the thread panicked.
    pub fn wait_for_completion(&mut self) -> Option<CuboidSlice> {
        self.sender.take();
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(slice) => Some(slice),
            Err(_) => {
                error!(
                    "cuboid stats calculator:{} panicked, statistics of its {} cuboids are lost",
                    self.id, self.num_cuboids
                );
                None
            }
        }
    }
}

fn run(
    id: usize,
    rx: Receiver<Arc<FlatRow>>,
    stop: Arc<AtomicBool>,
    mut slice: CuboidSlice,
    mut hasher: RowKeyHasher,
    row_key_ordinals: &[usize],
) -> CuboidSlice {
    let mut rows = 0u64;
    loop {
        match rx.recv_timeout(POLL_TIMEOUT) {
            Ok(row) => {
                hasher.update(&row, row_key_ordinals, &mut slice);
                rows += 1;
            }
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::Acquire) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("cuboid stats calculator:{id} completed after {rows} rows.");
    slice
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(members: Vec<Vec<usize>>, precision: usize) -> CuboidSlice {
        CuboidSlice {
            ids: (0..members.len() as u64).collect(),
            counters: members
                .iter()
                .map(|_| HllCounter::try_new(precision).unwrap())
                .collect(),
            members,
        }
    }

    #[test]
    fn cuboid_hash_sums_member_hashes() {
        let hashes = [10u64, 999, 20];
        assert_eq!(cuboid_hash(&hashes, &[0, 2]), 30);
        assert_eq!(cuboid_hash(&[u64::MAX, 2], &[0, 1]), 1);
    }

    #[test]
    fn current_algorithm_feeds_raw_sum() {
        let row = FlatRow::from(vec![Some("a"), Some("b"), Some("c")]);
        let mut hasher = RowKeyHasher::new(SamplingAlgorithm::Current, 3);
        let mut owned = slice(vec![vec![0, 2]], 10);
        hasher.update(&row, &[0, 1, 2], &mut owned);

        let expected_sum = hash::hash64(b"a").wrapping_add(hash::hash64(b"c").wrapping_add(2));
        let mut expected = HllCounter::try_new(10).unwrap();
        expected.add_hash(expected_sum);
        assert_eq!(owned.counters[0], expected);
    }

    #[test]
    fn current_algorithm_treats_null_as_zero_string() {
        let mut hasher = RowKeyHasher::new(SamplingAlgorithm::Current, 1);
        let mut with_null = slice(vec![vec![0]], 10);
        let mut with_zero = slice(vec![vec![0]], 10);
        hasher.update(&FlatRow::from(vec![None::<&str>]), &[0], &mut with_null);
        hasher.update(&FlatRow::from(vec![Some("0")]), &[0], &mut with_zero);
        assert_eq!(with_null.counters, with_zero.counters);
    }

    #[test]
    fn legacy_algorithm_hashes_concatenated_member_hashes() {
        let row = FlatRow::from(vec![Some("x"), None]);
        let mut hasher = RowKeyHasher::new(SamplingAlgorithm::Legacy, 2);
        let mut owned = slice(vec![vec![0, 1]], 10);
        hasher.update(&row, &[0, 1], &mut owned);

        let mut bytes = hash::hash32(b"x").to_vec();
        bytes.extend_from_slice(&hash::hash32(&0i32.to_le_bytes()));
        let mut expected = HllCounter::try_new(10).unwrap();
        expected.add_bytes(&hash::hash32(&bytes));
        assert_eq!(owned.counters[0], expected);
    }

    #[test]
    fn drains_queue_before_stopping() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut calculator = StatsCalculator::start(
            0,
            slice(vec![vec![0]], 12),
            Arc::from(vec![0usize]),
            SamplingAlgorithm::Current,
            4,
            stop.clone(),
        )
        .unwrap();
        for i in 0..1000 {
            calculator.put_row(Arc::new(FlatRow::from(vec![Some(i.to_string())])));
        }
        stop.store(true, Ordering::Release);
        let done = calculator.wait_for_completion().unwrap();
        let estimate = done.counters[0].estimate();
        assert!((950..=1050).contains(&estimate), "{estimate}");
        assert!(calculator.wait_for_completion().is_none());
    }
}
