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

//! Destination of the emitted key stream.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::shard_plan::ShardPlan;
use crate::sketch::HllCounter;
use crate::sortable_key::{KeyRef, SortableKey, MARK_FOR_HLL};

/// Receives `(key, value)` records. The key borrows the router's encoding
/// buffer and is only valid for the duration of the call.
pub trait KeySink {
    fn emit(&mut self, key: KeyRef<'_>, value: &[u8]) -> Result<()>;
}

impl<S: KeySink + ?Sized> KeySink for &mut S {
    fn emit(&mut self, key: KeyRef<'_>, value: &[u8]) -> Result<()> {
        (**self).emit(key, value)
    }
}

/// Collects records into per-shard sorted maps, the way the downstream sort
/// delivers them to each reducer.
///
/// Equal dictionary keys collapse into one record. Sketch records for the same
/// cuboid are merged.
#[derive(Debug)]
pub struct InMemoryShuffle {
    plan: ShardPlan,
    shards: Vec<BTreeMap<SortableKey, Vec<u8>>>,
    records_received: usize,
}

impl InMemoryShuffle {
    pub fn new(plan: ShardPlan) -> Self {
        let shards = (0..plan.total_shards()).map(|_| BTreeMap::new()).collect();
        Self {
            plan,
            shards,
            records_received: 0,
        }
    }

    pub fn plan(&self) -> &ShardPlan {
        &self.plan
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Sorted records of `shard`.
    pub fn shard(&self, shard: usize) -> Option<&BTreeMap<SortableKey, Vec<u8>>> {
        self.shards.get(shard)
    }

    /// Distinct record count per shard.
    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards.iter().map(BTreeMap::len).collect()
    }

    /// Number of `emit` calls, duplicates included.
    pub fn records_received(&self) -> usize {
        self.records_received
    }

    /// Decoded sketches of every sketch record, by cuboid id.
    pub fn cuboid_sketches(&self) -> Result<BTreeMap<u64, HllCounter>> {
        let first = self.plan.dictionary_shards() + 1;
        let mut sketches = BTreeMap::new();
        for shard in self.shards.iter().skip(first) {
            for (key, value) in shard {
                if let Some(cuboid_id) = key.cuboid_id() {
                    sketches.insert(cuboid_id, HllCounter::read_registers(value)?);
                }
            }
        }
        Ok(sketches)
    }
}

impl KeySink for InMemoryShuffle {
    fn emit(&mut self, key: KeyRef<'_>, value: &[u8]) -> Result<()> {
        let shard = self.plan.shard_for_key(key)?;
        self.records_received += 1;
        match self.shards[shard].entry(key.to_owned_key()) {
            Entry::Vacant(entry) => {
                entry.insert(value.to_vec());
            }
            Entry::Occupied(mut entry) if key.leading_byte() == MARK_FOR_HLL => {
                let mut merged = HllCounter::read_registers(entry.get())?;
                merged.merge(&HllCounter::read_registers(value)?)?;
                *entry.get_mut() = merged.to_bytes();
            }
            Entry::Occupied(_) => {}
        }
        Ok(())
    }
}
