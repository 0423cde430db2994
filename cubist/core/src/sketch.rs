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

//! HyperLogLog cardinality counter for cuboid statistics.

use crate::config::{MAX_HLL_PRECISION, MIN_HLL_PRECISION};
use crate::error::{CubistError, Result};
use crate::hash;

const DENSE_ENCODING: u8 = 0;
const SPARSE_ENCODING: u8 = 1;
const SPARSE_ENTRY_BYTES: usize = 5;

/// Mergeable distinct count estimator with `2^p` one-byte registers.
///
/// The low `p` bits of a hash select the register, the register keeps the
/// largest observed position of the first set bit of the remaining bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HllCounter {
    p: u8,
    registers: Vec<u8>,
}

impl HllCounter {
    /// Creates an empty counter. Fails for precisions outside the supported range.
    pub fn try_new(precision: usize) -> Result<Self> {
        if !(MIN_HLL_PRECISION..=MAX_HLL_PRECISION).contains(&precision) {
            return Err(CubistError::Configuration(format!(
                "HyperLogLog precision must be within {MIN_HLL_PRECISION}..={MAX_HLL_PRECISION}, got {precision}"
            )));
        }
        Ok(Self {
            p: precision as u8,
            registers: vec![0u8; 1 << precision],
        })
    }

    pub fn precision(&self) -> usize {
        self.p as usize
    }

    /// Hashes `bytes` and adds the hash.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.add_hash(hash::hash64(bytes));
    }

    /// Adds an already hashed value.
    pub fn add_hash(&mut self, hash: u64) {
        let bucket_mask = (self.registers.len() - 1) as u64;
        let bucket = (hash & bucket_mask) as usize;
        let first_one = ((hash | bucket_mask).leading_zeros() + 1) as u8;
        if first_one > self.registers[bucket] {
            self.registers[bucket] = first_one;
        }
    }

    /// Register-wise maximum with `other`.
    pub fn merge(&mut self, other: &HllCounter) -> Result<()> {
        if self.p != other.p {
            return Err(CubistError::General(format!(
                "cannot merge HyperLogLog counters of precision {} and {}",
                self.p, other.p
            )));
        }
        for (mine, theirs) in self.registers.iter_mut().zip(&other.registers) {
            if *theirs > *mine {
                *mine = *theirs;
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.registers.iter().all(|r| *r == 0)
    }

    /// Estimated number of distinct hashes added.
    pub fn estimate(&self) -> u64 {
        let m = self.registers.len() as f64;
        let alpha = match self.registers.len() {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        };

        let mut inv_sum = 0.0;
        let mut zeros = 0u32;
        for &r in &self.registers {
            inv_sum += 2f64.powi(-(r as i32));
            if r == 0 {
                zeros += 1;
            }
        }

        let raw = alpha * m * m / inv_sum;

        // small range correction
        if raw <= 2.5 * m && zeros > 0 {
            let z = zeros as f64;
            return (m * (m / z).ln()).round().max(0.0) as u64;
        }

        raw.round().max(0.0) as u64
    }

    /// Appends the serialized registers to `out`, picking the smaller of the
    /// dense and sparse encodings.
    pub fn write_registers(&self, out: &mut Vec<u8>) {
        let non_zero = self.registers.iter().filter(|r| **r != 0).count();
        out.push(self.p);
        if 4 + non_zero * SPARSE_ENTRY_BYTES < self.registers.len() {
            out.push(SPARSE_ENCODING);
            out.extend_from_slice(&(non_zero as u32).to_be_bytes());
            for (idx, r) in self.registers.iter().enumerate() {
                if *r != 0 {
                    out.extend_from_slice(&(idx as u32).to_be_bytes());
                    out.push(*r);
                }
            }
        } else {
            out.push(DENSE_ENCODING);
            out.extend_from_slice(&self.registers);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_registers(&mut out);
        out
    }

    /// Reads a counter written by [`HllCounter::write_registers`].
    pub fn read_registers(bytes: &[u8]) -> Result<Self> {
        let (header, body) = bytes.split_at_checked(2).ok_or_else(|| {
            CubistError::General("HyperLogLog header is truncated".to_string())
        })?;
        let mut counter = Self::try_new(header[0] as usize)?;
        match header[1] {
            DENSE_ENCODING => {
                if body.len() != counter.registers.len() {
                    return Err(CubistError::General(format!(
                        "expected {} dense registers, found {} bytes",
                        counter.registers.len(),
                        body.len()
                    )));
                }
                counter.registers.copy_from_slice(body);
            }
            SPARSE_ENCODING => {
                let (count, entries) = body.split_at_checked(4).ok_or_else(|| {
                    CubistError::General("sparse register count is truncated".to_string())
                })?;
                let count = u32::from_be_bytes([count[0], count[1], count[2], count[3]])
                    as usize;
                if entries.len() != count * SPARSE_ENTRY_BYTES {
                    return Err(CubistError::General(format!(
                        "expected {count} sparse registers, found {} bytes",
                        entries.len()
                    )));
                }
                for entry in entries.chunks_exact(SPARSE_ENTRY_BYTES) {
                    let idx =
                        u32::from_be_bytes([entry[0], entry[1], entry[2], entry[3]]) as usize;
                    let register = counter.registers.get_mut(idx).ok_or_else(|| {
                        CubistError::General(format!("register index {idx} out of range"))
                    })?;
                    *register = entry[4];
                }
            }
            other => {
                return Err(CubistError::General(format!(
                    "unknown HyperLogLog encoding {other}"
                )))
            }
        }
        Ok(counter)
    }
}
