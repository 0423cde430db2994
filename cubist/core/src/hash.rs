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

//! Hash functions used for shard placement and cuboid sampling.
//!
//! Shard placement of ultra high cardinality values must be reproducible by
//! every implementation that reads or writes the same shards, so it uses the
//! classic 31-multiplier string hash over UTF-16 code units followed by a
//! mask to a non-negative 31-bit value. Sketch hashing only has to agree
//! within a single job and uses xxHash.

use xxhash_rust::xxh32::xxh32;
use xxhash_rust::xxh3::xxh3_64;

/// Width in bytes of the per-column hash used by the legacy sampling algorithm.
pub const LEGACY_HASH_BYTES: usize = 4;

/// 31-multiplier hash over the UTF-16 code units of `value`, wrapping on overflow.
pub fn string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

/// [`string_hash`] masked to a non-negative 31-bit value.
pub fn non_negative_hash(value: &str) -> u32 {
    (string_hash(value) & 0x7fff_ffff) as u32
}

/// 32-bit hash of `bytes`, as big-endian bytes.
pub fn hash32(bytes: &[u8]) -> [u8; LEGACY_HASH_BYTES] {
    xxh32(bytes, 0).to_be_bytes()
}

/// 64-bit hash of `bytes`.
pub fn hash64(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}
