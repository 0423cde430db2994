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

//! Byte keys of the emitted record stream.
//!
//! A key is `[marker or shard byte][value bytes]`. Keys order first by the
//! leading byte so that records of one shard stay together, then by value
//! according to the value's type family so that numeric columns sort
//! numerically within their shard.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use datafusion::arrow::datatypes::DataType;

use crate::error::{CubistError, Result};

/// Marker byte of partition column records.
pub const MARK_FOR_PARTITION_COL: u8 = 0xFE;
/// Marker byte of cuboid sketch records.
pub const MARK_FOR_HLL: u8 = 0xFF;

/// How the value part of a key is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyFamily {
    /// Plain byte order.
    #[default]
    Text,
    /// Signed 64-bit integers.
    Integer,
    /// Floating point and decimal numbers.
    Numeric,
}

impl KeyFamily {
    /// Family used for values of a column of type `data_type`.
    pub fn for_data_type(data_type: &DataType) -> Self {
        match data_type {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => KeyFamily::Integer,
            DataType::Float16
            | DataType::Float32
            | DataType::Float64
            | DataType::Decimal128(_, _)
            | DataType::Decimal256(_, _) => KeyFamily::Numeric,
            _ => KeyFamily::Text,
        }
    }

    fn compare_values(&self, left: &[u8], right: &[u8]) -> Ordering {
        match self {
            KeyFamily::Text => left.cmp(right),
            KeyFamily::Integer => {
                compare_parsed(left, right, |s| s.parse::<i64>().ok(), |a, b| a.cmp(b))
            }
            KeyFamily::Numeric => compare_parsed(
                left,
                right,
                |s| s.parse::<f64>().ok(),
                |a, b| a.total_cmp(b),
            ),
        }
    }
}

// Unparsable values sort after parsable ones. Equal numbers fall back to
// byte order so that the ordering stays consistent with byte equality.
fn compare_parsed<T>(
    left: &[u8],
    right: &[u8],
    parse: impl Fn(&str) -> Option<T>,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Ordering {
    let parse_bytes = |b: &[u8]| std::str::from_utf8(b).ok().and_then(&parse);
    match (parse_bytes(left), parse_bytes(right)) {
        (Some(a), Some(b)) => cmp(&a, &b).then_with(|| left.cmp(right)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.cmp(right),
    }
}

fn compare_keys(
    left: &[u8],
    left_family: KeyFamily,
    right: &[u8],
    right_family: KeyFamily,
) -> Ordering {
    match (left.split_first(), right.split_first()) {
        (Some((l, lv)), Some((r, rv))) => l.cmp(r).then_with(|| {
            if left_family == right_family {
                left_family.compare_values(lv, rv)
            } else {
                lv.cmp(rv)
            }
        }),
        _ => left.cmp(right),
    }
}

/// A key borrowed from an encoding buffer. Only valid until the buffer is
/// written again.
#[derive(Clone, Copy)]
pub struct KeyRef<'a> {
    bytes: &'a [u8],
    family: KeyFamily,
}

impl<'a> KeyRef<'a> {
    /// Wraps already encoded key bytes. The slice must hold at least the
    /// leading byte.
    pub fn new(bytes: &'a [u8], family: KeyFamily) -> Result<Self> {
        if bytes.is_empty() {
            return Err(CubistError::Internal(
                "a key needs at least its leading byte".to_string(),
            ));
        }
        Ok(Self { bytes, family })
    }

    /// Shard id or marker byte.
    pub fn leading_byte(&self) -> u8 {
        self.bytes[0]
    }

    /// Value part of the key.
    pub fn value(&self) -> &'a [u8] {
        &self.bytes[1..]
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// Cuboid id of a sketch record key.
    pub fn cuboid_id(&self) -> Option<u64> {
        if self.leading_byte() != MARK_FOR_HLL {
            return None;
        }
        let id: [u8; 8] = self.value().try_into().ok()?;
        Some(u64::from_be_bytes(id))
    }

    pub fn to_owned_key(&self) -> SortableKey {
        SortableKey {
            bytes: self.bytes.to_vec(),
            family: self.family,
        }
    }
}

impl fmt::Debug for KeyRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRef")
            .field("leading_byte", &self.leading_byte())
            .field("value", &String::from_utf8_lossy(self.value()))
            .field("family", &self.family)
            .finish()
    }
}

/// An owned key.
#[derive(Clone, Debug)]
pub struct SortableKey {
    bytes: Vec<u8>,
    family: KeyFamily,
}

impl SortableKey {
    /// Encodes `(leading_byte, value)` into a new key.
    pub fn encode(leading_byte: u8, value: &[u8], family: KeyFamily) -> Self {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.push(leading_byte);
        bytes.extend_from_slice(value);
        Self { bytes, family }
    }

    /// Key of the sketch record for `cuboid_id`.
    pub fn for_cuboid(cuboid_id: u64) -> Self {
        Self::encode(MARK_FOR_HLL, &cuboid_id.to_be_bytes(), KeyFamily::Text)
    }

    pub fn as_key_ref(&self) -> KeyRef<'_> {
        KeyRef {
            bytes: &self.bytes,
            family: self.family,
        }
    }

    pub fn leading_byte(&self) -> u8 {
        self.bytes[0]
    }

    pub fn value(&self) -> &[u8] {
        &self.bytes[1..]
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    pub fn cuboid_id(&self) -> Option<u64> {
        self.as_key_ref().cuboid_id()
    }
}

impl PartialEq for SortableKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for SortableKey {}

impl Hash for SortableKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl PartialOrd for SortableKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortableKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&self.bytes, self.family, &other.bytes, other.family)
    }
}

/// Reusable encoding buffer. Capacity grows by doubling and never past the
/// configured maximum.
#[derive(Debug)]
pub struct KeyBuffer {
    buf: Vec<u8>,
    capacity: usize,
    max_capacity: usize,
}

impl KeyBuffer {
    /// Initial capacity of a new buffer.
    pub const DEFAULT_CAPACITY: usize = 4096;

    pub fn new(max_capacity: usize) -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY.min(max_capacity), max_capacity)
    }

    pub fn with_capacity(capacity: usize, max_capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            max_capacity: max_capacity.max(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Encodes `(leading_byte, value)`, overwriting the previous key.
    pub fn encode(
        &mut self,
        leading_byte: u8,
        value: &[u8],
        family: KeyFamily,
    ) -> Result<KeyRef<'_>> {
        let size = value.len() + 1;
        if size > self.capacity {
            self.grow(size)?;
        }
        self.buf.clear();
        self.buf.push(leading_byte);
        self.buf.extend_from_slice(value);
        Ok(KeyRef {
            bytes: &self.buf,
            family,
        })
    }

    /// Fails if a key holding `value_len` value bytes could not be encoded.
    pub fn check_fits(&self, value_len: usize) -> Result<()> {
        let size = value_len.saturating_add(1);
        if size > self.max_capacity {
            return Err(CubistError::General(format!(
                "encoded key of {size} bytes exceeds the maximum of {} bytes",
                self.max_capacity
            )));
        }
        Ok(())
    }

    fn grow(&mut self, size: usize) -> Result<()> {
        self.check_fits(size - 1)?;
        let mut capacity = self.capacity.saturating_mul(2);
        while capacity < size {
            capacity = capacity.saturating_mul(2);
        }
        self.capacity = capacity.min(self.max_capacity);
        self.buf = Vec::with_capacity(self.capacity);
        Ok(())
    }
}
