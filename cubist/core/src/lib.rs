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

#![doc = include_str!("../README.md")]

/// The current version of Cubist, derived from the Cargo package version.
pub const CUBIST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration options of the fact distinct columns stage.
pub mod config;
/// Error types and result definitions.
pub mod error;
/// String and byte hashes used for shard placement and sketches.
pub mod hash;
/// The map task tying routing and statistics together.
pub mod mapper;
/// Cube, segment and flat table descriptors.
pub mod metadata;
/// Dictionary value routing.
pub mod router;
/// Flat rows and the sources that decode them.
pub mod row_source;
/// Shard layout and record partitioning.
pub mod shard_plan;
/// Emitted key stream destinations.
pub mod sink;
/// HyperLogLog cardinality counter.
pub mod sketch;
/// Shard prefixed, type aware keys.
pub mod sortable_key;
/// Sampled cuboid statistics.
pub mod stats;

pub use config::CubistConfig;
pub use error::{CubistError, Result};
pub use mapper::{FactDistinctMapper, MapperSummary};
pub use metadata::{CubeDesc, FlatTableDesc};
pub use row_source::{DelimitedRowSource, FlatRow, RowSource};
pub use sink::{InMemoryShuffle, KeySink};
