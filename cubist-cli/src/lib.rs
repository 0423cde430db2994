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

//! Runs the fact distinct columns stage over local flat table files.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use cubist_core::row_source::DEFAULT_FIELD_DELIMITER;
use cubist_core::{
    CubeDesc, CubistConfig, DelimitedRowSource, FactDistinctMapper, FlatTableDesc,
    InMemoryShuffle, MapperSummary, CUBIST_VERSION,
};
use log::info;
use serde_json::json;

#[derive(Debug, Parser, PartialEq)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(long, help = "Cube descriptor as JSON")]
    pub cube: PathBuf,

    #[clap(long, help = "Segment to build")]
    pub segment: String,

    #[clap(
        long,
        required = true,
        value_delimiter = ',',
        help = "Flat table column names, comma separated, in file order"
    )]
    pub columns: Vec<String>,

    #[clap(
        short,
        long,
        required = true,
        num_args = 1..,
        help = "Flat table files, each one mapped by its own task"
    )]
    pub input: Vec<PathBuf>,

    #[clap(
        short,
        long,
        value_parser(parse_delimiter),
        help = "Field delimiter: a single character, \\t, or a hex byte such as 0x01 [default: 0x01]"
    )]
    pub delimiter: Option<u8>,

    #[clap(
        long = "set",
        value_parser(parse_setting),
        help = "Configuration option as key=value, may be repeated"
    )]
    pub settings: Vec<(String, String)>,

    #[clap(long, help = "Print the report as JSON")]
    pub json: bool,
}

/// Outcome of a run over all input files.
#[derive(Debug)]
pub struct Report {
    pub mappers: Vec<MapperSummary>,
    /// Distinct records per shard after the local combine.
    pub shard_sizes: Vec<usize>,
    pub dictionary_shards: usize,
    /// Estimated row count per cuboid, merged over all mappers.
    pub cuboid_estimates: BTreeMap<u64, u64>,
}

impl Report {
    pub fn to_json(&self) -> serde_json::Value {
        let mappers: Vec<_> = self
            .mappers
            .iter()
            .map(|m| {
                json!({
                    "rows": m.rows,
                    "sampled_rows": m.sampled_rows,
                    "raw_bytes": m.raw_bytes,
                    "records": m.records,
                    "cuboids": m.cuboids,
                })
            })
            .collect();
        let cuboids: serde_json::Map<String, serde_json::Value> = self
            .cuboid_estimates
            .iter()
            .map(|(id, estimate)| (id.to_string(), json!(estimate)))
            .collect();
        json!({
            "version": CUBIST_VERSION,
            "mappers": mappers,
            "dictionary_shards": self.dictionary_shards,
            "shard_sizes": self.shard_sizes,
            "cuboid_estimates": cuboids,
        })
    }

    pub fn print(&self) {
        println!("Cubist version: {CUBIST_VERSION}");
        for (i, m) in self.mappers.iter().enumerate() {
            println!(
                "mapper {i}: {} rows, {} sampled, {} raw bytes, {} records",
                m.rows, m.sampled_rows, m.raw_bytes, m.records
            );
        }
        for (shard, size) in self.shard_sizes.iter().enumerate() {
            let kind = match shard.cmp(&self.dictionary_shards) {
                std::cmp::Ordering::Less => "dictionary",
                std::cmp::Ordering::Equal => "partition",
                std::cmp::Ordering::Greater => "statistics",
            };
            println!("shard {shard:>3} ({kind}): {size} records");
        }
        for (cuboid, estimate) in &self.cuboid_estimates {
            println!("cuboid {cuboid} ({cuboid:#b}): ~{estimate} rows");
        }
    }
}

pub fn run(args: &Args) -> Result<Report> {
    let cube_json = fs::read_to_string(&args.cube)
        .with_context(|| format!("reading cube descriptor {}", args.cube.display()))?;
    let cube: CubeDesc = serde_json::from_str(&cube_json)
        .with_context(|| format!("parsing cube descriptor {}", args.cube.display()))?;
    let flat_table = FlatTableDesc::new(args.columns.clone());
    let settings: HashMap<String, String> = args.settings.iter().cloned().collect();
    let config = CubistConfig::with_settings(settings)?;
    let source = DelimitedRowSource::new(args.delimiter.unwrap_or(DEFAULT_FIELD_DELIMITER));

    let mut shuffle: Option<InMemoryShuffle> = None;
    let mut mappers = Vec::with_capacity(args.input.len());
    for (partition, path) in args.input.iter().enumerate() {
        let mut mapper = FactDistinctMapper::try_new_for_partition(
            &cube,
            &args.segment,
            &flat_table,
            &config,
            partition,
        )?;
        let sink =
            shuffle.get_or_insert_with(|| InMemoryShuffle::new(mapper.shard_plan().clone()));
        let raw = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let rows = mapper.map(&raw, &source, &mut *sink)?;
        info!("Mapped {rows} rows from {}", path.display());
        mappers.push(mapper.finish(sink)?);
    }

    let shuffle = shuffle.ok_or_else(|| anyhow!("no input files"))?;
    let cuboid_estimates = shuffle
        .cuboid_sketches()?
        .into_iter()
        .map(|(id, sketch)| (id, sketch.estimate()))
        .collect();
    Ok(Report {
        mappers,
        shard_sizes: shuffle.shard_sizes(),
        dictionary_shards: shuffle.plan().dictionary_shards(),
        cuboid_estimates,
    })
}

fn parse_delimiter(s: &str) -> Result<u8> {
    if s == "\\t" {
        return Ok(b'\t');
    }
    if let Some(hex) = s.strip_prefix("0x") {
        return u8::from_str_radix(hex, 16).map_err(|e| anyhow!("invalid delimiter {s}: {e}"));
    }
    match s.as_bytes() {
        [byte] => Ok(*byte),
        _ => bail!("delimiter must be a single byte, got {s:?}"),
    }
}

fn parse_setting(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got {s:?}"))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}
