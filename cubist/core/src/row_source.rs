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

//! Flat table rows and the sources that decode them.

use crate::error::Result;

/// Default field delimiter of the flat table text format.
pub const DEFAULT_FIELD_DELIMITER: u8 = 0x01;
/// Text that decodes to a null field.
pub const NULL_MARKER: &str = "\\N";

/// One row of the flat table: ordered, nullable string fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlatRow {
    fields: Vec<Option<String>>,
}

impl FlatRow {
    pub fn new(fields: Vec<Option<String>>) -> Self {
        Self { fields }
    }

    /// Value at `index`, `None` when the field is null or out of range.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.fields.get(index).and_then(|f| f.as_deref())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[Option<String>] {
        &self.fields
    }

    /// Size of the row as raw text: UTF-8 length of every field (1 for
    /// nulls) plus one delimiter per field.
    pub fn raw_size_in_bytes(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.as_ref().map_or(1, |s| s.len()) + 1)
            .sum()
    }
}

impl From<Vec<Option<String>>> for FlatRow {
    fn from(fields: Vec<Option<String>>) -> Self {
        Self::new(fields)
    }
}

impl<'a> From<Vec<Option<&'a str>>> for FlatRow {
    fn from(fields: Vec<Option<&'a str>>) -> Self {
        Self::new(fields.into_iter().map(|f| f.map(str::to_string)).collect())
    }
}

/// Decodes one raw input unit into zero or more flat rows.
pub trait RowSource: Send + Sync {
    fn parse(&self, raw: &[u8]) -> Result<Vec<FlatRow>>;
}

/// Newline separated rows with single byte field delimiters.
#[derive(Debug, Clone)]
pub struct DelimitedRowSource {
    delimiter: u8,
}

impl Default for DelimitedRowSource {
    fn default() -> Self {
        Self::new(DEFAULT_FIELD_DELIMITER)
    }
}

impl DelimitedRowSource {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }

    fn parse_line(&self, line: &[u8]) -> Result<FlatRow> {
        let fields = line
            .split(|b| *b == self.delimiter)
            .map(|field| -> Result<Option<String>> {
                let field = std::str::from_utf8(field)?;
                Ok((field != NULL_MARKER).then(|| field.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(FlatRow::new(fields))
    }
}

impl RowSource for DelimitedRowSource {
    fn parse(&self, raw: &[u8]) -> Result<Vec<FlatRow>> {
        raw.split(|b| *b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(|line| self.parse_line(line))
            .collect()
    }
}
