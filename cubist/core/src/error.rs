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

//! Cubist error types

use std::{
    error::Error,
    fmt::{Display, Formatter},
    io, result, str,
};

/// Result type alias for Cubist operations.
pub type Result<T> = result::Result<T, CubistError>;

/// Cubist error types for the fact distinct columns stage.
#[derive(Debug)]
pub enum CubistError {
    /// General error with a descriptive message.
    General(String),
    /// Internal error indicating a bug or unexpected state.
    Internal(String),
    /// Configuration or metadata error detected during setup.
    Configuration(String),
    /// I/O operation error.
    IoError(io::Error),
    /// Input bytes were not valid UTF-8.
    Utf8Error(str::Utf8Error),
}

#[allow(clippy::from_over_into)]
impl<T> Into<Result<T>> for CubistError {
    fn into(self) -> Result<T> {
        Err(self)
    }
}

/// Creates a general Cubist error from a string message.
pub fn cubist_error(message: &str) -> CubistError {
    CubistError::General(message.to_owned())
}

impl From<String> for CubistError {
    fn from(e: String) -> Self {
        CubistError::General(e)
    }
}

impl From<io::Error> for CubistError {
    fn from(e: io::Error) -> Self {
        CubistError::IoError(e)
    }
}

impl From<str::Utf8Error> for CubistError {
    fn from(e: str::Utf8Error) -> Self {
        CubistError::Utf8Error(e)
    }
}

impl Display for CubistError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CubistError::General(desc) => write!(f, "General error: {desc}"),
            CubistError::Internal(desc) => {
                write!(f, "Internal Cubist error: {desc}")
            }
            CubistError::Configuration(desc) => {
                write!(f, "Configuration error: {desc}")
            }
            CubistError::IoError(desc) => write!(f, "IO error: {desc}"),
            CubistError::Utf8Error(desc) => write!(f, "UTF-8 error: {desc}"),
        }
    }
}

impl Error for CubistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CubistError::IoError(e) => Some(e),
            CubistError::Utf8Error(e) => Some(e),
            _ => None,
        }
    }
}
