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
//! Error taxonomy shared by the pipeline, the sort transform and the settings table.
//!
//! Classification:
//! - [`Error::SchemaMismatch`] / [`Error::InvalidGraph`]: rejected while the graph is built,
//!   before anything executes.
//! - [`Error::LimitExceeded`]: a size limit configured with overflow mode `throw` was crossed.
//! - [`Error::Spill`]: a temporary run could not be created, written or read back.
//! - [`Error::Execution`] / [`Error::PipelineStuck`] / [`Error::Cancelled`]: terminal executor
//!   outcomes, surfaced once all in-flight work units have drained.

use arrow::error::ArrowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Two connected ports disagree on column count or column types.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Dangling ports, double connections, cycles, bad processor ids.
    #[error("invalid pipeline graph: {0}")]
    InvalidGraph(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("unknown setting: {0}")]
    UnknownSetting(String),

    #[error("invalid setting value: {0}")]
    InvalidSetting(String),

    #[error("spill storage error: {0}")]
    Spill(String),

    /// Failure raised inside a processor work unit, including caught panics.
    #[error("execution error: {0}")]
    Execution(String),

    /// No processor can make progress although some are not finished.
    #[error("pipeline stuck: {0}")]
    PipelineStuck(String),

    #[error("query was cancelled")]
    Cancelled,

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
