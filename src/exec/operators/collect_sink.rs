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
//! Sink that keeps every chunk it receives.
//!
//! Responsibilities:
//! - Appends input chunks to a shared handle that outlives the pipeline.
//! - Records whether the stream ended normally, so callers can tell a truncated result apart.
//!
//! Key exported interfaces:
//! - Types: `CollectHandle`, `CollectSink`.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::common::error::Result;
use crate::exec::chunk::{Chunk, Header};
use crate::exec::pipeline::operator::{Operator, SinkOperator};
use crate::runtime::runtime_state::RuntimeState;

#[derive(Debug, Default)]
struct Collected {
    chunks: Vec<Chunk>,
    finished: bool,
}

/// Shared view of what a `CollectSink` received.
#[derive(Clone, Debug, Default)]
pub struct CollectHandle {
    inner: Arc<Mutex<Collected>>,
}

impl CollectHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Collected> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        self.lock().chunks.clone()
    }

    pub fn take_chunks(&self) -> Vec<Chunk> {
        std::mem::take(&mut self.lock().chunks)
    }

    pub fn num_chunks(&self) -> usize {
        self.lock().chunks.len()
    }

    pub fn num_rows(&self) -> usize {
        self.lock().chunks.iter().map(Chunk::len).sum()
    }

    /// The sink saw end of stream.
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }
}

pub struct CollectSink {
    header: Header,
    handle: CollectHandle,
}

impl CollectSink {
    pub fn new(header: Header, handle: CollectHandle) -> Self {
        Self { header, handle }
    }
}

impl Operator for CollectSink {
    fn name(&self) -> &str {
        "CollectSink"
    }
}

impl SinkOperator for CollectSink {
    fn input_header(&self) -> &Header {
        &self.header
    }

    fn consume(&mut self, _state: &RuntimeState, chunk: Chunk) -> Result<()> {
        self.handle.lock().chunks.push(chunk);
        Ok(())
    }

    fn on_finish(&mut self, _state: &RuntimeState) -> Result<()> {
        self.handle.lock().finished = true;
        Ok(())
    }
}
