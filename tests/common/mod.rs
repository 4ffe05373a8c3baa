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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arrow::array::UInt64Array;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use columnflow::Result;
use columnflow::columnflow_logging;
use columnflow::exec::chunk::{Chunk, Header};
use columnflow::exec::operators::numbers_header;
use columnflow::exec::pipeline::operator::{Operator, SinkOperator, SourceOperator};
use columnflow::runtime::runtime_state::RuntimeState;

/// Quiet logging for test binaries; `RUST_LOG`-style filters are not consulted.
pub fn init_logging() {
    columnflow_logging::init_with_level("warn");
}

pub fn u64_chunk(values: Vec<u64>) -> Chunk {
    let rows = values.len();
    Chunk::try_new(numbers_header(), vec![Arc::new(UInt64Array::from(values))], rows)
        .expect("u64 chunk")
}

/// All values of the first column, in stream order.
pub fn u64_values(chunks: &[Chunk]) -> Vec<u64> {
    chunks
        .iter()
        .flat_map(|chunk| {
            chunk
                .batch
                .column(0)
                .as_any()
                .downcast_ref::<UInt64Array>()
                .expect("u64 column")
                .values()
                .to_vec()
        })
        .collect()
}

/// `0..total` shuffled with a fixed seed and cut into chunks of `chunk_rows`.
pub fn shuffled_chunks(total: u64, chunk_rows: usize, seed: u64) -> Vec<Chunk> {
    let mut values: Vec<u64> = (0..total).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    values.shuffle(&mut rng);
    values
        .chunks(chunk_rows)
        .map(|part| u64_chunk(part.to_vec()))
        .collect()
}

/// Source of one-row chunks that counts how many it produced; endless when `limit` is `None`.
pub struct CountingSource {
    header: Header,
    produced: Arc<AtomicUsize>,
    limit: Option<usize>,
}

impl CountingSource {
    pub fn new(limit: Option<usize>) -> (Self, Arc<AtomicUsize>) {
        let produced = Arc::new(AtomicUsize::new(0));
        let source = Self {
            header: numbers_header(),
            produced: Arc::clone(&produced),
            limit,
        };
        (source, produced)
    }
}

impl Operator for CountingSource {
    fn name(&self) -> &str {
        "CountingSource"
    }
}

impl SourceOperator for CountingSource {
    fn output_header(&self) -> &Header {
        &self.header
    }

    fn generate(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>> {
        let n = self.produced.load(Ordering::SeqCst);
        if self.limit.is_some_and(|limit| n >= limit) {
            return Ok(None);
        }
        self.produced.fetch_add(1, Ordering::SeqCst);
        Ok(Some(u64_chunk(vec![n as u64])))
    }
}

/// Sink that accepts chunks until `fail_at` (1-based) and errors on that one.
pub struct FailingSink {
    header: Header,
    fail_at: usize,
    calls: usize,
    delivered: Arc<AtomicUsize>,
}

impl FailingSink {
    pub fn new(fail_at: usize) -> (Self, Arc<AtomicUsize>) {
        let delivered = Arc::new(AtomicUsize::new(0));
        let sink = Self {
            header: numbers_header(),
            fail_at,
            calls: 0,
            delivered: Arc::clone(&delivered),
        };
        (sink, delivered)
    }
}

impl Operator for FailingSink {
    fn name(&self) -> &str {
        "FailingSink"
    }
}

impl SinkOperator for FailingSink {
    fn input_header(&self) -> &Header {
        &self.header
    }

    fn consume(&mut self, _state: &RuntimeState, _chunk: Chunk) -> Result<()> {
        self.calls += 1;
        if self.calls == self.fail_at {
            return Err(columnflow::Error::Execution(format!(
                "sink rejected chunk #{}",
                self.calls
            )));
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
