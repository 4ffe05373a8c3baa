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
//! Synthetic source of unsigned integers.
//!
//! Block `i` (for `i < count`) holds `i, i + count, i + 2 * count, ...`, `block_size` values in
//! total, in a single `UInt64` column named `number`. Taken together the blocks cover
//! `0..count * block_size` exactly once, interleaved so that no block is sorted relative to
//! another.
//!
//! `NumbersSource::contiguous` instead emits `0..rows` in order, `block_size` rows per block with
//! a shorter final block; table functions use this form.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arrow::array::UInt64Array;
use arrow::datatypes::{DataType, Field, Schema};

use crate::common::error::Result;
use crate::exec::chunk::{Chunk, Header};
use crate::exec::pipeline::operator::{Operator, SourceOperator};
use crate::runtime::runtime_state::RuntimeState;

pub fn numbers_header() -> Header {
    Arc::new(Schema::new(vec![Field::new(
        "number",
        DataType::UInt64,
        false,
    )]))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Layout {
    /// `count` blocks of `block_size` values with stride `count`.
    Interleaved { count: u64 },
    /// `0..rows` cut into consecutive blocks.
    Contiguous { rows: u64 },
}

pub struct NumbersSource {
    header: Header,
    layout: Layout,
    block_size: u64,
    /// Pause between two blocks; the source reports `Waiting` until it elapsed.
    delay: Duration,
    next_block: u64,
    ready_at: Option<Instant>,
}

impl NumbersSource {
    pub fn new(count: u64, block_size: u64) -> Self {
        Self::with_layout(Layout::Interleaved { count }, block_size)
    }

    /// `0..rows` in order; the last block holds the remainder. `block_size` must be positive.
    pub fn contiguous(rows: u64, block_size: u64) -> Self {
        Self::with_layout(Layout::Contiguous { rows }, block_size.max(1))
    }

    fn with_layout(layout: Layout, block_size: u64) -> Self {
        Self {
            header: numbers_header(),
            layout,
            block_size,
            delay: Duration::ZERO,
            next_block: 0,
            ready_at: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn total_rows(&self) -> u64 {
        match self.layout {
            Layout::Interleaved { count } => count.saturating_mul(self.block_size),
            Layout::Contiguous { rows } => rows,
        }
    }
}

impl Operator for NumbersSource {
    fn name(&self) -> &str {
        "NumbersSource"
    }
}

impl SourceOperator for NumbersSource {
    fn output_header(&self) -> &Header {
        &self.header
    }

    fn generate(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>> {
        let block = self.next_block;
        let values = match self.layout {
            Layout::Interleaved { count } => {
                if block >= count {
                    return Ok(None);
                }
                UInt64Array::from_iter_values((0..self.block_size).map(|j| block + j * count))
            }
            Layout::Contiguous { rows } => {
                let start = block.saturating_mul(self.block_size);
                if start >= rows {
                    return Ok(None);
                }
                UInt64Array::from_iter_values(start..rows.min(start + self.block_size))
            }
        };
        self.next_block += 1;
        if !self.delay.is_zero() {
            self.ready_at = Some(Instant::now() + self.delay);
        }
        let rows = values.len();
        Chunk::try_new(Arc::clone(&self.header), vec![Arc::new(values)], rows).map(Some)
    }

    fn is_waiting(&self) -> bool {
        self.ready_at.is_some_and(|at| Instant::now() < at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(chunk: &Chunk) -> Vec<u64> {
        let array = chunk
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<UInt64Array>()
            .unwrap();
        array.values().to_vec()
    }

    #[test]
    fn blocks_interleave_the_whole_range() {
        let state = RuntimeState::default();
        let mut source = NumbersSource::new(3, 4);
        assert_eq!(source.total_rows(), 12);
        let mut blocks = Vec::new();
        while let Some(chunk) = source.generate(&state).unwrap() {
            blocks.push(values(&chunk));
        }
        assert_eq!(
            blocks,
            vec![vec![0, 3, 6, 9], vec![1, 4, 7, 10], vec![2, 5, 8, 11]]
        );
        let mut all: Vec<u64> = blocks.concat();
        all.sort_unstable();
        assert_eq!(all, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn contiguous_blocks_end_with_the_remainder() {
        let state = RuntimeState::default();
        let mut source = NumbersSource::contiguous(10, 4);
        assert_eq!(source.total_rows(), 10);
        let mut blocks = Vec::new();
        while let Some(chunk) = source.generate(&state).unwrap() {
            blocks.push(values(&chunk));
        }
        assert_eq!(blocks, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);

        let mut empty = NumbersSource::contiguous(0, 4);
        assert!(empty.generate(&state).unwrap().is_none());
    }

    #[test]
    fn delay_reports_waiting_between_blocks() {
        let state = RuntimeState::default();
        let mut source = NumbersSource::new(2, 1).with_delay(Duration::from_millis(30));
        assert!(!source.is_waiting());
        source.generate(&state).unwrap();
        assert!(source.is_waiting());
        std::thread::sleep(Duration::from_millis(40));
        assert!(!source.is_waiting());
    }
}
