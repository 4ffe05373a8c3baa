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
//! Row window transform for LIMIT/OFFSET.
//!
//! Responsibilities:
//! - Skips the first `offset` rows, then passes at most `limit` rows.
//! - Closes its input as soon as the window is complete, so upstream stops producing.
//!
//! Key exported interfaces:
//! - Types: `LimitTransform`.

use std::sync::Arc;

use crate::common::error::{Error, Result};
use crate::exec::chunk::{Chunk, Header};
use crate::exec::pipeline::operator::{Operator, ProcessorOperator};
use crate::runtime::runtime_state::RuntimeState;

pub struct LimitTransform {
    header: Header,
    remaining_offset: usize,
    /// `None` passes everything after the offset.
    remaining_limit: Option<usize>,
    pending_output: Option<Chunk>,
    finishing: bool,
}

impl LimitTransform {
    pub fn new(header: Header, limit: Option<usize>, offset: usize) -> Self {
        Self {
            header,
            remaining_offset: offset,
            remaining_limit: limit,
            pending_output: None,
            finishing: false,
        }
    }

    fn exhausted(&self) -> bool {
        self.remaining_limit == Some(0)
    }
}

impl Operator for LimitTransform {
    fn name(&self) -> &str {
        "LimitTransform"
    }

    fn cancel(&mut self) {
        self.pending_output = None;
    }

    fn is_finished(&self) -> bool {
        self.pending_output.is_none() && (self.exhausted() || self.finishing)
    }
}

impl ProcessorOperator for LimitTransform {
    fn input_header(&self) -> &Header {
        &self.header
    }

    fn output_header(&self) -> &Header {
        &self.header
    }

    fn need_input(&self) -> bool {
        !self.finishing && !self.exhausted() && self.pending_output.is_none()
    }

    fn has_output(&self) -> bool {
        self.pending_output.is_some()
    }

    fn input_closed_early(&self) -> bool {
        self.exhausted()
    }

    fn push_chunk(&mut self, _state: &RuntimeState, chunk: Chunk) -> Result<()> {
        if self.exhausted() || chunk.is_empty() {
            return Ok(());
        }
        if self.pending_output.is_some() {
            return Err(Error::Execution(
                "limit received input while output buffer is full".to_string(),
            ));
        }
        let rows = chunk.len();
        let skip = self.remaining_offset.min(rows);
        self.remaining_offset -= skip;

        let available = rows - skip;
        let take = match self.remaining_limit.as_mut() {
            Some(remaining) => {
                let take = (*remaining).min(available);
                *remaining -= take;
                take
            }
            None => available,
        };
        if take == rows {
            self.pending_output = Some(chunk);
        } else if take > 0 {
            self.pending_output = Some(chunk.slice(skip, take));
        }
        Ok(())
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>> {
        Ok(self.pending_output.take())
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<()> {
        self.finishing = true;
        Ok(())
    }
}

impl LimitTransform {
    /// Convenience for building the header from an upstream processor's output.
    pub fn after(upstream: &Header, limit: Option<usize>, offset: usize) -> Self {
        Self::new(Arc::clone(upstream), limit, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};

    fn header() -> Header {
        Arc::new(Schema::new(vec![Field::new("k", DataType::Int32, false)]))
    }

    fn make_chunk(start: i32, rows: usize) -> Chunk {
        let keys = Int32Array::from_iter_values((0..rows as i32).map(|i| start + i));
        Chunk::try_new(header(), vec![Arc::new(keys)], rows).expect("chunk")
    }

    fn chunk_values(chunk: &Chunk) -> Vec<i32> {
        let arr = chunk
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .expect("int32 column");
        arr.values().to_vec()
    }

    #[test]
    fn applies_offset_then_limit() {
        let state = RuntimeState::default();
        let mut op = LimitTransform::new(header(), Some(4), 3);

        op.push_chunk(&state, make_chunk(0, 5)).unwrap();
        let out1 = op.pull_chunk(&state).unwrap().expect("chunk #1");
        assert_eq!(chunk_values(&out1), vec![3, 4]);
        assert!(op.need_input());

        op.push_chunk(&state, make_chunk(5, 5)).unwrap();
        assert!(op.input_closed_early());
        assert!(!op.is_finished());
        let out2 = op.pull_chunk(&state).unwrap().expect("chunk #2");
        assert_eq!(chunk_values(&out2), vec![5, 6]);

        assert!(op.is_finished());
        assert!(!op.need_input());
    }

    #[test]
    fn supports_offset_only() {
        let state = RuntimeState::default();
        let mut op = LimitTransform::after(&header(), None, 2);

        op.push_chunk(&state, make_chunk(0, 3)).unwrap();
        let out1 = op.pull_chunk(&state).unwrap().expect("chunk #1");
        assert_eq!(chunk_values(&out1), vec![2]);

        op.push_chunk(&state, make_chunk(3, 2)).unwrap();
        let out2 = op.pull_chunk(&state).unwrap().expect("chunk #2");
        assert_eq!(chunk_values(&out2), vec![3, 4]);
        assert!(!op.is_finished());
        assert!(!op.input_closed_early());

        op.set_finishing(&state).unwrap();
        assert!(op.is_finished());
    }

    #[test]
    fn zero_limit_closes_input_immediately() {
        let op = LimitTransform::new(header(), Some(0), 0);
        assert!(op.input_closed_early());
        assert!(op.is_finished());
    }
}
