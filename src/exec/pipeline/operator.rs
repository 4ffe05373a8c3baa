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
//! Per-variant operator contracts.
//!
//! Responsibilities:
//! - Describes what a source, a one-in/one-out transform and a sink must implement.
//! - The adapters in `processor` map these contracts onto ports, so operators never touch
//!   ports themselves.
//!
//! Key exported interfaces:
//! - Types: `Operator`, `SourceOperator`, `ProcessorOperator`, `SinkOperator`.

use std::sync::Arc;

use crate::common::error::Result;
use crate::exec::chunk::{Chunk, Header};
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::runtime_state::RuntimeState;

/// Base contract shared by every operator.
pub trait Operator: Send {
    fn name(&self) -> &str;

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        let _ = tracker;
    }

    /// Called once when the operator finishes normally.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called instead of `close` when the query is cancelled; drop buffered state.
    fn cancel(&mut self) {}

    /// The operator will produce nothing more and wants no more input.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Produces chunks out of nothing.
pub trait SourceOperator: Operator {
    fn output_header(&self) -> &Header;

    /// `Ok(None)` ends the stream.
    fn generate(&mut self, state: &RuntimeState) -> Result<Option<Chunk>>;

    /// The next chunk depends on an external event; the executor parks the source instead of
    /// running it.
    fn is_waiting(&self) -> bool {
        false
    }
}

/// Push/pull stage with one input and one output.
pub trait ProcessorOperator: Operator {
    fn input_header(&self) -> &Header;

    fn output_header(&self) -> &Header;

    fn need_input(&self) -> bool;

    fn has_output(&self) -> bool;

    fn push_chunk(&mut self, state: &RuntimeState, chunk: Chunk) -> Result<()>;

    fn pull_chunk(&mut self, state: &RuntimeState) -> Result<Option<Chunk>>;

    /// Input is exhausted; flush whatever is buffered through `has_output`/`pull_chunk`.
    fn set_finishing(&mut self, state: &RuntimeState) -> Result<()>;

    /// The operator stopped accepting input before end of stream; the adapter closes the
    /// input port and finishes the operator with `set_finishing`.
    fn input_closed_early(&self) -> bool {
        false
    }
}

/// Consumes chunks.
pub trait SinkOperator: Operator {
    fn input_header(&self) -> &Header;

    fn consume(&mut self, state: &RuntimeState, chunk: Chunk) -> Result<()>;

    fn on_finish(&mut self, state: &RuntimeState) -> Result<()> {
        let _ = state;
        Ok(())
    }
}
