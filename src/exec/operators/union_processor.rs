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
//! N-to-1 multiplexer.
//!
//! Forwards chunks from any input to the single output, visiting inputs round-robin so one busy
//! producer cannot starve the others. The output ends once every input is finished; if the
//! consumer closes the output, every input is closed in turn.

use std::sync::Arc;

use crate::common::error::{Error, Result};
use crate::exec::chunk::Header;
use crate::exec::pipeline::port::{InputPort, OutputPort};
use crate::exec::pipeline::processor::{Processor, ProcessorStatus};
use crate::runtime::runtime_state::RuntimeState;

pub struct UnionProcessor {
    inputs: Vec<InputPort>,
    output: [OutputPort; 1],
    /// Next input to look at.
    cursor: usize,
    finished: bool,
}

impl UnionProcessor {
    pub fn new(header: Header, num_inputs: usize) -> Result<Self> {
        if num_inputs == 0 {
            return Err(Error::InvalidGraph(
                "union needs at least one input".to_string(),
            ));
        }
        let inputs = (0..num_inputs)
            .map(|_| InputPort::new(Arc::clone(&header)))
            .collect();
        Ok(Self {
            inputs,
            output: [OutputPort::new(header)],
            cursor: 0,
            finished: false,
        })
    }

    fn next_with_data(&self) -> Option<usize> {
        let n = self.inputs.len();
        (0..n)
            .map(|step| (self.cursor + step) % n)
            .find(|&idx| self.inputs[idx].has_data())
    }

    fn finish(&mut self) {
        for input in &mut self.inputs {
            input.close();
        }
        self.output[0].finish();
        self.finished = true;
    }
}

impl Processor for UnionProcessor {
    fn name(&self) -> &str {
        "UnionProcessor"
    }

    fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputPort] {
        &self.output
    }

    fn inputs_mut(&mut self) -> &mut [InputPort] {
        &mut self.inputs
    }

    fn outputs_mut(&mut self) -> &mut [OutputPort] {
        &mut self.output
    }

    fn status(&self) -> ProcessorStatus {
        let output = &self.output[0];
        if self.finished {
            return ProcessorStatus::Finished;
        }
        if output.is_finished() || self.inputs.iter().all(InputPort::is_finished) {
            return ProcessorStatus::Ready;
        }
        if self.next_with_data().is_none() {
            return ProcessorStatus::NeedInput;
        }
        if output.can_push() {
            ProcessorStatus::Ready
        } else {
            ProcessorStatus::OutputFull
        }
    }

    fn work(&mut self, _state: &RuntimeState) -> Result<()> {
        if self.output[0].is_finished() {
            self.finish();
            return Ok(());
        }
        if self.output[0].can_push() {
            if let Some(idx) = self.next_with_data() {
                let chunk = self.inputs[idx].pull();
                if !chunk.is_empty() {
                    self.output[0].push(chunk);
                }
                self.cursor = (idx + 1) % self.inputs.len();
            }
        }
        if self.inputs.iter().all(InputPort::is_finished) {
            self.finish();
        }
        Ok(())
    }

    fn cancel(&mut self) {
        self.finish();
    }
}
