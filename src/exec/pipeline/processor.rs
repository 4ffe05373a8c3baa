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
//! Uniform processor contract seen by the executor, plus adapters for the operator variants.
//!
//! Responsibilities:
//! - `Processor`: ports, a pure `status()` query and a bounded `work()` unit.
//! - `SourceProcessor` / `TransformProcessor` / `SinkProcessor`: drive a variant operator
//!   through its ports so that operators only see chunks.
//!
//! Key exported interfaces:
//! - Types: `Processor`, `ProcessorStatus`, `Capability`, `SourceProcessor`,
//!   `TransformProcessor`, `SinkProcessor`.

use std::fmt;
use std::sync::Arc;

use crate::common::error::Result;
use crate::exec::pipeline::operator::{ProcessorOperator, SinkOperator, SourceOperator};
use crate::exec::pipeline::port::{InputPort, OutputPort};
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::runtime_state::RuntimeState;

/// What a processor needs next in order to make progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessorStatus {
    /// Waiting for an upstream chunk.
    NeedInput,
    /// Holds output, but the downstream port is occupied or not needed.
    OutputFull,
    /// `work()` can run now.
    Ready,
    /// Waiting on an external event; parked and polled by the executor.
    Waiting,
    /// Will never produce anything again.
    Finished,
}

/// Port-cardinality tag of a processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    Source,
    Transform,
    Sink,
    Multiplexer,
}

impl Capability {
    pub fn of(inputs: usize, outputs: usize) -> Self {
        match (inputs, outputs) {
            (0, _) => Capability::Source,
            (_, 0) => Capability::Sink,
            (1, 1) => Capability::Transform,
            _ => Capability::Multiplexer,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Source => "source",
            Capability::Transform => "transform",
            Capability::Sink => "sink",
            Capability::Multiplexer => "multiplexer",
        };
        f.write_str(s)
    }
}

/// A node of the pipeline graph.
///
/// `status()` must be free of side effects; every state change happens in `work()`.
/// A processor reports `Finished` only after finishing its outputs and closing (or draining)
/// its inputs.
pub trait Processor: Send {
    fn name(&self) -> &str;

    fn inputs(&self) -> &[InputPort];

    fn outputs(&self) -> &[OutputPort];

    fn inputs_mut(&mut self) -> &mut [InputPort];

    fn outputs_mut(&mut self) -> &mut [OutputPort];

    fn status(&self) -> ProcessorStatus;

    fn work(&mut self, state: &RuntimeState) -> Result<()>;

    /// Stop without producing anything more; ports are finished so neighbours wind down too.
    fn cancel(&mut self);

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        let _ = tracker;
    }

    fn capability(&self) -> Capability {
        Capability::of(self.inputs().len(), self.outputs().len())
    }
}

fn close_all(inputs: &mut [InputPort], outputs: &mut [OutputPort]) {
    for input in inputs {
        input.close();
    }
    for output in outputs {
        output.finish();
    }
}

/// Runs a `SourceOperator` behind one output port.
pub struct SourceProcessor<S: SourceOperator> {
    op: S,
    output: [OutputPort; 1],
    finished: bool,
}

impl<S: SourceOperator> SourceProcessor<S> {
    pub fn new(op: S) -> Self {
        let header = Arc::clone(op.output_header());
        Self {
            op,
            output: [OutputPort::new(header)],
            finished: false,
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.output[0].finish();
        self.finished = true;
        self.op.close()
    }
}

impl<S: SourceOperator> Processor for SourceProcessor<S> {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn inputs(&self) -> &[InputPort] {
        &[]
    }

    fn outputs(&self) -> &[OutputPort] {
        &self.output
    }

    fn inputs_mut(&mut self) -> &mut [InputPort] {
        &mut []
    }

    fn outputs_mut(&mut self) -> &mut [OutputPort] {
        &mut self.output
    }

    fn status(&self) -> ProcessorStatus {
        let output = &self.output[0];
        if self.finished {
            ProcessorStatus::Finished
        } else if output.is_finished() || self.op.is_finished() {
            ProcessorStatus::Ready
        } else if self.op.is_waiting() {
            ProcessorStatus::Waiting
        } else if output.can_push() && output.is_needed() {
            ProcessorStatus::Ready
        } else {
            ProcessorStatus::OutputFull
        }
    }

    fn work(&mut self, state: &RuntimeState) -> Result<()> {
        if self.output[0].is_finished() || self.op.is_finished() {
            return self.finish();
        }
        match self.op.generate(state)? {
            Some(chunk) if chunk.is_empty() => Ok(()),
            Some(chunk) => {
                self.output[0].push(chunk);
                Ok(())
            }
            None => self.finish(),
        }
    }

    fn cancel(&mut self) {
        self.op.cancel();
        close_all(&mut [], &mut self.output);
        self.finished = true;
    }

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.op.set_mem_tracker(tracker);
    }
}

/// Runs a `ProcessorOperator` between one input and one output port.
pub struct TransformProcessor<T: ProcessorOperator> {
    op: T,
    input: [InputPort; 1],
    output: [OutputPort; 1],
    finishing_sent: bool,
    finished: bool,
}

impl<T: ProcessorOperator> TransformProcessor<T> {
    pub fn new(op: T) -> Self {
        let input = InputPort::new(Arc::clone(op.input_header()));
        let output = OutputPort::new(Arc::clone(op.output_header()));
        Self {
            op,
            input: [input],
            output: [output],
            finishing_sent: false,
            finished: false,
        }
    }

    fn emit(&mut self, state: &RuntimeState) -> Result<()> {
        if !self.op.has_output() || !self.output[0].can_push() {
            return Ok(());
        }
        match self.op.pull_chunk(state)? {
            Some(chunk) if !chunk.is_empty() => self.output[0].push(chunk),
            _ => {}
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        close_all(&mut self.input, &mut self.output);
        self.finished = true;
        self.op.close()
    }
}

impl<T: ProcessorOperator> Processor for TransformProcessor<T> {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn inputs(&self) -> &[InputPort] {
        &self.input
    }

    fn outputs(&self) -> &[OutputPort] {
        &self.output
    }

    fn inputs_mut(&mut self) -> &mut [InputPort] {
        &mut self.input
    }

    fn outputs_mut(&mut self) -> &mut [OutputPort] {
        &mut self.output
    }

    fn status(&self) -> ProcessorStatus {
        let (input, output) = (&self.input[0], &self.output[0]);
        if self.finished {
            return ProcessorStatus::Finished;
        }
        if output.is_finished() {
            return ProcessorStatus::Ready;
        }
        if self.op.has_output() {
            return if output.can_push() {
                ProcessorStatus::Ready
            } else {
                ProcessorStatus::OutputFull
            };
        }
        if self.op.is_finished() || self.finishing_sent {
            return ProcessorStatus::Ready;
        }
        if input.has_data() && self.op.need_input() {
            return ProcessorStatus::Ready;
        }
        if input.is_finished() {
            return ProcessorStatus::Ready;
        }
        ProcessorStatus::NeedInput
    }

    fn work(&mut self, state: &RuntimeState) -> Result<()> {
        if self.output[0].is_finished() {
            return self.finish();
        }

        if self.op.has_output() {
            self.emit(state)?;
        } else if self.input[0].has_data() && self.op.need_input() {
            let chunk = self.input[0].pull();
            self.op.push_chunk(state, chunk)?;
            self.emit(state)?;
        } else if self.input[0].is_finished() && !self.finishing_sent {
            self.finishing_sent = true;
            self.op.set_finishing(state)?;
            self.emit(state)?;
        }

        if !self.op.has_output() && (self.op.is_finished() || self.finishing_sent) {
            return self.finish();
        }
        if self.op.input_closed_early() {
            self.input[0].close();
        }
        if self.op.need_input() {
            self.input[0].set_needed();
        } else {
            self.input[0].set_not_needed();
        }
        Ok(())
    }

    fn cancel(&mut self) {
        self.op.cancel();
        close_all(&mut self.input, &mut self.output);
        self.finished = true;
    }

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.op.set_mem_tracker(tracker);
    }
}

/// Runs a `SinkOperator` behind one input port.
pub struct SinkProcessor<K: SinkOperator> {
    op: K,
    input: [InputPort; 1],
    finished: bool,
}

impl<K: SinkOperator> SinkProcessor<K> {
    pub fn new(op: K) -> Self {
        let header = Arc::clone(op.input_header());
        Self {
            op,
            input: [InputPort::new(header)],
            finished: false,
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.input[0].close();
        self.finished = true;
        self.op.close()
    }
}

impl<K: SinkOperator> Processor for SinkProcessor<K> {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn inputs(&self) -> &[InputPort] {
        &self.input
    }

    fn outputs(&self) -> &[OutputPort] {
        &[]
    }

    fn inputs_mut(&mut self) -> &mut [InputPort] {
        &mut self.input
    }

    fn outputs_mut(&mut self) -> &mut [OutputPort] {
        &mut []
    }

    fn status(&self) -> ProcessorStatus {
        let input = &self.input[0];
        if self.finished {
            ProcessorStatus::Finished
        } else if self.op.is_finished() || input.has_data() || input.is_finished() {
            ProcessorStatus::Ready
        } else {
            ProcessorStatus::NeedInput
        }
    }

    fn work(&mut self, state: &RuntimeState) -> Result<()> {
        if !self.op.is_finished() {
            if self.input[0].has_data() {
                let chunk = self.input[0].pull();
                self.op.consume(state, chunk)?;
            } else if self.input[0].is_finished() {
                self.op.on_finish(state)?;
                return self.finish();
            }
        }
        if self.op.is_finished() {
            return self.finish();
        }
        self.input[0].set_needed();
        Ok(())
    }

    fn cancel(&mut self) {
        self.op.cancel();
        close_all(&mut self.input, &mut []);
        self.finished = true;
    }

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.op.set_mem_tracker(tracker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::Error;
    use crate::exec::chunk::{Chunk, Header};
    use crate::exec::pipeline::operator::Operator;
    use crate::exec::pipeline::port::connect;
    use arrow::array::UInt64Array;
    use arrow::datatypes::{DataType, Field, Schema};

    fn header() -> Header {
        Arc::new(Schema::new(vec![Field::new("n", DataType::UInt64, false)]))
    }

    fn chunk(v: u64) -> Chunk {
        Chunk::try_new(header(), vec![Arc::new(UInt64Array::from(vec![v]))], 1).expect("chunk")
    }

    struct Countdown {
        header: Header,
        left: u64,
    }

    impl Operator for Countdown {
        fn name(&self) -> &str {
            "Countdown"
        }
    }

    impl SourceOperator for Countdown {
        fn output_header(&self) -> &Header {
            &self.header
        }

        fn generate(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>> {
            if self.left == 0 {
                return Ok(None);
            }
            self.left -= 1;
            Ok(Some(chunk(self.left)))
        }
    }

    struct Pass {
        header: Header,
        pending: Option<Chunk>,
        finishing: bool,
    }

    impl Operator for Pass {
        fn name(&self) -> &str {
            "Pass"
        }

        fn is_finished(&self) -> bool {
            self.finishing && self.pending.is_none()
        }
    }

    impl ProcessorOperator for Pass {
        fn input_header(&self) -> &Header {
            &self.header
        }

        fn output_header(&self) -> &Header {
            &self.header
        }

        fn need_input(&self) -> bool {
            self.pending.is_none() && !self.finishing
        }

        fn has_output(&self) -> bool {
            self.pending.is_some()
        }

        fn push_chunk(&mut self, _state: &RuntimeState, chunk: Chunk) -> Result<()> {
            self.pending = Some(chunk);
            Ok(())
        }

        fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>> {
            Ok(self.pending.take())
        }

        fn set_finishing(&mut self, _state: &RuntimeState) -> Result<()> {
            self.finishing = true;
            Ok(())
        }
    }

    struct Reject {
        header: Header,
    }

    impl Operator for Reject {
        fn name(&self) -> &str {
            "Reject"
        }
    }

    impl SinkOperator for Reject {
        fn input_header(&self) -> &Header {
            &self.header
        }

        fn consume(&mut self, _state: &RuntimeState, _chunk: Chunk) -> Result<()> {
            Err(Error::Execution("rejected".to_string()))
        }
    }

    #[test]
    fn capability_follows_port_cardinality() {
        assert_eq!(Capability::of(0, 1), Capability::Source);
        assert_eq!(Capability::of(1, 0), Capability::Sink);
        assert_eq!(Capability::of(1, 1), Capability::Transform);
        assert_eq!(Capability::of(3, 1), Capability::Multiplexer);
    }

    #[test]
    fn source_stops_when_port_is_full() {
        let state = RuntimeState::default();
        let mut source = SourceProcessor::new(Countdown {
            header: header(),
            left: 2,
        });
        let mut input = InputPort::new(header());
        connect(&mut source.outputs_mut()[0], &mut input).unwrap();

        assert_eq!(source.status(), ProcessorStatus::Ready);
        source.work(&state).unwrap();
        assert_eq!(source.status(), ProcessorStatus::OutputFull);

        input.pull();
        assert_eq!(source.status(), ProcessorStatus::Ready);
        source.work(&state).unwrap();
        input.pull();
        source.work(&state).unwrap();
        assert_eq!(source.status(), ProcessorStatus::Finished);
        assert!(input.is_finished());
    }

    #[test]
    fn source_finishes_when_consumer_closes() {
        let state = RuntimeState::default();
        let mut source = SourceProcessor::new(Countdown {
            header: header(),
            left: 100,
        });
        let mut input = InputPort::new(header());
        connect(&mut source.outputs_mut()[0], &mut input).unwrap();
        input.close();
        assert_eq!(source.status(), ProcessorStatus::Ready);
        source.work(&state).unwrap();
        assert_eq!(source.status(), ProcessorStatus::Finished);
    }

    #[test]
    fn transform_moves_chunks_and_propagates_end_of_stream() {
        let state = RuntimeState::default();
        let mut upstream = OutputPort::new(header());
        let mut downstream = InputPort::new(header());
        let mut pass = TransformProcessor::new(Pass {
            header: header(),
            pending: None,
            finishing: false,
        });
        connect(&mut upstream, &mut pass.inputs_mut()[0]).unwrap();
        connect(&mut pass.outputs_mut()[0], &mut downstream).unwrap();

        assert_eq!(pass.status(), ProcessorStatus::NeedInput);
        upstream.push(chunk(5));
        assert_eq!(pass.status(), ProcessorStatus::Ready);
        pass.work(&state).unwrap();
        assert!(downstream.has_data());
        assert_eq!(pass.status(), ProcessorStatus::NeedInput);

        upstream.push(chunk(6));
        pass.work(&state).unwrap();
        assert_eq!(pass.status(), ProcessorStatus::OutputFull);

        downstream.pull();
        assert_eq!(pass.status(), ProcessorStatus::Ready);
        pass.work(&state).unwrap();
        downstream.pull();

        upstream.finish();
        assert_eq!(pass.status(), ProcessorStatus::Ready);
        pass.work(&state).unwrap();
        assert_eq!(pass.status(), ProcessorStatus::Finished);
        assert!(downstream.is_finished());
    }

    #[test]
    fn sink_surfaces_consume_errors() {
        let state = RuntimeState::default();
        let mut upstream = OutputPort::new(header());
        let mut sink = SinkProcessor::new(Reject { header: header() });
        connect(&mut upstream, &mut sink.inputs_mut()[0]).unwrap();
        upstream.push(chunk(1));
        let err = sink.work(&state).unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }

    #[test]
    fn cancel_finishes_ports() {
        let mut upstream = OutputPort::new(header());
        let mut sink = SinkProcessor::new(Reject { header: header() });
        connect(&mut upstream, &mut sink.inputs_mut()[0]).unwrap();
        sink.cancel();
        assert_eq!(sink.status(), ProcessorStatus::Finished);
        assert!(upstream.is_finished());
    }
}
