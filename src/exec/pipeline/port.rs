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
//! Single-slot ports connecting processors.
//!
//! Responsibilities:
//! - Carries at most one chunk from one producer to one consumer, in write order.
//! - Signals "needed" (consumer wants data) and "finished" (no more data either way).
//!
//! Key exported interfaces:
//! - Types: `InputPort`, `OutputPort`.
//! - Functions: `connect`.
//!
//! A producer may only push after observing `can_push()`; pushing into an occupied or finished
//! port is a contract violation and panics. The one-chunk slot is the only buffer between two
//! processors, which is what gives the pipeline its backpressure.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::common::error::{Error, Result};
use crate::exec::chunk::{Chunk, Header, describe_header, headers_compatible};

#[derive(Debug)]
struct PortState {
    chunk: Option<Chunk>,
    needed: bool,
    finished: bool,
}

#[derive(Debug)]
pub(crate) struct PortShared {
    state: Mutex<PortState>,
}

impl PortShared {
    fn lock(&self) -> MutexGuard<'_, PortState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Consumer end of a connection.
#[derive(Debug)]
pub struct InputPort {
    header: Header,
    shared: Option<Arc<PortShared>>,
}

/// Producer end of a connection.
#[derive(Debug)]
pub struct OutputPort {
    header: Header,
    shared: Option<Arc<PortShared>>,
}

/// Connect `output` to `input`. Headers must agree on column count and column types.
pub fn connect(output: &mut OutputPort, input: &mut InputPort) -> Result<()> {
    if output.shared.is_some() {
        return Err(Error::InvalidGraph(
            "output port is already connected".to_string(),
        ));
    }
    if input.shared.is_some() {
        return Err(Error::InvalidGraph(
            "input port is already connected".to_string(),
        ));
    }
    if !headers_compatible(&output.header, &input.header) {
        return Err(Error::SchemaMismatch(format!(
            "cannot connect output {} to input {}",
            describe_header(&output.header),
            describe_header(&input.header)
        )));
    }
    let shared = Arc::new(PortShared {
        state: Mutex::new(PortState {
            chunk: None,
            needed: true,
            finished: false,
        }),
    });
    output.shared = Some(Arc::clone(&shared));
    input.shared = Some(shared);
    Ok(())
}

impl InputPort {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            shared: None,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_some()
    }

    pub fn has_data(&self) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|s| s.lock().chunk.is_some())
    }

    /// No chunk pending and none will ever arrive.
    pub fn is_finished(&self) -> bool {
        match self.shared.as_ref() {
            Some(shared) => {
                let state = shared.lock();
                state.finished && state.chunk.is_none()
            }
            None => true,
        }
    }

    /// Take the pending chunk. Callers check `has_data()` first.
    pub fn pull(&mut self) -> Chunk {
        let shared = self
            .shared
            .as_ref()
            .unwrap_or_else(|| panic!("pull from an unconnected input port"));
        shared
            .lock()
            .chunk
            .take()
            .unwrap_or_else(|| panic!("pull from an empty input port"))
    }

    pub fn set_needed(&self) {
        if let Some(shared) = self.shared.as_ref() {
            let mut state = shared.lock();
            if !state.finished {
                state.needed = true;
            }
        }
    }

    pub fn set_not_needed(&self) {
        if let Some(shared) = self.shared.as_ref() {
            shared.lock().needed = false;
        }
    }

    /// The consumer gives up on this input: drops any pending chunk and finishes the port,
    /// so the producer stops.
    pub fn close(&mut self) {
        if let Some(shared) = self.shared.as_ref() {
            let mut state = shared.lock();
            state.chunk = None;
            state.needed = false;
            state.finished = true;
        }
    }
}

impl OutputPort {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            shared: None,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_some()
    }

    /// Empty and not finished.
    pub fn can_push(&self) -> bool {
        self.shared.as_ref().is_some_and(|s| {
            let state = s.lock();
            state.chunk.is_none() && !state.finished
        })
    }

    pub fn is_needed(&self) -> bool {
        self.shared.as_ref().is_some_and(|s| s.lock().needed)
    }

    /// Finished by either side; nothing more can be pushed.
    pub fn is_finished(&self) -> bool {
        self.shared.as_ref().is_none_or(|s| s.lock().finished)
    }

    pub fn push(&mut self, chunk: Chunk) {
        let shared = self
            .shared
            .as_ref()
            .unwrap_or_else(|| panic!("push into an unconnected output port"));
        let mut state = shared.lock();
        assert!(!state.finished, "push into a finished port");
        assert!(state.chunk.is_none(), "push into a port that still holds a chunk");
        debug_assert_eq!(chunk.num_columns(), self.header.fields().len());
        state.chunk = Some(chunk);
    }

    /// Irreversible. A chunk already in the port stays readable.
    pub fn finish(&mut self) {
        if let Some(shared) = self.shared.as_ref() {
            shared.lock().finished = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::UInt64Array;
    use arrow::datatypes::{DataType, Field, Schema};

    fn header(data_type: DataType) -> Header {
        Arc::new(Schema::new(vec![Field::new("number", data_type, false)]))
    }

    fn chunk(values: Vec<u64>) -> Chunk {
        let rows = values.len();
        Chunk::try_new(
            header(DataType::UInt64),
            vec![Arc::new(UInt64Array::from(values))],
            rows,
        )
        .expect("chunk")
    }

    fn connected() -> (OutputPort, InputPort) {
        let mut output = OutputPort::new(header(DataType::UInt64));
        let mut input = InputPort::new(header(DataType::UInt64));
        connect(&mut output, &mut input).expect("connect");
        (output, input)
    }

    #[test]
    fn connect_rejects_type_mismatch() {
        let mut output = OutputPort::new(header(DataType::UInt64));
        let mut input = InputPort::new(header(DataType::Utf8));
        let err = connect(&mut output, &mut input).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)), "err={err}");
        assert!(!output.is_connected());
        assert!(!input.is_connected());
    }

    #[test]
    fn connect_rejects_second_connection() {
        let (mut output, _input) = connected();
        let mut other = InputPort::new(header(DataType::UInt64));
        let err = connect(&mut output, &mut other).unwrap_err();
        assert!(matches!(err, Error::InvalidGraph(_)), "err={err}");
    }

    #[test]
    fn single_slot_blocks_producer_until_drained() {
        let (mut output, mut input) = connected();
        assert!(output.can_push());
        assert!(output.is_needed());
        output.push(chunk(vec![1, 2]));
        assert!(!output.can_push());
        assert!(input.has_data());

        let pulled = input.pull();
        assert_eq!(pulled.len(), 2);
        assert!(output.can_push());
    }

    #[test]
    fn finish_keeps_pending_chunk_readable() {
        let (mut output, mut input) = connected();
        output.push(chunk(vec![7]));
        output.finish();
        assert!(!input.is_finished());
        assert!(input.has_data());
        input.pull();
        assert!(input.is_finished());
        assert!(!output.can_push());
    }

    #[test]
    fn close_from_consumer_finishes_producer_side() {
        let (mut output, mut input) = connected();
        output.push(chunk(vec![1]));
        input.close();
        assert!(output.is_finished());
        assert!(!output.is_needed());
        assert!(!input.has_data());
        input.set_needed();
        assert!(!output.is_needed());
    }

    #[test]
    #[should_panic(expected = "still holds a chunk")]
    fn pushing_into_full_port_panics() {
        let (mut output, _input) = connected();
        output.push(chunk(vec![1]));
        output.push(chunk(vec![2]));
    }
}
