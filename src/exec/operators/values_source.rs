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
//! Source over a fixed list of chunks.

use std::collections::VecDeque;

use crate::common::error::{Error, Result};
use crate::exec::chunk::{Chunk, Header, describe_header, headers_compatible};
use crate::exec::pipeline::operator::{Operator, SourceOperator};
use crate::runtime::runtime_state::RuntimeState;

/// Emits the given chunks in order, then ends the stream.
pub struct ValuesSource {
    header: Header,
    chunks: VecDeque<Chunk>,
}

impl ValuesSource {
    /// Every chunk must match `header`.
    pub fn new(header: Header, chunks: Vec<Chunk>) -> Result<Self> {
        for chunk in &chunks {
            let schema = chunk.schema();
            if !headers_compatible(&schema, &header) {
                return Err(Error::SchemaMismatch(format!(
                    "values chunk {} does not match header {}",
                    describe_header(&schema),
                    describe_header(&header)
                )));
            }
        }
        Ok(Self {
            header,
            chunks: chunks.into(),
        })
    }

    /// Header taken from the first chunk.
    pub fn from_chunks(chunks: Vec<Chunk>) -> Result<Self> {
        let header = chunks
            .first()
            .map(Chunk::schema)
            .ok_or_else(|| Error::InvalidGraph("values source needs at least one chunk".into()))?;
        Self::new(header, chunks)
    }
}

impl Operator for ValuesSource {
    fn name(&self) -> &str {
        "ValuesSource"
    }

    fn cancel(&mut self) {
        self.chunks.clear();
    }
}

impl SourceOperator for ValuesSource {
    fn output_header(&self) -> &Header {
        &self.header
    }

    fn generate(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>> {
        Ok(self.chunks.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use arrow::array::{Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    fn int_chunk(values: Vec<i32>) -> Chunk {
        let header = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
        let rows = values.len();
        Chunk::try_new(header, vec![Arc::new(Int32Array::from(values))], rows).unwrap()
    }

    #[test]
    fn emits_chunks_in_order() {
        let state = RuntimeState::default();
        let mut source = ValuesSource::from_chunks(vec![int_chunk(vec![1]), int_chunk(vec![2, 3])])
            .unwrap();
        assert_eq!(source.generate(&state).unwrap().unwrap().len(), 1);
        assert_eq!(source.generate(&state).unwrap().unwrap().len(), 2);
        assert!(source.generate(&state).unwrap().is_none());
    }

    #[test]
    fn rejects_mismatched_chunks() {
        let other = Arc::new(Schema::new(vec![Field::new("s", DataType::Utf8, false)]));
        let strings =
            Chunk::try_new(Arc::clone(&other), vec![Arc::new(StringArray::from(vec!["x"]))], 1)
                .unwrap();
        let err = ValuesSource::from_chunks(vec![int_chunk(vec![1]), strings]).err();
        assert!(matches!(err, Some(Error::SchemaMismatch(_))));
        assert!(ValuesSource::from_chunks(Vec::new()).is_err());
    }
}
