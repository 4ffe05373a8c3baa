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
//! Stable k-way merge of sorted chunk streams.
//!
//! Every input is a stream of chunks already sorted under the same description. A min-heap
//! holds the current key of each live input; ties break by input position, so with inputs
//! ordered by arrival the merge is stable.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef};
use arrow::compute::interleave;
use arrow::row::{OwnedRow, Rows};

use crate::common::error::Result;
use crate::exec::chunk::{Chunk, Header};
use crate::exec::operators::sort::sort_keys::SortKeyEncoder;
use crate::exec::spill::run_store::RunReader;

/// A sorted sequence of chunks.
pub trait SortedStream: Send {
    fn next_chunk(&mut self) -> Result<Option<Chunk>>;
}

impl SortedStream for RunReader {
    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        RunReader::next_chunk(self)
    }
}

/// In-memory stream over chunks that are sorted as a whole sequence.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    chunks: VecDeque<Chunk>,
}

impl ChunkQueue {
    pub fn single(chunk: Chunk) -> Self {
        Self {
            chunks: VecDeque::from([chunk]),
        }
    }
}

impl From<Vec<Chunk>> for ChunkQueue {
    fn from(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks: chunks.into(),
        }
    }
}

impl SortedStream for ChunkQueue {
    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        Ok(self.chunks.pop_front())
    }
}

#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    key: OwnedRow,
    input: usize,
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap pops the largest, the merge wants the smallest key and,
        // among equal keys, the earliest input.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.input.cmp(&self.input))
    }
}

struct Cursor {
    stream: Box<dyn SortedStream>,
    chunk: Chunk,
    rows: Rows,
    pos: usize,
    /// Position of `chunk` in the block being assembled, once a row of it was picked.
    block_slot: Option<usize>,
}

impl Cursor {
    /// Load the next non-empty chunk; `None` once the stream is exhausted.
    fn open(mut stream: Box<dyn SortedStream>, encoder: &SortKeyEncoder) -> Result<Option<Self>> {
        while let Some(chunk) = stream.next_chunk()? {
            if chunk.is_empty() {
                continue;
            }
            let rows = encoder.encode(&chunk)?;
            return Ok(Some(Self {
                stream,
                chunk,
                rows,
                pos: 0,
                block_slot: None,
            }));
        }
        Ok(None)
    }

    fn key(&self) -> OwnedRow {
        self.rows.row(self.pos).owned()
    }
}

/// Merges sorted inputs into blocks of at most `max_block_rows` rows, stopping after `limit`
/// rows when `limit > 0`.
pub struct SortedChunksMerger {
    header: Header,
    encoder: Arc<SortKeyEncoder>,
    cursors: Vec<Option<Cursor>>,
    heap: BinaryHeap<HeapEntry>,
    max_block_rows: usize,
    limit: usize,
    emitted: usize,
}

impl SortedChunksMerger {
    pub fn new(
        header: Header,
        encoder: Arc<SortKeyEncoder>,
        inputs: Vec<Box<dyn SortedStream>>,
        max_block_rows: usize,
        limit: usize,
    ) -> Result<Self> {
        let mut cursors = Vec::with_capacity(inputs.len());
        let mut heap = BinaryHeap::with_capacity(inputs.len());
        for (input, stream) in inputs.into_iter().enumerate() {
            let cursor = Cursor::open(stream, &encoder)?;
            if let Some(cursor) = cursor.as_ref() {
                heap.push(HeapEntry {
                    key: cursor.key(),
                    input,
                });
            }
            cursors.push(cursor);
        }
        Ok(Self {
            header,
            encoder,
            cursors,
            heap,
            max_block_rows: max_block_rows.max(1),
            limit,
            emitted: 0,
        })
    }

    pub fn rows_emitted(&self) -> usize {
        self.emitted
    }

    pub fn is_exhausted(&self) -> bool {
        self.heap.is_empty() || (self.limit > 0 && self.emitted >= self.limit)
    }

    /// Next merged block, `None` when every input is drained or the limit was reached.
    pub fn next_block(&mut self) -> Result<Option<Chunk>> {
        if self.is_exhausted() {
            return Ok(None);
        }
        let mut budget = self.max_block_rows;
        if self.limit > 0 {
            budget = budget.min(self.limit - self.emitted);
        }

        let mut block_chunks: Vec<Chunk> = Vec::new();
        let mut picks: Vec<(usize, usize)> = Vec::with_capacity(budget);
        while picks.len() < budget {
            let Some(top) = self.heap.pop() else {
                break;
            };
            let input = top.input;
            let Some(cursor) = self.cursors[input].as_mut() else {
                continue;
            };
            let slot = match cursor.block_slot {
                Some(slot) => slot,
                None => {
                    block_chunks.push(cursor.chunk.clone());
                    let slot = block_chunks.len() - 1;
                    cursor.block_slot = Some(slot);
                    slot
                }
            };
            picks.push((slot, cursor.pos));
            cursor.pos += 1;

            if cursor.pos < cursor.chunk.len() {
                self.heap.push(HeapEntry {
                    key: cursor.key(),
                    input,
                });
                continue;
            }
            // Current chunk drained: move the cursor to the next chunk of its stream.
            if let Some(cursor) = self.cursors[input].take() {
                let next = Cursor::open(cursor.stream, &self.encoder)?;
                if let Some(next) = next.as_ref() {
                    self.heap.push(HeapEntry {
                        key: next.key(),
                        input,
                    });
                }
                self.cursors[input] = next;
            }
        }
        for cursor in self.cursors.iter_mut().flatten() {
            cursor.block_slot = None;
        }

        if picks.is_empty() {
            return Ok(None);
        }
        self.emitted += picks.len();
        let num_columns = self.header.fields().len();
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(num_columns);
        for col in 0..num_columns {
            let sources = block_chunks
                .iter()
                .map(|chunk| chunk.column(col).map(|c| c.as_ref()))
                .collect::<Result<Vec<&dyn Array>>>()?;
            columns.push(interleave(&sources, &picks)?);
        }
        let rows = picks.len();
        Chunk::try_new(Arc::clone(&self.header), columns, rows).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::operators::sort::SortColumnDescription;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    fn header() -> Header {
        Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int64, false),
            Field::new("tag", DataType::Utf8, false),
        ]))
    }

    fn chunk(keys: &[i64], tag: &str) -> Chunk {
        Chunk::try_new(
            header(),
            vec![
                Arc::new(Int64Array::from(keys.to_vec())),
                Arc::new(StringArray::from_iter_values(
                    keys.iter().map(|_| tag.to_string()),
                )),
            ],
            keys.len(),
        )
        .expect("chunk")
    }

    fn encoder() -> Arc<SortKeyEncoder> {
        Arc::new(SortKeyEncoder::new(&header(), &[SortColumnDescription::asc("k")]).unwrap())
    }

    fn drain(merger: &mut SortedChunksMerger) -> (Vec<i64>, Vec<String>, Vec<usize>) {
        let (mut keys, mut tags, mut sizes) = (Vec::new(), Vec::new(), Vec::new());
        while let Some(block) = merger.next_block().unwrap() {
            sizes.push(block.len());
            let k = block.batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
            let t = block.batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
            keys.extend(k.values().iter().copied());
            tags.extend(t.iter().map(|v| v.unwrap_or_default().to_string()));
        }
        (keys, tags, sizes)
    }

    #[test]
    fn merges_streams_into_bounded_blocks() {
        let inputs: Vec<Box<dyn SortedStream>> = vec![
            Box::new(ChunkQueue::from(vec![chunk(&[1, 4], "a"), chunk(&[7, 9], "a")])),
            Box::new(ChunkQueue::from(vec![chunk(&[], "b"), chunk(&[2, 3, 8], "b")])),
            Box::new(ChunkQueue::default()),
        ];
        let mut merger = SortedChunksMerger::new(header(), encoder(), inputs, 3, 0).unwrap();
        let (keys, _, sizes) = drain(&mut merger);
        assert_eq!(keys, vec![1, 2, 3, 4, 7, 8, 9]);
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(merger.rows_emitted(), 7);
    }

    #[test]
    fn equal_keys_come_out_in_input_order() {
        let inputs: Vec<Box<dyn SortedStream>> = vec![
            Box::new(ChunkQueue::single(chunk(&[1, 1, 2], "first"))),
            Box::new(ChunkQueue::single(chunk(&[1, 2], "second"))),
            Box::new(ChunkQueue::single(chunk(&[1], "third"))),
        ];
        let mut merger = SortedChunksMerger::new(header(), encoder(), inputs, 100, 0).unwrap();
        let (keys, tags, _) = drain(&mut merger);
        assert_eq!(keys, vec![1, 1, 1, 1, 2, 2]);
        assert_eq!(
            tags,
            vec!["first", "first", "second", "third", "first", "second"]
        );
    }

    #[test]
    fn stops_at_limit() {
        let inputs: Vec<Box<dyn SortedStream>> = vec![
            Box::new(ChunkQueue::single(chunk(&[0, 2, 4, 6], "a"))),
            Box::new(ChunkQueue::single(chunk(&[1, 3, 5, 7], "b"))),
        ];
        let mut merger = SortedChunksMerger::new(header(), encoder(), inputs, 2, 5).unwrap();
        let (keys, _, sizes) = drain(&mut merger);
        assert_eq!(keys, vec![0, 1, 2, 3, 4]);
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(merger.is_exhausted());
    }
}
