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
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use arrow::array::{ArrayRef, RecordBatch, RecordBatchOptions};
use arrow::buffer::Buffer;
use arrow::datatypes::{Schema, SchemaRef};

use crate::common::error::{Error, Result};
use crate::runtime::mem_tracker::MemTracker;

/// Schema of a port: ordered (name, type) columns, position given by order.
pub type Header = SchemaRef;

/// Ports are compatible when they agree on column count and per-position data types.
/// Names and nullability are not compared.
pub fn headers_compatible(output: &Schema, input: &Schema) -> bool {
    output.fields().len() == input.fields().len()
        && output
            .fields()
            .iter()
            .zip(input.fields().iter())
            .all(|(a, b)| a.data_type().equals_datatype(b.data_type()))
}

pub fn describe_header(header: &Schema) -> String {
    let columns: Vec<String> = header
        .fields()
        .iter()
        .map(|f| format!("{} {}", f.name(), f.data_type()))
        .collect();
    format!("[{}]", columns.join(", "))
}

/// A batch of rows travelling between processors.
///
/// Wraps an arrow `RecordBatch`; moving a chunk through a port moves ownership. Optional memory
/// accounting follows the chunk to whichever tracker it was last transferred to.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub batch: RecordBatch,
    accounting: Option<Arc<ChunkAccounting>>,
}

impl Chunk {
    pub fn new(batch: RecordBatch) -> Self {
        Self {
            batch,
            accounting: None,
        }
    }

    /// Build a chunk for `header` from columns that must all be `rows` long.
    pub fn try_new(header: Header, columns: Vec<ArrayRef>, rows: usize) -> Result<Self> {
        let options = RecordBatchOptions::new().with_row_count(Some(rows));
        let batch = RecordBatch::try_new_with_options(header, columns, &options)?;
        Ok(Self::new(batch))
    }

    pub fn empty(header: Header) -> Self {
        Self::new(RecordBatch::new_empty(header))
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn column(&self, idx: usize) -> Result<&ArrayRef> {
        self.batch.columns().get(idx).ok_or_else(|| {
            Error::SchemaMismatch(format!(
                "column {idx} out of range for chunk with {} columns",
                self.batch.num_columns()
            ))
        })
    }

    /// Zero-copy view; the slice is charged to the same tracker as the source.
    pub fn slice(&self, offset: usize, length: usize) -> Self {
        let mut out = Self::new(self.batch.slice(offset, length));
        if let Some(accounting) = self.accounting.as_ref() {
            let tracker = accounting.tracker();
            out.transfer_to(&tracker);
        }
        out
    }

    /// Allocated size of every buffer reachable from the batch.
    pub fn estimated_bytes(&self) -> usize {
        self.batch.get_array_memory_size()
    }

    /// Size of the distinct buffers actually referenced by this batch.
    pub fn logical_bytes(&self) -> usize {
        record_batch_bytes(&self.batch)
    }

    /// Charge the chunk to `tracker`, releasing it from its previous holder.
    pub fn transfer_to(&mut self, tracker: &Arc<MemTracker>) {
        if let Some(accounting) = self.accounting.as_ref() {
            accounting.transfer_to(tracker);
            return;
        }
        let bytes = i64::try_from(self.logical_bytes()).unwrap_or(i64::MAX);
        if bytes <= 0 {
            return;
        }
        self.accounting = Some(Arc::new(ChunkAccounting::new(bytes, tracker)));
    }
}

/// Sum unique buffer capacities inside one batch.
///
/// Buffers shared across batches (slices of one parent) are counted once per batch.
pub fn record_batch_bytes(batch: &RecordBatch) -> usize {
    let mut seen = HashSet::new();
    batch
        .columns()
        .iter()
        .map(|column| array_data_bytes(&column.to_data(), &mut seen))
        .fold(0usize, usize::saturating_add)
}

fn array_data_bytes(data: &arrow::array::ArrayData, seen: &mut HashSet<usize>) -> usize {
    let mut total = 0usize;
    for buffer in data.buffers() {
        total = total.saturating_add(buffer_bytes(buffer, seen));
    }
    if let Some(nulls) = data.nulls() {
        total = total.saturating_add(buffer_bytes(nulls.buffer(), seen));
    }
    for child in data.child_data() {
        total = total.saturating_add(array_data_bytes(child, seen));
    }
    total
}

fn buffer_bytes(buffer: &Buffer, seen: &mut HashSet<usize>) -> usize {
    let ptr = buffer.data_ptr().as_ptr() as usize;
    if !seen.insert(ptr) {
        return 0;
    }
    buffer.capacity().max(buffer.len())
}

#[derive(Debug)]
struct ChunkAccounting {
    bytes: i64,
    tracker: Mutex<Arc<MemTracker>>,
}

impl ChunkAccounting {
    fn new(bytes: i64, tracker: &Arc<MemTracker>) -> Self {
        tracker.consume(bytes);
        Self {
            bytes,
            tracker: Mutex::new(Arc::clone(tracker)),
        }
    }

    fn transfer_to(&self, tracker: &Arc<MemTracker>) {
        let mut guard = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
        if Arc::ptr_eq(&guard, tracker) {
            return;
        }
        guard.release(self.bytes);
        tracker.consume(self.bytes);
        *guard = Arc::clone(tracker);
    }

    fn tracker(&self) -> Arc<MemTracker> {
        Arc::clone(&self.tracker.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl Drop for ChunkAccounting {
    fn drop(&mut self) {
        self.tracker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .release(self.bytes);
    }
}
