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
//! Memory-bounded ORDER BY ... LIMIT transform.
//!
//! Responsibilities:
//! - Sorts every incoming chunk on arrival and buffers it (keeping only `limit` rows per chunk).
//! - Remerges the buffer down to `limit` rows when it grows past the remerge threshold.
//! - Spills the buffer as one sorted run when it grows past the external-sort threshold.
//! - On end of input, merges all runs and the remaining buffer into bounded output blocks.
//!
//! Key exported interfaces:
//! - Types: `MergeSortingOptions`, `MergeSortingTransform`, `SortCounters`.

use std::mem;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::columnflow_logging::{debug, info};
use crate::common::config;
use crate::common::error::Result;
use crate::exec::chunk::{Chunk, Header};
use crate::exec::operators::sort::merger::{ChunkQueue, SortedChunksMerger, SortedStream};
use crate::exec::operators::sort::sort_keys::{SortKeyEncoder, sort_chunk};
use crate::exec::operators::sort::{SortDescription, describe_sort};
use crate::exec::pipeline::operator::{Operator, ProcessorOperator};
use crate::exec::spill::ipc_serde::SpillCodec;
use crate::exec::spill::run_store::TemporaryRunStore;
use crate::runtime::limits::SizeLimits;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::runtime_state::RuntimeState;

/// Knobs of one merge-sorting transform.
#[derive(Clone, Debug)]
pub struct MergeSortingOptions {
    pub description: SortDescription,
    /// Upper bound on rows per output chunk.
    pub max_merged_block_size: usize,
    /// 0 means unlimited.
    pub limit: usize,
    /// 0 disables remerging.
    pub max_bytes_before_remerge: usize,
    /// 0 disables spilling.
    pub max_bytes_before_external_sort: usize,
    pub tmp_path: PathBuf,
    /// `None` takes the sort limits of the query (`max_rows_to_sort`, `max_bytes_to_sort`).
    pub size_limits: Option<SizeLimits>,
    pub spill_codec: SpillCodec,
}

impl MergeSortingOptions {
    /// Options with thresholds taken from the process configuration.
    pub fn new(description: SortDescription) -> Self {
        Self {
            description,
            max_merged_block_size: config::sort_max_merged_block_size(),
            limit: 0,
            max_bytes_before_remerge: config::sort_max_bytes_before_remerge(),
            max_bytes_before_external_sort: config::sort_max_bytes_before_external_sort(),
            tmp_path: config::sort_tmp_path(),
            size_limits: None,
            spill_codec: config::spill_codec(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_max_merged_block_size(mut self, rows: usize) -> Self {
        self.max_merged_block_size = rows;
        self
    }

    pub fn with_max_bytes_before_remerge(mut self, bytes: usize) -> Self {
        self.max_bytes_before_remerge = bytes;
        self
    }

    pub fn with_max_bytes_before_external_sort(mut self, bytes: usize) -> Self {
        self.max_bytes_before_external_sort = bytes;
        self
    }

    pub fn with_tmp_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tmp_path = path.into();
        self
    }

    pub fn with_size_limits(mut self, limits: SizeLimits) -> Self {
        self.size_limits = Some(limits);
        self
    }

    pub fn with_spill_codec(mut self, codec: SpillCodec) -> Self {
        self.spill_codec = codec;
        self
    }
}

#[derive(Debug, Default)]
struct SortCountersInner {
    remerges: AtomicU64,
    spilled_runs: AtomicU64,
    spilled_rows: AtomicU64,
    spilled_bytes: AtomicU64,
    peak_buffered_bytes: AtomicU64,
}

/// Shared, read-only view of a transform's progress; stays valid after the transform is gone.
#[derive(Clone, Debug, Default)]
pub struct SortCounters {
    inner: Arc<SortCountersInner>,
}

impl SortCounters {
    pub fn remerges(&self) -> u64 {
        self.inner.remerges.load(Ordering::Relaxed)
    }

    pub fn spilled_runs(&self) -> u64 {
        self.inner.spilled_runs.load(Ordering::Relaxed)
    }

    pub fn spilled_rows(&self) -> u64 {
        self.inner.spilled_rows.load(Ordering::Relaxed)
    }

    pub fn spilled_bytes(&self) -> u64 {
        self.inner.spilled_bytes.load(Ordering::Relaxed)
    }

    pub fn peak_buffered_bytes(&self) -> u64 {
        self.inner.peak_buffered_bytes.load(Ordering::Relaxed)
    }

    fn record_buffered(&self, bytes: usize) {
        self.inner
            .peak_buffered_bytes
            .fetch_max(bytes as u64, Ordering::Relaxed);
    }
}

pub struct MergeSortingTransform {
    header: Header,
    options: MergeSortingOptions,
    encoder: Arc<SortKeyEncoder>,
    tracker: Option<Arc<MemTracker>>,
    counters: SortCounters,

    buffer: Vec<Chunk>,
    buffered_rows: usize,
    buffered_bytes: usize,
    input_rows: u64,
    input_bytes: u64,
    remerge_enabled: bool,
    /// A break-mode size limit was crossed; no more input is accepted.
    stop_reading: bool,

    store: Option<TemporaryRunStore>,
    finishing: bool,
    merger: Option<SortedChunksMerger>,
    pending_output: Option<Chunk>,
    done: bool,
}

impl MergeSortingTransform {
    pub fn new(header: Header, options: MergeSortingOptions) -> Result<Self> {
        let encoder = SortKeyEncoder::new(&header, &options.description)?;
        Ok(Self {
            header,
            options,
            encoder: Arc::new(encoder),
            tracker: None,
            counters: SortCounters::default(),
            buffer: Vec::new(),
            buffered_rows: 0,
            buffered_bytes: 0,
            input_rows: 0,
            input_bytes: 0,
            remerge_enabled: true,
            stop_reading: false,
            store: None,
            finishing: false,
            merger: None,
            pending_output: None,
            done: false,
        })
    }

    pub fn counters(&self) -> SortCounters {
        self.counters.clone()
    }

    fn buffer_chunk(&mut self, mut chunk: Chunk) {
        if chunk.is_empty() {
            return;
        }
        if let Some(tracker) = self.tracker.as_ref() {
            chunk.transfer_to(tracker);
        }
        self.buffered_rows += chunk.len();
        self.buffered_bytes += chunk.logical_bytes();
        self.buffer.push(chunk);
        self.counters.record_buffered(self.buffered_bytes);
    }

    fn take_buffer(&mut self) -> Vec<Chunk> {
        self.buffered_rows = 0;
        self.buffered_bytes = 0;
        mem::take(&mut self.buffer)
    }

    /// Merger over the buffered chunks, each chunk its own input in arrival order.
    fn buffer_merger(&mut self) -> Result<SortedChunksMerger> {
        let inputs = self
            .take_buffer()
            .into_iter()
            .map(|chunk| Box::new(ChunkQueue::single(chunk)) as Box<dyn SortedStream>)
            .collect();
        SortedChunksMerger::new(
            Arc::clone(&self.header),
            Arc::clone(&self.encoder),
            inputs,
            self.options.max_merged_block_size,
            self.options.limit,
        )
    }

    fn remerge_if_needed(&mut self) -> Result<()> {
        let limit = self.options.limit;
        let threshold = self.options.max_bytes_before_remerge;
        if limit == 0
            || threshold == 0
            || !self.remerge_enabled
            || self.buffered_bytes <= threshold
            || self.buffered_rows <= limit.saturating_mul(2)
        {
            return Ok(());
        }

        debug!(
            "Re-merging intermediate ORDER BY data ({} blocks with {} rows) to save memory consumption",
            self.buffer.len(),
            self.buffered_rows
        );
        let bytes_before = self.buffered_bytes;
        let mut merger = self.buffer_merger()?;
        while let Some(block) = merger.next_block()? {
            self.buffer_chunk(block);
        }
        self.counters.inner.remerges.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Memory usage is lowered from {} to {} bytes",
            bytes_before, self.buffered_bytes
        );

        if self.buffered_bytes.saturating_mul(2) > bytes_before {
            debug!("Re-merging is not useful (memory usage was not reduced by half)");
            self.remerge_enabled = false;
        }
        Ok(())
    }

    fn spill_if_needed(&mut self) -> Result<()> {
        let threshold = self.options.max_bytes_before_external_sort;
        if threshold == 0 || self.buffered_bytes <= threshold {
            return Ok(());
        }

        if self.store.is_none() {
            self.store = Some(TemporaryRunStore::create(
                &self.options.tmp_path,
                self.options.spill_codec,
            )?);
        }
        let mut merger = self.buffer_merger()?;
        let Some(store) = self.store.as_mut() else {
            return Ok(());
        };
        info!(
            "Sorting and writing part of data into temporary file {}",
            store.path().display()
        );
        let mut writer = store.create_run(&self.header)?;
        while let Some(block) = merger.next_block()? {
            writer.append(&block)?;
        }
        let rows = writer.rows();
        let idx = store.commit(writer)?;
        let run = &store.runs()[idx];
        self.counters
            .inner
            .spilled_runs
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .inner
            .spilled_rows
            .fetch_add(rows, Ordering::Relaxed);
        self.counters
            .inner
            .spilled_bytes
            .fetch_add(run.file_bytes, Ordering::Relaxed);
        info!(
            "Done writing part of data into temporary file {}",
            run.path.display()
        );
        Ok(())
    }

    fn prefetch_output(&mut self) -> Result<()> {
        if self.pending_output.is_some() {
            return Ok(());
        }
        let Some(merger) = self.merger.as_mut() else {
            return Ok(());
        };
        match merger.next_block()? {
            Some(block) => self.pending_output = Some(block),
            None => {
                debug!(
                    "Merge sort produced {} rows ({})",
                    merger.rows_emitted(),
                    describe_sort(&self.options.description)
                );
                self.merger = None;
                self.store = None;
                self.done = true;
            }
        }
        Ok(())
    }

    fn release(&mut self) {
        self.take_buffer();
        self.merger = None;
        self.pending_output = None;
        self.store = None;
    }
}

impl Operator for MergeSortingTransform {
    fn name(&self) -> &str {
        "MergeSortingTransform"
    }

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.tracker = Some(tracker);
    }

    fn close(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }

    fn cancel(&mut self) {
        self.release();
        self.done = true;
    }

    fn is_finished(&self) -> bool {
        self.done && self.pending_output.is_none()
    }
}

impl ProcessorOperator for MergeSortingTransform {
    fn input_header(&self) -> &Header {
        &self.header
    }

    fn output_header(&self) -> &Header {
        &self.header
    }

    fn need_input(&self) -> bool {
        !self.finishing && !self.stop_reading
    }

    fn has_output(&self) -> bool {
        self.pending_output.is_some()
    }

    fn input_closed_early(&self) -> bool {
        self.stop_reading
    }

    fn push_chunk(&mut self, state: &RuntimeState, chunk: Chunk) -> Result<()> {
        if chunk.is_empty() || self.stop_reading {
            return Ok(());
        }
        let limits = self
            .options
            .size_limits
            .unwrap_or_else(|| state.limits().sort_size_limits());
        self.input_rows += chunk.len() as u64;
        self.input_bytes += chunk.logical_bytes() as u64;
        // Throw mode surfaces as an error here; break mode keeps this chunk and stops reading.
        let within_limits = limits.check(self.input_rows, self.input_bytes, "sorting")?;

        let sorted = sort_chunk(&self.encoder, &chunk, self.options.limit)?;
        drop(chunk);
        self.buffer_chunk(sorted);

        if !within_limits {
            info!(
                "Sort input stopped at {} rows / {} bytes (overflow mode break)",
                self.input_rows, self.input_bytes
            );
            self.stop_reading = true;
        }

        self.remerge_if_needed()?;
        self.spill_if_needed()?;
        Ok(())
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>> {
        let chunk = self.pending_output.take();
        self.prefetch_output()?;
        Ok(chunk)
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<()> {
        if self.finishing {
            return Ok(());
        }
        self.finishing = true;

        let mut inputs: Vec<Box<dyn SortedStream>> = Vec::new();
        if let Some(store) = self.store.as_ref() {
            info!(
                "There are {} temporary sorted parts to merge.",
                store.runs().len()
            );
            for idx in 0..store.runs().len() {
                inputs.push(Box::new(store.open(idx, Arc::clone(&self.header))?));
            }
        }
        for chunk in self.take_buffer() {
            inputs.push(Box::new(ChunkQueue::single(chunk)));
        }
        self.merger = Some(SortedChunksMerger::new(
            Arc::clone(&self.header),
            Arc::clone(&self.encoder),
            inputs,
            self.options.max_merged_block_size,
            self.options.limit,
        )?);
        self.prefetch_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::Error;
    use crate::exec::operators::sort::SortColumnDescription;
    use crate::runtime::limits::OverflowMode;
    use arrow::array::UInt64Array;
    use arrow::datatypes::{DataType, Field, Schema};

    fn header() -> Header {
        Arc::new(Schema::new(vec![Field::new("number", DataType::UInt64, false)]))
    }

    fn chunk(values: Vec<u64>) -> Chunk {
        let rows = values.len();
        Chunk::try_new(header(), vec![Arc::new(UInt64Array::from(values))], rows).expect("chunk")
    }

    fn options() -> MergeSortingOptions {
        MergeSortingOptions::new(vec![SortColumnDescription::asc("number")])
            .with_max_merged_block_size(1000)
            .with_max_bytes_before_remerge(0)
            .with_max_bytes_before_external_sort(0)
            .with_size_limits(SizeLimits::unlimited())
    }

    fn drain(transform: &mut MergeSortingTransform, state: &RuntimeState) -> Vec<u64> {
        transform.set_finishing(state).unwrap();
        let mut out = Vec::new();
        while transform.has_output() {
            let block = transform.pull_chunk(state).unwrap().unwrap();
            let values = block.batch.column(0).as_any().downcast_ref::<UInt64Array>().unwrap();
            out.extend(values.values().iter().copied());
        }
        assert!(transform.is_finished());
        out
    }

    #[test]
    fn sorts_across_chunks() {
        let state = RuntimeState::default();
        let mut transform = MergeSortingTransform::new(header(), options()).unwrap();
        transform.push_chunk(&state, chunk(vec![5, 1, 9])).unwrap();
        transform.push_chunk(&state, chunk(vec![])).unwrap();
        transform.push_chunk(&state, chunk(vec![4, 0])).unwrap();
        assert!(!transform.has_output());
        assert_eq!(drain(&mut transform, &state), vec![0, 1, 4, 5, 9]);
    }

    #[test]
    fn remerge_keeps_only_limit_rows() {
        let state = RuntimeState::default();
        let opts = options().with_limit(3).with_max_bytes_before_remerge(1);
        let mut transform = MergeSortingTransform::new(header(), opts).unwrap();
        let counters = transform.counters();
        for start in 0..4u64 {
            transform
                .push_chunk(&state, chunk(vec![100 - start, 50 - start, 10 - start]))
                .unwrap();
        }
        assert!(counters.remerges() >= 1);
        assert_eq!(drain(&mut transform, &state), vec![7, 8, 9]);
    }

    #[test]
    fn spilled_runs_merge_with_buffer() {
        let tmp = tempfile::tempdir().unwrap();
        let state = RuntimeState::default();
        let opts = options()
            .with_max_bytes_before_external_sort(1)
            .with_tmp_path(tmp.path());
        let mut transform = MergeSortingTransform::new(header(), opts).unwrap();
        let counters = transform.counters();
        transform.push_chunk(&state, chunk(vec![3, 1])).unwrap();
        transform.push_chunk(&state, chunk(vec![2, 0])).unwrap();
        assert_eq!(counters.spilled_runs(), 2);
        assert_eq!(counters.spilled_rows(), 4);
        assert!(counters.spilled_bytes() > 0);
        assert_eq!(drain(&mut transform, &state), vec![0, 1, 2, 3]);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn throw_mode_fails_once_limit_is_crossed() {
        let state = RuntimeState::default();
        let opts = options().with_size_limits(SizeLimits::new(4, 0, OverflowMode::Throw));
        let mut transform = MergeSortingTransform::new(header(), opts).unwrap();
        transform.push_chunk(&state, chunk(vec![1, 2, 3])).unwrap();
        let err = transform.push_chunk(&state, chunk(vec![4, 5])).unwrap_err();
        assert!(matches!(err, Error::LimitExceeded(_)), "err={err}");
    }

    #[test]
    fn break_mode_keeps_crossing_chunk_and_stops() {
        let state = RuntimeState::default();
        let opts = options().with_size_limits(SizeLimits::new(4, 0, OverflowMode::Break));
        let mut transform = MergeSortingTransform::new(header(), opts).unwrap();
        transform.push_chunk(&state, chunk(vec![9, 8, 7])).unwrap();
        transform.push_chunk(&state, chunk(vec![2, 1])).unwrap();
        assert!(!transform.need_input());
        assert!(transform.input_closed_early());
        transform.push_chunk(&state, chunk(vec![0])).unwrap();
        assert_eq!(drain(&mut transform, &state), vec![1, 2, 7, 8, 9]);
    }

    #[test]
    fn buffered_chunks_are_charged_to_tracker() {
        let state = RuntimeState::default();
        let tracker = MemTracker::new_child("sort", state.mem_tracker());
        let mut transform = MergeSortingTransform::new(header(), options()).unwrap();
        transform.set_mem_tracker(Arc::clone(&tracker));
        transform.push_chunk(&state, chunk((0..100).rev().collect())).unwrap();
        assert!(tracker.current() > 0);
        assert_eq!(drain(&mut transform, &state).len(), 100);
        assert_eq!(tracker.current(), 0);
        assert!(transform.counters().peak_buffered_bytes() > 0);
    }
}
