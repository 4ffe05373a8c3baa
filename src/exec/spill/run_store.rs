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
//! Temporary storage for sorted runs.
//!
//! Responsibilities:
//! - Owns one private `tmp_sort_*` directory under the configured temporary path.
//! - `RunWriter` appends chunks of one run; `commit` seals it and registers it in creation order.
//! - `RunReader` streams a run's chunks back in write order.
//!
//! Key exported interfaces:
//! - Types: `TemporaryRunStore`, `RunWriter`, `RunReader`, `RunFile`.
//!
//! The directory and every run in it are removed when the store is dropped.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::columnflow_logging::debug;
use crate::common::error::{Error, Result};
use crate::exec::chunk::{Chunk, Header};
use crate::exec::spill::ipc_serde::{IpcSerde, SpillCodec, schema_hash};
use crate::exec::spill::run_format::{
    RUN_HEADER_LEN, RUN_INDEX_ENTRY_LEN, RunHeader, RunIndexEntry, read_run_header,
    read_run_index, write_run_header, write_run_index,
};

/// A sealed run.
#[derive(Debug, Clone)]
pub struct RunFile {
    pub path: PathBuf,
    pub header: RunHeader,
    /// File size in bytes, header and index included.
    pub file_bytes: u64,
}

impl RunFile {
    pub fn rows(&self) -> u64 {
        self.header.total_rows
    }
}

#[derive(Debug)]
pub struct TemporaryRunStore {
    dir: TempDir,
    serde: IpcSerde,
    next_id: usize,
    runs: Vec<RunFile>,
}

impl TemporaryRunStore {
    /// Create a private directory under `parent` (created if missing).
    pub fn create(parent: &Path, codec: SpillCodec) -> Result<Self> {
        fs::create_dir_all(parent).map_err(|e| {
            Error::Spill(format!(
                "create temporary path {} failed: {e}",
                parent.display()
            ))
        })?;
        let dir = tempfile::Builder::new()
            .prefix("tmp_sort_")
            .tempdir_in(parent)
            .map_err(|e| {
                Error::Spill(format!(
                    "create temporary sort directory under {} failed: {e}",
                    parent.display()
                ))
            })?;
        debug!("Created temporary sort directory {}", dir.path().display());
        Ok(Self {
            dir,
            serde: IpcSerde::new(codec)?,
            next_id: 0,
            runs: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn codec(&self) -> SpillCodec {
        self.serde.codec()
    }

    /// Sealed runs, in creation order.
    pub fn runs(&self) -> &[RunFile] {
        &self.runs
    }

    pub fn total_file_bytes(&self) -> u64 {
        self.runs.iter().map(|r| r.file_bytes).sum()
    }

    pub fn create_run(&mut self, header: &Header) -> Result<RunWriter> {
        let path = self.dir.path().join(format!("run_{:06}.srun", self.next_id));
        self.next_id += 1;
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::Spill(format!("create run {} failed: {e}", path.display())))?;
        let mut writer = BufWriter::new(file);
        let run_header = RunHeader::new(self.serde.codec(), schema_hash(header));
        write_run_header(&mut writer, &run_header)?;
        Ok(RunWriter {
            path,
            writer,
            serde: self.serde.clone(),
            header: run_header,
            index: Vec::new(),
            offset: u64::from(RUN_HEADER_LEN),
        })
    }

    /// Seal `writer` and append the run to the store. Returns the run's position.
    pub fn commit(&mut self, writer: RunWriter) -> Result<usize> {
        let run = writer.finish()?;
        debug!(
            "Sealed sort run {}: rows={} bytes={}",
            run.path.display(),
            run.header.total_rows,
            run.file_bytes
        );
        self.runs.push(run);
        Ok(self.runs.len() - 1)
    }

    pub fn open(&self, idx: usize, header: Header) -> Result<RunReader> {
        let run = self
            .runs
            .get(idx)
            .ok_or_else(|| Error::Spill(format!("no sort run {idx}")))?;
        RunReader::open(&run.path, header)
    }
}

/// Appends chunks to one run file.
#[derive(Debug)]
pub struct RunWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    serde: IpcSerde,
    header: RunHeader,
    index: Vec<RunIndexEntry>,
    offset: u64,
}

impl RunWriter {
    pub fn append(&mut self, chunk: &Chunk) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let encoded = self.serde.encode_record_batch(&chunk.batch)?;
        self.writer
            .write_all(&encoded.bytes)
            .map_err(|e| Error::Spill(format!("write run {} failed: {e}", self.path.display())))?;
        let length = encoded.bytes.len() as u64;
        self.index.push(RunIndexEntry {
            offset: self.offset,
            length,
            num_rows: encoded.num_rows,
            num_cols: encoded.num_cols,
        });
        self.offset += length;
        self.header.total_rows += u64::from(encoded.num_rows);
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.header.total_rows
    }

    fn finish(mut self) -> Result<RunFile> {
        write_run_index(&mut self.writer, &self.index)?;
        let index_length = (self.index.len() * RUN_INDEX_ENTRY_LEN) as u64;
        self.header.num_chunks = u32::try_from(self.index.len())
            .map_err(|_| Error::Spill("sort run holds too many chunks".to_string()))?;
        self.header.index_offset = self.offset;
        self.header.index_length = index_length;

        let mut file = self.writer.into_inner().map_err(|e| {
            Error::Spill(format!("flush run {} failed: {e}", self.path.display()))
        })?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::Spill(format!("seek run header failed: {e}")))?;
        write_run_header(&mut file, &self.header)?;
        file.flush()
            .map_err(|e| Error::Spill(format!("flush run {} failed: {e}", self.path.display())))?;

        Ok(RunFile {
            path: self.path,
            file_bytes: self.offset + index_length,
            header: self.header,
        })
    }
}

/// Streams the chunks of one run in write order.
#[derive(Debug)]
pub struct RunReader {
    reader: BufReader<File>,
    header: Header,
    index: Vec<RunIndexEntry>,
    position: usize,
    serde: IpcSerde,
}

impl RunReader {
    pub fn open(path: &Path, header: Header) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Spill(format!("open run {} failed: {e}", path.display())))?;
        let mut reader = BufReader::new(file);
        let run_header = read_run_header(&mut reader)?;
        if run_header.schema_hash != schema_hash(&header) {
            return Err(Error::Spill(format!(
                "run {} was written with a different schema",
                path.display()
            )));
        }
        let index = read_run_index(&mut reader, &run_header)?;
        Ok(Self {
            reader,
            header,
            index,
            position: 0,
            serde: IpcSerde::new(run_header.codec)?,
        })
    }

    pub fn num_chunks(&self) -> usize {
        self.index.len()
    }

    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        let Some(entry) = self.index.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        let length = usize::try_from(entry.length)
            .map_err(|_| Error::Spill("run message length overflows usize".to_string()))?;
        let mut buf = vec![0u8; length];
        self.reader
            .seek(SeekFrom::Start(entry.offset))
            .map_err(|e| Error::Spill(format!("seek run message failed: {e}")))?;
        self.reader
            .read_exact(&mut buf)
            .map_err(|e| Error::Spill(format!("read run message failed: {e}")))?;
        let batch = self.serde.decode_record_batch(self.header.clone(), &buf)?;
        Ok(Some(Chunk::new(batch)))
    }
}
