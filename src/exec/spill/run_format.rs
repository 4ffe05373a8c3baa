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
//! On-disk layout of one sorted run.
//!
//! ```text
//! [header: 48 bytes][ipc message 0][ipc message 1]...[index: 24 bytes per message]
//! ```
//! The header is written as a placeholder first and rewritten once the index position is
//! known. All integers are little endian.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::common::error::{Error, Result};
use crate::exec::spill::ipc_serde::SpillCodec;

const RUN_MAGIC: [u8; 4] = *b"SRUN";
const RUN_VERSION: u16 = 1;
pub(crate) const RUN_HEADER_LEN: u16 = 48;
pub(crate) const RUN_INDEX_ENTRY_LEN: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHeader {
    pub codec: SpillCodec,
    pub num_chunks: u32,
    pub total_rows: u64,
    pub index_offset: u64,
    pub index_length: u64,
    pub schema_hash: u64,
}

fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(raw)
}

impl RunHeader {
    pub fn new(codec: SpillCodec, schema_hash: u64) -> Self {
        Self {
            codec,
            num_chunks: 0,
            total_rows: 0,
            index_offset: 0,
            index_length: 0,
            schema_hash,
        }
    }

    pub fn to_bytes(&self) -> [u8; RUN_HEADER_LEN as usize] {
        let mut buf = [0u8; RUN_HEADER_LEN as usize];
        buf[..4].copy_from_slice(&RUN_MAGIC);
        buf[4..6].copy_from_slice(&RUN_VERSION.to_le_bytes());
        buf[6..8].copy_from_slice(&RUN_HEADER_LEN.to_le_bytes());
        buf[8] = self.codec.as_u8();
        buf[12..16].copy_from_slice(&self.num_chunks.to_le_bytes());
        buf[16..24].copy_from_slice(&self.total_rows.to_le_bytes());
        buf[24..32].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[32..40].copy_from_slice(&self.index_length.to_le_bytes());
        buf[40..48].copy_from_slice(&self.schema_hash.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < RUN_HEADER_LEN as usize {
            return Err(Error::Spill("sort run header is too small".to_string()));
        }
        if buf[..4] != RUN_MAGIC {
            return Err(Error::Spill("sort run header magic mismatch".to_string()));
        }
        let version = le_u16(buf, 4);
        if version != RUN_VERSION {
            return Err(Error::Spill(format!(
                "unsupported sort run version: {version}"
            )));
        }
        let header_len = le_u16(buf, 6);
        if header_len != RUN_HEADER_LEN {
            return Err(Error::Spill(format!(
                "unsupported sort run header length: {header_len}"
            )));
        }
        let codec = SpillCodec::try_from(buf[8])?;
        if buf[9..12].iter().any(|b| *b != 0) {
            return Err(Error::Spill(
                "sort run header reserved bytes must be 0".to_string(),
            ));
        }
        Ok(Self {
            codec,
            num_chunks: le_u32(buf, 12),
            total_rows: le_u64(buf, 16),
            index_offset: le_u64(buf, 24),
            index_length: le_u64(buf, 32),
            schema_hash: le_u64(buf, 40),
        })
    }
}

/// Location of one chunk message inside a run file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIndexEntry {
    pub offset: u64,
    pub length: u64,
    pub num_rows: u32,
    pub num_cols: u16,
}

impl RunIndexEntry {
    pub fn to_bytes(&self) -> [u8; RUN_INDEX_ENTRY_LEN] {
        let mut buf = [0u8; RUN_INDEX_ENTRY_LEN];
        buf[..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.length.to_le_bytes());
        buf[16..20].copy_from_slice(&self.num_rows.to_le_bytes());
        buf[20..22].copy_from_slice(&self.num_cols.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < RUN_INDEX_ENTRY_LEN {
            return Err(Error::Spill(
                "sort run index entry is too small".to_string(),
            ));
        }
        if le_u16(buf, 22) != 0 {
            return Err(Error::Spill(
                "sort run index reserved field must be 0".to_string(),
            ));
        }
        Ok(Self {
            offset: le_u64(buf, 0),
            length: le_u64(buf, 8),
            num_rows: le_u32(buf, 16),
            num_cols: le_u16(buf, 20),
        })
    }
}

pub fn write_run_header<W: Write>(writer: &mut W, header: &RunHeader) -> Result<()> {
    writer
        .write_all(&header.to_bytes())
        .map_err(|e| Error::Spill(format!("write sort run header failed: {e}")))
}

pub fn read_run_header<R: Read>(reader: &mut R) -> Result<RunHeader> {
    let mut buf = [0u8; RUN_HEADER_LEN as usize];
    reader
        .read_exact(&mut buf)
        .map_err(|e| Error::Spill(format!("read sort run header failed: {e}")))?;
    RunHeader::from_bytes(&buf)
}

pub fn write_run_index<W: Write>(writer: &mut W, entries: &[RunIndexEntry]) -> Result<()> {
    for entry in entries {
        writer
            .write_all(&entry.to_bytes())
            .map_err(|e| Error::Spill(format!("write sort run index failed: {e}")))?;
    }
    Ok(())
}

pub fn read_run_index<R: Read + Seek>(
    reader: &mut R,
    header: &RunHeader,
) -> Result<Vec<RunIndexEntry>> {
    if header.index_length == 0 {
        return Ok(Vec::new());
    }
    if header.index_length % RUN_INDEX_ENTRY_LEN as u64 != 0 {
        return Err(Error::Spill(
            "sort run index length is not aligned".to_string(),
        ));
    }
    let entry_count = (header.index_length / RUN_INDEX_ENTRY_LEN as u64) as usize;
    if entry_count != header.num_chunks as usize {
        return Err(Error::Spill(format!(
            "sort run index holds {entry_count} entries, header says {}",
            header.num_chunks
        )));
    }
    reader
        .seek(SeekFrom::Start(header.index_offset))
        .map_err(|e| Error::Spill(format!("seek to sort run index failed: {e}")))?;
    let mut entries = Vec::with_capacity(entry_count);
    let mut buf = [0u8; RUN_INDEX_ENTRY_LEN];
    for _ in 0..entry_count {
        reader
            .read_exact(&mut buf)
            .map_err(|e| Error::Spill(format!("read sort run index entry failed: {e}")))?;
        entries.push(RunIndexEntry::from_bytes(&buf)?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_rejects_foreign_files() {
        let mut bytes = RunHeader::new(SpillCodec::Zstd, 42).to_bytes();
        assert_eq!(RunHeader::from_bytes(&bytes).unwrap().schema_hash, 42);
        bytes[0] = b'X';
        assert!(matches!(RunHeader::from_bytes(&bytes), Err(Error::Spill(_))));
        assert!(RunHeader::from_bytes(&bytes[..10]).is_err());
    }

    #[test]
    fn index_is_read_back_from_its_offset() {
        let entries = vec![
            RunIndexEntry {
                offset: 48,
                length: 100,
                num_rows: 10,
                num_cols: 2,
            },
            RunIndexEntry {
                offset: 148,
                length: 90,
                num_rows: 7,
                num_cols: 2,
            },
        ];
        let mut header = RunHeader::new(SpillCodec::None, 1);
        header.num_chunks = 2;
        header.total_rows = 17;
        header.index_offset = 8;
        header.index_length = (entries.len() * RUN_INDEX_ENTRY_LEN) as u64;

        let mut file = vec![0u8; 8];
        write_run_index(&mut file, &entries).unwrap();
        let read = read_run_index(&mut Cursor::new(file), &header).unwrap();
        assert_eq!(read, entries);

        header.num_chunks = 3;
        let mut file = vec![0u8; 8];
        write_run_index(&mut file, &entries).unwrap();
        assert!(read_run_index(&mut Cursor::new(file), &header).is_err());
    }
}
