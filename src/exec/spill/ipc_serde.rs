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
//! Arrow IPC encoding of chunks written to temporary runs.
//!
//! Each chunk becomes one small self-contained IPC stream (schema plus one batch, optionally
//! compressed). The run file's own index locates the streams.

use std::fmt;
use std::io::Cursor;

use arrow::array::RecordBatch;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::ipc::CompressionType;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::{IpcWriteOptions, StreamWriter};

use crate::common::error::{Error, Result};

/// Compression applied to run messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpillCodec {
    None,
    #[default]
    Lz4,
    Zstd,
}

impl SpillCodec {
    pub fn as_u8(self) -> u8 {
        match self {
            SpillCodec::None => 0,
            SpillCodec::Lz4 => 1,
            SpillCodec::Zstd => 2,
        }
    }

    /// Case-insensitive codec name: `none`, `lz4` or `zstd`.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(SpillCodec::None),
            "lz4" => Ok(SpillCodec::Lz4),
            "zstd" => Ok(SpillCodec::Zstd),
            _ => Err(Error::Spill(format!(
                "unsupported spill ipc compression: {value}"
            ))),
        }
    }

    fn compression(self) -> Option<CompressionType> {
        match self {
            SpillCodec::None => None,
            SpillCodec::Lz4 => Some(CompressionType::LZ4_FRAME),
            SpillCodec::Zstd => Some(CompressionType::ZSTD),
        }
    }
}

impl TryFrom<u8> for SpillCodec {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(SpillCodec::None),
            1 => Ok(SpillCodec::Lz4),
            2 => Ok(SpillCodec::Zstd),
            _ => Err(Error::Spill(format!("unknown spill codec value: {value}"))),
        }
    }
}

impl fmt::Display for SpillCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpillCodec::None => "none",
            SpillCodec::Lz4 => "lz4",
            SpillCodec::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct EncodedMessage {
    pub bytes: Vec<u8>,
    pub num_rows: u32,
    pub num_cols: u16,
}

#[derive(Debug, Clone)]
pub struct IpcSerde {
    codec: SpillCodec,
    write_options: IpcWriteOptions,
}

impl IpcSerde {
    pub fn new(codec: SpillCodec) -> Result<Self> {
        let write_options = IpcWriteOptions::default()
            .try_with_compression(codec.compression())
            .map_err(map_arrow_err)?;
        Ok(Self {
            codec,
            write_options,
        })
    }

    pub fn codec(&self) -> SpillCodec {
        self.codec
    }

    pub fn encode_record_batch(&self, batch: &RecordBatch) -> Result<EncodedMessage> {
        let num_rows = u32::try_from(batch.num_rows())
            .map_err(|_| Error::Spill("record batch row count overflows u32".to_string()))?;
        let num_cols = u16::try_from(batch.num_columns())
            .map_err(|_| Error::Spill("record batch column count overflows u16".to_string()))?;

        let mut writer = StreamWriter::try_new_with_options(
            Vec::new(),
            batch.schema().as_ref(),
            self.write_options.clone(),
        )
        .map_err(map_arrow_err)?;
        writer.write(batch).map_err(map_arrow_err)?;
        writer.finish().map_err(map_arrow_err)?;
        let bytes = writer.into_inner().map_err(map_arrow_err)?;
        Ok(EncodedMessage {
            bytes,
            num_rows,
            num_cols,
        })
    }

    /// Decode one message and rebind its columns to `schema`.
    pub fn decode_record_batch(&self, schema: SchemaRef, message: &[u8]) -> Result<RecordBatch> {
        let mut reader = StreamReader::try_new(Cursor::new(message), None).map_err(map_arrow_err)?;
        let batch = reader
            .next()
            .ok_or_else(|| Error::Spill("ipc message did not contain a record batch".to_string()))?
            .map_err(map_arrow_err)?;
        RecordBatch::try_new(schema, batch.columns().to_vec()).map_err(map_arrow_err)
    }
}

/// FNV-1a over the schema's display form; stored in run headers to catch mixed-up files.
pub fn schema_hash(schema: &Schema) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    schema
        .to_string()
        .bytes()
        .fold(FNV_OFFSET, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
        })
}

fn map_arrow_err(err: ArrowError) -> Error {
    Error::Spill(format!("arrow ipc error: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field};
    use std::sync::Arc;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int64, false),
            Field::new("s", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from_iter_values(0..1000)),
                Arc::new(StringArray::from_iter(
                    (0..1000).map(|v| (v % 7 != 0).then(|| format!("row-{v}"))),
                )),
            ],
        )
        .expect("batch")
    }

    #[test]
    fn codecs_preserve_batches() {
        let input = batch();
        for codec in [SpillCodec::None, SpillCodec::Lz4, SpillCodec::Zstd] {
            let serde = IpcSerde::new(codec).expect("serde");
            let message = serde.encode_record_batch(&input).expect("encode");
            assert_eq!(message.num_rows, 1000);
            assert_eq!(message.num_cols, 2);
            let decoded = serde
                .decode_record_batch(input.schema(), &message.bytes)
                .expect("decode");
            assert_eq!(decoded, input, "codec={codec}");
        }
    }

    #[test]
    fn parse_accepts_known_names_only() {
        assert_eq!(SpillCodec::parse(" ZSTD ").unwrap(), SpillCodec::Zstd);
        assert!(matches!(SpillCodec::parse("snappy"), Err(Error::Spill(_))));
        assert!(SpillCodec::try_from(9).is_err());
    }

    #[test]
    fn decoding_rebinds_to_the_run_schema() {
        let input = batch();
        let renamed = Arc::new(Schema::new(vec![
            Field::new("key", DataType::Int64, false),
            Field::new("label", DataType::Utf8, true),
        ]));
        let serde = IpcSerde::new(SpillCodec::Lz4).expect("serde");
        let message = serde.encode_record_batch(&input).expect("encode");
        let decoded = serde
            .decode_record_batch(Arc::clone(&renamed), &message.bytes)
            .expect("decode");
        assert_eq!(decoded.schema(), renamed);
        assert_eq!(decoded.columns(), input.columns());
    }

    #[test]
    fn truncated_message_is_rejected() {
        let serde = IpcSerde::new(SpillCodec::None).expect("serde");
        let err = serde.decode_record_batch(batch().schema(), &[0xFF, 0xFF]);
        assert!(matches!(err, Err(Error::Spill(_))));
    }
}
