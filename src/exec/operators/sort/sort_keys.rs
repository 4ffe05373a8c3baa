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
//! Sort key encoding and per-chunk sorting.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, LargeStringArray, StringArray, UInt32Array};
use arrow::compute::{SortOptions, take};
use arrow::datatypes::DataType;
use arrow::row::{RowConverter, Rows, SortField};

use crate::common::error::{Error, Result};
use crate::exec::chunk::{Chunk, Header};
use crate::exec::operators::sort::{Collation, SortColumnDescription};

/// Encodes the key columns of a chunk into byte-comparable rows.
///
/// Comparing two encoded rows is equivalent to comparing the rows under the sort description,
/// direction, null placement and collation included.
#[derive(Debug)]
pub struct SortKeyEncoder {
    keys: Vec<(usize, Collation)>,
    converter: RowConverter,
}

impl SortKeyEncoder {
    pub fn new(header: &Header, description: &[SortColumnDescription]) -> Result<Self> {
        if description.is_empty() {
            return Err(Error::InvalidGraph(
                "sort description must name at least one column".to_string(),
            ));
        }
        let mut keys = Vec::with_capacity(description.len());
        let mut fields = Vec::with_capacity(description.len());
        for desc in description {
            let idx = desc.column.resolve(header)?;
            let data_type = header.field(idx).data_type().clone();
            if desc.collation == Collation::CaseInsensitive
                && !matches!(data_type, DataType::Utf8 | DataType::LargeUtf8)
            {
                return Err(Error::SchemaMismatch(format!(
                    "collation is only supported on string columns, {} is {data_type}",
                    desc.column
                )));
            }
            fields.push(SortField::new_with_options(
                data_type,
                SortOptions {
                    descending: desc.descending,
                    nulls_first: desc.nulls_first,
                },
            ));
            keys.push((idx, desc.collation));
        }
        let converter = RowConverter::new(fields)?;
        Ok(Self { keys, converter })
    }

    pub fn encode(&self, chunk: &Chunk) -> Result<Rows> {
        let columns = self
            .keys
            .iter()
            .map(|(idx, collation)| {
                let column = chunk.column(*idx)?;
                match collation {
                    Collation::Binary => Ok(Arc::clone(column)),
                    Collation::CaseInsensitive => lowercase(column),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.converter.convert_columns(&columns)?)
    }
}

fn lowercase(column: &ArrayRef) -> Result<ArrayRef> {
    let any = column.as_any();
    if let Some(strings) = any.downcast_ref::<StringArray>() {
        let lowered: StringArray = strings.iter().map(|v| v.map(str::to_lowercase)).collect();
        return Ok(Arc::new(lowered));
    }
    if let Some(strings) = any.downcast_ref::<LargeStringArray>() {
        let lowered: LargeStringArray = strings.iter().map(|v| v.map(str::to_lowercase)).collect();
        return Ok(Arc::new(lowered));
    }
    Err(Error::SchemaMismatch(format!(
        "cannot apply collation to {}",
        column.data_type()
    )))
}

/// Stable sort of one chunk; keeps only the first `limit` rows when `limit > 0`.
pub fn sort_chunk(encoder: &SortKeyEncoder, chunk: &Chunk, limit: usize) -> Result<Chunk> {
    let rows = encoder.encode(chunk)?;
    let len = chunk.len();
    let mut indices: Vec<u32> = (0..len as u32).collect();
    // `sort_by` is stable: equal keys keep arrival order.
    indices.sort_by(|&a, &b| rows.row(a as usize).cmp(&rows.row(b as usize)));
    if limit > 0 && indices.len() > limit {
        indices.truncate(limit);
    }
    let identity = indices.len() == len
        && indices
            .iter()
            .enumerate()
            .all(|(pos, &idx)| pos as u32 == idx);
    if identity {
        return Ok(chunk.clone());
    }
    let kept = indices.len();
    let indices = UInt32Array::from(indices);
    let columns = chunk
        .columns()
        .iter()
        .map(|column| take(column.as_ref(), &indices, None))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Chunk::try_new(chunk.schema(), columns, kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};

    fn header() -> Header {
        Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int64, true),
            Field::new("s", DataType::Utf8, true),
        ]))
    }

    fn chunk(keys: Vec<Option<i64>>, strings: Vec<&str>) -> Chunk {
        let rows = keys.len();
        Chunk::try_new(
            header(),
            vec![
                Arc::new(Int64Array::from(keys)),
                Arc::new(StringArray::from(strings)),
            ],
            rows,
        )
        .expect("chunk")
    }

    fn ints(chunk: &Chunk) -> Vec<Option<i64>> {
        chunk
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .iter()
            .collect()
    }

    fn strings(chunk: &Chunk) -> Vec<String> {
        chunk
            .batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap()
            .iter()
            .map(|v| v.unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn ascending_sort_is_stable_and_nulls_last() {
        let encoder = SortKeyEncoder::new(&header(), &[SortColumnDescription::asc("k")]).unwrap();
        let input = chunk(
            vec![Some(3), None, Some(1), Some(3), Some(1)],
            vec!["a", "b", "c", "d", "e"],
        );
        let sorted = sort_chunk(&encoder, &input, 0).unwrap();
        assert_eq!(ints(&sorted), vec![Some(1), Some(1), Some(3), Some(3), None]);
        assert_eq!(strings(&sorted), vec!["c", "e", "a", "d", "b"]);
    }

    #[test]
    fn descending_with_limit_and_tie_breaker() {
        let description = vec![
            SortColumnDescription::desc("k").with_nulls_first(false),
            SortColumnDescription::asc("s"),
        ];
        let encoder = SortKeyEncoder::new(&header(), &description).unwrap();
        let input = chunk(
            vec![Some(1), Some(2), Some(2), None],
            vec!["x", "b", "a", "z"],
        );
        let sorted = sort_chunk(&encoder, &input, 3).unwrap();
        assert_eq!(ints(&sorted), vec![Some(2), Some(2), Some(1)]);
        assert_eq!(strings(&sorted), vec!["a", "b", "x"]);
    }

    #[test]
    fn case_insensitive_collation_keeps_original_values() {
        let description =
            vec![SortColumnDescription::asc("s").with_collation(Collation::CaseInsensitive)];
        let encoder = SortKeyEncoder::new(&header(), &description).unwrap();
        let input = chunk(vec![Some(0); 4], vec!["b", "A", "a", "C"]);
        let sorted = sort_chunk(&encoder, &input, 0).unwrap();
        assert_eq!(strings(&sorted), vec!["A", "a", "b", "C"]);
    }

    #[test]
    fn sorted_input_is_returned_as_is() {
        let encoder = SortKeyEncoder::new(&header(), &[SortColumnDescription::asc("k")]).unwrap();
        let input = chunk(vec![Some(1), Some(2)], vec!["a", "b"]);
        let sorted = sort_chunk(&encoder, &input, 0).unwrap();
        assert_eq!(sorted.batch, input.batch);
    }

    #[test]
    fn invalid_descriptions_are_rejected() {
        let missing = SortKeyEncoder::new(&header(), &[SortColumnDescription::asc("nope")]);
        assert!(matches!(missing, Err(Error::SchemaMismatch(_))));
        let collated = SortKeyEncoder::new(
            &header(),
            &[SortColumnDescription::asc("k").with_collation(Collation::CaseInsensitive)],
        );
        assert!(matches!(collated, Err(Error::SchemaMismatch(_))));
        assert!(SortKeyEncoder::new(&header(), &[]).is_err());
        let out_of_range = SortKeyEncoder::new(&header(), &[SortColumnDescription::asc(2usize)]);
        assert!(matches!(out_of_range, Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn position_picks_the_right_column_among_duplicate_names() {
        let header: Header = Arc::new(Schema::new(vec![
            Field::new("v", DataType::Int64, false),
            Field::new("v", DataType::Int64, false),
        ]));
        let input = Chunk::try_new(
            Arc::clone(&header),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(Int64Array::from(vec![30, 10, 20])),
            ],
            3,
        )
        .unwrap();
        let by_position = SortKeyEncoder::new(&header, &[SortColumnDescription::asc(1usize)]).unwrap();
        let sorted = sort_chunk(&by_position, &input, 0).unwrap();
        assert_eq!(ints(&sorted), vec![Some(2), Some(3), Some(1)]);

        let by_name = SortKeyEncoder::new(&header, &[SortColumnDescription::asc("v")]).unwrap();
        assert!(sort_chunk(&by_name, &input, 0).unwrap().batch == input.batch);
    }
}
