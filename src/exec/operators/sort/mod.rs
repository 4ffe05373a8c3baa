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
//! Sorting: sort descriptions, key encoding, k-way merging and the merge-sorting transform.
//!
//! Responsibilities:
//! - `SortDescription` lists the key columns (by position or name), their direction, null placement and collation.
//! - `sort_keys` turns key columns into byte-comparable rows (arrow row format).
//! - `merger` merges sorted streams stably with a min-heap.
//! - `merge_sorting_transform` accumulates, remerges, spills and finally merges a stream.

use std::fmt;

mod merge_sorting_transform;
mod merger;
mod sort_keys;

pub use merge_sorting_transform::{MergeSortingOptions, MergeSortingTransform, SortCounters};
pub use merger::{ChunkQueue, SortedChunksMerger, SortedStream};
pub use sort_keys::{SortKeyEncoder, sort_chunk};

use crate::common::error::{Error, Result};
use crate::exec::chunk::Header;

/// String comparison rule of a key column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Collation {
    #[default]
    Binary,
    /// Compares the lower-cased value; only valid on string columns.
    CaseInsensitive,
}

/// Key column reference, resolved against the header when the sort is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SortColumn {
    /// Zero-based position; unambiguous even when names repeat.
    Position(usize),
    /// First column with this name.
    Name(String),
}

impl SortColumn {
    pub fn resolve(&self, header: &Header) -> Result<usize> {
        match self {
            SortColumn::Position(idx) if *idx < header.fields().len() => Ok(*idx),
            SortColumn::Position(idx) => Err(Error::SchemaMismatch(format!(
                "sort column #{idx} is out of range for a header with {} columns",
                header.fields().len()
            ))),
            SortColumn::Name(name) => header.index_of(name).map_err(|_| {
                Error::SchemaMismatch(format!("sort column '{name}' is not in the header"))
            }),
        }
    }
}

impl From<usize> for SortColumn {
    fn from(idx: usize) -> Self {
        SortColumn::Position(idx)
    }
}

impl From<&str> for SortColumn {
    fn from(name: &str) -> Self {
        SortColumn::Name(name.to_string())
    }
}

impl From<String> for SortColumn {
    fn from(name: String) -> Self {
        SortColumn::Name(name)
    }
}

impl fmt::Display for SortColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortColumn::Position(idx) => write!(f, "#{idx}"),
            SortColumn::Name(name) => f.write_str(name),
        }
    }
}

/// One key of a sort.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortColumnDescription {
    pub column: SortColumn,
    pub descending: bool,
    pub nulls_first: bool,
    pub collation: Collation,
}

impl SortColumnDescription {
    /// Ascending, nulls last.
    pub fn asc(column: impl Into<SortColumn>) -> Self {
        Self {
            column: column.into(),
            descending: false,
            nulls_first: false,
            collation: Collation::Binary,
        }
    }

    /// Descending, nulls first.
    pub fn desc(column: impl Into<SortColumn>) -> Self {
        Self {
            column: column.into(),
            descending: true,
            nulls_first: true,
            collation: Collation::Binary,
        }
    }

    pub fn with_nulls_first(mut self, nulls_first: bool) -> Self {
        self.nulls_first = nulls_first;
        self
    }

    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = collation;
        self
    }
}

impl fmt::Display for SortColumnDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} NULLS {}",
            self.column,
            if self.descending { "DESC" } else { "ASC" },
            if self.nulls_first { "FIRST" } else { "LAST" }
        )?;
        if self.collation == Collation::CaseInsensitive {
            write!(f, " COLLATE ci")?;
        }
        Ok(())
    }
}

/// Ordered keys; later entries break ties of earlier ones.
pub type SortDescription = Vec<SortColumnDescription>;

pub fn describe_sort(description: &[SortColumnDescription]) -> String {
    description
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
