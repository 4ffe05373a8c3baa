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
//! Named source constructors and the `system.table_functions` listing.
//!
//! Responsibilities:
//! - Maps a table function name plus numeric arguments to a ready source processor.
//! - Exposes the registered names as a one-block source with a single `name` column.
//!
//! Key exported interfaces:
//! - Types: `TableFunctionRegistry`, `TableFunctionBuilder`.
//! - Functions: `system_table_functions`.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{Array, StringArray, UInt8Array};
use arrow::datatypes::{DataType, Field, Schema};

use crate::common::error::{Error, Result};
use crate::exec::chunk::Chunk;
use crate::exec::operators::numbers_source::NumbersSource;
use crate::exec::operators::values_source::ValuesSource;
use crate::exec::pipeline::processor::{Processor, SourceProcessor};

/// Builds a source processor from positional arguments.
pub type TableFunctionBuilder = fn(&[u64]) -> Result<Box<dyn Processor>>;

const DEFAULT_NUMBERS_BLOCK_SIZE: u64 = 65_536;

/// Name → builder table, iterated in name order.
pub struct TableFunctionRegistry {
    functions: BTreeMap<String, TableFunctionBuilder>,
}

impl Default for TableFunctionRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("numbers", numbers);
        registry.register("one", one);
        registry
    }
}

impl TableFunctionRegistry {
    pub fn empty() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    /// A later registration under the same name replaces the earlier one.
    pub fn register(&mut self, name: impl Into<String>, builder: TableFunctionBuilder) {
        self.functions.insert(name.into(), builder);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn create(&self, name: &str, args: &[u64]) -> Result<Box<dyn Processor>> {
        let builder = self.functions.get(name).ok_or_else(|| {
            Error::InvalidGraph(format!("unknown table function '{name}'"))
        })?;
        builder(args)
    }
}

/// `numbers(count[, block_size])`: `0..count` in blocks of `block_size` rows, the last one shorter.
fn numbers(args: &[u64]) -> Result<Box<dyn Processor>> {
    let (rows, block_size) = match args {
        [rows] => (*rows, DEFAULT_NUMBERS_BLOCK_SIZE),
        [rows, block_size] if *block_size > 0 => (*rows, *block_size),
        _ => {
            return Err(Error::InvalidGraph(format!(
                "numbers expects (count[, block_size > 0]), got {args:?}"
            )));
        }
    };
    Ok(Box::new(SourceProcessor::new(NumbersSource::contiguous(
        rows, block_size,
    ))))
}

/// `one()`: a single row with `dummy = 0`.
fn one(args: &[u64]) -> Result<Box<dyn Processor>> {
    if !args.is_empty() {
        return Err(Error::InvalidGraph("one takes no arguments".to_string()));
    }
    let header = Arc::new(Schema::new(vec![Field::new("dummy", DataType::UInt8, false)]));
    let chunk = Chunk::try_new(
        Arc::clone(&header),
        vec![Arc::new(UInt8Array::from(vec![0u8]))],
        1,
    )?;
    Ok(Box::new(SourceProcessor::new(ValuesSource::new(
        header,
        vec![chunk],
    )?)))
}

/// One block listing the registered table function names.
pub fn system_table_functions(registry: &TableFunctionRegistry) -> Result<ValuesSource> {
    let header = Arc::new(Schema::new(vec![Field::new("name", DataType::Utf8, false)]));
    let names: StringArray = registry.names().map(Some).collect();
    let rows = names.len();
    let chunk = Chunk::try_new(Arc::clone(&header), vec![Arc::new(names)], rows)?;
    ValuesSource::new(header, vec![chunk])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::pipeline::operator::SourceOperator;
    use crate::exec::pipeline::port::{InputPort, connect};
    use crate::exec::pipeline::processor::Capability;
    use arrow::array::UInt64Array;
    use crate::runtime::runtime_state::RuntimeState;

    #[test]
    fn builds_registered_sources() {
        let registry = TableFunctionRegistry::default();
        let numbers = registry.create("numbers", &[100, 10]).unwrap();
        assert_eq!(numbers.capability(), Capability::Source);
        assert_eq!(numbers.name(), "NumbersSource");
        assert!(registry.create("numbers", &[7, 2]).is_ok());
        assert!(registry.create("numbers", &[7, 0]).is_err());
        assert!(registry.create("numbers", &[]).is_err());
        assert!(registry.create("one", &[]).is_ok());
        assert!(matches!(
            registry.create("nope", &[]).err(),
            Some(Error::InvalidGraph(_))
        ));
    }

    #[test]
    fn small_numbers_fit_in_one_short_block() {
        let state = RuntimeState::default();
        let registry = TableFunctionRegistry::default();
        let mut numbers = registry.create("numbers", &[10]).unwrap();
        let mut consumer = InputPort::new(numbers.outputs()[0].header().clone());
        connect(&mut numbers.outputs_mut()[0], &mut consumer).unwrap();
        consumer.set_needed();

        numbers.work(&state).unwrap();
        let block = consumer.pull();
        let values = block
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<UInt64Array>()
            .unwrap();
        assert_eq!(values.values().to_vec(), (0..10).collect::<Vec<u64>>());
        numbers.work(&state).unwrap();
        assert!(consumer.is_finished());
    }

    #[test]
    fn system_table_lists_names_in_order() {
        let mut registry = TableFunctionRegistry::default();
        registry.register("generate", |_| Err(Error::InvalidGraph("unused".into())));
        let state = RuntimeState::default();
        let mut source = system_table_functions(&registry).unwrap();
        let block = source.generate(&state).unwrap().unwrap();
        let names = block
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        let names: Vec<&str> = names.iter().flatten().collect();
        assert_eq!(names, vec!["generate", "numbers", "one"]);
        assert!(source.generate(&state).unwrap().is_none());
    }
}
