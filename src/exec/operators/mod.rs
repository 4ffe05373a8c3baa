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
//! Operators that plug into the pipeline.
//!
//! Responsibilities:
//! - Sources (`NumbersSource`, `ValuesSource`, table functions), transforms (`LimitTransform`,
//!   `MergeSortingTransform`), sinks (`CollectSink`, `PrintSink`) and the `UnionProcessor`
//!   multiplexer.
//! - Each operator implements one variant contract from `pipeline::operator` and is wrapped by
//!   the matching processor adapter; the union implements `Processor` directly.

mod collect_sink;
mod limit_transform;
mod numbers_source;
mod print_sink;
pub mod sort;
mod table_functions;
mod union_processor;
mod values_source;

pub use collect_sink::{CollectHandle, CollectSink};
pub use limit_transform::LimitTransform;
pub use numbers_source::{NumbersSource, numbers_header};
pub use print_sink::PrintSink;
pub use sort::{
    Collation, MergeSortingOptions, MergeSortingTransform, SortColumn, SortColumnDescription,
    SortCounters, SortDescription,
};
pub use table_functions::{TableFunctionBuilder, TableFunctionRegistry, system_table_functions};
pub use union_processor::UnionProcessor;
pub use values_source::ValuesSource;
