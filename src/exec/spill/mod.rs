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
//! External storage for sorted runs.
//!
//! Responsibilities:
//! - Encodes chunks as arrow IPC messages, optionally compressed.
//! - Lays runs out as header + messages + index in a store-private temporary directory.

pub mod ipc_serde;
pub mod run_format;
pub mod run_store;

pub use ipc_serde::SpillCodec;
pub use run_store::{RunFile, RunReader, RunWriter, TemporaryRunStore};
