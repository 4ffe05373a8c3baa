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
use std::path::PathBuf;
use std::time::Duration;

use crate::columnflow_config::config as columnflow_app_config;
use crate::exec::spill::ipc_serde::SpillCodec;

pub(crate) fn waiting_poll_interval() -> Duration {
    let ms = columnflow_app_config()
        .ok()
        .map(|c| c.runtime.waiting_poll_interval_ms)
        .unwrap_or(10);
    Duration::from_millis(ms.max(1))
}

pub(crate) fn sort_max_merged_block_size() -> usize {
    columnflow_app_config()
        .ok()
        .map(|c| c.sort.max_merged_block_size)
        .unwrap_or(65_536)
}

pub(crate) fn sort_max_bytes_before_remerge() -> usize {
    columnflow_app_config()
        .ok()
        .map(|c| c.sort.max_bytes_before_remerge)
        .unwrap_or(1_000_000_000)
}

pub(crate) fn sort_max_bytes_before_external_sort() -> usize {
    columnflow_app_config()
        .ok()
        .map(|c| c.sort.max_bytes_before_external_sort)
        .unwrap_or(0)
}

pub(crate) fn sort_tmp_path() -> PathBuf {
    columnflow_app_config()
        .ok()
        .map(|c| PathBuf::from(&c.sort.tmp_path))
        .unwrap_or_else(std::env::temp_dir)
}

/// Unknown codec names in the config fall back to lz4.
pub(crate) fn spill_codec() -> SpillCodec {
    columnflow_app_config()
        .ok()
        .and_then(|c| SpillCodec::parse(&c.spill.ipc_compression).ok())
        .unwrap_or(SpillCodec::Lz4)
}
