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
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::runtime::limits::Limits;

static CONFIG: OnceLock<ColumnflowConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static ColumnflowConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = ColumnflowConfig::load_from_file(path.as_ref())?;
    Ok(CONFIG.get_or_init(|| cfg))
}

/// Load `$COLUMNFLOW_CONFIG` or `./columnflow.toml`; built-in defaults when neither exists.
pub fn init_from_env_or_default() -> Result<&'static ColumnflowConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = match config_path_from_env()? {
        Some(path) => ColumnflowConfig::load_from_file(&path)?,
        None => ColumnflowConfig::default(),
    };
    Ok(CONFIG.get_or_init(|| cfg))
}

pub fn config() -> Result<&'static ColumnflowConfig> {
    init_from_env_or_default()
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    if let Ok(p) = std::env::var("COLUMNFLOW_CONFIG") {
        if !p.trim().is_empty() {
            let path = PathBuf::from(p.trim());
            anyhow::ensure!(
                path.exists(),
                "$COLUMNFLOW_CONFIG points to a missing file: {}",
                path.display()
            );
            return Ok(Some(path));
        }
    }

    let local = PathBuf::from("columnflow.toml");
    Ok(local.exists().then_some(local))
}

#[derive(Clone, Debug, Deserialize)]
pub struct ColumnflowConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression, takes precedence over `log_level`.
    /// Example: "columnflow=debug,columnflow::exec::spill=trace"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub sort: SortConfig,

    #[serde(default)]
    pub spill: SpillStorageConfig,

    /// Query limits by name, applied through the text form of each setting.
    #[serde(default)]
    pub limits: BTreeMap<String, toml::Value>,
}

impl ColumnflowConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::from_toml_str(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: ColumnflowConfig = toml::from_str(s)?;
        Ok(cfg)
    }

    /// Build a `Limits` table from the `[limits]` section.
    pub fn build_limits(&self) -> Result<Limits> {
        let mut limits = Limits::default();
        for (name, value) in &self.limits {
            let text = match value {
                toml::Value::String(s) => s.clone(),
                toml::Value::Integer(v) => v.to_string(),
                toml::Value::Boolean(v) => v.to_string(),
                other => anyhow::bail!("limit {name} has unsupported toml value {other}"),
            };
            limits
                .try_set_from_str(name, &text)
                .with_context(|| format!("apply limit {name}={text}"))?;
        }
        Ok(limits)
    }
}

impl Default for ColumnflowConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            runtime: RuntimeConfig::default(),
            sort: SortConfig::default(),
            spill: SpillStorageConfig::default(),
            limits: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads for the demo pool; 0 means available parallelism.
    #[serde(default)]
    pub exec_threads: usize,
    #[serde(default = "default_waiting_poll_interval_ms")]
    pub waiting_poll_interval_ms: u64,
}

fn default_waiting_poll_interval_ms() -> u64 {
    10
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            exec_threads: 0,
            waiting_poll_interval_ms: default_waiting_poll_interval_ms(),
        }
    }
}

impl RuntimeConfig {
    pub fn actual_exec_threads(&self) -> usize {
        if self.exec_threads > 0 {
            return self.exec_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SortConfig {
    #[serde(default = "default_max_merged_block_size")]
    pub max_merged_block_size: usize,
    #[serde(default = "default_max_bytes_before_remerge")]
    pub max_bytes_before_remerge: usize,
    /// 0 disables external sorting.
    #[serde(default)]
    pub max_bytes_before_external_sort: usize,
    #[serde(default = "default_tmp_path")]
    pub tmp_path: String,
}

fn default_max_merged_block_size() -> usize {
    65_536
}

fn default_max_bytes_before_remerge() -> usize {
    1_000_000_000
}

fn default_tmp_path() -> String {
    std::env::temp_dir().to_string_lossy().into_owned()
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            max_merged_block_size: default_max_merged_block_size(),
            max_bytes_before_remerge: default_max_bytes_before_remerge(),
            max_bytes_before_external_sort: 0,
            tmp_path: default_tmp_path(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SpillStorageConfig {
    /// none | lz4 | zstd
    #[serde(default = "default_spill_ipc_compression")]
    pub ipc_compression: String,
}

fn default_spill_ipc_compression() -> String {
    "lz4".to_string()
}

impl Default for SpillStorageConfig {
    fn default() -> Self {
        Self {
            ipc_compression: default_spill_ipc_compression(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::limits::OverflowMode;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = ColumnflowConfig::from_toml_str("").expect("parse");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.runtime.waiting_poll_interval_ms, 10);
        assert_eq!(cfg.sort.max_merged_block_size, 65_536);
        assert_eq!(cfg.sort.max_bytes_before_external_sort, 0);
        assert_eq!(cfg.spill.ipc_compression, "lz4");
        assert!(cfg.limits.is_empty());
    }

    #[test]
    fn sections_can_be_overridden() {
        let cfg = ColumnflowConfig::from_toml_str(
            r#"
log_filter = "columnflow=debug"

[runtime]
exec_threads = 3

[sort]
max_merged_block_size = 100
max_bytes_before_external_sort = 4096
tmp_path = "/var/tmp"

[spill]
ipc_compression = "zstd"
"#,
        )
        .expect("parse");
        assert_eq!(cfg.log_filter.as_deref(), Some("columnflow=debug"));
        assert_eq!(cfg.runtime.actual_exec_threads(), 3);
        assert_eq!(cfg.sort.max_merged_block_size, 100);
        assert_eq!(cfg.sort.max_bytes_before_external_sort, 4096);
        assert_eq!(cfg.sort.tmp_path, "/var/tmp");
        assert_eq!(cfg.spill.ipc_compression, "zstd");
    }

    #[test]
    fn limits_section_goes_through_text_setters() {
        let cfg = ColumnflowConfig::from_toml_str(
            r#"
[limits]
max_rows_to_sort = 1000
sort_overflow_mode = "break"
readonly = true
"#,
        )
        .expect("parse");
        let limits = cfg.build_limits().expect("limits");
        let sort = limits.sort_size_limits();
        assert_eq!(sort.max_rows, 1000);
        assert_eq!(sort.overflow_mode, OverflowMode::Break);
        assert!(limits.readonly());
    }

    #[test]
    fn unknown_limit_is_rejected() {
        let cfg = ColumnflowConfig::from_toml_str("[limits]\nmax_rows_to_dance = 1\n")
            .expect("parse");
        let err = cfg.build_limits().expect_err("unknown limit");
        assert!(format!("{err:#}").contains("max_rows_to_dance"), "err={err:#}");
    }
}
