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
//! Process-wide `tracing` setup.
//!
//! Events are rendered glog-style (`Lmmdd hh:mm:ss.uuuuuu thread file:line] message`) into a
//! log file when `$COLUMNFLOW_LOG_FILE` or `$COLUMNFLOW_LOG_DIR` is set, otherwise to stderr.
//! The subscriber is installed once; later calls are no-ops.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use chrono::Local;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

pub use tracing::{debug, error, info, trace, warn};

static INIT: OnceLock<()> = OnceLock::new();

const LOG_FILE_NAME: &str = "columnflow.log";

struct GlogFormatter;

impl<S, N> FormatEvent<S, N> for GlogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let level = match *metadata.level() {
            Level::ERROR => 'E',
            Level::WARN => 'W',
            Level::INFO => 'I',
            Level::DEBUG => 'D',
            Level::TRACE => 'T',
        };
        let current = std::thread::current();
        let thread = current
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", current.id()));
        let file = metadata
            .file()
            .and_then(|f| f.rsplit('/').next())
            .unwrap_or("unknown");
        write!(
            writer,
            "{level}{} {thread} {file}:{}] ",
            Local::now().format("%m%d %H:%M:%S%.6f"),
            metadata.line().unwrap_or(0)
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn log_file_path() -> Option<PathBuf> {
    let non_empty = |var: &str| {
        std::env::var(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    non_empty("COLUMNFLOW_LOG_FILE")
        .map(PathBuf::from)
        .or_else(|| non_empty("COLUMNFLOW_LOG_DIR").map(|dir| PathBuf::from(dir).join(LOG_FILE_NAME)))
}

/// Open the configured log file; any failure falls back to stderr with a note on stderr.
fn open_log_file() -> Option<File> {
    let path = log_file_path()?;
    let opened = path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));
    match opened {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!(
                "cannot open log file {}: {err}; logging to stderr",
                path.display()
            );
            None
        }
    }
}

/// Install the subscriber. `filter` is a bare level or a full `EnvFilter` expression.
pub fn init_with_level(filter: &str) {
    INIT.get_or_init(|| {
        let env_filter = EnvFilter::new(filter);
        let _ = match open_log_file() {
            Some(file) => tracing_fmt()
                .with_env_filter(env_filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .event_format(GlogFormatter)
                .try_init(),
            None => tracing_fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_ansi(atty::is(atty::Stream::Stderr))
                .event_format(GlogFormatter)
                .try_init(),
        };
    });
}

pub fn init() {
    init_with_level("info");
}

/// `log_filter` wins over `log_level`.
pub fn init_from_config(config: &crate::common::app_config::ColumnflowConfig) {
    let filter = config
        .log_filter
        .as_deref()
        .unwrap_or(config.log_level.as_str());
    init_with_level(filter);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_with_level("columnflow=debug");
        init_with_level("warn");
        assert!(INIT.get().is_some());
        info!("logging initialised twice without panicking");
    }
}
