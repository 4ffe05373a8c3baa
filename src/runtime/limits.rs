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
//! Query limits: the named row/byte caps and overflow policies consulted while executing.
//!
//! Responsibilities:
//! - Holds one typed value per entry of a fixed descriptor table (name, kind, default).
//! - Sets entries by name from a typed value, a wire-serialized buffer or text, rejecting
//!   unknown names.
//! - Serializes the entries that were changed from their defaults.
//!
//! Key exported interfaces:
//! - Types: `Limits`, `SizeLimits`, `OverflowMode`, `SettingValue`, `LimitDescriptor`.
//!
//! Limits are checked per chunk, not per row, so a cap can be overshot by up to one chunk.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use crate::common::error::{Error, Result};

/// What to do once a limit is exceeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowMode {
    /// Fail the query.
    Throw,
    /// Stop reading and return what was gathered so far.
    Break,
    /// Only for GROUP BY: keep aggregating existing keys, ignore new ones.
    Any,
}

impl OverflowMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OverflowMode::Throw => "throw",
            OverflowMode::Break => "break",
            OverflowMode::Any => "any",
        }
    }

    fn parse(text: &str, allow_any: bool) -> Result<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "throw" => Ok(OverflowMode::Throw),
            "break" => Ok(OverflowMode::Break),
            "any" if allow_any => Ok(OverflowMode::Any),
            _ => {
                let expected = if allow_any {
                    "'throw', 'break' or 'any'"
                } else {
                    "'throw' or 'break'"
                };
                Err(Error::InvalidSetting(format!(
                    "unknown overflow mode '{text}', must be one of {expected}"
                )))
            }
        }
    }
}

impl fmt::Display for OverflowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingKind {
    UInt64,
    /// Whole seconds.
    Seconds,
    Bool,
    OverflowMode { allow_any: bool },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettingValue {
    UInt64(u64),
    Seconds(u64),
    Bool(bool),
    OverflowMode(OverflowMode),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::UInt64(v) | SettingValue::Seconds(v) => write!(f, "{v}"),
            SettingValue::Bool(v) => write!(f, "{}", u8::from(*v)),
            SettingValue::OverflowMode(mode) => write!(f, "{mode}"),
        }
    }
}

#[derive(Debug)]
pub struct LimitDescriptor {
    pub name: &'static str,
    pub kind: SettingKind,
    pub default: SettingValue,
}

const fn uint(name: &'static str, default: u64) -> LimitDescriptor {
    LimitDescriptor {
        name,
        kind: SettingKind::UInt64,
        default: SettingValue::UInt64(default),
    }
}

const fn seconds(name: &'static str) -> LimitDescriptor {
    LimitDescriptor {
        name,
        kind: SettingKind::Seconds,
        default: SettingValue::Seconds(0),
    }
}

const fn overflow(name: &'static str, allow_any: bool) -> LimitDescriptor {
    LimitDescriptor {
        name,
        kind: SettingKind::OverflowMode { allow_any },
        default: SettingValue::OverflowMode(OverflowMode::Throw),
    }
}

/// Everything is unlimited by default except the weak recursion and expression size caps.
static DESCRIPTORS: [LimitDescriptor; 29] = [
    // Only checked by the deepest sources of a query.
    uint("max_rows_to_read", 0),
    uint("max_bytes_to_read", 0),
    overflow("read_overflow_mode", false),
    uint("max_rows_to_group_by", 0),
    overflow("group_by_overflow_mode", true),
    uint("max_rows_to_sort", 0),
    uint("max_bytes_to_sort", 0),
    overflow("sort_overflow_mode", false),
    uint("max_result_rows", 0),
    uint("max_result_bytes", 0),
    overflow("result_overflow_mode", false),
    seconds("max_execution_time"),
    overflow("timeout_overflow_mode", false),
    // Rows per second.
    uint("min_execution_speed", 0),
    seconds("timeout_before_checking_execution_speed"),
    uint("max_columns_to_read", 0),
    uint("max_temporary_columns", 0),
    uint("max_temporary_non_const_columns", 0),
    uint("max_subquery_depth", 100),
    uint("max_pipeline_depth", 1000),
    uint("max_ast_depth", 1000),
    uint("max_ast_elements", 10_000),
    LimitDescriptor {
        name: "readonly",
        kind: SettingKind::Bool,
        default: SettingValue::Bool(false),
    },
    // Size of the set built for IN sections.
    uint("max_rows_in_set", 0),
    uint("max_bytes_in_set", 0),
    overflow("set_overflow_mode", false),
    // State remembered by DISTINCT.
    uint("max_rows_in_distinct", 0),
    uint("max_bytes_in_distinct", 0),
    overflow("distinct_overflow_mode", false),
];

fn descriptor_index() -> &'static HashMap<&'static str, usize> {
    static INDEX: OnceLock<HashMap<&'static str, usize>> = OnceLock::new();
    INDEX.get_or_init(|| {
        DESCRIPTORS
            .iter()
            .enumerate()
            .map(|(idx, d)| (d.name, idx))
            .collect()
    })
}

fn lookup(name: &str) -> Result<usize> {
    descriptor_index()
        .get(name)
        .copied()
        .ok_or_else(|| Error::UnknownSetting(name.to_string()))
}

#[derive(Clone, Debug)]
struct LimitSlot {
    value: SettingValue,
    changed: bool,
}

/// Row/byte caps of one execution phase plus the policy applied when they are crossed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeLimits {
    /// 0 means unlimited.
    pub max_rows: u64,
    /// 0 means unlimited.
    pub max_bytes: u64,
    pub overflow_mode: OverflowMode,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl SizeLimits {
    pub fn new(max_rows: u64, max_bytes: u64, overflow_mode: OverflowMode) -> Self {
        Self {
            max_rows,
            max_bytes,
            overflow_mode,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0, 0, OverflowMode::Throw)
    }

    pub fn is_set(&self) -> bool {
        self.max_rows > 0 || self.max_bytes > 0
    }

    /// `Ok(true)` while within limits, `Ok(false)` once crossed in break mode,
    /// `Err(LimitExceeded)` once crossed in throw mode.
    pub fn check(&self, rows: u64, bytes: u64, what: &str) -> Result<bool> {
        if self.max_rows > 0 && rows > self.max_rows {
            return self.overflow(format!(
                "Limit for {what} exceeded, max rows: {}, current rows: {rows}",
                self.max_rows
            ));
        }
        if self.max_bytes > 0 && bytes > self.max_bytes {
            return self.overflow(format!(
                "Limit for {what} exceeded, max bytes: {}, current bytes: {bytes}",
                self.max_bytes
            ));
        }
        Ok(true)
    }

    fn overflow(&self, message: String) -> Result<bool> {
        match self.overflow_mode {
            OverflowMode::Throw => Err(Error::LimitExceeded(message)),
            OverflowMode::Break | OverflowMode::Any => Ok(false),
        }
    }
}

/// The limits of one query.
#[derive(Clone, Debug)]
pub struct Limits {
    slots: Vec<LimitSlot>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            slots: DESCRIPTORS
                .iter()
                .map(|d| LimitSlot {
                    value: d.default.clone(),
                    changed: false,
                })
                .collect(),
        }
    }
}

impl Limits {
    pub fn descriptors() -> &'static [LimitDescriptor] {
        &DESCRIPTORS
    }

    pub fn get(&self, name: &str) -> Result<&SettingValue> {
        Ok(&self.slots[lookup(name)?].value)
    }

    pub fn is_changed(&self, name: &str) -> Result<bool> {
        Ok(self.slots[lookup(name)?].changed)
    }

    /// Set from a typed value. A plain integer is accepted for seconds and for booleans (0/1).
    pub fn try_set(&mut self, name: &str, value: SettingValue) -> Result<()> {
        let idx = lookup(name)?;
        let kind = DESCRIPTORS[idx].kind;
        let value = match (kind, value) {
            (SettingKind::UInt64, SettingValue::UInt64(v)) => SettingValue::UInt64(v),
            (SettingKind::Seconds, SettingValue::Seconds(v) | SettingValue::UInt64(v)) => {
                SettingValue::Seconds(v)
            }
            (SettingKind::Bool, SettingValue::Bool(v)) => SettingValue::Bool(v),
            (SettingKind::Bool, SettingValue::UInt64(v)) => SettingValue::Bool(bool_from_u64(v)?),
            (SettingKind::OverflowMode { allow_any }, SettingValue::OverflowMode(mode)) => {
                if mode == OverflowMode::Any && !allow_any {
                    return Err(Error::InvalidSetting(format!(
                        "overflow mode 'any' is not allowed for {name}"
                    )));
                }
                SettingValue::OverflowMode(mode)
            }
            (kind, value) => {
                return Err(Error::InvalidSetting(format!(
                    "{name} expects {kind:?}, got {value:?}"
                )));
            }
        };
        self.store(idx, value);
        Ok(())
    }

    /// Set from the text form, e.g. a config file or a URL parameter.
    pub fn try_set_from_str(&mut self, name: &str, text: &str) -> Result<()> {
        let idx = lookup(name)?;
        let value = match DESCRIPTORS[idx].kind {
            SettingKind::UInt64 => SettingValue::UInt64(parse_u64(name, text)?),
            SettingKind::Seconds => SettingValue::Seconds(parse_u64(name, text)?),
            SettingKind::Bool => match text.trim().to_ascii_lowercase().as_str() {
                "true" => SettingValue::Bool(true),
                "false" => SettingValue::Bool(false),
                other => SettingValue::Bool(bool_from_u64(parse_u64(name, other)?)?),
            },
            SettingKind::OverflowMode { allow_any } => {
                SettingValue::OverflowMode(OverflowMode::parse(text, allow_any)?)
            }
        };
        self.store(idx, value);
        Ok(())
    }

    /// Set from the binary form used between servers; advances `buf` past the value.
    pub fn try_set_from_bytes(&mut self, name: &str, buf: &mut &[u8]) -> Result<()> {
        let idx = lookup(name)?;
        let value = match DESCRIPTORS[idx].kind {
            SettingKind::UInt64 => SettingValue::UInt64(read_var_uint(buf)?),
            SettingKind::Seconds => SettingValue::Seconds(read_var_uint(buf)?),
            SettingKind::Bool => SettingValue::Bool(bool_from_u64(read_var_uint(buf)?)?),
            SettingKind::OverflowMode { allow_any } => {
                SettingValue::OverflowMode(OverflowMode::parse(&read_string(buf)?, allow_any)?)
            }
        };
        self.store(idx, value);
        Ok(())
    }

    /// Write every changed entry as (name, value). No terminator is written.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        for (descriptor, slot) in DESCRIPTORS.iter().zip(&self.slots) {
            if !slot.changed {
                continue;
            }
            write_string(descriptor.name, out);
            match &slot.value {
                SettingValue::UInt64(v) | SettingValue::Seconds(v) => write_var_uint(*v, out),
                SettingValue::Bool(v) => write_var_uint(u64::from(*v), out),
                SettingValue::OverflowMode(mode) => write_string(mode.as_str(), out),
            }
        }
    }

    /// Apply a buffer produced by [`Limits::serialize`].
    pub fn apply_serialized(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let name = read_string(&mut buf)?;
            self.try_set_from_bytes(&name, &mut buf)?;
        }
        Ok(())
    }

    pub fn sort_size_limits(&self) -> SizeLimits {
        self.size_limits("max_rows_to_sort", "max_bytes_to_sort", "sort_overflow_mode")
    }

    pub fn read_size_limits(&self) -> SizeLimits {
        self.size_limits("max_rows_to_read", "max_bytes_to_read", "read_overflow_mode")
    }

    pub fn result_size_limits(&self) -> SizeLimits {
        self.size_limits("max_result_rows", "max_result_bytes", "result_overflow_mode")
    }

    pub fn set_size_limits(&self) -> SizeLimits {
        self.size_limits("max_rows_in_set", "max_bytes_in_set", "set_overflow_mode")
    }

    pub fn distinct_size_limits(&self) -> SizeLimits {
        self.size_limits(
            "max_rows_in_distinct",
            "max_bytes_in_distinct",
            "distinct_overflow_mode",
        )
    }

    pub fn group_by_limits(&self) -> SizeLimits {
        SizeLimits::new(
            self.uint_value("max_rows_to_group_by"),
            0,
            self.mode_value("group_by_overflow_mode"),
        )
    }

    pub fn max_execution_time(&self) -> Option<Duration> {
        match self.uint_value("max_execution_time") {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn timeout_overflow_mode(&self) -> OverflowMode {
        self.mode_value("timeout_overflow_mode")
    }

    pub fn max_pipeline_depth(&self) -> u64 {
        self.uint_value("max_pipeline_depth")
    }

    pub fn readonly(&self) -> bool {
        matches!(self.value_of("readonly"), SettingValue::Bool(true))
    }

    fn store(&mut self, idx: usize, value: SettingValue) {
        let slot = &mut self.slots[idx];
        slot.value = value;
        slot.changed = true;
    }

    fn size_limits(&self, rows: &str, bytes: &str, mode: &str) -> SizeLimits {
        SizeLimits::new(
            self.uint_value(rows),
            self.uint_value(bytes),
            self.mode_value(mode),
        )
    }

    fn value_of(&self, name: &str) -> &SettingValue {
        // Internal accessors only name entries of the static table.
        let idx = descriptor_index()[name];
        &self.slots[idx].value
    }

    fn uint_value(&self, name: &str) -> u64 {
        match self.value_of(name) {
            SettingValue::UInt64(v) | SettingValue::Seconds(v) => *v,
            SettingValue::Bool(v) => u64::from(*v),
            SettingValue::OverflowMode(_) => 0,
        }
    }

    fn mode_value(&self, name: &str) -> OverflowMode {
        match self.value_of(name) {
            SettingValue::OverflowMode(mode) => *mode,
            _ => OverflowMode::Throw,
        }
    }
}

fn parse_u64(name: &str, text: &str) -> Result<u64> {
    text.trim()
        .parse::<u64>()
        .map_err(|e| Error::InvalidSetting(format!("{name}: cannot parse '{text}': {e}")))
}

fn bool_from_u64(v: u64) -> Result<bool> {
    match v {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::InvalidSetting(format!(
            "boolean setting expects 0 or 1, got {other}"
        ))),
    }
}

// LEB128, at most 10 bytes for a u64.
fn write_var_uint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_var_uint(buf: &mut &[u8]) -> Result<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let Some((&byte, rest)) = buf.split_first() else {
            return Err(Error::InvalidSetting(
                "unexpected end of buffer while reading a varint".to_string(),
            ));
        };
        *buf = rest;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::InvalidSetting("varint is too long".to_string()))
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    write_var_uint(s.len() as u64, out);
    out.extend_from_slice(s.as_bytes());
}

fn read_string(buf: &mut &[u8]) -> Result<String> {
    let len = usize::try_from(read_var_uint(buf)?)
        .map_err(|_| Error::InvalidSetting("string length overflows usize".to_string()))?;
    if buf.len() < len {
        return Err(Error::InvalidSetting(format!(
            "string of {len} bytes exceeds the remaining {} bytes",
            buf.len()
        )));
    }
    let (bytes, rest) = buf.split_at(len);
    *buf = rest;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::InvalidSetting(format!("setting string is not utf-8: {e}")))
}
