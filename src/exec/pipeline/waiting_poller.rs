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
//! Parking list for processors that report `Waiting`.
//!
//! Responsibilities:
//! - Remembers parked processors together with the instant they are next due for a status check.
//! - Hands due entries back to the executor in batches; nothing here spins.
//!
//! Key exported interfaces:
//! - Types: `WaitingPoller`.
//!
//! The poller holds no thread of its own: idle executor workers drain it while they would
//! otherwise sleep on the schedule condvar.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct WaitingEntry {
    id: usize,
    next_poll_at: Instant,
}

pub(crate) struct WaitingPoller {
    poll_interval: Duration,
    entries: VecDeque<WaitingEntry>,
}

impl WaitingPoller {
    pub(crate) fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Park `id`; it becomes due one poll interval from `now`.
    pub(crate) fn add(&mut self, id: usize, now: Instant) {
        self.entries.push_back(WaitingEntry {
            id,
            next_poll_at: now + self.poll_interval,
        });
    }

    /// Remove and return every entry due at `now`, in parking order.
    pub(crate) fn drain_due(&mut self, now: Instant) -> Vec<usize> {
        let mut due = Vec::new();
        let mut pending = VecDeque::with_capacity(self.entries.len());
        while let Some(entry) = self.entries.pop_front() {
            if entry.next_poll_at > now {
                pending.push_back(entry);
            } else {
                due.push(entry.id);
            }
        }
        self.entries = pending;
        due
    }

    /// Time until the earliest entry is due, zero if one already is.
    pub(crate) fn next_due_in(&self, now: Instant) -> Option<Duration> {
        self.entries
            .iter()
            .map(|e| e.next_poll_at.saturating_duration_since(now))
            .min()
    }

    pub(crate) fn drain_all(&mut self) -> Vec<usize> {
        self.entries.drain(..).map(|e| e.id).collect()
    }
}
