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
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::runtime::limits::Limits;
use crate::runtime::mem_tracker::MemTracker;

/// Per-query execution context handed to every processor work unit.
///
/// Carries the limits table, the query-wide cancellation flag and the root memory tracker.
/// The flag is shared: cancelling any clone of the flag stops every processor of the query
/// before its next work unit.
#[derive(Debug)]
pub struct RuntimeState {
    limits: Limits,
    cancelled: Arc<AtomicBool>,
    mem_tracker: Arc<MemTracker>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

impl RuntimeState {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            cancelled: Arc::new(AtomicBool::new(false)),
            mem_tracker: MemTracker::new_root("query"),
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Handle for cancelling from outside the executor, e.g. another thread or a signal handler.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.mem_tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_flag_is_shared() {
        let state = RuntimeState::default();
        let flag = state.cancellation_flag();
        assert!(!state.is_cancelled());
        flag.store(true, Ordering::Release);
        assert!(state.is_cancelled());
    }
}
