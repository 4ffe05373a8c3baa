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
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Tracks logical memory usage for a component and its ancestors.
///
/// Only bytes explicitly reported by the caller are recorded; this is not process RSS.
/// Every processor gets a child of the query tracker, and buffered chunks are
/// transferred to the tracker of whoever currently holds them.
#[derive(Debug)]
pub struct MemTracker {
    label: String,
    parent: Option<Arc<MemTracker>>,
    current: AtomicI64,
    peak: AtomicI64,
    children: Mutex<Vec<Weak<MemTracker>>>,
}

impl MemTracker {
    pub fn new_root(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::with_parent(label.into(), None))
    }

    pub fn new_child(label: impl Into<String>, parent: &Arc<MemTracker>) -> Arc<Self> {
        let child = Arc::new(Self::with_parent(label.into(), Some(Arc::clone(parent))));
        parent
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::downgrade(&child));
        child
    }

    fn with_parent(label: String, parent: Option<Arc<MemTracker>>) -> Self {
        Self {
            label,
            parent,
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            children: Mutex::new(Vec::new()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }

    /// Live children; dropped trackers disappear from the list.
    pub fn children(&self) -> Vec<Arc<MemTracker>> {
        let mut guard = self.children.lock().unwrap_or_else(|e| e.into_inner());
        guard.retain(|weak| weak.strong_count() > 0);
        guard.iter().filter_map(Weak::upgrade).collect()
    }

    /// Increase consumption for this tracker and all ancestors.
    pub fn consume(&self, bytes: i64) {
        if bytes <= 0 {
            return;
        }
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            let new_value = current.current.fetch_add(bytes, Ordering::AcqRel) + bytes;
            current.update_peak(new_value);
            tracker = current.parent.as_deref();
        }
    }

    /// Decrease consumption for this tracker and all ancestors.
    pub fn release(&self, bytes: i64) {
        if bytes <= 0 {
            return;
        }
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            current.current.fetch_sub(bytes, Ordering::AcqRel);
            tracker = current.parent.as_deref();
        }
    }

    fn update_peak(&self, value: i64) {
        let mut prev = self.peak.load(Ordering::Relaxed);
        while value > prev {
            match self
                .peak
                .compare_exchange(prev, value, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumption_propagates_to_ancestors() {
        let root = MemTracker::new_root("query");
        let child = MemTracker::new_child("sort", &root);
        child.consume(100);
        child.consume(50);
        child.release(120);
        assert_eq!(child.current(), 30);
        assert_eq!(child.peak(), 150);
        assert_eq!(root.current(), 30);
        assert_eq!(root.peak(), 150);
    }

    #[test]
    fn dropped_children_are_forgotten() {
        let root = MemTracker::new_root("query");
        let kept = MemTracker::new_child("kept", &root);
        drop(MemTracker::new_child("gone", &root));
        let children = root.children();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].label(), kept.label());
    }
}
