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
//! Pipeline executor.
//!
//! Responsibilities:
//! - Schedules ready processors across worker loops, one work unit at a time.
//! - Re-evaluates a processor and its port neighbours after every work unit.
//! - Parks `Waiting` processors in a poller drained by idle workers.
//! - Fails fast on the first error: cancels everything idle, drains what runs, reports once.
//!
//! Key exported interfaces:
//! - Types: `PipelineExecutor`.
//!
//! Locking: the schedule state sits behind one mutex. A processor's own mutex is only taken by
//! the worker that moved it out of `Idle`, or while its state is `Idle`/`Queued`/`Waiting` under
//! the schedule lock; workers never take the schedule lock while holding a processor lock.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use threadpool::ThreadPool;

use crate::columnflow_logging::{debug, error, info, warn};
use crate::common::config;
use crate::common::error::{Error, Result};
use crate::exec::pipeline::graph::PipelineGraph;
use crate::exec::pipeline::processor::{Processor, ProcessorStatus};
use crate::exec::pipeline::waiting_poller::WaitingPoller;
use crate::runtime::limits::OverflowMode;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::runtime_state::RuntimeState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeState {
    Idle,
    Queued,
    Running,
    Waiting,
    Finished,
}

struct ScheduleState {
    queue: VecDeque<usize>,
    nodes: Vec<NodeState>,
    poller: WaitingPoller,
    remaining: usize,
    running: usize,
    active_workers: usize,
    /// Set once the run is being torn down, by an error or a break-mode timeout.
    aborted: bool,
    error: Option<Error>,
    deadline: Option<(Instant, OverflowMode)>,
}

struct ExecutorShared {
    processors: Vec<Mutex<Box<dyn Processor>>>,
    names: Vec<String>,
    neighbors: Vec<Vec<usize>>,
    state: Arc<RuntimeState>,
    sched: Mutex<ScheduleState>,
    cv: Condvar,
}

/// Runs one validated pipeline graph to completion.
pub struct PipelineExecutor {
    shared: Arc<ExecutorShared>,
    started: AtomicBool,
    _trackers: Vec<Arc<MemTracker>>,
}

impl PipelineExecutor {
    /// Validate `graph` and take ownership of its processors.
    ///
    /// Every processor gets a child of the query memory tracker.
    pub fn new(graph: PipelineGraph, state: Arc<RuntimeState>) -> Result<Self> {
        let depth = graph.validate()?;
        let max_depth = state.limits().max_pipeline_depth();
        if max_depth > 0 && depth as u64 > max_depth {
            return Err(Error::LimitExceeded(format!(
                "Pipeline depth {depth} exceeds max_pipeline_depth {max_depth}"
            )));
        }

        let neighbors = graph.neighbors();
        let mut processors = graph.into_processors();
        let mut trackers = Vec::with_capacity(processors.len());
        let mut names = Vec::with_capacity(processors.len());
        for (idx, processor) in processors.iter_mut().enumerate() {
            let name = processor.name().to_string();
            let tracker = MemTracker::new_child(format!("{name}#{idx}"), state.mem_tracker());
            processor.set_mem_tracker(Arc::clone(&tracker));
            trackers.push(tracker);
            names.push(name);
        }

        let count = processors.len();
        let sched = ScheduleState {
            queue: VecDeque::with_capacity(count),
            nodes: vec![NodeState::Idle; count],
            poller: WaitingPoller::new(config::waiting_poll_interval()),
            remaining: count,
            running: 0,
            active_workers: 0,
            aborted: false,
            error: None,
            deadline: None,
        };
        let shared = ExecutorShared {
            processors: processors.into_iter().map(Mutex::new).collect(),
            names,
            neighbors,
            state,
            sched: Mutex::new(sched),
            cv: Condvar::new(),
        };
        Ok(Self {
            shared: Arc::new(shared),
            started: AtomicBool::new(false),
            _trackers: trackers,
        })
    }

    /// Number of processors in the executed graph.
    pub fn num_processors(&self) -> usize {
        self.shared.processors.len()
    }

    /// Request cancellation; `execute` returns `Error::Cancelled` once running units drain.
    pub fn cancel(&self) {
        self.shared.state.cancel();
        self.shared.cv.notify_all();
    }

    /// Run the graph to completion on `pool`, or on the calling thread when `pool` is `None`.
    ///
    /// Can only be called once per executor.
    pub fn execute(&self, pool: Option<&ThreadPool>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Execution(
                "pipeline executor can only be executed once".to_string(),
            ));
        }
        let shared = Arc::clone(&self.shared);
        let workers = pool.map(|p| p.max_count().max(1)).unwrap_or(1);
        info!(
            "Pipeline execution started: processors={} workers={} threaded={}",
            shared.processors.len(),
            workers,
            pool.is_some()
        );
        let started_at = Instant::now();

        {
            let mut st = shared.lock_sched();
            for id in 0..shared.processors.len() {
                shared.schedule(&mut st, id);
            }
            st.active_workers = workers;
            let limits = shared.state.limits();
            st.deadline = limits
                .max_execution_time()
                .map(|max_time| (Instant::now() + max_time, limits.timeout_overflow_mode()));
        }

        match pool {
            Some(pool) => {
                for _ in 0..workers {
                    let shared = Arc::clone(&shared);
                    pool.execute(move || worker_loop(&shared));
                }
                let mut st = shared.lock_sched();
                while st.active_workers > 0 {
                    st = shared.cv.wait(st).unwrap_or_else(|e| e.into_inner());
                }
            }
            None => worker_loop(&shared),
        }

        let mut st = shared.lock_sched();
        let elapsed = started_at.elapsed();
        match st.error.take() {
            Some(err) => {
                warn!("Pipeline execution failed after {:?}: {}", elapsed, err);
                Err(err)
            }
            None => {
                info!("Pipeline execution finished in {:?}", elapsed);
                Ok(())
            }
        }
    }
}

impl ExecutorShared {
    fn lock_sched(&self) -> MutexGuard<'_, ScheduleState> {
        self.sched.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_processor(&self, id: usize) -> MutexGuard<'_, Box<dyn Processor>> {
        self.processors[id]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Evaluate an idle processor and move it to the queue, the poller, or retirement.
    fn schedule(&self, st: &mut ScheduleState, id: usize) {
        if st.nodes[id] != NodeState::Idle {
            return;
        }
        let status = match catch_unwind(AssertUnwindSafe(|| self.lock_processor(id).status())) {
            Ok(status) => status,
            Err(payload) => {
                let err = Error::Execution(format!(
                    "panic in processor {}#{} status: {}",
                    self.names[id],
                    id,
                    panic_message(payload.as_ref())
                ));
                self.fail_locked(st, err);
                if st.nodes[id] == NodeState::Idle {
                    self.retire(st, id);
                }
                return;
            }
        };
        match status {
            ProcessorStatus::Ready => {
                st.nodes[id] = NodeState::Queued;
                st.queue.push_back(id);
                self.cv.notify_one();
            }
            ProcessorStatus::Waiting => {
                st.nodes[id] = NodeState::Waiting;
                st.poller.add(id, Instant::now());
            }
            ProcessorStatus::Finished => {
                debug!("Processor finished: {}#{}", self.names[id], id);
                self.retire(st, id);
            }
            ProcessorStatus::NeedInput | ProcessorStatus::OutputFull => {}
        }
    }

    /// Mark `id` finished. Retiring an already finished processor is a no-op.
    fn retire(&self, st: &mut ScheduleState, id: usize) {
        if st.nodes[id] == NodeState::Finished {
            return;
        }
        st.nodes[id] = NodeState::Finished;
        st.remaining -= 1;
        if st.remaining == 0 {
            self.cv.notify_all();
        }
    }

    /// Cancel every processor that is not running and stop handing out work.
    fn abort_locked(&self, st: &mut ScheduleState) {
        st.aborted = true;
        self.state.cancel();
        st.queue.clear();
        st.poller.drain_all();
        for id in 0..st.nodes.len() {
            if matches!(
                st.nodes[id],
                NodeState::Idle | NodeState::Queued | NodeState::Waiting
            ) {
                self.cancel_processor(id);
                self.retire(st, id);
            }
        }
        self.cv.notify_all();
    }

    fn cancel_processor(&self, id: usize) {
        if catch_unwind(AssertUnwindSafe(|| self.lock_processor(id).cancel())).is_err() {
            warn!("Processor {}#{} panicked while cancelling", self.names[id], id);
        }
    }

    /// Record `err` unless an earlier one exists, then abort.
    fn fail_locked(&self, st: &mut ScheduleState, err: Error) {
        if st.error.is_none() {
            error!("Pipeline failed: {}", err);
            st.error = Some(err);
        }
        if !st.aborted {
            self.abort_locked(st);
        }
    }

    fn check_interrupts(&self, st: &mut ScheduleState) {
        if st.aborted {
            return;
        }
        if self.state.is_cancelled() {
            self.fail_locked(st, Error::Cancelled);
            return;
        }
        let Some((deadline, mode)) = st.deadline else {
            return;
        };
        if Instant::now() < deadline {
            return;
        }
        match mode {
            OverflowMode::Throw => self.fail_locked(
                st,
                Error::LimitExceeded("Timeout exceeded: max_execution_time".to_string()),
            ),
            OverflowMode::Break | OverflowMode::Any => {
                info!("Pipeline stopped at max_execution_time (overflow mode break)");
                self.abort_locked(st);
            }
        }
    }

    /// Run one work unit of `id`. Panics are converted to `Error::Execution`.
    fn run_one(&self, id: usize) -> Result<()> {
        let mut processor = self.lock_processor(id);
        if self.state.is_cancelled() {
            processor.cancel();
            return Ok(());
        }
        catch_unwind(AssertUnwindSafe(|| processor.work(&self.state))).unwrap_or_else(|payload| {
            Err(Error::Execution(format!(
                "panic in processor {}#{}: {}",
                self.names[id],
                id,
                panic_message(payload.as_ref())
            )))
        })
    }

    /// `id` stays `Running` until the abort decision is made, so an abort triggered here skips
    /// it and it is retired exactly once below.
    fn after_work(&self, st: &mut ScheduleState, id: usize, result: Result<()>) {
        st.running = st.running.saturating_sub(1);
        if let Err(err) = result {
            self.fail_locked(st, err);
        } else {
            self.check_interrupts(st);
        }
        if st.aborted {
            self.cancel_processor(id);
            self.retire(st, id);
            return;
        }
        st.nodes[id] = NodeState::Idle;
        self.schedule(st, id);
        for &neighbor in &self.neighbors[id] {
            self.schedule(st, neighbor);
        }
    }

    fn poll_waiting(&self, st: &mut ScheduleState) {
        for id in st.poller.drain_due(Instant::now()) {
            st.nodes[id] = NodeState::Idle;
            self.schedule(st, id);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Signs a worker off on every exit path, unwinding included, so `execute` never waits on a
/// dead worker.
struct WorkerExit<'a>(&'a ExecutorShared);

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        let shared = self.0;
        let mut st = shared.lock_sched();
        if std::thread::panicking() {
            shared.fail_locked(
                &mut st,
                Error::Execution("pipeline worker panicked".to_string()),
            );
            // The unit this worker was running never reaches `after_work`.
            for id in 0..st.nodes.len() {
                shared.retire(&mut st, id);
            }
        }
        st.active_workers = st.active_workers.saturating_sub(1);
        shared.cv.notify_all();
    }
}

fn worker_loop(shared: &ExecutorShared) {
    let _exit = WorkerExit(shared);
    let mut st = shared.lock_sched();
    loop {
        shared.check_interrupts(&mut st);
        if st.remaining == 0 {
            break;
        }
        if let Some(id) = st.queue.pop_front() {
            st.nodes[id] = NodeState::Running;
            st.running += 1;
            drop(st);
            let result = shared.run_one(id);
            st = shared.lock_sched();
            shared.after_work(&mut st, id, result);
            continue;
        }

        let timeout = if !st.poller.is_empty() {
            shared.poll_waiting(&mut st);
            if !st.queue.is_empty() {
                continue;
            }
            st.poller
                .next_due_in(Instant::now())
                .unwrap_or_else(|| st.poller.poll_interval())
        } else if st.running == 0 {
            let stuck: Vec<String> = (0..st.nodes.len())
                .filter(|&id| st.nodes[id] != NodeState::Finished)
                .map(|id| format!("{}#{}", shared.names[id], id))
                .collect();
            shared.fail_locked(
                &mut st,
                Error::PipelineStuck(format!(
                    "no processor can make progress; unfinished: {}",
                    stuck.join(", ")
                )),
            );
            continue;
        } else {
            st.poller.poll_interval()
        };

        let (guard, _) = shared
            .cv
            .wait_timeout(st, timeout.max(Duration::from_millis(1)))
            .unwrap_or_else(|e| e.into_inner());
        st = guard;
    }
}
