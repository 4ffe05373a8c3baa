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
//! Pipeline graph construction and validation.
//!
//! Responsibilities:
//! - Owns processors until they are handed to the executor.
//! - Connects ports by (processor, port index) and records every edge.
//! - Validates the finished graph: all ports connected, no cycles.
//!
//! Key exported interfaces:
//! - Types: `PipelineGraph`, `ProcessorId`, `Edge`.

use std::collections::VecDeque;
use std::fmt;

use crate::common::error::{Error, Result};
use crate::exec::pipeline::operator::{ProcessorOperator, SinkOperator, SourceOperator};
use crate::exec::pipeline::port::connect;
use crate::exec::pipeline::processor::{
    Processor, SinkProcessor, SourceProcessor, TransformProcessor,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId(pub(crate) usize);

impl ProcessorId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Output port `from_port` of `from` feeds input port `to_port` of `to`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub from: ProcessorId,
    pub from_port: usize,
    pub to: ProcessorId,
    pub to_port: usize,
}

#[derive(Default)]
pub struct PipelineGraph {
    processors: Vec<Box<dyn Processor>>,
    edges: Vec<Edge>,
}

impl PipelineGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, processor: Box<dyn Processor>) -> ProcessorId {
        let id = ProcessorId(self.processors.len());
        self.processors.push(processor);
        id
    }

    pub fn add_source<S: SourceOperator + 'static>(&mut self, op: S) -> ProcessorId {
        self.add(Box::new(SourceProcessor::new(op)))
    }

    pub fn add_transform<T: ProcessorOperator + 'static>(&mut self, op: T) -> ProcessorId {
        self.add(Box::new(TransformProcessor::new(op)))
    }

    pub fn add_sink<K: SinkOperator + 'static>(&mut self, op: K) -> ProcessorId {
        self.add(Box::new(SinkProcessor::new(op)))
    }

    /// Connect output `from_port` of `from` to input `to_port` of `to`.
    pub fn connect(
        &mut self,
        from: ProcessorId,
        from_port: usize,
        to: ProcessorId,
        to_port: usize,
    ) -> Result<()> {
        let count = self.processors.len();
        if from.0 >= count || to.0 >= count {
            return Err(Error::InvalidGraph(format!(
                "unknown processor in edge {from} -> {to} (graph has {count} processors)"
            )));
        }
        if from == to {
            return Err(Error::InvalidGraph(format!(
                "processor {from} cannot feed itself"
            )));
        }

        let (producer, consumer) = if from.0 < to.0 {
            let (left, right) = self.processors.split_at_mut(to.0);
            (&mut left[from.0], &mut right[0])
        } else {
            let (left, right) = self.processors.split_at_mut(from.0);
            (&mut right[0], &mut left[to.0])
        };

        let producer_name = producer.name().to_string();
        let consumer_name = consumer.name().to_string();
        let output = producer.outputs_mut().get_mut(from_port).ok_or_else(|| {
            Error::InvalidGraph(format!(
                "{producer_name} ({from}) has no output port {from_port}"
            ))
        })?;
        let input = consumer.inputs_mut().get_mut(to_port).ok_or_else(|| {
            Error::InvalidGraph(format!(
                "{consumer_name} ({to}) has no input port {to_port}"
            ))
        })?;
        connect(output, input).map_err(|e| match e {
            Error::SchemaMismatch(msg) => Error::SchemaMismatch(format!(
                "{producer_name} ({from}) -> {consumer_name} ({to}): {msg}"
            )),
            other => other,
        })?;

        self.edges.push(Edge {
            from,
            from_port,
            to,
            to_port,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn processor(&self, id: ProcessorId) -> Option<&dyn Processor> {
        self.processors.get(id.0).map(|p| p.as_ref())
    }

    pub fn processors(&self) -> impl Iterator<Item = (ProcessorId, &dyn Processor)> {
        self.processors
            .iter()
            .enumerate()
            .map(|(idx, p)| (ProcessorId(idx), p.as_ref()))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Processors at the other end of any port, per processor, without duplicates.
    pub(crate) fn neighbors(&self) -> Vec<Vec<usize>> {
        let mut neighbors = vec![Vec::new(); self.processors.len()];
        for edge in &self.edges {
            let (a, b) = (edge.from.0, edge.to.0);
            if !neighbors[a].contains(&b) {
                neighbors[a].push(b);
            }
            if !neighbors[b].contains(&a) {
                neighbors[b].push(a);
            }
        }
        neighbors
    }

    /// Check that every port is connected and the graph is acyclic. Returns the depth of the
    /// graph: the number of processors on its longest source-to-sink path.
    pub fn validate(&self) -> Result<usize> {
        if self.processors.is_empty() {
            return Err(Error::InvalidGraph("pipeline has no processors".to_string()));
        }
        for (id, processor) in self.processors() {
            if let Some(idx) = processor.inputs().iter().position(|p| !p.is_connected()) {
                return Err(Error::InvalidGraph(format!(
                    "input port {idx} of {} ({id}) is not connected",
                    processor.name()
                )));
            }
            if let Some(idx) = processor.outputs().iter().position(|p| !p.is_connected()) {
                return Err(Error::InvalidGraph(format!(
                    "output port {idx} of {} ({id}) is not connected",
                    processor.name()
                )));
            }
        }

        // Kahn's algorithm; anything left unvisited sits on a cycle.
        let count = self.processors.len();
        let mut in_degree = vec![0usize; count];
        let mut downstream = vec![Vec::new(); count];
        for edge in &self.edges {
            in_degree[edge.to.0] += 1;
            downstream[edge.from.0].push(edge.to.0);
        }
        let mut depth = vec![1usize; count];
        let mut ready: VecDeque<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut visited = 0usize;
        while let Some(node) = ready.pop_front() {
            visited += 1;
            for &next in &downstream[node] {
                depth[next] = depth[next].max(depth[node] + 1);
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push_back(next);
                }
            }
        }
        if visited != count {
            let on_cycle: Vec<String> = (0..count)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| format!("{} ({})", self.processors[i].name(), ProcessorId(i)))
                .collect();
            return Err(Error::InvalidGraph(format!(
                "pipeline contains a cycle through {}",
                on_cycle.join(", ")
            )));
        }
        Ok(depth.into_iter().max().unwrap_or(0))
    }

    pub(crate) fn into_processors(self) -> Vec<Box<dyn Processor>> {
        self.processors
    }
}
