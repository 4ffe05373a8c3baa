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
//! Graphviz rendering of a pipeline graph.

use std::fmt;

use crate::exec::pipeline::graph::PipelineGraph;

/// Write `graph` as a Graphviz `digraph`: one box per processor, one arrow per connection.
/// Edges between multi-port processors are labelled with their port indices.
pub fn print_pipeline(graph: &PipelineGraph, out: &mut impl fmt::Write) -> fmt::Result {
    writeln!(out, "digraph")?;
    writeln!(out, "{{")?;
    writeln!(out, "  rankdir=\"LR\";")?;
    writeln!(out, "  {{ node [shape = box]")?;
    for (id, processor) in graph.processors() {
        writeln!(
            out,
            "    n{}[label=\"{} ({})\"];",
            id.index(),
            escape(processor.name()),
            processor.capability()
        )?;
    }
    writeln!(out, "  }}")?;
    for edge in graph.edges() {
        let multi_out = graph
            .processor(edge.from)
            .is_some_and(|p| p.outputs().len() > 1);
        let multi_in = graph
            .processor(edge.to)
            .is_some_and(|p| p.inputs().len() > 1);
        if multi_out || multi_in {
            writeln!(
                out,
                "  n{} -> n{} [label=\"{}:{}\"];",
                edge.from.index(),
                edge.to.index(),
                edge.from_port,
                edge.to_port
            )?;
        } else {
            writeln!(out, "  n{} -> n{};", edge.from.index(), edge.to.index())?;
        }
    }
    writeln!(out, "}}")
}

fn escape(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_quotes_and_backslashes() {
        assert_eq!(escape(r#"a"b\c"#), r#"a\"b\\c"#);
    }

    #[test]
    fn empty_graph_renders_frame() {
        let mut out = String::new();
        print_pipeline(&PipelineGraph::new(), &mut out).unwrap();
        assert!(out.starts_with("digraph\n{\n"));
        assert!(out.trim_end().ends_with('}'));
    }
}
