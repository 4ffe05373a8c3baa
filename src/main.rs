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
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use threadpool::ThreadPool;

use columnflow::columnflow_config;
use columnflow::columnflow_logging::{self, info};
use columnflow::exec::operators::{
    MergeSortingOptions, MergeSortingTransform, NumbersSource, PrintSink, SortColumnDescription,
    numbers_header,
};
use columnflow::exec::pipeline::print::print_pipeline;
use columnflow::{Limits, PipelineExecutor, PipelineGraph, RuntimeState};

const NUM_BLOCKS: u64 = 100;
const BLOCK_SIZE: u64 = 100;
const MAX_MERGED_BLOCK_SIZE: usize = 100;
const MAX_BYTES_BEFORE_REMERGE: usize = 10_000_000;
const MAX_BYTES_BEFORE_EXTERNAL_SORT: usize = 10_000_000;
const POOL_THREADS: usize = 4;

fn usage() -> ! {
    eprintln!("usage: columnflow [--config <path>] [--limit <rows>]");
    std::process::exit(2);
}

struct Args {
    config_path: Option<String>,
    limit: usize,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config_path: None,
        limit: 0,
    };
    let mut it = env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config_path = Some(it.next().unwrap_or_else(|| usage())),
            "--limit" => {
                let text = it.next().unwrap_or_else(|| usage());
                args.limit = text
                    .parse()
                    .with_context(|| format!("invalid --limit value '{text}'"))?;
            }
            "-h" | "--help" => usage(),
            other => {
                eprintln!("unknown argument: {other}");
                usage();
            }
        }
    }
    Ok(args)
}

/// Numbers -> MergeSorting -> Print.
fn build_graph(limit: usize) -> Result<PipelineGraph> {
    let mut graph = PipelineGraph::new();
    let header = numbers_header();
    let options = MergeSortingOptions::new(vec![SortColumnDescription::asc("number")])
        .with_max_merged_block_size(MAX_MERGED_BLOCK_SIZE)
        .with_limit(limit)
        .with_max_bytes_before_remerge(MAX_BYTES_BEFORE_REMERGE)
        .with_max_bytes_before_external_sort(MAX_BYTES_BEFORE_EXTERNAL_SORT);

    let source = graph.add_source(NumbersSource::new(NUM_BLOCKS, BLOCK_SIZE));
    let sort = graph.add_transform(MergeSortingTransform::new(Arc::clone(&header), options)?);
    let sink = graph.add_sink(PrintSink::stdout(header, ""));
    graph.connect(source, 0, sort, 0)?;
    graph.connect(sort, 0, sink, 0)?;
    Ok(graph)
}

fn run(limits: &Limits, limit: usize, pool: Option<&ThreadPool>) -> Result<Duration> {
    let graph = build_graph(limit)?;
    let state = Arc::new(RuntimeState::new(limits.clone()));
    let executor = PipelineExecutor::new(graph, state)?;
    let start = Instant::now();
    executor.execute(pool)?;
    Ok(start.elapsed())
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let cfg = match args.config_path.as_deref() {
        Some(path) => columnflow_config::init_from_path(path),
        None => columnflow_config::init_from_env_or_default(),
    }
    .context("load columnflow config")?;
    columnflow_logging::init_from_config(cfg);
    let limits = cfg.build_limits()?;

    let mut dot = String::new();
    print_pipeline(&build_graph(args.limit)?, &mut dot).context("render pipeline graph")?;
    println!("{dot}");

    let single = run(&limits, args.limit, None)?;
    let pool = ThreadPool::new(POOL_THREADS);
    let multi = run(&limits, args.limit, Some(&pool))?;

    info!("demo finished");
    println!("Time with 1 thread: {:.3} sec.", single.as_secs_f64());
    println!(
        "Time with {POOL_THREADS} threads: {:.3} sec.",
        multi.as_secs_f64()
    );
    Ok(())
}
