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
//! Pipeline assembly and dependency-ordered graph execution.
//!
//! Responsibilities:
//! - Builds single pipelines from a source, optional transforms, and a sink.
//! - Orders pipelines so a join's build pipeline fully drains (sink finalized)
//!   before any pipeline probing the same join state runs.
//!
//! Key exported interfaces:
//! - Types: `PipelineBuilder`, `PipelineGraph`.

use crate::common::logging::debug;
use crate::exec::pipeline::operator::{ProcessorOperator, SinkOperator, SourceOperator};
use crate::exec::pipeline::pipeline::Pipeline;

/// Assembles one pipeline stage by stage.
pub struct PipelineBuilder {
    source: Box<dyn SourceOperator>,
    transforms: Vec<Box<dyn ProcessorOperator>>,
}

impl PipelineBuilder {
    pub fn new(source: Box<dyn SourceOperator>) -> Self {
        Self {
            source,
            transforms: Vec::new(),
        }
    }

    pub fn add_processor(&mut self, op: Box<dyn ProcessorOperator>) {
        self.transforms.push(op);
    }

    pub fn build(self, sink: Box<dyn SinkOperator>) -> Pipeline {
        Pipeline::new(self.source, self.transforms, sink)
    }
}

/// One or more pipelines with explicit dependency ordering.
pub struct PipelineGraph {
    pipelines: Vec<Pipeline>,
    dependencies: Vec<Vec<usize>>,
}

impl PipelineGraph {
    pub fn new() -> Self {
        Self {
            pipelines: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Register a pipeline whose execution must wait for `deps` (indices of
    /// previously added pipelines, e.g. a join's build pipeline). Returns the
    /// new pipeline's index.
    pub fn add_pipeline(&mut self, pipeline: Pipeline, deps: &[usize]) -> Result<usize, String> {
        let index = self.pipelines.len();
        for dep in deps {
            if *dep >= index {
                return Err(format!(
                    "pipeline dependency {} does not precede pipeline {}",
                    dep, index
                ));
            }
        }
        self.pipelines.push(pipeline);
        self.dependencies.push(deps.to_vec());
        Ok(index)
    }

    /// Execute every pipeline in dependency order. A fatal error from any
    /// pipeline aborts the whole graph.
    pub fn execute(&mut self) -> Result<(), String> {
        for index in 0..self.pipelines.len() {
            for dep in &self.dependencies[index] {
                if !self.pipelines[*dep].executed() {
                    return Err(format!(
                        "pipeline {} scheduled before its dependency {}",
                        index, dep
                    ));
                }
            }
            let batches = self.pipelines[index].execute()?;
            debug!("pipeline {} executed: source_batches={}", index, batches);
        }
        Ok(())
    }

    pub fn pipeline_mut(&mut self, index: usize) -> Result<&mut Pipeline, String> {
        let count = self.pipelines.len();
        self.pipelines
            .get_mut(index)
            .ok_or_else(|| format!("pipeline index {} out of bounds (pipelines={})", index, count))
    }
}

impl Default for PipelineGraph {
    fn default() -> Self {
        Self::new()
    }
}
