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
//! Pipeline driver for a single source → transforms → sink chain.
//!
//! Responsibilities:
//! - Pulls batches from the source, pushes them through each transform in
//!   order, and delivers them to the sink, aggregating flow-control results.
//! - Re-polls a stage that reported `HaveMoreOutput` with an empty batch
//!   instead of requesting new input, and keeps feeding empty last batches
//!   after the source finishes until every stage has drained.
//!
//! Key exported interfaces:
//! - Types: `Pipeline`.

use crate::common::logging::debug;
use crate::exec::chunk::Chunk;
use crate::exec::pipeline::operator::{
    OperatorResult, ProcessorOperator, SinkOperator, SourceOperator,
};

/// An ordered chain of one source, zero or more transforms, and one sink.
pub struct Pipeline {
    source: Box<dyn SourceOperator>,
    transforms: Vec<Box<dyn ProcessorOperator>>,
    sink: Box<dyn SinkOperator>,
    executed: bool,
}

impl Pipeline {
    pub(crate) fn new(
        source: Box<dyn SourceOperator>,
        transforms: Vec<Box<dyn ProcessorOperator>>,
        sink: Box<dyn SinkOperator>,
    ) -> Self {
        Self {
            source,
            transforms,
            sink,
            executed: false,
        }
    }

    pub fn executed(&self) -> bool {
        self.executed
    }

    /// Drive the pipeline to completion. Returns the number of source batches
    /// processed, for instrumentation.
    pub fn execute(&mut self) -> Result<u64, String> {
        if self.executed {
            return Err(format!(
                "pipeline with sink {} executed twice",
                self.sink.name()
            ));
        }
        let mut batches = 0u64;
        loop {
            let (chunk, source_result) = self.source.produce_batch()?;
            batches = batches.saturating_add(1);
            let source_finished = source_result.is_finished();
            let finished = self.push_from(0, chunk, source_result)?;
            if finished {
                break;
            }
            if source_finished {
                // Downstream stages may still be draining buffered output;
                // keep feeding empty last batches until everything reports
                // finished.
                loop {
                    let empty = Chunk::empty(self.source.output_schema());
                    if self.push_from(0, empty, OperatorResult::Finished)? {
                        break;
                    }
                }
                break;
            }
        }
        self.sink.finalize()?;
        self.executed = true;
        debug!(
            "pipeline finished: source={} sink={} source_batches={}",
            self.source.name(),
            self.sink.name(),
            batches
        );
        Ok(batches)
    }

    /// Retrieve the sink's terminal result; legal only after execution and
    /// only on collecting sinks.
    pub fn get_result(&mut self) -> Result<Chunk, String> {
        if !self.executed {
            return Err(format!(
                "pipeline with sink {} has not been executed",
                self.sink.name()
            ));
        }
        self.sink.get_result()
    }

    /// Push `chunk` into the stage at `idx` and onward. Returns true once some
    /// stage at or below `idx` reports the pipeline finished.
    fn push_from(
        &mut self,
        idx: usize,
        chunk: Chunk,
        prev: OperatorResult,
    ) -> Result<bool, String> {
        if idx == self.transforms.len() {
            let mut chunk = chunk;
            loop {
                match self.sink.consume_batch(chunk, prev)? {
                    OperatorResult::Finished => return Ok(true),
                    OperatorResult::NeedMoreInput => return Ok(false),
                    OperatorResult::HaveMoreOutput => {
                        // Sink backpressure (e.g. a saturated shuffle buffer):
                        // re-invoke with an empty batch so it can flush before
                        // new input is pulled.
                        chunk = Chunk::empty(self.sink_input_schema());
                    }
                }
            }
        }

        let mut chunk = chunk;
        let mut prev = prev;
        loop {
            let (out, result) = self.transforms[idx].process_batch(chunk, prev)?;
            if self.push_from(idx + 1, out, result)? {
                return Ok(true);
            }
            match result {
                OperatorResult::Finished => return Ok(true),
                OperatorResult::NeedMoreInput => return Ok(false),
                OperatorResult::HaveMoreOutput => {
                    // Drain this stage's buffered output before requesting
                    // more input from upstream.
                    chunk = Chunk::empty(self.stage_input_schema(idx));
                    prev = OperatorResult::NeedMoreInput;
                }
            }
        }
    }

    fn stage_input_schema(&self, idx: usize) -> arrow::datatypes::SchemaRef {
        if idx == 0 {
            self.source.output_schema()
        } else {
            self.transforms[idx - 1].output_schema()
        }
    }

    fn sink_input_schema(&self) -> arrow::datatypes::SchemaRef {
        match self.transforms.last() {
            Some(t) => t.output_schema(),
            None => self.source.output_schema(),
        }
    }
}
