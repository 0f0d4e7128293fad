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
//! Terminal collecting sink for query output rows.
//!
//! Responsibilities:
//! - Buffers every delivered chunk and exposes the concatenated result via
//!   `get_result`, the one sink role where result retrieval is legal.
//! - Tracks completion from the upstream flow-control signal so an empty
//!   final batch still terminates the pipeline.

use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;

use crate::common::logging::debug;
use crate::exec::chunk::Chunk;
use crate::exec::pipeline::operator::{OperatorResult, PhysicalOperator, SinkOperator};

/// Collects output chunks for terminal retrieval by the query driver.
pub struct ResultSink {
    name: String,
    schema: SchemaRef,
    chunks: Vec<Chunk>,
    finished: bool,
}

impl ResultSink {
    pub fn new(schema: SchemaRef, node_id: i32) -> Self {
        let name = if node_id >= 0 {
            format!("RESULT_SINK (id={node_id})")
        } else {
            "RESULT_SINK".to_string()
        };
        Self {
            name,
            schema,
            chunks: Vec::new(),
            finished: false,
        }
    }
}

impl PhysicalOperator for ResultSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl SinkOperator for ResultSink {
    fn consume_batch(
        &mut self,
        chunk: Chunk,
        prev: OperatorResult,
    ) -> Result<OperatorResult, String> {
        if self.finished {
            return Ok(OperatorResult::Finished);
        }
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
        if prev.is_finished() {
            self.finished = true;
            return Ok(OperatorResult::Finished);
        }
        Ok(OperatorResult::NeedMoreInput)
    }

    fn finalize(&mut self) -> Result<(), String> {
        let rows: usize = self.chunks.iter().map(|c| c.len()).sum();
        debug!("{} finalized: chunks={} rows={}", self.name, self.chunks.len(), rows);
        Ok(())
    }

    fn get_result(&mut self) -> Result<Chunk, String> {
        let batches: Vec<_> = self.chunks.iter().map(|c| c.batch.clone()).collect();
        let batch = concat_batches(&self.schema, batches.iter()).map_err(|e| e.to_string())?;
        Ok(Chunk::new(batch))
    }
}
