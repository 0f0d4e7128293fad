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
//! Column-subset projection transform.

use arrow::datatypes::SchemaRef;

use crate::exec::chunk::Chunk;
use crate::exec::pipeline::operator::{OperatorResult, PhysicalOperator, ProcessorOperator};

/// Stateless transform keeping a subset of input columns, in the given order.
pub struct ProjectionProcessor {
    name: String,
    indices: Vec<usize>,
    output_schema: SchemaRef,
}

impl ProjectionProcessor {
    pub fn new(input_schema: &SchemaRef, indices: Vec<usize>, node_id: i32) -> Result<Self, String> {
        for idx in &indices {
            if *idx >= input_schema.fields().len() {
                return Err(format!(
                    "projection column index {} out of bounds (input_columns={})",
                    idx,
                    input_schema.fields().len()
                ));
            }
        }
        let output_schema = std::sync::Arc::new(
            input_schema
                .project(&indices)
                .map_err(|e| e.to_string())?,
        );
        let name = if node_id >= 0 {
            format!("PROJECT (id={node_id})")
        } else {
            "PROJECT".to_string()
        };
        Ok(Self {
            name,
            indices,
            output_schema,
        })
    }
}

impl PhysicalOperator for ProjectionProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_schema(&self) -> SchemaRef {
        self.output_schema.clone()
    }
}

impl ProcessorOperator for ProjectionProcessor {
    fn process_batch(
        &mut self,
        chunk: Chunk,
        prev: OperatorResult,
    ) -> Result<(Chunk, OperatorResult), String> {
        let projected = chunk.project(&self.indices)?;
        // No internal buffering: completion tracks the upstream signal.
        let result = if prev.is_finished() {
            OperatorResult::Finished
        } else {
            OperatorResult::NeedMoreInput
        };
        Ok((projected, result))
    }
}
