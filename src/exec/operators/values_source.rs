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
//! In-memory source operator emitting a fixed sequence of chunks.

use std::collections::VecDeque;

use arrow::datatypes::SchemaRef;

use crate::exec::chunk::Chunk;
use crate::exec::pipeline::operator::{OperatorResult, PhysicalOperator, SourceOperator};

/// Finite source over pre-built chunks, with deterministic emission order.
/// Leaf operator for literal plan rows and for tests.
pub struct ValuesSource {
    name: String,
    schema: SchemaRef,
    chunks: VecDeque<Chunk>,
}

impl ValuesSource {
    pub fn new(schema: SchemaRef, chunks: Vec<Chunk>, node_id: i32) -> Result<Self, String> {
        for (idx, chunk) in chunks.iter().enumerate() {
            if chunk.schema() != schema {
                return Err(format!(
                    "values source chunk {} schema does not match declared schema",
                    idx
                ));
            }
        }
        let name = if node_id >= 0 {
            format!("VALUES_SOURCE (id={node_id})")
        } else {
            "VALUES_SOURCE".to_string()
        };
        Ok(Self {
            name,
            schema,
            chunks: chunks.into(),
        })
    }
}

impl PhysicalOperator for ValuesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl SourceOperator for ValuesSource {
    fn produce_batch(&mut self) -> Result<(Chunk, OperatorResult), String> {
        match self.chunks.pop_front() {
            Some(chunk) => {
                let result = if self.chunks.is_empty() {
                    OperatorResult::Finished
                } else {
                    OperatorResult::HaveMoreOutput
                };
                Ok((chunk, result))
            }
            None => Ok((Chunk::empty(self.schema.clone()), OperatorResult::Finished)),
        }
    }
}
