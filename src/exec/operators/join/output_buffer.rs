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
//! Row-bounded staging buffer for join output chunks.
//!
//! Probe kernels append result batches of arbitrary size; the buffer
//! re-chunks them so downstream operators see batches of at most the
//! configured chunk capacity, and reports backpressure once the backlog
//! exceeds twice that capacity.

use std::collections::VecDeque;

use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;

use crate::exec::chunk::Chunk;

pub(crate) struct JoinOutputBuffer {
    schema: SchemaRef,
    chunk_capacity: usize,
    chunks: VecDeque<RecordBatch>,
    total_remaining: usize,
}

impl JoinOutputBuffer {
    pub(crate) fn new(schema: SchemaRef, chunk_capacity: usize) -> Self {
        Self {
            schema,
            chunk_capacity: chunk_capacity.max(1),
            chunks: VecDeque::new(),
            total_remaining: 0,
        }
    }

    pub(crate) fn push(&mut self, batch: RecordBatch) -> Result<(), String> {
        if batch.schema() != self.schema {
            return Err("join output batch schema mismatch".to_string());
        }
        if batch.num_rows() == 0 {
            return Ok(());
        }
        self.total_remaining += batch.num_rows();
        self.chunks.push_back(batch);
        Ok(())
    }

    pub(crate) fn total_remaining(&self) -> usize {
        self.total_remaining
    }

    /// Enough backlog that the probe should stop requesting input.
    pub(crate) fn has_backpressure(&self) -> bool {
        self.total_remaining > 2 * self.chunk_capacity
    }

    /// Pop up to one chunk of `chunk_capacity` rows. Without `force`, a
    /// partial trailing chunk stays buffered so steady-state output is
    /// full-sized; `force` drains it at end of input.
    pub(crate) fn pop_chunk(&mut self, force: bool) -> Result<Option<Chunk>, String> {
        if self.total_remaining == 0 {
            return Ok(None);
        }
        if !force && self.total_remaining < self.chunk_capacity {
            return Ok(None);
        }

        let mut parts = Vec::new();
        let mut rows = 0usize;
        while rows < self.chunk_capacity {
            let Some(batch) = self.chunks.pop_front() else {
                break;
            };
            let want = self.chunk_capacity - rows;
            if batch.num_rows() > want {
                parts.push(batch.slice(0, want));
                self.chunks
                    .push_front(batch.slice(want, batch.num_rows() - want));
                rows += want;
            } else {
                rows += batch.num_rows();
                parts.push(batch);
            }
        }
        self.total_remaining -= rows;
        let batch = if parts.len() == 1 {
            parts.into_iter().next().ok_or_else(|| "join output buffer pop lost its batch".to_string())?
        } else {
            concat_batches(&self.schema, parts.iter()).map_err(|e| e.to_string())?
        };
        Ok(Some(Chunk::new(batch)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, true)]))
    }

    fn batch(schema: &SchemaRef, values: Vec<i32>) -> RecordBatch {
        RecordBatch::try_new(schema.clone(), vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    #[test]
    fn partial_chunk_held_until_forced() {
        let schema = schema();
        let mut buffer = JoinOutputBuffer::new(schema.clone(), 4);
        buffer.push(batch(&schema, vec![1, 2, 3])).unwrap();
        assert!(buffer.pop_chunk(false).unwrap().is_none());
        let chunk = buffer.pop_chunk(true).unwrap().expect("forced pop");
        assert_eq!(chunk.len(), 3);
        assert_eq!(buffer.total_remaining(), 0);
    }

    #[test]
    fn pops_are_capacity_bounded() {
        let schema = schema();
        let mut buffer = JoinOutputBuffer::new(schema.clone(), 2);
        buffer.push(batch(&schema, vec![1, 2, 3, 4, 5])).unwrap();
        assert!(buffer.has_backpressure());
        let first = buffer.pop_chunk(false).unwrap().expect("chunk");
        assert_eq!(first.len(), 2);
        let second = buffer.pop_chunk(false).unwrap().expect("chunk");
        assert_eq!(second.len(), 2);
        assert!(buffer.pop_chunk(false).unwrap().is_none());
        let last = buffer.pop_chunk(true).unwrap().expect("chunk");
        assert_eq!(last.len(), 1);
        assert!(!buffer.has_backpressure());
    }
}
