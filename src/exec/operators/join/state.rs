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
//! State shared between the build sink and the probe processor of one join.
//!
//! The sink and the processor run in different pipelines; they hand off
//! through an `Arc<Mutex<JoinState>>` created at operator construction.
//! The build side writes until `build_finalized` flips; the probe side
//! reads after.

use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;

use crate::exec::chunk::Chunk;
use crate::exec::runtime_filter::JoinBloomFilter;
use crate::exec::shuffle::{PartitionExchange, ShuffleBuffer};

use super::hash_table::JoinHashTable;
use super::output_buffer::JoinOutputBuffer;

/// Build-side rows in the keys-first reordered layout, accumulated chunk by
/// chunk and concatenated at finalize so hash-table row ids index straight
/// into one batch.
pub(crate) struct BuildAccumulator {
    schema: SchemaRef,
    chunks: Vec<Chunk>,
    finalized: Option<Chunk>,
    /// Per-build-row match flags, used by right/full joins. Sized at finalize.
    pub(crate) matched: Vec<bool>,
}

impl BuildAccumulator {
    pub(crate) fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            chunks: Vec::new(),
            finalized: None,
            matched: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, chunk: Chunk) -> Result<(), String> {
        if self.finalized.is_some() {
            return Err("join build accumulator already finalized".to_string());
        }
        if chunk.schema() != self.schema {
            return Err("join build chunk schema mismatch".to_string());
        }
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
        Ok(())
    }

    pub(crate) fn row_count(&self) -> usize {
        match &self.finalized {
            Some(chunk) => chunk.len(),
            None => self.chunks.iter().map(|c| c.len()).sum(),
        }
    }

    pub(crate) fn finalize(&mut self, track_matches: bool) -> Result<(), String> {
        if self.finalized.is_some() {
            return Ok(());
        }
        let batches = self
            .chunks
            .iter()
            .map(|c| c.batch.clone())
            .collect::<Vec<_>>();
        let chunk = if batches.is_empty() {
            Chunk::empty(self.schema.clone())
        } else {
            Chunk::new(concat_batches(&self.schema, batches.iter()).map_err(|e| e.to_string())?)
        };
        if track_matches {
            self.matched = vec![false; chunk.len()];
        }
        self.chunks.clear();
        self.finalized = Some(chunk);
        Ok(())
    }

    pub(crate) fn chunk(&self) -> Result<&Chunk, String> {
        self.finalized
            .as_ref()
            .ok_or_else(|| "join build side not finalized".to_string())
    }

    pub(crate) fn mark_matched(&mut self, row: usize) {
        if let Some(flag) = self.matched.get_mut(row) {
            *flag = true;
        }
    }

    /// Build rows never matched during probing, in build order.
    pub(crate) fn unmatched_rows(&self) -> Vec<u32> {
        self.matched
            .iter()
            .enumerate()
            .filter(|(_, matched)| !**matched)
            .map(|(row, _)| row as u32)
            .collect()
    }
}

/// Outgoing repartition buffer plus the exchange it flushes into.
pub(crate) struct ShuffleLane {
    pub(crate) buffer: ShuffleBuffer,
    pub(crate) exchange: Box<dyn PartitionExchange>,
}

pub(crate) struct HashJoinState {
    pub(crate) table: JoinHashTable,
    pub(crate) build: BuildAccumulator,
    pub(crate) bloom: Option<JoinBloomFilter>,
    pub(crate) build_shuffle: Option<ShuffleLane>,
    pub(crate) probe_shuffle: Option<ShuffleLane>,
}

pub(crate) struct NestedLoopJoinState {
    pub(crate) build: BuildAccumulator,
}

pub(crate) enum JoinStateKind {
    Hash(HashJoinState),
    NestedLoop(NestedLoopJoinState),
}

pub(crate) struct JoinState {
    pub(crate) kind: JoinStateKind,
    pub(crate) output: JoinOutputBuffer,
    pub(crate) build_finalized: bool,
}

impl JoinState {
    pub(crate) fn hash_mut(&mut self) -> Result<&mut HashJoinState, String> {
        match &mut self.kind {
            JoinStateKind::Hash(state) => Ok(state),
            JoinStateKind::NestedLoop(_) => {
                Err("join state kind mismatch: expected hash join state".to_string())
            }
        }
    }

    pub(crate) fn nested_loop_mut(&mut self) -> Result<&mut NestedLoopJoinState, String> {
        match &mut self.kind {
            JoinStateKind::NestedLoop(state) => Ok(state),
            JoinStateKind::Hash(_) => {
                Err("join state kind mismatch: expected nested loop state".to_string())
            }
        }
    }
}
