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
//! Build-side sink of the join: accumulates the right input and freezes it
//! into the probe-ready hash table (or nested-loop buffer) at finalize.
//!
//! In a repartitioned plan incoming chunks are routed through the shuffle
//! lane by key hash; only chunks received back from the exchange are
//! inserted, so each worker indexes exactly its key range. A full shuffle
//! buffer surfaces as `HaveMoreOutput` so the driver yields before pushing
//! more input.

use std::sync::{Arc, Mutex};

use arrow::datatypes::SchemaRef;

use crate::common::logging::debug;
use crate::exec::chunk::Chunk;
use crate::exec::pipeline::operator::{OperatorResult, PhysicalOperator, SinkOperator};

use super::state::{HashJoinState, JoinState, JoinStateKind};

pub struct JoinBuildSink {
    name: String,
    state: Arc<Mutex<JoinState>>,
    /// Keys-first reorder projection applied to every incoming chunk.
    reorder: Vec<usize>,
    reordered_schema: SchemaRef,
    track_build_matches: bool,
}

impl JoinBuildSink {
    pub(crate) fn new(
        name: String,
        state: Arc<Mutex<JoinState>>,
        reorder: Vec<usize>,
        reordered_schema: SchemaRef,
        track_build_matches: bool,
    ) -> Self {
        Self {
            name,
            state,
            reorder,
            reordered_schema,
            track_build_matches,
        }
    }

    fn consume_hash(
        &self,
        hash: &mut HashJoinState,
        reordered: Chunk,
        is_last: bool,
    ) -> Result<OperatorResult, String> {
        let key_count = hash.table.key_count();
        if !reordered.is_empty() {
            match &mut hash.build_shuffle {
                Some(lane) => {
                    let keyed = hash.table.keyed_rows(&reordered.columns()[..key_count])?;
                    lane.buffer.append_partitioned(&reordered, &keyed.hashes)?;
                }
                None => ingest(hash, &reordered)?,
            }
        }

        if let Some(mut lane) = hash.build_shuffle.take() {
            let result = if is_last {
                lane.buffer.flush(lane.exchange.as_mut())?;
                OperatorResult::Finished
            } else if lane.buffer.buffers_full() {
                lane.buffer.flush(lane.exchange.as_mut())?;
                OperatorResult::HaveMoreOutput
            } else {
                OperatorResult::NeedMoreInput
            };
            while let Some(received) = lane.exchange.try_receive()? {
                ingest(hash, &received)?;
            }
            hash.build_shuffle = Some(lane);
            return Ok(result);
        }

        Ok(if is_last {
            OperatorResult::Finished
        } else {
            OperatorResult::NeedMoreInput
        })
    }
}

/// Index one reordered chunk: hash-table rows, bloom bits, and the row store,
/// inserted together so build row ids stay aligned across the three.
fn ingest(hash: &mut HashJoinState, reordered: &Chunk) -> Result<(), String> {
    let key_count = hash.table.key_count();
    let keyed = hash.table.keyed_rows(&reordered.columns()[..key_count])?;
    if let Some(bloom) = &mut hash.bloom {
        for row in 0..keyed.len() {
            if !keyed.null_keys[row] {
                bloom.insert_hash(keyed.hashes[row]);
            }
        }
    }
    hash.table.add_build_batch(&keyed)?;
    hash.build.push(reordered.clone())
}

impl PhysicalOperator for JoinBuildSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_schema(&self) -> SchemaRef {
        self.reordered_schema.clone()
    }
}

impl SinkOperator for JoinBuildSink {
    fn consume_batch(
        &mut self,
        chunk: Chunk,
        prev: OperatorResult,
    ) -> Result<OperatorResult, String> {
        let is_last = prev.is_finished();
        let reordered = chunk.project(&self.reorder)?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| "join state mutex poisoned".to_string())?;
        if state.build_finalized {
            return Err(format!("{} received input after finalize", self.name));
        }
        match &mut state.kind {
            JoinStateKind::Hash(hash) => self.consume_hash(hash, reordered, is_last),
            JoinStateKind::NestedLoop(nested) => {
                nested.build.push(reordered)?;
                Ok(if is_last {
                    OperatorResult::Finished
                } else {
                    OperatorResult::NeedMoreInput
                })
            }
        }
    }

    fn finalize(&mut self) -> Result<(), String> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| "join state mutex poisoned".to_string())?;
        if state.build_finalized {
            return Ok(());
        }
        match &mut state.kind {
            JoinStateKind::Hash(hash) => {
                hash.table.finalize_groups()?;
                hash.build.finalize(self.track_build_matches)?;
                debug!(
                    "{}: build finalized, rows={} groups={}",
                    self.name,
                    hash.table.row_count(),
                    hash.table.group_count()
                );
            }
            JoinStateKind::NestedLoop(nested) => {
                nested.build.finalize(self.track_build_matches)?;
                debug!(
                    "{}: build finalized, rows={}",
                    self.name,
                    nested.build.row_count()
                );
            }
        }
        state.build_finalized = true;
        Ok(())
    }
}
