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
//! Probe-side transform of the join.
//!
//! Each call reorders the incoming chunk keys-first, probes it against the
//! frozen build side, and stages joined rows in the shared output buffer.
//! The per-join flag combination picks one monomorphized kernel once per
//! batch. On the last input of a build-outer join the never-matched build
//! rows are flushed exactly once; `Finished` is reported only after the
//! output buffer fully drains.

use std::sync::{Arc, Mutex};

use arrow::datatypes::SchemaRef;

use crate::exec::chunk::Chunk;
use crate::exec::expr::JoinCondEval;
use crate::exec::pipeline::operator::{OperatorResult, PhysicalOperator, ProcessorOperator};

use super::probe::{
    flush_build_unmatched, probe_hash_batch, probe_nested_loop_batch, OutputLayout,
};
use super::state::{HashJoinState, JoinState, NestedLoopJoinState};

pub struct JoinProbeProcessor {
    name: String,
    state: Arc<Mutex<JoinState>>,
    /// Keys-first reorder projection applied to every incoming chunk.
    reorder: Vec<usize>,
    reordered_schema: SchemaRef,
    layout: OutputLayout,
    pred: Option<Box<dyn JoinCondEval>>,
    nested_loop: bool,
    build_outer: bool,
    probe_outer: bool,
    use_bloom: bool,
    build_unmatched_flushed: bool,
}

impl JoinProbeProcessor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        state: Arc<Mutex<JoinState>>,
        reorder: Vec<usize>,
        reordered_schema: SchemaRef,
        layout: OutputLayout,
        pred: Option<Box<dyn JoinCondEval>>,
        nested_loop: bool,
        build_outer: bool,
        probe_outer: bool,
        use_bloom: bool,
    ) -> Self {
        Self {
            name,
            state,
            reorder,
            reordered_schema,
            layout,
            pred,
            nested_loop,
            build_outer,
            probe_outer,
            use_bloom,
            build_unmatched_flushed: false,
        }
    }

    fn probe_hash(
        &self,
        hash: &mut HashJoinState,
        chunk: &Chunk,
    ) -> Result<arrow::array::RecordBatch, String> {
        let key_count = hash.table.key_count();
        let keyed = hash.table.keyed_rows(&chunk.columns()[..key_count])?;
        let pred = self.pred.as_deref();
        let layout = &self.layout;
        // One arm per flag combination so each join runs a kernel with the
        // unused features compiled out.
        match (self.build_outer, self.probe_outer, pred.is_some(), self.use_bloom) {
            (false, false, false, false) => {
                probe_hash_batch::<false, false, false, false>(chunk, &keyed, hash, pred, layout)
            }
            (false, false, false, true) => {
                probe_hash_batch::<false, false, false, true>(chunk, &keyed, hash, pred, layout)
            }
            (false, false, true, false) => {
                probe_hash_batch::<false, false, true, false>(chunk, &keyed, hash, pred, layout)
            }
            (false, false, true, true) => {
                probe_hash_batch::<false, false, true, true>(chunk, &keyed, hash, pred, layout)
            }
            (false, true, false, false) => {
                probe_hash_batch::<false, true, false, false>(chunk, &keyed, hash, pred, layout)
            }
            (false, true, false, true) => {
                probe_hash_batch::<false, true, false, true>(chunk, &keyed, hash, pred, layout)
            }
            (false, true, true, false) => {
                probe_hash_batch::<false, true, true, false>(chunk, &keyed, hash, pred, layout)
            }
            (false, true, true, true) => {
                probe_hash_batch::<false, true, true, true>(chunk, &keyed, hash, pred, layout)
            }
            (true, false, false, false) => {
                probe_hash_batch::<true, false, false, false>(chunk, &keyed, hash, pred, layout)
            }
            (true, false, false, true) => {
                probe_hash_batch::<true, false, false, true>(chunk, &keyed, hash, pred, layout)
            }
            (true, false, true, false) => {
                probe_hash_batch::<true, false, true, false>(chunk, &keyed, hash, pred, layout)
            }
            (true, false, true, true) => {
                probe_hash_batch::<true, false, true, true>(chunk, &keyed, hash, pred, layout)
            }
            (true, true, false, false) => {
                probe_hash_batch::<true, true, false, false>(chunk, &keyed, hash, pred, layout)
            }
            (true, true, false, true) => {
                probe_hash_batch::<true, true, false, true>(chunk, &keyed, hash, pred, layout)
            }
            (true, true, true, false) => {
                probe_hash_batch::<true, true, true, false>(chunk, &keyed, hash, pred, layout)
            }
            (true, true, true, true) => {
                probe_hash_batch::<true, true, true, true>(chunk, &keyed, hash, pred, layout)
            }
        }
    }

    fn probe_nested_loop(
        &self,
        nested: &mut NestedLoopJoinState,
        chunk: &Chunk,
    ) -> Result<arrow::array::RecordBatch, String> {
        let pred = self.pred.as_deref();
        let layout = &self.layout;
        match (self.build_outer, self.probe_outer, pred.is_some()) {
            (false, false, false) => {
                probe_nested_loop_batch::<false, false, false>(chunk, nested, pred, layout)
            }
            (false, false, true) => {
                probe_nested_loop_batch::<false, false, true>(chunk, nested, pred, layout)
            }
            (false, true, false) => {
                probe_nested_loop_batch::<false, true, false>(chunk, nested, pred, layout)
            }
            (false, true, true) => {
                probe_nested_loop_batch::<false, true, true>(chunk, nested, pred, layout)
            }
            (true, false, false) => {
                probe_nested_loop_batch::<true, false, false>(chunk, nested, pred, layout)
            }
            (true, false, true) => {
                probe_nested_loop_batch::<true, false, true>(chunk, nested, pred, layout)
            }
            (true, true, false) => {
                probe_nested_loop_batch::<true, true, false>(chunk, nested, pred, layout)
            }
            (true, true, true) => {
                probe_nested_loop_batch::<true, true, true>(chunk, nested, pred, layout)
            }
        }
    }
}

impl PhysicalOperator for JoinProbeProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_schema(&self) -> SchemaRef {
        self.layout.schema.clone()
    }
}

impl ProcessorOperator for JoinProbeProcessor {
    fn process_batch(
        &mut self,
        chunk: Chunk,
        prev: OperatorResult,
    ) -> Result<(Chunk, OperatorResult), String> {
        let is_last_input = prev.is_finished();
        let reordered = chunk.project(&self.reorder)?;

        let mut guard = self
            .state
            .lock()
            .map_err(|_| "join state mutex poisoned".to_string())?;
        let state: &mut JoinState = &mut guard;
        if !state.build_finalized {
            return Err(format!(
                "{} probed before the build side was finalized",
                self.name
            ));
        }

        // Stage result batches first; the kind borrow must end before the
        // output buffer is touched.
        let mut staged: Vec<arrow::array::RecordBatch> = Vec::new();
        if self.nested_loop {
            let nested = state.nested_loop_mut()?;
            if !reordered.is_empty() {
                staged.push(self.probe_nested_loop(nested, &reordered)?);
            }
            if self.build_outer && is_last_input && !self.build_unmatched_flushed {
                let unmatched = nested.build.unmatched_rows();
                staged.push(flush_build_unmatched(
                    nested.build.chunk()?,
                    unmatched,
                    self.reordered_schema.clone(),
                    &self.layout,
                )?);
                self.build_unmatched_flushed = true;
            }
        } else {
            let hash = state.hash_mut()?;
            if let Some(mut lane) = hash.probe_shuffle.take() {
                if !reordered.is_empty() {
                    let key_count = hash.table.key_count();
                    let keyed = hash.table.keyed_rows(&reordered.columns()[..key_count])?;
                    lane.buffer.append_partitioned(&reordered, &keyed.hashes)?;
                }
                if is_last_input || lane.buffer.buffers_full() {
                    lane.buffer.flush(lane.exchange.as_mut())?;
                }
                while let Some(received) = lane.exchange.try_receive()? {
                    staged.push(self.probe_hash(hash, &received)?);
                }
                hash.probe_shuffle = Some(lane);
            } else if !reordered.is_empty() {
                staged.push(self.probe_hash(hash, &reordered)?);
            }
            if self.build_outer && is_last_input && !self.build_unmatched_flushed {
                let unmatched = hash.build.unmatched_rows();
                staged.push(flush_build_unmatched(
                    hash.build.chunk()?,
                    unmatched,
                    self.reordered_schema.clone(),
                    &self.layout,
                )?);
                self.build_unmatched_flushed = true;
            }
        }
        for batch in staged {
            state.output.push(batch)?;
        }

        let popped = state.output.pop_chunk(is_last_input)?;
        let remaining = state.output.total_remaining();
        let result = if is_last_input && remaining == 0 {
            OperatorResult::Finished
        } else if state.output.has_backpressure() {
            // More than two chunks' worth buffered: drain before taking
            // new input.
            OperatorResult::HaveMoreOutput
        } else {
            // A moderate backlog (or a trailing partial chunk) stays
            // buffered; it pops as further input arrives or when the last
            // batch forces it out.
            OperatorResult::NeedMoreInput
        };
        let out = popped.unwrap_or_else(|| Chunk::empty(self.layout.schema.clone()));
        Ok((out, result))
    }
}
