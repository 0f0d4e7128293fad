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
//! Probe kernels and joined-row assembly.
//!
//! The hash kernel is monomorphized over the four per-join flags
//! (build-outer, probe-outer, non-equality predicate, bloom filter) so the
//! per-row loop carries no branches for features the join does not use; the
//! nested-loop kernel does the same over the first three. Both collect row
//! index pairs and defer all column materialization to `assemble`, which
//! gathers kept columns with `take` and fills the missing side of outer
//! rows through null indices.

use arrow::array::{
    new_null_array, Array, ArrayRef, BooleanArray, RecordBatch, RecordBatchOptions, UInt32Array,
};
use arrow::compute::take;
use arrow::datatypes::SchemaRef;

use crate::exec::chunk::Chunk;
use crate::exec::expr::JoinCondEval;

use super::hash_table::KeyedRows;
use super::state::{HashJoinState, NestedLoopJoinState};

/// Output column layout computed at join construction: probe kept columns,
/// then the mark column for mark joins, then build kept columns.
pub(crate) struct OutputLayout {
    pub(crate) schema: SchemaRef,
    /// Reordered probe-side positions emitted, in output order.
    pub(crate) probe_kept: Vec<usize>,
    /// Reordered build-side positions emitted, in output order.
    pub(crate) build_kept: Vec<usize>,
    pub(crate) mark: bool,
}

/// Hash-probe one reordered probe chunk against the finalized build side.
pub(crate) fn probe_hash_batch<
    const BUILD_OUTER: bool,
    const PROBE_OUTER: bool,
    const HAS_PRED: bool,
    const USE_BLOOM: bool,
>(
    probe: &Chunk,
    keyed: &KeyedRows,
    state: &mut HashJoinState,
    pred: Option<&dyn JoinCondEval>,
    layout: &OutputLayout,
) -> Result<RecordBatch, String> {
    let table = &state.table;
    let bloom = state.bloom.as_ref();
    // RecordBatch clones are arc bumps; cloning here releases the accumulator
    // borrow so matched flags can be set while probing.
    let build_chunk = state.build.chunk()?.clone();
    let build = &mut state.build;

    let group_ids = table.lookup_batch(keyed)?;
    let mut probe_indices: Vec<Option<u32>> = Vec::new();
    let mut build_indices: Vec<Option<u32>> = Vec::new();
    let mut mark_flags: Vec<bool> = Vec::new();

    for row in 0..probe.len() {
        let mut matched_any = false;
        let group_id = if USE_BLOOM {
            let passes = match bloom {
                Some(filter) => filter.test_hash(keyed.hashes[row]),
                None => true,
            };
            if passes { group_ids[row] } else { None }
        } else {
            group_ids[row]
        };
        if let Some(group_id) = group_id {
            for build_row in table.group_rows_slice(group_id)? {
                if HAS_PRED {
                    let pred = pred
                        .ok_or_else(|| "join predicate missing for predicated probe".to_string())?;
                    if !pred.evaluate(
                        &probe.batch,
                        &build_chunk.batch,
                        row,
                        *build_row as usize,
                    )? {
                        continue;
                    }
                }
                matched_any = true;
                if BUILD_OUTER {
                    build.mark_matched(*build_row as usize);
                }
                if layout.mark {
                    // Existence only; stop at the first passing build row.
                    break;
                }
                probe_indices.push(Some(row as u32));
                build_indices.push(Some(*build_row));
            }
        }
        if layout.mark {
            probe_indices.push(Some(row as u32));
            mark_flags.push(matched_any);
        } else if PROBE_OUTER && !matched_any {
            probe_indices.push(Some(row as u32));
            build_indices.push(None);
        }
    }

    let mark = layout.mark.then_some(mark_flags);
    assemble(layout, probe, &build_chunk, &probe_indices, &build_indices, mark)
}

/// Nested-loop probe: every probe row against every build row, optionally
/// filtered by the predicate. Used for cross joins and joins whose
/// conditions carry no equality.
pub(crate) fn probe_nested_loop_batch<
    const BUILD_OUTER: bool,
    const PROBE_OUTER: bool,
    const HAS_PRED: bool,
>(
    probe: &Chunk,
    state: &mut NestedLoopJoinState,
    pred: Option<&dyn JoinCondEval>,
    layout: &OutputLayout,
) -> Result<RecordBatch, String> {
    let build_chunk = state.build.chunk()?.clone();
    let build = &mut state.build;

    let mut probe_indices: Vec<Option<u32>> = Vec::new();
    let mut build_indices: Vec<Option<u32>> = Vec::new();
    let mut mark_flags: Vec<bool> = Vec::new();

    for row in 0..probe.len() {
        let mut matched_any = false;
        for build_row in 0..build_chunk.len() {
            if HAS_PRED {
                let pred = pred
                    .ok_or_else(|| "join predicate missing for predicated probe".to_string())?;
                if !pred.evaluate(&probe.batch, &build_chunk.batch, row, build_row)? {
                    continue;
                }
            }
            matched_any = true;
            if BUILD_OUTER {
                build.mark_matched(build_row);
            }
            if layout.mark {
                break;
            }
            probe_indices.push(Some(row as u32));
            build_indices.push(Some(build_row as u32));
        }
        if layout.mark {
            probe_indices.push(Some(row as u32));
            mark_flags.push(matched_any);
        } else if PROBE_OUTER && !matched_any {
            probe_indices.push(Some(row as u32));
            build_indices.push(None);
        }
    }

    let mark = layout.mark.then_some(mark_flags);
    assemble(layout, probe, &build_chunk, &probe_indices, &build_indices, mark)
}

/// Emit one row per never-matched build row, probe side null. Runs once when
/// a build-outer join sees the end of probe input.
pub(crate) fn flush_build_unmatched(
    build_chunk: &Chunk,
    unmatched: Vec<u32>,
    probe_schema: SchemaRef,
    layout: &OutputLayout,
) -> Result<RecordBatch, String> {
    let probe = Chunk::empty(probe_schema);
    let probe_indices = vec![None; unmatched.len()];
    let build_indices = unmatched.into_iter().map(Some).collect::<Vec<_>>();
    assemble(layout, &probe, build_chunk, &probe_indices, &build_indices, None)
}

/// Gather the output columns for the collected row index pairs. A `None`
/// index yields nulls for that side's columns; an empty source chunk (only
/// legal when every index for it is `None`) short-circuits to null arrays.
fn assemble(
    layout: &OutputLayout,
    probe: &Chunk,
    build: &Chunk,
    probe_indices: &[Option<u32>],
    build_indices: &[Option<u32>],
    mark_flags: Option<Vec<bool>>,
) -> Result<RecordBatch, String> {
    let num_rows = probe_indices.len();
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(layout.schema.fields().len());

    let probe_index_array = UInt32Array::from(probe_indices.to_vec());
    for pos in &layout.probe_kept {
        columns.push(gather_column(probe, *pos, &probe_index_array, num_rows)?);
    }
    if layout.mark {
        let flags = mark_flags
            .ok_or_else(|| "mark join probe produced no mark flags".to_string())?;
        if flags.len() != num_rows {
            return Err("mark join flag count does not match output rows".to_string());
        }
        columns.push(std::sync::Arc::new(BooleanArray::from(flags)) as ArrayRef);
    }
    let build_index_array = UInt32Array::from(build_indices.to_vec());
    for pos in &layout.build_kept {
        columns.push(gather_column(build, *pos, &build_index_array, num_rows)?);
    }

    let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
    RecordBatch::try_new_with_options(layout.schema.clone(), columns, &options)
        .map_err(|e| e.to_string())
}

fn gather_column(
    source: &Chunk,
    position: usize,
    indices: &UInt32Array,
    num_rows: usize,
) -> Result<ArrayRef, String> {
    let column = source.column(position)?;
    if source.is_empty() {
        if indices.null_count() != indices.len() {
            return Err("join gather from empty side with live row indices".to_string());
        }
        return Ok(new_null_array(column.data_type(), num_rows));
    }
    take(column.as_ref(), indices, None).map_err(|e| e.to_string())
}
