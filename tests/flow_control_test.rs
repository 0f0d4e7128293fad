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
//! Flow-control tests under a tiny chunk capacity, so a fan-out join
//! saturates the output buffer and the driver's drain loop has to run.
//! Lives in its own binary: the batch size is process-wide.

use std::sync::Arc;

use arrow::array::{Int32Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use streamexec::exec::chunk::Chunk;
use streamexec::exec::operators::join::{
    JoinConditionSpec, JoinOperator, JoinOptions, LogicalJoinNode, LogicalJoinType,
};
use streamexec::exec::operators::result_sink::ResultSink;
use streamexec::exec::operators::values_source::ValuesSource;
use streamexec::exec::pipeline::builder::{PipelineBuilder, PipelineGraph};
use streamexec::exec::pipeline::operator::PhysicalOperator;

/// Must run before the first config read; the value is cached for the
/// process after that.
fn force_small_batches() {
    // SAFETY: tests in this binary only ever set this one variable, to the
    // same value, before spawning any pipeline work.
    unsafe { std::env::set_var("STREAMEXEC_BATCH_SIZE", "2") };
}

fn int_schema(names: &[&str]) -> SchemaRef {
    Arc::new(Schema::new(
        names
            .iter()
            .map(|n| Field::new(*n, DataType::Int32, true))
            .collect::<Vec<_>>(),
    ))
}

fn int_chunk(schema: &SchemaRef, columns: Vec<Vec<Option<i32>>>) -> Chunk {
    let arrays = columns
        .into_iter()
        .map(|values| Arc::new(Int32Array::from(values)) as _)
        .collect();
    Chunk::new(RecordBatch::try_new(schema.clone(), arrays).expect("batch"))
}

fn run_join(
    node: &LogicalJoinNode,
    probe_schema: &SchemaRef,
    probe_chunks: Vec<Chunk>,
    build_schema: &SchemaRef,
    build_chunks: Vec<Chunk>,
) -> Chunk {
    let (build_sink, probe_processor) =
        JoinOperator::try_new(node, probe_schema, build_schema, JoinOptions::default())
            .expect("join operator");
    let result_schema = probe_processor.output_schema();

    let mut graph = PipelineGraph::new();
    let build_source = ValuesSource::new(build_schema.clone(), build_chunks, 1).expect("source");
    let build_pipeline = PipelineBuilder::new(Box::new(build_source)).build(Box::new(build_sink));
    let build_index = graph.add_pipeline(build_pipeline, &[]).expect("pipeline");

    let probe_source = ValuesSource::new(probe_schema.clone(), probe_chunks, 2).expect("source");
    let mut builder = PipelineBuilder::new(Box::new(probe_source));
    builder.add_processor(Box::new(probe_processor));
    let probe_pipeline = builder.build(Box::new(ResultSink::new(result_schema, 3)));
    let probe_index = graph
        .add_pipeline(probe_pipeline, &[build_index])
        .expect("pipeline");

    graph.execute().expect("execute");
    graph
        .pipeline_mut(probe_index)
        .expect("probe pipeline")
        .get_result()
        .expect("result")
}

fn int_column(chunk: &Chunk, index: usize) -> Vec<Option<i32>> {
    use arrow::array::Array;
    let array = chunk
        .column(index)
        .expect("column")
        .as_any()
        .downcast_ref::<Int32Array>()
        .expect("int32 column");
    (0..array.len())
        .map(|i| (!array.is_null(i)).then(|| array.value(i)))
        .collect()
}

#[test]
fn fan_out_join_drains_a_saturated_output_buffer() {
    force_small_batches();
    let probe_schema = int_schema(&["k", "v"]);
    let build_schema = int_schema(&["k", "w"]);
    let node = LogicalJoinNode {
        node_id: 1,
        join_type: LogicalJoinType::Inner,
        conditions: vec![JoinConditionSpec::equi(0, 0)],
        probe_projection: vec![],
        build_projection: vec![],
        output_arity: 4,
    };
    // 5 probe rows x 5 build rows on one key: 25 output rows against a
    // 2-row chunk capacity.
    let probe = vec![int_chunk(
        &probe_schema,
        vec![
            vec![Some(1); 5],
            (0..5).map(Some).collect(),
        ],
    )];
    let build = vec![int_chunk(
        &build_schema,
        vec![
            vec![Some(1); 5],
            (10..15).map(Some).collect(),
        ],
    )];
    let result = run_join(&node, &probe_schema, probe, &build_schema, build);
    assert_eq!(result.len(), 25);

    let mut pairs: Vec<(Option<i32>, Option<i32>)> = int_column(&result, 1)
        .into_iter()
        .zip(int_column(&result, 3))
        .collect();
    pairs.sort();
    let mut expected = Vec::new();
    for v in 0..5 {
        for w in 10..15 {
            expected.push((Some(v), Some(w)));
        }
    }
    assert_eq!(pairs, expected);
}

#[test]
fn outer_fan_out_force_drains_trailing_rows() {
    force_small_batches();
    let probe_schema = int_schema(&["k"]);
    let build_schema = int_schema(&["k"]);
    let node = LogicalJoinNode {
        node_id: 2,
        join_type: LogicalJoinType::Full,
        conditions: vec![JoinConditionSpec::equi(0, 0)],
        probe_projection: vec![],
        build_projection: vec![],
        output_arity: 2,
    };
    // 4 x 6 matched fan-out plus one unmatched row on each side: 26 rows,
    // the last of them produced only at end-of-input.
    let probe = vec![int_chunk(
        &probe_schema,
        vec![vec![Some(1), Some(1), Some(1), Some(1), Some(7)]],
    )];
    let build = vec![int_chunk(
        &build_schema,
        vec![vec![Some(1), Some(1), Some(1), Some(1), Some(1), Some(1), Some(8)]],
    )];
    let result = run_join(&node, &probe_schema, probe, &build_schema, build);
    assert_eq!(result.len(), 26);
    let matched = int_column(&result, 0)
        .into_iter()
        .zip(int_column(&result, 1))
        .filter(|(p, b)| p.is_some() && b.is_some())
        .count();
    assert_eq!(matched, 24);
}
