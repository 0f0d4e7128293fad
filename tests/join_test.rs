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
//! End-to-end join tests driving the full pipeline graph: build pipeline
//! first, then the probe pipeline collecting into a result sink.

use std::sync::Arc;

use arrow::array::{Array, BooleanArray, Int32Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use streamexec::exec::chunk::Chunk;
use streamexec::exec::expr::CompareOp;
use streamexec::exec::operators::join::{
    JoinConditionSpec, JoinDistribution, JoinOperator, JoinOptions, LogicalJoinNode,
    LogicalJoinType,
};
use streamexec::exec::operators::result_sink::ResultSink;
use streamexec::exec::operators::values_source::ValuesSource;
use streamexec::exec::pipeline::builder::{PipelineBuilder, PipelineGraph};
use streamexec::exec::pipeline::operator::PhysicalOperator;
use streamexec::exec::shuffle::LocalExchange;

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
    options: JoinOptions,
    probe_schema: &SchemaRef,
    probe_chunks: Vec<Chunk>,
    build_schema: &SchemaRef,
    build_chunks: Vec<Chunk>,
) -> Result<Chunk, String> {
    let (build_sink, probe_processor) =
        JoinOperator::try_new(node, probe_schema, build_schema, options)?;
    let result_schema = probe_processor.output_schema();

    let mut graph = PipelineGraph::new();
    let build_source = ValuesSource::new(build_schema.clone(), build_chunks, 10)?;
    let build_pipeline = PipelineBuilder::new(Box::new(build_source)).build(Box::new(build_sink));
    let build_index = graph.add_pipeline(build_pipeline, &[])?;

    let probe_source = ValuesSource::new(probe_schema.clone(), probe_chunks, 11)?;
    let mut builder = PipelineBuilder::new(Box::new(probe_source));
    builder.add_processor(Box::new(probe_processor));
    let probe_pipeline = builder.build(Box::new(ResultSink::new(result_schema, 12)));
    let probe_index = graph.add_pipeline(probe_pipeline, &[build_index])?;

    graph.execute()?;
    graph.pipeline_mut(probe_index)?.get_result()
}

fn int_column(chunk: &Chunk, index: usize) -> Vec<Option<i32>> {
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

/// Rows as sorted tuples of int columns, for order-insensitive comparison.
fn sorted_rows(chunk: &Chunk) -> Vec<Vec<Option<i32>>> {
    let columns: Vec<_> = (0..chunk.batch.num_columns())
        .map(|i| int_column(chunk, i))
        .collect();
    let mut rows: Vec<Vec<Option<i32>>> = (0..chunk.len())
        .map(|row| columns.iter().map(|col| col[row]).collect())
        .collect();
    rows.sort();
    rows
}

fn join_node(join_type: LogicalJoinType, conditions: Vec<JoinConditionSpec>, arity: usize) -> LogicalJoinNode {
    LogicalJoinNode {
        node_id: 7,
        join_type,
        conditions,
        probe_projection: vec![],
        build_projection: vec![],
        output_arity: arity,
    }
}

fn probe_data(schema: &SchemaRef) -> Vec<Chunk> {
    // (k, v): one row with a null key to pin down null-key semantics.
    vec![
        int_chunk(
            schema,
            vec![
                vec![Some(1), Some(2)],
                vec![Some(10), Some(20)],
            ],
        ),
        int_chunk(schema, vec![vec![Some(3), None], vec![Some(30), Some(40)]]),
    ]
}

fn build_data(schema: &SchemaRef) -> Vec<Chunk> {
    // (k, w): key 2 appears twice, key 4 never matches.
    vec![
        int_chunk(
            schema,
            vec![
                vec![Some(2), Some(4)],
                vec![Some(200), Some(400)],
            ],
        ),
        int_chunk(schema, vec![vec![Some(2)], vec![Some(201)]]),
    ]
}

#[test]
fn inner_join_matches_equal_keys() {
    let probe_schema = int_schema(&["k", "v"]);
    let build_schema = int_schema(&["k", "w"]);
    let node = join_node(LogicalJoinType::Inner, vec![JoinConditionSpec::equi(0, 0)], 4);
    let result = run_join(
        &node,
        JoinOptions::default(),
        &probe_schema,
        probe_data(&probe_schema),
        &build_schema,
        build_data(&build_schema),
    )
    .expect("inner join");
    assert_eq!(
        sorted_rows(&result),
        vec![
            vec![Some(2), Some(20), Some(2), Some(200)],
            vec![Some(2), Some(20), Some(2), Some(201)],
        ]
    );
}

#[test]
fn left_join_null_extends_unmatched_probe_rows() {
    let probe_schema = int_schema(&["k", "v"]);
    let build_schema = int_schema(&["k", "w"]);
    let node = join_node(LogicalJoinType::Left, vec![JoinConditionSpec::equi(0, 0)], 4);
    let result = run_join(
        &node,
        JoinOptions::default(),
        &probe_schema,
        probe_data(&probe_schema),
        &build_schema,
        build_data(&build_schema),
    )
    .expect("left join");
    assert_eq!(
        sorted_rows(&result),
        vec![
            vec![None, Some(40), None, None],
            vec![Some(1), Some(10), None, None],
            vec![Some(2), Some(20), Some(2), Some(200)],
            vec![Some(2), Some(20), Some(2), Some(201)],
            vec![Some(3), Some(30), None, None],
        ]
    );
}

#[test]
fn right_join_null_extends_unmatched_build_rows() {
    let probe_schema = int_schema(&["k", "v"]);
    let build_schema = int_schema(&["k", "w"]);
    let node = join_node(LogicalJoinType::Right, vec![JoinConditionSpec::equi(0, 0)], 4);
    let result = run_join(
        &node,
        JoinOptions::default(),
        &probe_schema,
        probe_data(&probe_schema),
        &build_schema,
        build_data(&build_schema),
    )
    .expect("right join");
    assert_eq!(
        sorted_rows(&result),
        vec![
            vec![None, None, Some(4), Some(400)],
            vec![Some(2), Some(20), Some(2), Some(200)],
            vec![Some(2), Some(20), Some(2), Some(201)],
        ]
    );
}

#[test]
fn full_join_null_extends_both_sides() {
    let probe_schema = int_schema(&["k", "v"]);
    let build_schema = int_schema(&["k", "w"]);
    let node = join_node(LogicalJoinType::Full, vec![JoinConditionSpec::equi(0, 0)], 4);
    let result = run_join(
        &node,
        JoinOptions::default(),
        &probe_schema,
        probe_data(&probe_schema),
        &build_schema,
        build_data(&build_schema),
    )
    .expect("full join");
    assert_eq!(
        sorted_rows(&result),
        vec![
            vec![None, None, Some(4), Some(400)],
            vec![None, Some(40), None, None],
            vec![Some(1), Some(10), None, None],
            vec![Some(2), Some(20), Some(2), Some(200)],
            vec![Some(2), Some(20), Some(2), Some(201)],
            vec![Some(3), Some(30), None, None],
        ]
    );
}

#[test]
fn mark_join_emits_one_flag_per_probe_row() {
    let probe_schema = int_schema(&["k"]);
    let build_schema = int_schema(&["k"]);
    let node = join_node(LogicalJoinType::Mark, vec![JoinConditionSpec::equi(0, 0)], 2);
    let probe = vec![int_chunk(
        &probe_schema,
        vec![vec![Some(1), Some(2), Some(3), None]],
    )];
    let build = vec![int_chunk(&build_schema, vec![vec![Some(2), Some(2), Some(4)]])];
    let result = run_join(
        &node,
        JoinOptions::default(),
        &probe_schema,
        probe,
        &build_schema,
        build,
    )
    .expect("mark join");
    assert_eq!(result.len(), 4);
    assert_eq!(int_column(&result, 0), vec![Some(1), Some(2), Some(3), None]);
    let marks = result
        .column(1)
        .expect("mark column")
        .as_any()
        .downcast_ref::<BooleanArray>()
        .expect("boolean mark column");
    let flags: Vec<bool> = (0..marks.len()).map(|i| marks.value(i)).collect();
    assert_eq!(flags, vec![false, true, false, false]);
}

#[test]
fn cross_join_produces_the_full_product() {
    let probe_schema = int_schema(&["a"]);
    let build_schema = int_schema(&["b"]);
    let node = join_node(LogicalJoinType::Cross, vec![], 2);
    let probe = vec![int_chunk(&probe_schema, vec![vec![Some(1), Some(2)]])];
    let build = vec![int_chunk(&build_schema, vec![vec![Some(7), Some(8), Some(9)]])];
    let result = run_join(
        &node,
        JoinOptions::default(),
        &probe_schema,
        probe,
        &build_schema,
        build,
    )
    .expect("cross join");
    assert_eq!(result.len(), 6);
    assert_eq!(
        sorted_rows(&result),
        vec![
            vec![Some(1), Some(7)],
            vec![Some(1), Some(8)],
            vec![Some(1), Some(9)],
            vec![Some(2), Some(7)],
            vec![Some(2), Some(8)],
            vec![Some(2), Some(9)],
        ]
    );
}

#[test]
fn non_equality_condition_filters_matched_pairs() {
    let probe_schema = int_schema(&["k", "v"]);
    let build_schema = int_schema(&["k", "w"]);
    let node = join_node(
        LogicalJoinType::Inner,
        vec![
            JoinConditionSpec::equi(0, 0),
            JoinConditionSpec::comparison(1, 1, CompareOp::Lt),
        ],
        4,
    );
    let probe = vec![int_chunk(
        &probe_schema,
        vec![vec![Some(2), Some(2)], vec![Some(20), Some(30)]],
    )];
    let build = vec![int_chunk(
        &build_schema,
        vec![vec![Some(2), Some(2)], vec![Some(15), Some(25)]],
    )];
    let result = run_join(
        &node,
        JoinOptions::default(),
        &probe_schema,
        probe,
        &build_schema,
        build,
    )
    .expect("predicated join");
    // Only probe v=20 < build w=25 survives.
    assert_eq!(
        sorted_rows(&result),
        vec![vec![Some(2), Some(20), Some(2), Some(25)]]
    );
}

#[test]
fn no_equality_conditions_fall_back_to_nested_loop() {
    let probe_schema = int_schema(&["v"]);
    let build_schema = int_schema(&["w"]);
    let node = join_node(
        LogicalJoinType::Inner,
        vec![JoinConditionSpec::comparison(0, 0, CompareOp::Gt)],
        2,
    );
    let probe = vec![int_chunk(&probe_schema, vec![vec![Some(5), Some(1)]])];
    let build = vec![int_chunk(&build_schema, vec![vec![Some(2), Some(4), Some(9)]])];
    let result = run_join(
        &node,
        JoinOptions::default(),
        &probe_schema,
        probe,
        &build_schema,
        build,
    )
    .expect("nested loop join");
    assert_eq!(
        sorted_rows(&result),
        vec![vec![Some(5), Some(2)], vec![Some(5), Some(4)]]
    );
}

#[test]
fn empty_build_side_inner_and_left() {
    let probe_schema = int_schema(&["k", "v"]);
    let build_schema = int_schema(&["k", "w"]);
    let probe = vec![int_chunk(
        &probe_schema,
        vec![vec![Some(1), Some(2)], vec![Some(10), Some(20)]],
    )];

    let inner = join_node(LogicalJoinType::Inner, vec![JoinConditionSpec::equi(0, 0)], 4);
    let result = run_join(
        &inner,
        JoinOptions::default(),
        &probe_schema,
        probe.clone(),
        &build_schema,
        vec![],
    )
    .expect("inner join over empty build");
    assert_eq!(result.len(), 0);

    let left = join_node(LogicalJoinType::Left, vec![JoinConditionSpec::equi(0, 0)], 4);
    let result = run_join(
        &left,
        JoinOptions::default(),
        &probe_schema,
        probe,
        &build_schema,
        vec![],
    )
    .expect("left join over empty build");
    assert_eq!(
        sorted_rows(&result),
        vec![
            vec![Some(1), Some(10), None, None],
            vec![Some(2), Some(20), None, None],
        ]
    );
}

#[test]
fn bloom_filter_does_not_change_results() {
    let probe_schema = int_schema(&["k", "v"]);
    let build_schema = int_schema(&["k", "w"]);
    let node = join_node(LogicalJoinType::Left, vec![JoinConditionSpec::equi(0, 0)], 4);
    let plain = run_join(
        &node,
        JoinOptions::default(),
        &probe_schema,
        probe_data(&probe_schema),
        &build_schema,
        build_data(&build_schema),
    )
    .expect("plain join");
    let bloom = run_join(
        &node,
        JoinOptions {
            use_bloom_filter: true,
            bloom_expected_keys: 1024,
            ..JoinOptions::default()
        },
        &probe_schema,
        probe_data(&probe_schema),
        &build_schema,
        build_data(&build_schema),
    )
    .expect("bloom join");
    assert_eq!(sorted_rows(&plain), sorted_rows(&bloom));
}

#[test]
fn partitioned_distribution_matches_broadcast() {
    let probe_schema = int_schema(&["k", "v"]);
    let build_schema = int_schema(&["k", "w"]);
    let node = join_node(LogicalJoinType::Full, vec![JoinConditionSpec::equi(0, 0)], 4);
    let broadcast = run_join(
        &node,
        JoinOptions::default(),
        &probe_schema,
        probe_data(&probe_schema),
        &build_schema,
        build_data(&build_schema),
    )
    .expect("broadcast join");
    let partitioned = run_join(
        &node,
        JoinOptions {
            distribution: JoinDistribution::Partitioned,
            build_exchange: Some(Box::new(LocalExchange::new())),
            probe_exchange: Some(Box::new(LocalExchange::new())),
            ..JoinOptions::default()
        },
        &probe_schema,
        probe_data(&probe_schema),
        &build_schema,
        build_data(&build_schema),
    )
    .expect("partitioned join");
    assert_eq!(sorted_rows(&broadcast), sorted_rows(&partitioned));
}

#[test]
fn key_column_reused_in_two_equality_conditions() {
    let probe_schema = int_schema(&["a"]);
    let build_schema = int_schema(&["x", "y"]);
    let node = join_node(
        LogicalJoinType::Inner,
        vec![JoinConditionSpec::equi(0, 0), JoinConditionSpec::equi(0, 1)],
        3,
    );
    let probe = vec![int_chunk(&probe_schema, vec![vec![Some(1), Some(2)]])];
    let build = vec![int_chunk(
        &build_schema,
        vec![
            vec![Some(1), Some(1), Some(2)],
            vec![Some(1), Some(2), Some(2)],
        ],
    )];
    let result = run_join(
        &node,
        JoinOptions::default(),
        &probe_schema,
        probe,
        &build_schema,
        build,
    )
    .expect("reused key join");
    // a = x and a = y must both hold.
    assert_eq!(
        sorted_rows(&result),
        vec![
            vec![Some(1), Some(1), Some(1)],
            vec![Some(2), Some(2), Some(2)],
        ]
    );
}

#[test]
fn projections_prune_and_reorder_output_columns() {
    let probe_schema = int_schema(&["k", "v"]);
    let build_schema = int_schema(&["k", "w"]);
    let node = LogicalJoinNode {
        node_id: 8,
        join_type: LogicalJoinType::Inner,
        conditions: vec![JoinConditionSpec::equi(0, 0)],
        probe_projection: vec![1],
        build_projection: vec![1],
        output_arity: 2,
    };
    let result = run_join(
        &node,
        JoinOptions::default(),
        &probe_schema,
        probe_data(&probe_schema),
        &build_schema,
        build_data(&build_schema),
    )
    .expect("projected join");
    assert_eq!(result.schema().field(0).name(), "v");
    assert_eq!(result.schema().field(1).name(), "w");
    assert_eq!(
        sorted_rows(&result),
        vec![vec![Some(20), Some(200)], vec![Some(20), Some(201)]]
    );
}
