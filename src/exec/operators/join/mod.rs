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
//! Streaming join operator.
//!
//! Responsibilities:
//! - Splits a logical join node into its two physical halves: a build-side
//!   sink and a probe-side transform sharing one state block, scheduled in
//!   separate pipelines with the build pipeline ordered first.
//! - Validates the plan at construction: condition operands must be column
//!   references, key types must agree across sides, and the computed output
//!   schema must match the declared arity.
//!
//! Key exported interfaces:
//! - Types: `JoinOperator`, `JoinOptions`, `JoinBuildSink`, `JoinProbeProcessor`,
//!   plus the plan vocabulary re-exported from [`plan`].

mod build_sink;
mod hash_table;
mod mapping;
mod output_buffer;
pub mod plan;
mod probe;
mod probe_processor;
mod state;

use std::sync::{Arc, Mutex};

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use crate::common::config;
use crate::common::logging::debug;
use crate::exec::chunk::validate_column_names;
use crate::exec::expr::{
    ComparisonCondition, CondInput, ConjunctionCondition, JoinCondEval,
};
use crate::exec::runtime_filter::JoinBloomFilter;
use crate::exec::shuffle::{PartitionExchange, ShuffleBuffer};

pub use build_sink::JoinBuildSink;
pub use plan::{JoinConditionSpec, JoinDistribution, LogicalJoinNode, LogicalJoinType, PlanExpr};
pub use probe_processor::JoinProbeProcessor;

use mapping::{bound_columns, SideMapping};
use output_buffer::JoinOutputBuffer;
use probe::OutputLayout;
use state::{
    BuildAccumulator, HashJoinState, JoinState, JoinStateKind, NestedLoopJoinState, ShuffleLane,
};

/// Execution knobs resolved by the scheduler, not the optimizer.
pub struct JoinOptions {
    pub distribution: JoinDistribution,
    pub use_bloom_filter: bool,
    /// Sizing hint for the bloom filter when enabled.
    pub bloom_expected_keys: u64,
    /// Exchanges for a partitioned plan; both are required then.
    pub build_exchange: Option<Box<dyn PartitionExchange>>,
    pub probe_exchange: Option<Box<dyn PartitionExchange>>,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            distribution: JoinDistribution::Broadcast,
            use_bloom_filter: false,
            bloom_expected_keys: 1 << 20,
            build_exchange: None,
            probe_exchange: None,
        }
    }
}

/// Factory for the two physical halves of one join node.
pub struct JoinOperator;

impl JoinOperator {
    /// Compile `node` against the two input schemas. The probe side is the
    /// first (left) input; the build side is the second (right) input.
    pub fn try_new(
        node: &LogicalJoinNode,
        probe_schema: &SchemaRef,
        build_schema: &SchemaRef,
        mut options: JoinOptions,
    ) -> Result<(JoinBuildSink, JoinProbeProcessor), String> {
        validate_column_names(probe_schema, "probe")?;
        validate_column_names(build_schema, "build")?;

        if node.join_type == LogicalJoinType::Cross && !node.conditions.is_empty() {
            return Err("cross join takes no conditions".to_string());
        }

        let mut probe_keys = Vec::new();
        let mut build_keys = Vec::new();
        let mut residual = Vec::new();
        for cond in &node.conditions {
            let probe_col = cond.probe.column_ref("probe")?;
            let build_col = cond.build.column_ref("build")?;
            if probe_col >= probe_schema.fields().len() {
                return Err(format!(
                    "join condition probe column {} out of bounds (num_columns={})",
                    probe_col,
                    probe_schema.fields().len()
                ));
            }
            if build_col >= build_schema.fields().len() {
                return Err(format!(
                    "join condition build column {} out of bounds (num_columns={})",
                    build_col,
                    build_schema.fields().len()
                ));
            }
            if cond.op.is_equality() {
                probe_keys.push(probe_col);
                build_keys.push(build_col);
            } else {
                residual.push((probe_col, build_col, cond.op));
            }
        }
        let use_nested_loop = probe_keys.is_empty();

        let mark = node.join_type == LogicalJoinType::Mark;
        if mark && !node.build_projection.is_empty() {
            return Err("mark join should not output build table columns".to_string());
        }
        let bound_probe = bound_columns(
            &node.probe_projection,
            probe_schema.fields().len(),
            "probe",
        )?;
        let bound_build = if mark {
            Default::default()
        } else {
            bound_columns(&node.build_projection, build_schema.fields().len(), "build")?
        };

        let probe_mapping = SideMapping::new(&probe_keys, probe_schema.fields().len(), &bound_probe)?;
        let build_mapping = SideMapping::new(&build_keys, build_schema.fields().len(), &bound_build)?;

        let mut key_types = Vec::with_capacity(build_keys.len());
        for (probe_col, build_col) in probe_keys.iter().zip(&build_keys) {
            let probe_type = probe_schema.field(*probe_col).data_type();
            let build_type = build_schema.field(*build_col).data_type();
            if probe_type != build_type {
                return Err(format!(
                    "join key type mismatch: probe {:?} vs build {:?}",
                    probe_type, build_type
                ));
            }
            key_types.push(build_type.clone());
        }

        let pred = compile_residual(&residual, &probe_mapping, &build_mapping)?;

        let probe_reordered_schema: SchemaRef =
            Arc::new(probe_schema.project(&probe_mapping.reorder).map_err(|e| e.to_string())?);
        let build_reordered_schema: SchemaRef =
            Arc::new(build_schema.project(&build_mapping.reorder).map_err(|e| e.to_string())?);

        let build_outer = node.join_type.build_side_outer();
        let probe_outer = node.join_type.probe_side_outer();
        let output_schema = output_schema(
            probe_schema,
            build_schema,
            &bound_probe,
            &bound_build,
            mark,
            build_outer,
            probe_outer,
        );
        if output_schema.fields().len() != node.output_arity {
            return Err(format!(
                "join output arity mismatch: computed {} columns, plan declares {}",
                output_schema.fields().len(),
                node.output_arity
            ));
        }

        let chunk_capacity = config::streaming_batch_size();
        let kind = if use_nested_loop {
            if options.distribution == JoinDistribution::Partitioned {
                return Err("nested loop join requires broadcast distribution".to_string());
            }
            JoinStateKind::NestedLoop(NestedLoopJoinState {
                build: BuildAccumulator::new(build_reordered_schema.clone()),
            })
        } else {
            let bloom = if options.use_bloom_filter {
                let filter = JoinBloomFilter::with_expected_keys(options.bloom_expected_keys);
                if filter.can_use() {
                    Some(filter)
                } else {
                    debug!(
                        "join node {} bloom filter disabled: sizing hint {} too large",
                        node.node_id, options.bloom_expected_keys
                    );
                    None
                }
            } else {
                None
            };
            let (build_shuffle, probe_shuffle) = match options.distribution {
                JoinDistribution::Broadcast => (None, None),
                JoinDistribution::Partitioned => {
                    let build_lane = shuffle_lane(options.build_exchange.take(), "build")?;
                    let probe_lane = shuffle_lane(options.probe_exchange.take(), "probe")?;
                    (Some(build_lane), Some(probe_lane))
                }
            };
            JoinStateKind::Hash(HashJoinState {
                table: hash_table::JoinHashTable::new(key_types)?,
                build: BuildAccumulator::new(build_reordered_schema.clone()),
                bloom,
                build_shuffle,
                probe_shuffle,
            })
        };
        let use_bloom = matches!(&kind, JoinStateKind::Hash(h) if h.bloom.is_some());

        let state = Arc::new(Mutex::new(JoinState {
            kind,
            output: JoinOutputBuffer::new(output_schema.clone(), chunk_capacity),
            build_finalized: false,
        }));

        let prefix = if use_nested_loop { "NLJOIN" } else { "HASH_JOIN" };
        let sink = JoinBuildSink::new(
            format!("{}_BUILD (id={})", prefix, node.node_id),
            state.clone(),
            build_mapping.reorder.clone(),
            build_reordered_schema,
            build_outer,
        );
        let processor = JoinProbeProcessor::new(
            format!("{}_PROBE (id={})", prefix, node.node_id),
            state,
            probe_mapping.reorder.clone(),
            probe_reordered_schema,
            OutputLayout {
                schema: output_schema,
                probe_kept: probe_mapping.kept,
                build_kept: build_mapping.kept,
                mark,
            },
            pred,
            use_nested_loop,
            build_outer,
            probe_outer,
            use_bloom,
        );
        Ok((sink, processor))
    }
}

fn shuffle_lane(
    exchange: Option<Box<dyn PartitionExchange>>,
    side: &str,
) -> Result<ShuffleLane, String> {
    let exchange = exchange
        .ok_or_else(|| format!("partitioned join requires a {} exchange", side))?;
    let buffer = ShuffleBuffer::new(exchange.worker_count(), config::shuffle_buffer_rows())?;
    Ok(ShuffleLane { buffer, exchange })
}

/// AND together the non-equality conditions, with operands re-targeted into
/// each side's reordered layout.
fn compile_residual(
    residual: &[(usize, usize, crate::exec::expr::CompareOp)],
    probe_mapping: &SideMapping,
    build_mapping: &SideMapping,
) -> Result<Option<Box<dyn JoinCondEval>>, String> {
    if residual.is_empty() {
        return Ok(None);
    }
    let mut children: Vec<Box<dyn JoinCondEval>> = Vec::with_capacity(residual.len());
    for (probe_col, build_col, op) in residual {
        children.push(Box::new(ComparisonCondition::new(
            CondInput::Probe(probe_mapping.reverse[*probe_col]),
            CondInput::Build(build_mapping.reverse[*build_col]),
            *op,
        )));
    }
    if children.len() == 1 {
        Ok(children.pop())
    } else {
        Ok(Some(Box::new(ConjunctionCondition::new(children)?)))
    }
}

/// Probe kept columns, then the mark column for mark joins, then build kept
/// columns. A side opposite an outer side becomes nullable.
fn output_schema(
    probe_schema: &SchemaRef,
    build_schema: &SchemaRef,
    bound_probe: &std::collections::BTreeSet<usize>,
    bound_build: &std::collections::BTreeSet<usize>,
    mark: bool,
    build_outer: bool,
    probe_outer: bool,
) -> SchemaRef {
    let mut fields = Vec::with_capacity(bound_probe.len() + bound_build.len() + usize::from(mark));
    for col in bound_probe {
        let field = probe_schema.field(*col);
        let nullable = field.is_nullable() || build_outer;
        fields.push(Field::new(field.name(), field.data_type().clone(), nullable));
    }
    if mark {
        fields.push(Field::new("mark", DataType::Boolean, false));
    }
    for col in bound_build {
        let field = build_schema.field(*col);
        let nullable = field.is_nullable() || probe_outer;
        fields.push(Field::new(field.name(), field.data_type().clone(), nullable));
    }
    Arc::new(Schema::new(fields))
}
