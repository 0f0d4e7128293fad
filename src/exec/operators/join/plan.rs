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
//! Optimizer-facing description of a join node.
//!
//! The planner is an external collaborator; this module only mirrors the
//! slice of its output the execution layer consumes: join type, condition
//! triples, per-side projection maps, and the declared output arity.

use crate::exec::expr::CompareOp;

/// Logical join variant as produced by the optimizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalJoinType {
    Inner,
    Left,
    Right,
    Full,
    /// One boolean column per probe row indicating match existence
    /// (semi/anti-join substrate). Never emits build-side data columns.
    Mark,
    /// Cross product; no conditions.
    Cross,
}

impl LogicalJoinType {
    pub fn build_side_outer(&self) -> bool {
        matches!(self, LogicalJoinType::Right | LogicalJoinType::Full)
    }

    pub fn probe_side_outer(&self) -> bool {
        matches!(self, LogicalJoinType::Left | LogicalJoinType::Full)
    }
}

/// Condition operand as bound by the optimizer.
#[derive(Clone, Debug)]
pub enum PlanExpr {
    /// Direct reference to an input column on the owning side.
    ColumnRef(usize),
    /// A computed expression the optimizer left above the scan. The execution
    /// layer does not evaluate these; every condition operand must be a
    /// direct column reference.
    Computed(String),
}

impl PlanExpr {
    pub(crate) fn column_ref(&self, side: &str) -> Result<usize, String> {
        match self {
            PlanExpr::ColumnRef(idx) => Ok(*idx),
            PlanExpr::Computed(desc) => Err(format!(
                "join condition {} side is not a column reference: {}",
                side, desc
            )),
        }
    }
}

/// One (probe-expr, build-expr, comparator) condition triple.
#[derive(Clone, Debug)]
pub struct JoinConditionSpec {
    pub probe: PlanExpr,
    pub build: PlanExpr,
    pub op: CompareOp,
}

impl JoinConditionSpec {
    pub fn equi(probe_col: usize, build_col: usize) -> Self {
        Self {
            probe: PlanExpr::ColumnRef(probe_col),
            build: PlanExpr::ColumnRef(build_col),
            op: CompareOp::Eq,
        }
    }

    pub fn comparison(probe_col: usize, build_col: usize, op: CompareOp) -> Self {
        Self {
            probe: PlanExpr::ColumnRef(probe_col),
            build: PlanExpr::ColumnRef(build_col),
            op,
        }
    }
}

/// Build-side placement strategy for a distributed plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinDistribution {
    /// Every worker holds the whole build side.
    Broadcast,
    /// Build (and probe) rows are repartitioned by key hash so all rows for
    /// a key land on one worker.
    Partitioned,
}

/// Logical join node handed down by the optimizer.
#[derive(Clone, Debug)]
pub struct LogicalJoinNode {
    pub node_id: i32,
    pub join_type: LogicalJoinType,
    pub conditions: Vec<JoinConditionSpec>,
    /// Probe-side columns kept in the output; empty means keep all.
    pub probe_projection: Vec<usize>,
    /// Build-side columns kept in the output; empty means keep all.
    pub build_projection: Vec<usize>,
    /// Declared output column count; the computed output schema must match.
    pub output_arity: usize,
}
