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
//! Compiled join predicates evaluated per candidate row pair.
//!
//! Responsibilities:
//! - Defines the callable contract the join probe invokes for every
//!   candidate (probe, build) pair of a non-equality condition.
//! - Provides comparison and AND-conjunction predicate trees with operands
//!   addressed in the reordered (keys-first) column layout of each side.
//!
//! Key exported interfaces:
//! - Types: `CompareOp`, `CondInput`, `ComparisonCondition`, `ConjunctionCondition`.
//! - Traits: `JoinCondEval`.

use std::cmp::Ordering;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float32Array, Float64Array, Int8Array, Int16Array,
    Int32Array, Int64Array, RecordBatch, StringArray, TimestampMicrosecondArray, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::{DataType, TimeUnit};

/// Comparator attached to one join condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub fn is_equality(&self) -> bool {
        matches!(self, CompareOp::Eq)
    }

    fn matches(&self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::NotEq => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::LtEq => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::GtEq => ord != Ordering::Less,
        }
    }
}

/// Operand of a compiled condition: a column on one side of the join,
/// addressed in that side's reordered layout.
#[derive(Clone, Copy, Debug)]
pub enum CondInput {
    Probe(usize),
    Build(usize),
}

/// Callable evaluating a boolean condition over one (probe, build) row pair.
///
/// Implementations must be pure and side-effect-free; the probe loop invokes
/// them for every candidate pair.
pub trait JoinCondEval: Send + Sync {
    fn evaluate(
        &self,
        probe: &RecordBatch,
        build: &RecordBatch,
        probe_row: usize,
        build_row: usize,
    ) -> Result<bool, String>;
}

/// Single comparison between two side-targeted column operands.
pub struct ComparisonCondition {
    left: CondInput,
    right: CondInput,
    op: CompareOp,
}

impl ComparisonCondition {
    pub fn new(left: CondInput, right: CondInput, op: CompareOp) -> Self {
        Self { left, right, op }
    }
}

fn resolve<'a>(
    input: CondInput,
    probe: &'a RecordBatch,
    build: &'a RecordBatch,
    probe_row: usize,
    build_row: usize,
) -> Result<(&'a ArrayRef, usize), String> {
    match input {
        CondInput::Probe(col) => {
            let array = probe.columns().get(col).ok_or_else(|| {
                format!(
                    "probe condition column {} out of bounds (num_columns={})",
                    col,
                    probe.num_columns()
                )
            })?;
            Ok((array, probe_row))
        }
        CondInput::Build(col) => {
            let array = build.columns().get(col).ok_or_else(|| {
                format!(
                    "build condition column {} out of bounds (num_columns={})",
                    col,
                    build.num_columns()
                )
            })?;
            Ok((array, build_row))
        }
    }
}

macro_rules! compare_primitive {
    ($ty:ty, $name:literal, $left:expr, $lrow:expr, $right:expr, $rrow:expr) => {{
        let l = $left
            .as_any()
            .downcast_ref::<$ty>()
            .ok_or_else(|| format!("join condition type mismatch for {}", $name))?;
        let r = $right
            .as_any()
            .downcast_ref::<$ty>()
            .ok_or_else(|| format!("join condition type mismatch for {}", $name))?;
        let lv = l.value($lrow);
        let rv = r.value($rrow);
        PartialOrd::partial_cmp(&lv, &rv)
    }};
}

fn compare_values(
    left: &ArrayRef,
    left_row: usize,
    right: &ArrayRef,
    right_row: usize,
) -> Result<Option<Ordering>, String> {
    if left.data_type() != right.data_type() {
        return Err(format!(
            "join condition operand type mismatch: {:?} vs {:?}",
            left.data_type(),
            right.data_type()
        ));
    }
    // SQL comparison semantics: any null operand yields unknown.
    if left.is_null(left_row) || right.is_null(right_row) {
        return Ok(None);
    }
    let ord = match left.data_type() {
        DataType::Boolean => {
            compare_primitive!(BooleanArray, "Boolean", left, left_row, right, right_row)
        }
        DataType::Int8 => compare_primitive!(Int8Array, "Int8", left, left_row, right, right_row),
        DataType::Int16 => {
            compare_primitive!(Int16Array, "Int16", left, left_row, right, right_row)
        }
        DataType::Int32 => {
            compare_primitive!(Int32Array, "Int32", left, left_row, right, right_row)
        }
        DataType::Int64 => {
            compare_primitive!(Int64Array, "Int64", left, left_row, right, right_row)
        }
        DataType::UInt32 => {
            compare_primitive!(UInt32Array, "UInt32", left, left_row, right, right_row)
        }
        DataType::UInt64 => {
            compare_primitive!(UInt64Array, "UInt64", left, left_row, right, right_row)
        }
        DataType::Float32 => {
            compare_primitive!(Float32Array, "Float32", left, left_row, right, right_row)
        }
        DataType::Float64 => {
            compare_primitive!(Float64Array, "Float64", left, left_row, right, right_row)
        }
        DataType::Date32 => {
            compare_primitive!(Date32Array, "Date32", left, left_row, right, right_row)
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => compare_primitive!(
            TimestampMicrosecondArray,
            "TimestampMicrosecond",
            left,
            left_row,
            right,
            right_row
        ),
        DataType::Utf8 => {
            compare_primitive!(StringArray, "Utf8", left, left_row, right, right_row)
        }
        other => {
            return Err(format!("unsupported join condition type: {:?}", other));
        }
    };
    Ok(ord)
}

impl JoinCondEval for ComparisonCondition {
    fn evaluate(
        &self,
        probe: &RecordBatch,
        build: &RecordBatch,
        probe_row: usize,
        build_row: usize,
    ) -> Result<bool, String> {
        let (left_array, left_row) = resolve(self.left, probe, build, probe_row, build_row)?;
        let (right_array, right_row) = resolve(self.right, probe, build, probe_row, build_row)?;
        match compare_values(left_array, left_row, right_array, right_row)? {
            Some(ord) => Ok(self.op.matches(ord)),
            None => Ok(false),
        }
    }
}

/// AND over child conditions; short-circuits on the first false.
pub struct ConjunctionCondition {
    children: Vec<Box<dyn JoinCondEval>>,
}

impl ConjunctionCondition {
    pub fn new(children: Vec<Box<dyn JoinCondEval>>) -> Result<Self, String> {
        if children.is_empty() {
            return Err("join conjunction requires at least one child condition".to_string());
        }
        Ok(Self { children })
    }
}

impl JoinCondEval for ConjunctionCondition {
    fn evaluate(
        &self,
        probe: &RecordBatch,
        build: &RecordBatch,
        probe_row: usize,
        build_row: usize,
    ) -> Result<bool, String> {
        for child in &self.children {
            if !child.evaluate(probe, build, probe_row, build_row)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    fn batch_i32(name: &str, values: Vec<Option<i32>>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new(name, DataType::Int32, true)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).expect("batch")
    }

    #[test]
    fn comparison_matches_ordering() {
        let probe = batch_i32("p", vec![Some(1), Some(5)]);
        let build = batch_i32("b", vec![Some(3)]);
        let lt = ComparisonCondition::new(CondInput::Probe(0), CondInput::Build(0), CompareOp::Lt);
        assert!(lt.evaluate(&probe, &build, 0, 0).unwrap());
        assert!(!lt.evaluate(&probe, &build, 1, 0).unwrap());
    }

    #[test]
    fn string_operands_compare_lexicographically() {
        let schema = Arc::new(Schema::new(vec![Field::new("s", DataType::Utf8, true)]));
        let probe = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(StringArray::from(vec!["apple", "cherry"]))],
        )
        .expect("batch");
        let build = RecordBatch::try_new(
            schema,
            vec![Arc::new(StringArray::from(vec!["banana"]))],
        )
        .expect("batch");
        let lt = ComparisonCondition::new(CondInput::Probe(0), CondInput::Build(0), CompareOp::Lt);
        assert!(lt.evaluate(&probe, &build, 0, 0).unwrap());
        assert!(!lt.evaluate(&probe, &build, 1, 0).unwrap());
        let eq = ComparisonCondition::new(CondInput::Probe(0), CondInput::Build(0), CompareOp::Eq);
        assert!(!eq.evaluate(&probe, &build, 0, 0).unwrap());
    }

    #[test]
    fn null_operand_is_never_a_match() {
        let probe = batch_i32("p", vec![None]);
        let build = batch_i32("b", vec![Some(3)]);
        for op in [
            CompareOp::Eq,
            CompareOp::NotEq,
            CompareOp::Lt,
            CompareOp::GtEq,
        ] {
            let cond = ComparisonCondition::new(CondInput::Probe(0), CondInput::Build(0), op);
            assert!(!cond.evaluate(&probe, &build, 0, 0).unwrap());
        }
    }

    #[test]
    fn conjunction_requires_all_children() {
        let probe = batch_i32("p", vec![Some(2)]);
        let build = batch_i32("b", vec![Some(2)]);
        let both = ConjunctionCondition::new(vec![
            Box::new(ComparisonCondition::new(
                CondInput::Probe(0),
                CondInput::Build(0),
                CompareOp::Eq,
            )),
            Box::new(ComparisonCondition::new(
                CondInput::Probe(0),
                CondInput::Build(0),
                CompareOp::Lt,
            )),
        ])
        .unwrap();
        assert!(!both.evaluate(&probe, &build, 0, 0).unwrap());
    }
}
