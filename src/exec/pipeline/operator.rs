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
//! Core operator traits and flow-control semantics.
//!
//! Responsibilities:
//! - Defines the source/transform/sink execution contracts and the tri-state
//!   flow-control signal drivers use to orchestrate cooperative execution.
//! - A transform must not claim `Finished` until its internal buffers are
//!   fully drained; a sink is handed the upstream result so last-batch status
//!   propagates even when the final real batch is empty.
//!
//! Key exported interfaces:
//! - Types: `OperatorResult`.
//! - Traits: `PhysicalOperator`, `SourceOperator`, `ProcessorOperator`,
//!   `SinkOperator`.

use arrow::datatypes::SchemaRef;

use crate::exec::chunk::Chunk;

/// Flow-control signal returned by every operator call.
///
/// The driver must not request new input from a stage whose most recent
/// result was [`OperatorResult::HaveMoreOutput`]; it re-polls that stage's
/// output path first. `Finished` propagates upstream-to-downstream through
/// the whole pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorResult {
    /// The stage can accept more batches normally.
    NeedMoreInput,
    /// The stage holds buffered output or is backpressured (e.g. a full
    /// shuffle buffer); drain before pushing more input.
    HaveMoreOutput,
    /// No further input will be accepted and no output remains.
    Finished,
}

impl OperatorResult {
    pub fn is_finished(&self) -> bool {
        matches!(self, OperatorResult::Finished)
    }
}

/// Base contract shared by every physical operator role.
pub trait PhysicalOperator: Send {
    /// Operator identity for logs and the instrumentation hook.
    fn name(&self) -> &str;

    fn output_schema(&self) -> SchemaRef;
}

/// Produces batches; has no input.
pub trait SourceOperator: PhysicalOperator {
    /// Emit the next batch. The result is `HaveMoreOutput` while more batches
    /// follow and `Finished` together with the last (possibly empty) batch.
    fn produce_batch(&mut self) -> Result<(Chunk, OperatorResult), String>;
}

/// Consumes a batch and produces a batch (possibly empty) per call.
pub trait ProcessorOperator: PhysicalOperator {
    /// `prev` carries the upstream stage's flow-control result so the
    /// transform can detect the last input batch.
    fn process_batch(
        &mut self,
        chunk: Chunk,
        prev: OperatorResult,
    ) -> Result<(Chunk, OperatorResult), String>;
}

/// Consumes batches, accumulates state, optionally produces one terminal result.
pub trait SinkOperator: PhysicalOperator {
    /// `prev` carries the upstream stage's flow-control result so "last batch"
    /// is visible even when that batch is empty.
    fn consume_batch(&mut self, chunk: Chunk, prev: OperatorResult)
    -> Result<OperatorResult, String>;

    /// Called once after the sink reports `Finished`; materializes terminal
    /// state and reports operator identity for instrumentation.
    fn finalize(&mut self) -> Result<(), String>;

    /// Terminal result retrieval. Only collecting sinks implement this;
    /// calling it on a sink-only role is a runtime invariant violation.
    fn get_result(&mut self) -> Result<Chunk, String> {
        Err(format!("get_result called on sink {}", self.name()))
    }
}
