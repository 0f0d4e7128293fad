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
//! Cross-worker partition exchange for distributed join builds.
//!
//! Responsibilities:
//! - Narrow message-passing boundary (`send`/`try_receive`) behind which the
//!   real transport lives; workers are processes, never threads, so nothing
//!   here shares memory across workers.
//! - `ShuffleBuffer` co-locates rows with equal keys by hash-partitioning
//!   chunks and buffering them until a capacity-bounded flush. Chunks handed
//!   to the exchange are owned by the exchange from then on.
//!
//! Key exported interfaces:
//! - Types: `ShuffleBuffer`, `LocalExchange`.
//! - Traits: `PartitionExchange`.

use std::collections::VecDeque;

use arrow::array::UInt32Array;

use crate::exec::chunk::Chunk;

/// Message-passing collaborator that routes partitioned chunks between the
/// worker processes participating in a repartition join.
pub trait PartitionExchange: Send {
    fn worker_count(&self) -> usize;

    fn worker_id(&self) -> usize;

    /// Hand a chunk destined for `partition` to the transport. Ownership of
    /// the chunk transfers to the exchange.
    fn send(&mut self, partition: usize, chunk: Chunk) -> Result<(), String>;

    /// Next chunk routed to this worker, if one has arrived.
    fn try_receive(&mut self) -> Result<Option<Chunk>, String>;
}

/// Single-worker loopback exchange used when execution is not distributed.
/// Every send lands back in this worker's receive queue, so correctness is
/// identical to running without partitioning at all.
pub struct LocalExchange {
    queue: VecDeque<Chunk>,
}

impl LocalExchange {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }
}

impl Default for LocalExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionExchange for LocalExchange {
    fn worker_count(&self) -> usize {
        1
    }

    fn worker_id(&self) -> usize {
        0
    }

    fn send(&mut self, partition: usize, chunk: Chunk) -> Result<(), String> {
        if partition != 0 {
            return Err(format!(
                "local exchange received partition {} (worker_count=1)",
                partition
            ));
        }
        self.queue.push_back(chunk);
        Ok(())
    }

    fn try_receive(&mut self) -> Result<Option<Chunk>, String> {
        Ok(self.queue.pop_front())
    }
}

/// Per-join buffer of outgoing partitioned chunks, flushed to the exchange
/// once the buffered row count crosses its capacity.
pub struct ShuffleBuffer {
    partitions: Vec<Vec<Chunk>>,
    buffered_rows: usize,
    capacity_rows: usize,
}

impl ShuffleBuffer {
    pub fn new(worker_count: usize, capacity_rows: usize) -> Result<Self, String> {
        if worker_count == 0 {
            return Err("shuffle buffer requires at least one worker".to_string());
        }
        Ok(Self {
            partitions: (0..worker_count).map(|_| Vec::new()).collect(),
            buffered_rows: 0,
            capacity_rows: capacity_rows.max(1),
        })
    }

    pub fn buffers_full(&self) -> bool {
        self.buffered_rows >= self.capacity_rows
    }

    pub fn buffered_rows(&self) -> usize {
        self.buffered_rows
    }

    /// Split `chunk` by key hash and append each slice to its destination
    /// partition. `hashes` must be row-aligned with the chunk.
    pub fn append_partitioned(&mut self, chunk: &Chunk, hashes: &[u64]) -> Result<(), String> {
        if hashes.len() != chunk.len() {
            return Err(format!(
                "shuffle hash count {} does not match chunk rows {}",
                hashes.len(),
                chunk.len()
            ));
        }
        if chunk.is_empty() {
            return Ok(());
        }
        let worker_count = self.partitions.len();
        if worker_count == 1 {
            self.buffered_rows += chunk.len();
            self.partitions[0].push(chunk.clone());
            return Ok(());
        }

        let mut indices: Vec<Vec<u32>> = vec![Vec::new(); worker_count];
        for (row, hash) in hashes.iter().enumerate() {
            let partition = (*hash as usize) % worker_count;
            indices[partition].push(row as u32);
        }
        for (partition, rows) in indices.into_iter().enumerate() {
            if rows.is_empty() {
                continue;
            }
            let taken = chunk.take_rows(&UInt32Array::from(rows))?;
            self.buffered_rows += taken.len();
            self.partitions[partition].push(taken);
        }
        Ok(())
    }

    /// Hand every buffered chunk to the exchange. The buffer is empty after
    /// a successful flush.
    pub fn flush(&mut self, exchange: &mut dyn PartitionExchange) -> Result<(), String> {
        if exchange.worker_count() != self.partitions.len() {
            return Err(format!(
                "shuffle buffer has {} partitions but exchange has {} workers",
                self.partitions.len(),
                exchange.worker_count()
            ));
        }
        for (partition, chunks) in self.partitions.iter_mut().enumerate() {
            for chunk in chunks.drain(..) {
                exchange.send(partition, chunk)?;
            }
        }
        self.buffered_rows = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, RecordBatch};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn chunk(values: Vec<i32>) -> Chunk {
        let schema = Arc::new(Schema::new(vec![Field::new("k", DataType::Int32, true)]));
        Chunk::new(
            RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap(),
        )
    }

    #[test]
    fn local_exchange_loops_back() {
        let mut buffer = ShuffleBuffer::new(1, 4).unwrap();
        let mut exchange = LocalExchange::new();
        buffer
            .append_partitioned(&chunk(vec![1, 2, 3]), &[10, 20, 30])
            .unwrap();
        assert!(!buffer.buffers_full());
        buffer.flush(&mut exchange).unwrap();
        assert_eq!(buffer.buffered_rows(), 0);
        let received = exchange.try_receive().unwrap().expect("chunk");
        assert_eq!(received.len(), 3);
        assert!(exchange.try_receive().unwrap().is_none());
    }

    #[test]
    fn capacity_marks_buffers_full() {
        let mut buffer = ShuffleBuffer::new(1, 3).unwrap();
        buffer
            .append_partitioned(&chunk(vec![1, 2, 3]), &[1, 2, 3])
            .unwrap();
        assert!(buffer.buffers_full());
    }
}
