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
use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch};
use arrow::compute::take;
use arrow::datatypes::{Schema, SchemaRef};

/// A chunk of data, consisting of multiple rows.
/// Wrapper around an Arrow RecordBatch; the sole unit of data exchange
/// between operators. Chunks are immutable once handed downstream.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub batch: RecordBatch,
}

impl Chunk {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            batch: RecordBatch::new_empty(schema),
        }
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn column(&self, index: usize) -> Result<&ArrayRef, String> {
        self.batch.columns().get(index).ok_or_else(|| {
            format!(
                "chunk column index {} out of bounds (num_columns={})",
                index,
                self.batch.num_columns()
            )
        })
    }

    pub fn slice(&self, offset: usize, length: usize) -> Self {
        Self {
            batch: self.batch.slice(offset, length),
        }
    }

    pub fn estimated_bytes(&self) -> usize {
        self.batch.get_array_memory_size()
    }

    /// Reorder columns into `column_indices` order, producing a new chunk.
    /// Keys-first projection for the join sides goes through here.
    pub fn project(&self, column_indices: &[usize]) -> Result<Self, String> {
        let batch = self
            .batch
            .project(column_indices)
            .map_err(|e| e.to_string())?;
        Ok(Self { batch })
    }

    /// Gather rows by index, preserving the chunk schema.
    pub fn take_rows(&self, indices: &arrow::array::UInt32Array) -> Result<Self, String> {
        let mut columns = Vec::with_capacity(self.batch.num_columns());
        for col in self.batch.columns() {
            let taken = take(col.as_ref(), indices, None).map_err(|e| e.to_string())?;
            columns.push(taken);
        }
        let batch =
            RecordBatch::try_new(self.batch.schema(), columns).map_err(|e| e.to_string())?;
        Ok(Self { batch })
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self {
            batch: RecordBatch::new_empty(Arc::new(Schema::empty())),
        }
    }
}

/// Check that a schema feeding a join carries a non-empty name on every column.
pub fn validate_column_names(schema: &Schema, side: &str) -> Result<(), String> {
    if schema.fields().is_empty() {
        return Err(format!("{} table schema has no columns", side));
    }
    for (idx, field) in schema.fields().iter().enumerate() {
        if field.name().is_empty() {
            return Err(format!(
                "{} table column at index {} has no name; join input tables must have column names",
                side, idx
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field};

    fn test_chunk() -> Chunk {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Int32, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![1, 2, 3])),
                Arc::new(Int32Array::from(vec![10, 20, 30])),
            ],
        )
        .expect("record batch");
        Chunk::new(batch)
    }

    #[test]
    fn project_reorders_columns() {
        let chunk = test_chunk();
        let projected = chunk.project(&[1, 0]).expect("project");
        assert_eq!(projected.schema().field(0).name(), "b");
        assert_eq!(projected.schema().field(1).name(), "a");
        assert_eq!(projected.len(), 3);
    }

    #[test]
    fn unnamed_column_is_rejected() {
        let schema = Schema::new(vec![Field::new("", DataType::Int32, true)]);
        let err = validate_column_names(&schema, "build").expect_err("expected error");
        assert!(err.contains("column names"), "err={}", err);
    }
}
