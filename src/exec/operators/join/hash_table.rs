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
//! Hash-table primitives for join key indexing.
//!
//! Responsibilities:
//! - Builds hash buckets and row-reference chains from build-side key arrays,
//!   keys serialized through the Arrow row format.
//! - Exposes the 64-bit key hashes shared with the bloom filter and the
//!   shuffle partitioner, and a CSR group index finalized before probing.
//!
//! Key exported interfaces:
//! - Types: `JoinHashTable`, `KeyedRows`.

use arrow::array::ArrayRef;
use arrow::datatypes::DataType;
use arrow::row::{RowConverter, Rows, SortField};
use hashbrown::HashMap;
use twox_hash::XxHash64;

const ROW_NONE: u32 = u32::MAX;
const HASH_SEED: u64 = 0x9e3779b97f4a7c15;

/// Serialized key rows plus per-row hash and forbidden-null classification
/// for one chunk. Shared by build insertion, bloom updates, shuffle
/// partitioning, and probe lookup so each chunk is serialized once.
pub(crate) struct KeyedRows {
    rows: Rows,
    pub(crate) hashes: Vec<u64>,
    /// True where some key is null; `=` semantics, so such rows never match.
    pub(crate) null_keys: Vec<bool>,
}

impl KeyedRows {
    pub(crate) fn len(&self) -> usize {
        self.hashes.len()
    }

    fn row_bytes(&self, row: usize) -> &[u8] {
        self.rows.row(row).data()
    }
}

/// Hash-table container for join key buckets and build-row reference chains.
pub(crate) struct JoinHashTable {
    key_types: Vec<DataType>,
    converter: RowConverter,
    group_index: HashMap<Vec<u8>, u32>,
    group_head: Vec<u32>,
    row_next: Vec<u32>,
    row_count: usize,
    group_offsets: Option<Vec<u32>>,
    group_rows: Option<Vec<u32>>,
}

impl JoinHashTable {
    pub(crate) fn new(key_types: Vec<DataType>) -> Result<Self, String> {
        if key_types.is_empty() {
            return Err("join hash table requires join keys".to_string());
        }
        let fields = key_types
            .iter()
            .map(|dt| SortField::new(dt.clone()))
            .collect::<Vec<_>>();
        let converter = RowConverter::new(fields).map_err(|e| e.to_string())?;
        Ok(Self {
            key_types,
            converter,
            group_index: HashMap::new(),
            group_head: Vec::new(),
            row_next: Vec::new(),
            row_count: 0,
            group_offsets: None,
            group_rows: None,
        })
    }

    pub(crate) fn key_count(&self) -> usize {
        self.key_types.len()
    }

    pub(crate) fn row_count(&self) -> usize {
        self.row_count
    }

    pub(crate) fn group_count(&self) -> usize {
        self.group_head.len()
    }

    /// Serialize and hash one chunk's key columns.
    pub(crate) fn keyed_rows(&self, key_arrays: &[ArrayRef]) -> Result<KeyedRows, String> {
        if key_arrays.len() != self.key_types.len() {
            return Err(format!(
                "join key length mismatch: expected {} got {}",
                self.key_types.len(),
                key_arrays.len()
            ));
        }
        for (array, expected) in key_arrays.iter().zip(&self.key_types) {
            if array.data_type() != expected {
                return Err(format!(
                    "join key type mismatch: expected {:?} got {:?}",
                    expected,
                    array.data_type()
                ));
            }
        }
        let num_rows = key_arrays.first().map(|a| a.len()).unwrap_or(0);
        let rows = self
            .converter
            .convert_columns(key_arrays)
            .map_err(|e| e.to_string())?;
        let mut hashes = Vec::with_capacity(num_rows);
        let mut null_keys = Vec::with_capacity(num_rows);
        for row in 0..num_rows {
            hashes.push(XxHash64::oneshot(HASH_SEED, rows.row(row).data()));
            null_keys.push(key_arrays.iter().any(|a| a.is_null(row)));
        }
        Ok(KeyedRows {
            rows,
            hashes,
            null_keys,
        })
    }

    /// Insert one build chunk's rows; rows with a null key are skipped.
    /// Row ids are assigned contiguously across calls, matching the order in
    /// which build chunks are accumulated.
    pub(crate) fn add_build_batch(&mut self, keyed: &KeyedRows) -> Result<(), String> {
        if self.group_offsets.is_some() || self.group_rows.is_some() {
            return Err("join hash table already finalized".to_string());
        }
        let num_rows = keyed.len();
        if num_rows == 0 {
            return Ok(());
        }
        let next_row_count = self
            .row_count
            .checked_add(num_rows)
            .ok_or_else(|| "join build row count overflow".to_string())?;
        if next_row_count > u32::MAX as usize {
            return Err("join build row count overflow".to_string());
        }
        let base_row_id = self.row_count as u32;
        self.row_next.resize(next_row_count, ROW_NONE);
        self.row_count = next_row_count;

        for row in 0..num_rows {
            if keyed.null_keys[row] {
                continue;
            }
            let row_id = base_row_id + row as u32;
            let next_group = self.group_head.len() as u32;
            let group_id = *self
                .group_index
                .entry_ref(keyed.row_bytes(row))
                .or_insert(next_group);
            if group_id == next_group {
                self.group_head.push(ROW_NONE);
            }
            self.link_row(group_id as usize, row_id)?;
        }
        Ok(())
    }

    /// Build the CSR (offsets, rows) group index; build insertion is closed
    /// afterwards. Group row order is the insertion order within each group.
    pub(crate) fn finalize_groups(&mut self) -> Result<(), String> {
        if self.group_offsets.is_some() || self.group_rows.is_some() {
            return Ok(());
        }
        let group_count = self.group_head.len();
        let mut counts = vec![0u32; group_count];
        for group_id in 0..group_count {
            let mut row = self.group_head[group_id];
            while row != ROW_NONE {
                counts[group_id] = counts[group_id]
                    .checked_add(1)
                    .ok_or_else(|| "join group row count overflow".to_string())?;
                row = self.next_row(row)?;
            }
        }

        let mut offsets = Vec::with_capacity(group_count + 1);
        offsets.push(0u32);
        let mut total = 0u32;
        for count in &counts {
            total = total
                .checked_add(*count)
                .ok_or_else(|| "join group rows overflow".to_string())?;
            offsets.push(total);
        }

        // Chains are head-insertion (newest first); fill each group backwards
        // so the CSR slice comes out in build insertion order.
        let mut rows = vec![0u32; total as usize];
        let mut write_end: Vec<u32> = offsets[1..].to_vec();
        for group_id in 0..group_count {
            let mut row = self.group_head[group_id];
            while row != ROW_NONE {
                let slot = write_end[group_id]
                    .checked_sub(1)
                    .ok_or_else(|| "join group row index out of bounds".to_string())?;
                rows[slot as usize] = row;
                write_end[group_id] = slot;
                row = self.next_row(row)?;
            }
        }

        self.group_offsets = Some(offsets);
        self.group_rows = Some(rows);
        Ok(())
    }

    /// Group ids for one probe chunk; `None` marks no-match (absent key or
    /// null key).
    pub(crate) fn lookup_batch(&self, keyed: &KeyedRows) -> Result<Vec<Option<usize>>, String> {
        let mut group_ids = vec![None; keyed.len()];
        for row in 0..keyed.len() {
            if keyed.null_keys[row] {
                continue;
            }
            group_ids[row] = self
                .group_index
                .get(keyed.row_bytes(row))
                .map(|id| *id as usize);
        }
        Ok(group_ids)
    }

    pub(crate) fn group_rows_slice(&self, group_id: usize) -> Result<&[u32], String> {
        let offsets = self
            .group_offsets
            .as_ref()
            .ok_or_else(|| "join group offsets missing; finalize_groups not called".to_string())?;
        let rows = self
            .group_rows
            .as_ref()
            .ok_or_else(|| "join group rows missing; finalize_groups not called".to_string())?;
        if group_id + 1 >= offsets.len() {
            return Err("join group id out of bounds".to_string());
        }
        let start = offsets[group_id] as usize;
        let end = offsets[group_id + 1] as usize;
        Ok(&rows[start..end])
    }

    fn link_row(&mut self, group_id: usize, row_id: u32) -> Result<(), String> {
        let head = self
            .group_head
            .get(group_id)
            .copied()
            .ok_or_else(|| "join group id out of bounds".to_string())?;
        let slot = row_id as usize;
        if slot >= self.row_next.len() {
            return Err("join row id out of bounds".to_string());
        }
        self.row_next[slot] = head;
        self.group_head[group_id] = row_id;
        Ok(())
    }

    fn next_row(&self, row_id: u32) -> Result<u32, String> {
        self.row_next
            .get(row_id as usize)
            .copied()
            .ok_or_else(|| "join row id out of bounds".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use std::sync::Arc;

    fn keys(values: Vec<Option<i32>>) -> Vec<ArrayRef> {
        vec![Arc::new(Int32Array::from(values)) as ArrayRef]
    }

    #[test]
    fn groups_collect_equal_keys_in_insertion_order() {
        let mut table = JoinHashTable::new(vec![DataType::Int32]).unwrap();
        let keyed = table.keyed_rows(&keys(vec![Some(1), Some(2), Some(2)])).unwrap();
        table.add_build_batch(&keyed).unwrap();
        let keyed = table.keyed_rows(&keys(vec![Some(2), Some(3)])).unwrap();
        table.add_build_batch(&keyed).unwrap();
        table.finalize_groups().unwrap();

        let probe = table.keyed_rows(&keys(vec![Some(2)])).unwrap();
        let group_ids = table.lookup_batch(&probe).unwrap();
        let group_id = group_ids[0].expect("key 2 present");
        assert_eq!(table.group_rows_slice(group_id).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn null_keys_never_match() {
        let mut table = JoinHashTable::new(vec![DataType::Int32]).unwrap();
        let keyed = table.keyed_rows(&keys(vec![None, Some(1)])).unwrap();
        table.add_build_batch(&keyed).unwrap();
        table.finalize_groups().unwrap();

        let probe = table.keyed_rows(&keys(vec![None, Some(1)])).unwrap();
        let group_ids = table.lookup_batch(&probe).unwrap();
        assert!(group_ids[0].is_none());
        assert!(group_ids[1].is_some());
    }

    #[test]
    fn insertion_after_finalize_is_rejected() {
        let mut table = JoinHashTable::new(vec![DataType::Int32]).unwrap();
        let keyed = table.keyed_rows(&keys(vec![Some(1)])).unwrap();
        table.add_build_batch(&keyed).unwrap();
        table.finalize_groups().unwrap();
        let keyed = table.keyed_rows(&keys(vec![Some(2)])).unwrap();
        let err = table.add_build_batch(&keyed).expect_err("finalized");
        assert!(err.contains("finalized"), "err={}", err);
    }
}
