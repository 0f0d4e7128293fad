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
//! Per-side column index mappings for the keys-first reordered layout.
//!
//! Each join side is reordered so its equality keys come first (in condition
//! order) followed by the remaining data columns in original order. Three
//! derived vectors per side: the reorder projection, its reverse (used to
//! re-target non-equality predicate operands), and the reordered positions
//! kept in the join output.

use std::collections::BTreeSet;

use hashbrown::HashMap;

/// Derived index vectors for one join side.
#[derive(Clone, Debug)]
pub(crate) struct SideMapping {
    /// Reordered position -> original column index; keys first.
    pub(crate) reorder: Vec<usize>,
    /// Original column index -> reordered position.
    pub(crate) reverse: Vec<usize>,
    /// Reordered positions that appear in the join output, in original
    /// column order, duplicate-free.
    pub(crate) kept: Vec<usize>,
}

impl SideMapping {
    pub(crate) fn new(
        keys: &[usize],
        num_columns: usize,
        bound: &BTreeSet<usize>,
    ) -> Result<Self, String> {
        let reorder = input_column_mapping(keys, num_columns)?;
        let mut reverse = vec![0usize; reorder.len()];
        for (pos, original) in reorder.iter().enumerate() {
            reverse[*original] = pos;
        }
        let kept = output_column_mapping(keys, num_columns, bound)?;
        Ok(Self {
            reorder,
            reverse,
            kept,
        })
    }
}

/// Keys first (in condition order), then the remaining columns in original
/// order. A column reused across several equality conditions appears once
/// per condition, so the serialized key tuple still compares all pairs.
fn input_column_mapping(keys: &[usize], num_columns: usize) -> Result<Vec<usize>, String> {
    let mut is_key = vec![false; num_columns];
    let mut mapping = Vec::with_capacity(num_columns);
    for key in keys {
        if *key >= num_columns {
            return Err(format!(
                "join key column {} out of bounds (num_columns={})",
                key, num_columns
            ));
        }
        is_key[*key] = true;
        mapping.push(*key);
    }
    for col in 0..num_columns {
        if !is_key[col] {
            mapping.push(col);
        }
    }
    Ok(mapping)
}

/// Reordered positions of the columns the plan keeps in the output,
/// enumerated in original column order.
fn output_column_mapping(
    keys: &[usize],
    num_columns: usize,
    bound: &BTreeSet<usize>,
) -> Result<Vec<usize>, String> {
    let mut key_positions = HashMap::with_capacity(keys.len());
    for (pos, key) in keys.iter().enumerate() {
        key_positions.insert(*key, pos);
    }
    let mut data_offset = keys.len();
    let mut kept = Vec::with_capacity(bound.len());
    for col in 0..num_columns {
        let is_bound = bound.contains(&col);
        match key_positions.get(&col) {
            Some(pos) => {
                if is_bound {
                    kept.push(*pos);
                }
            }
            None => {
                if is_bound {
                    kept.push(data_offset);
                }
                data_offset += 1;
            }
        }
    }
    let mut unique = BTreeSet::new();
    for pos in &kept {
        if !unique.insert(*pos) {
            return Err(format!("join output kept column {} duplicated", pos));
        }
    }
    Ok(kept)
}

/// Expand a possibly-empty plan projection map into a bound-column set;
/// empty means keep all columns.
pub(crate) fn bound_columns(
    projection: &[usize],
    num_columns: usize,
    side: &str,
) -> Result<BTreeSet<usize>, String> {
    if projection.is_empty() {
        return Ok((0..num_columns).collect());
    }
    let mut bound = BTreeSet::new();
    for col in projection {
        if *col >= num_columns {
            return Err(format!(
                "{} projection column {} out of bounds (num_columns={})",
                side, col, num_columns
            ));
        }
        bound.insert(*col);
    }
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_move_to_front() {
        let bound = (0..4).collect();
        let mapping = SideMapping::new(&[2, 0], 4, &bound).unwrap();
        assert_eq!(mapping.reorder, vec![2, 0, 1, 3]);
        assert_eq!(mapping.reverse, vec![1, 2, 0, 3]);
    }

    #[test]
    fn reverse_mapping_round_trips() {
        let bound = (0..5).collect();
        let mapping = SideMapping::new(&[3, 1], 5, &bound).unwrap();
        for original in 0..5 {
            let reordered = mapping.reverse[original];
            assert_eq!(mapping.reorder[reordered], original);
        }
    }

    #[test]
    fn kept_columns_follow_original_order() {
        // keys 2 and 0; keep columns 0, 1 and 3.
        let bound = [0usize, 1, 3].into_iter().collect();
        let mapping = SideMapping::new(&[2, 0], 4, &bound).unwrap();
        // col 0 is key position 1; col 1 is the first data column (offset 2);
        // col 3 is the second data column (offset 3).
        assert_eq!(mapping.kept, vec![1, 2, 3]);
    }

    #[test]
    fn key_column_reused_across_conditions() {
        // Column 0 participates in two equality conditions.
        let bound = (0..2).collect();
        let mapping = SideMapping::new(&[0, 0], 2, &bound).unwrap();
        assert_eq!(mapping.reorder, vec![0, 0, 1]);
        // One kept position per original column, no duplicates.
        assert_eq!(mapping.kept.len(), 2);
        assert_eq!(mapping.kept[1], 2);
    }
}
