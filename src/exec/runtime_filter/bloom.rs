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
//! Block bloom filter over join-key hashes.
//!
//! Responsibilities:
//! - Probabilistic membership pruning for probe rows before the full hash
//!   table lookup; keyed by the same 64-bit key-row hashes the hash table
//!   and shuffle partitioner use.
//! - Supports merge of per-worker filters and a little-endian wire encoding
//!   for exchange between workers during a distributed build.
//!
//! Key exported interfaces:
//! - Types: `JoinBloomFilter`.

const SALT: [u32; 8] = [
    0x47b6137b, 0x44974d91, 0x8824ad5b, 0xa2b7289d, 0x705495c7, 0x2df1424b, 0x9efc4947, 0x5c6bfb31,
];

/// Directory cap: 2^21 buckets of 32 bytes, 64 MiB. Hints above this
/// produce a disabled filter instead of an allocation that large.
const MAX_LOG_NUM_BUCKETS: i32 = 21;

/// Split-block bloom filter: each key occupies one bit in each of the eight
/// 32-bit lanes of a single bucket.
#[derive(Clone, Debug)]
pub struct JoinBloomFilter {
    log_num_buckets: i32,
    directory_mask: u32,
    directory: Vec<u32>,
}

impl JoinBloomFilter {
    /// Disabled filter: accepts every hash, costs nothing to carry.
    pub fn empty() -> Self {
        Self {
            log_num_buckets: 0,
            directory_mask: 0,
            directory: Vec::new(),
        }
    }

    /// Size the directory for an expected number of distinct keys. A hint
    /// past the directory cap yields a disabled filter; callers check
    /// `can_use` before relying on pruning.
    pub fn with_expected_keys(num_elements: u64) -> Self {
        let nums = num_elements.max(1);
        let log_heap_space = (nums as f64).log2().ceil() as i32;
        let log_num_buckets = std::cmp::max(1, log_heap_space - 5);
        if log_num_buckets > MAX_LOG_NUM_BUCKETS {
            return Self::empty();
        }
        let directory_mask = ((1u64 << log_num_buckets as u32) - 1) as u32;
        let bucket_count = 1usize << log_num_buckets;
        Self {
            log_num_buckets,
            directory_mask,
            directory: vec![0u32; bucket_count * 8],
        }
    }

    pub fn can_use(&self) -> bool {
        !self.directory.is_empty()
    }

    pub fn insert_hash(&mut self, hash: u64) {
        if !self.can_use() {
            return;
        }
        let bucket_idx = (hash as u32) & self.directory_mask;
        let key = (hash >> (self.log_num_buckets as u32)) as u32;
        let masks = make_mask(key);
        let base = bucket_idx as usize * 8;
        for i in 0..8 {
            self.directory[base + i] |= masks[i];
        }
    }

    /// False means the key is definitely absent; true means it may be present.
    pub fn test_hash(&self, hash: u64) -> bool {
        if !self.can_use() {
            return true;
        }
        let bucket_idx = (hash as u32) & self.directory_mask;
        let key = (hash >> (self.log_num_buckets as u32)) as u32;
        let masks = make_mask(key);
        let base = bucket_idx as usize * 8;
        for i in 0..8 {
            if (self.directory[base + i] & masks[i]) == 0 {
                return false;
            }
        }
        true
    }

    /// OR another worker's filter into this one; both must be sized alike.
    pub fn merge_from(&mut self, other: &JoinBloomFilter) -> Result<(), String> {
        if !self.can_use() || !other.can_use() {
            return Ok(());
        }
        if self.log_num_buckets != other.log_num_buckets
            || self.directory_mask != other.directory_mask
            || self.directory.len() != other.directory.len()
        {
            return Err("join bloom filter merge size mismatch".to_string());
        }
        for (dst, src) in self.directory.iter_mut().zip(other.directory.iter()) {
            *dst |= *src;
        }
        Ok(())
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.log_num_buckets.to_le_bytes());
        buf.extend_from_slice(&self.directory_mask.to_le_bytes());
        let data_size = (self.directory.len() * 4) as i32;
        buf.extend_from_slice(&data_size.to_le_bytes());
        for value in &self.directory {
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    pub fn deserialize(data: &[u8], offset: &mut usize) -> Result<Self, String> {
        let log_num_buckets = read_i32_le(data, offset)?;
        let directory_mask = read_u32_le(data, offset)?;
        let data_size = read_i32_le(data, offset)? as usize;
        if data.len() < *offset + data_size {
            return Err("join bloom filter data truncated".to_string());
        }
        if data_size % 4 != 0 {
            return Err("join bloom filter data size invalid".to_string());
        }
        let mut directory = Vec::with_capacity(data_size / 4);
        for _ in 0..(data_size / 4) {
            directory.push(read_u32_le(data, offset)?);
        }
        Ok(Self {
            log_num_buckets,
            directory_mask,
            directory,
        })
    }
}

fn make_mask(key: u32) -> [u32; 8] {
    let mut masks = [0u32; 8];
    for i in 0..8 {
        let mut v = key.wrapping_mul(SALT[i]);
        v >>= 27;
        masks[i] = 1u32 << v;
    }
    masks
}

fn read_i32_le(data: &[u8], offset: &mut usize) -> Result<i32, String> {
    let end = offset
        .checked_add(4)
        .ok_or_else(|| "join bloom filter offset overflow".to_string())?;
    let bytes: [u8; 4] = data
        .get(*offset..end)
        .ok_or_else(|| "join bloom filter data truncated".to_string())?
        .try_into()
        .map_err(|_| "join bloom filter data truncated".to_string())?;
    *offset = end;
    Ok(i32::from_le_bytes(bytes))
}

fn read_u32_le(data: &[u8], offset: &mut usize) -> Result<u32, String> {
    Ok(read_i32_le(data, offset)? as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_hashes_always_test_positive() {
        let mut bf = JoinBloomFilter::with_expected_keys(1024);
        for i in 0..1024u64 {
            bf.insert_hash(i.wrapping_mul(0x9e3779b97f4a7c15));
        }
        for i in 0..1024u64 {
            assert!(bf.test_hash(i.wrapping_mul(0x9e3779b97f4a7c15)));
        }
    }

    #[test]
    fn most_absent_hashes_test_negative() {
        let mut bf = JoinBloomFilter::with_expected_keys(4096);
        for i in 0..128u64 {
            bf.insert_hash(i.wrapping_mul(0x9e3779b97f4a7c15));
        }
        let mut rejected = 0;
        for i in 10_000..20_000u64 {
            if !bf.test_hash(i.wrapping_mul(0x9e3779b97f4a7c15)) {
                rejected += 1;
            }
        }
        assert!(rejected > 9_000, "rejected={}", rejected);
    }

    #[test]
    fn oversized_hint_yields_a_disabled_filter() {
        let mut bf = JoinBloomFilter::with_expected_keys(u64::MAX);
        assert!(!bf.can_use());
        // Disabled filters are pass-through, never wrong.
        bf.insert_hash(42);
        assert!(bf.test_hash(42));
        assert!(bf.test_hash(43));
    }

    #[test]
    fn serialize_round_trips_and_merge_unions() {
        let mut a = JoinBloomFilter::with_expected_keys(256);
        let mut b = JoinBloomFilter::with_expected_keys(256);
        a.insert_hash(11);
        b.insert_hash(22);

        let mut buf = Vec::new();
        b.serialize(&mut buf);
        let mut offset = 0usize;
        let decoded = JoinBloomFilter::deserialize(&buf, &mut offset).expect("deserialize");
        assert_eq!(offset, buf.len());

        a.merge_from(&decoded).expect("merge");
        assert!(a.test_hash(11));
        assert!(a.test_hash(22));
    }
}
