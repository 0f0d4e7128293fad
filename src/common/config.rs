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
//! Engine configuration knobs resolved once from the environment.

use std::sync::OnceLock;

use crate::common::logging::warn;

const DEFAULT_STREAMING_BATCH_SIZE: usize = 4096;
const DEFAULT_SHUFFLE_BUFFER_ROWS: usize = 64 * 1024;

fn env_usize(name: &str, default: usize) -> usize {
    let Ok(raw) = std::env::var(name) else {
        return default;
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return default;
    }
    match trimmed.parse::<usize>() {
        Ok(0) => {
            warn!("{} must be positive, falling back to {}", name, default);
            default
        }
        Ok(v) => v,
        Err(_) => {
            warn!("invalid {}={:?}, falling back to {}", name, raw, default);
            default
        }
    }
}

/// Target row count for chunks emitted by sources and the join output buffer.
pub fn streaming_batch_size() -> usize {
    static VALUE: OnceLock<usize> = OnceLock::new();
    *VALUE.get_or_init(|| env_usize("STREAMEXEC_BATCH_SIZE", DEFAULT_STREAMING_BATCH_SIZE))
}

/// Row capacity of the per-join shuffle buffer before sends are forced.
pub fn shuffle_buffer_rows() -> usize {
    static VALUE: OnceLock<usize> = OnceLock::new();
    *VALUE.get_or_init(|| env_usize("STREAMEXEC_SHUFFLE_BUFFER_ROWS", DEFAULT_SHUFFLE_BUFFER_ROWS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_positive() {
        assert!(streaming_batch_size() > 0);
        assert!(shuffle_buffer_rows() > 0);
    }
}
