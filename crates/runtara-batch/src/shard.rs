// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Size-bounded accumulation of shard records.

use crate::error::{BatchError, CapacityLimit, Result};
use crate::types::ShardRecord;

/// Records accepted by the remote in one shard.
pub const MAX_RECORDS: usize = 50_000;

/// Bytes accepted by the remote in one shard.
pub const MAX_BYTES: usize = 512 * 1024 * 1024;

/// Ceilings of one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardLimits {
    pub max_records: usize,
    pub max_bytes: usize,
}

impl Default for ShardLimits {
    fn default() -> Self {
        Self {
            max_records: MAX_RECORDS,
            max_bytes: MAX_BYTES,
        }
    }
}

/// Line-delimited shard content. A rejected push leaves it untouched.
#[derive(Debug, Default)]
pub struct ShardBuilder {
    limits: ShardLimits,
    content: Vec<u8>,
    records: usize,
}

impl ShardBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: ShardLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Append a record and return its ordinal.
    pub fn push(&mut self, record: &ShardRecord) -> Result<usize> {
        if self.records >= self.limits.max_records {
            return Err(BatchError::CapacityExceeded {
                limit: CapacityLimit::Records,
                reason: format!(
                    "shard already holds {} records; submit it before adding more",
                    self.records
                ),
            });
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let total = self.content.len() + line.len();
        if total > self.limits.max_bytes {
            return Err(BatchError::CapacityExceeded {
                limit: CapacityLimit::Bytes,
                reason: format!(
                    "record of {} bytes would grow the shard to {} bytes (limit {})",
                    line.len(),
                    total,
                    self.limits.max_bytes
                ),
            });
        }

        self.content.extend_from_slice(&line);
        let ordinal = self.records;
        self.records += 1;
        Ok(ordinal)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn byte_size(&self) -> usize {
        self.content.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.content
    }
}
