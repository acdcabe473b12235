//! Shard assignment: FNV-1a over the object UID, jump consistent hash into buckets.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// 64-bit FNV-1a.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325; // 64-bit FNV-1a offset
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

/// Jump consistent hash (Lamping & Veach). Maps `key` into `[0, buckets)`;
/// growing `buckets` by one moves only keys that land in the new bucket.
pub fn jump_hash(mut key: u64, buckets: u32) -> u32 {
    let mut b: i64 = -1;
    let mut j: i64 = 0;
    while j < buckets as i64 {
        b = j;
        key = key.wrapping_mul(2862933555777941757).wrapping_add(1);
        j = ((b + 1) as f64 * ((1i64 << 31) as f64 / ((key >> 33) + 1) as f64)) as i64;
    }
    b.max(0) as u32
}

/// This replica's slice of the object space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sharding {
    ordinal: u32,
    total: u32,
}

impl Sharding {
    pub fn new(ordinal: u32, total: u32) -> Result<Self> {
        if total == 0 || ordinal >= total {
            return Err(Error::InvalidShard { ordinal, total });
        }
        Ok(Self { ordinal, total })
    }

    /// One replica owning everything.
    pub fn single() -> Self { Self { ordinal: 0, total: 1 } }

    pub fn ordinal(&self) -> u32 { self.ordinal }
    pub fn total(&self) -> u32 { self.total }

    /// No filtering is needed for this configuration.
    pub fn is_noop(&self) -> bool { self.ordinal == 0 && self.total == 1 }

    pub fn shard_for(&self, uid: &str) -> u32 { jump_hash(fnv1a_64(uid.as_bytes()), self.total) }

    pub fn keep(&self, uid: &str) -> bool { self.shard_for(uid) == self.ordinal }
}

impl Default for Sharding {
    fn default() -> Self { Self::single() }
}
