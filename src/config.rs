//! Format and mount options.
//!
//! Both can be built in code or parsed from JSON; missing fields fall back
//! to their defaults.

use serde::{Deserialize, Serialize};

use crate::common::{SifsError, SifsResult};

/// Default number of blocks kept in the block cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// One inode per this many blocks when `nr_inodes` is not given.
pub const BLOCKS_PER_INODE: u32 = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    /// Blocks to use; the whole device when absent.
    pub nr_blocks: Option<u32>,
    pub nr_inodes: Option<u32>,
}

impl FormatOptions {
    pub fn new(nr_blocks: u32, nr_inodes: u32) -> Self {
        Self {
            nr_blocks: Some(nr_blocks),
            nr_inodes: Some(nr_inodes),
        }
    }

    pub fn from_json(bytes: &[u8]) -> SifsResult<Self> {
        serde_json::from_slice(bytes).map_err(|_| SifsError::Config("unparsable format options"))
    }

    /// Resolve to `(nr_blocks, nr_inodes)` for a device of `device_blocks`.
    pub fn resolve(&self, device_blocks: u32) -> SifsResult<(u32, u32)> {
        let nr_blocks = self.nr_blocks.unwrap_or(device_blocks);
        if nr_blocks > device_blocks {
            return Err(SifsError::Config("more blocks requested than the device has"));
        }
        let nr_inodes = self
            .nr_inodes
            .unwrap_or_else(|| (nr_blocks / BLOCKS_PER_INODE).max(2));
        Ok((nr_blocks, nr_inodes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountOptions {
    pub cache_capacity: usize,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl MountOptions {
    pub fn from_json(bytes: &[u8]) -> SifsResult<Self> {
        serde_json::from_slice(bytes).map_err(|_| SifsError::Config("unparsable mount options"))
    }
}
