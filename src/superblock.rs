//! Block 0: volume geometry and free counters.

use log::info;
use serde::Serialize;

use crate::block_cache::BlockCache;
use crate::block_dev::BlockDevice;
use crate::common::{SifsError, SifsResult};
use crate::{u32, BITS_PER_BLOCK, INODES_PER_BLOCK, SIFS_MAGIC, SUPERBLOCK_NO};

/// Size of the on-disk record in bytes.
pub const SUPERBLOCK_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SuperBlock {
    pub magic: u32,
    pub nr_blocks: u32,
    pub nr_inodes: u32,
    pub nr_istore_blocks: u32,
    pub nr_ifree_blocks: u32,
    pub nr_bfree_blocks: u32,
    pub nr_free_blocks: u32,
    pub nr_free_inodes: u32,
}

impl SuperBlock {
    /// Lay out a fresh volume of `nr_blocks` blocks holding `nr_inodes`
    /// inodes. Free counters start at "everything past the metadata".
    pub fn with_geometry(nr_blocks: u32, nr_inodes: u32) -> SifsResult<Self> {
        if nr_inodes < 2 {
            return Err(SifsError::Config("at least two inodes are required"));
        }
        let mut sb = SuperBlock {
            magic: SIFS_MAGIC,
            nr_blocks,
            nr_inodes,
            nr_istore_blocks: div_ceil(nr_inodes, INODES_PER_BLOCK),
            nr_ifree_blocks: div_ceil(nr_inodes, BITS_PER_BLOCK),
            nr_bfree_blocks: div_ceil(nr_blocks, BITS_PER_BLOCK),
            nr_free_blocks: 0,
            nr_free_inodes: nr_inodes,
        };
        let data_start = sb.data_start_checked()?;
        if data_start as u64 + 2 > nr_blocks as u64 {
            return Err(SifsError::Config("volume too small for its metadata"));
        }
        sb.nr_free_blocks = nr_blocks - data_start;
        Ok(sb)
    }

    /// Decode block 0. Fails with [`SifsError::BadMagic`] before looking at
    /// anything else.
    pub fn parse(bytes: &[u8]) -> SifsResult<Self> {
        if bytes.len() < SUPERBLOCK_SIZE {
            return Err(SifsError::Corrupted("short superblock"));
        }
        let field = |i: usize| u32!(&bytes[i * 4..i * 4 + 4]);
        let sb = SuperBlock {
            magic: field(0),
            nr_blocks: field(1),
            nr_inodes: field(2),
            nr_istore_blocks: field(3),
            nr_ifree_blocks: field(4),
            nr_bfree_blocks: field(5),
            nr_free_blocks: field(6),
            nr_free_inodes: field(7),
        };
        if sb.magic != SIFS_MAGIC {
            return Err(SifsError::BadMagic);
        }
        Ok(sb)
    }

    pub fn write_to(&self, out: &mut [u8]) {
        let fields = [
            self.magic,
            self.nr_blocks,
            self.nr_inodes,
            self.nr_istore_blocks,
            self.nr_ifree_blocks,
            self.nr_bfree_blocks,
            self.nr_free_blocks,
            self.nr_free_inodes,
        ];
        for (chunk, value) in out[..SUPERBLOCK_SIZE].chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Check that the regions fit together and the counters are in range.
    pub fn validate(&self) -> SifsResult<()> {
        if self.magic != SIFS_MAGIC {
            return Err(SifsError::BadMagic);
        }
        if self.nr_inodes == 0 {
            return Err(SifsError::Corrupted("no inodes"));
        }
        if (self.nr_istore_blocks as u64) * (INODES_PER_BLOCK as u64) < self.nr_inodes as u64 {
            return Err(SifsError::Corrupted("inode store too small"));
        }
        if (self.nr_ifree_blocks as u64) * (BITS_PER_BLOCK as u64) < self.nr_inodes as u64 {
            return Err(SifsError::Corrupted("inode bitmap too small"));
        }
        if (self.nr_bfree_blocks as u64) * (BITS_PER_BLOCK as u64) < self.nr_blocks as u64 {
            return Err(SifsError::Corrupted("block bitmap too small"));
        }
        let data_start = self.data_start_checked()?;
        if data_start >= self.nr_blocks {
            return Err(SifsError::Corrupted("no data region"));
        }
        if self.nr_free_inodes > self.nr_inodes {
            return Err(SifsError::Corrupted("more free inodes than inodes"));
        }
        if self.nr_free_blocks > self.nr_blocks - data_start {
            return Err(SifsError::Corrupted("more free blocks than data blocks"));
        }
        Ok(())
    }

    pub fn istore_start(&self) -> u32 {
        SUPERBLOCK_NO + 1
    }

    pub fn ifree_start(&self) -> u32 {
        self.istore_start() + self.nr_istore_blocks
    }

    pub fn bfree_start(&self) -> u32 {
        self.ifree_start() + self.nr_ifree_blocks
    }

    /// First data block; also the number of metadata blocks.
    pub fn data_start(&self) -> u32 {
        self.bfree_start() + self.nr_bfree_blocks
    }

    fn data_start_checked(&self) -> SifsResult<u32> {
        let start = 1u64
            + self.nr_istore_blocks as u64
            + self.nr_ifree_blocks as u64
            + self.nr_bfree_blocks as u64;
        u32::try_from(start).map_err(|_| SifsError::Corrupted("metadata region overflows"))
    }

    pub fn log_summary(&self, context: &str) {
        info!(
            "{}: magic={:#x} nr_blocks={} nr_inodes={} nr_istore_blocks={} \
             nr_ifree_blocks={} nr_bfree_blocks={} nr_free_inodes={} nr_free_blocks={}",
            context,
            self.magic,
            self.nr_blocks,
            self.nr_inodes,
            self.nr_istore_blocks,
            self.nr_ifree_blocks,
            self.nr_bfree_blocks,
            self.nr_free_inodes,
            self.nr_free_blocks
        );
    }
}

/// Read and decode block 0 through the cache.
pub fn load<D: BlockDevice>(cache: &BlockCache<D>) -> SifsResult<SuperBlock> {
    let block = cache.get_block(SUPERBLOCK_NO)?;
    SuperBlock::parse(block.data())
}

/// Write `sb` into block 0 through the cache.
pub fn store<D: BlockDevice>(cache: &BlockCache<D>, sb: &SuperBlock) -> SifsResult<()> {
    let mut block = cache.get_block(SUPERBLOCK_NO)?;
    sb.write_to(block.data_mut());
    block.mark_dirty();
    Ok(())
}

fn div_ceil(n: u32, d: u32) -> u32 {
    ((n as u64 + d as u64 - 1) / d as u64) as u32
}
