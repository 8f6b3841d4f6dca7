//! Byte-stream engine for regular files.
//!
//! A file's index block holds up to [`INDEX_CAPACITY`](crate::INDEX_CAPACITY) little-endian block
//! pointers; pointer `i` covers bytes `i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE`.
//! Only the first `nr_used_blocks` pointers are meaningful.

use alloc::vec::Vec;

use log::{debug, error};

use crate::bitmap::Bitmap;
use crate::block_cache::{BlockCache, BlockHandle};
use crate::block_dev::BlockDevice;
use crate::common::{OpenFlags, SifsError, SifsResult};
use crate::inode::{Inode, InodeKind};
use crate::superblock::SuperBlock;
use crate::{BLOCK_SIZE, MAX_FILESIZE};

/// Fail with `Corrupted` unless `block` lies in the data region.
pub(crate) fn check_data_block(sb: &SuperBlock, block: u32) -> SifsResult<u32> {
    if block < sb.data_start() || block >= sb.nr_blocks {
        return Err(SifsError::Corrupted("block pointer outside the data region"));
    }
    Ok(block)
}

/// Read up to `buf.len()` bytes at `offset`. Returns the number of bytes
/// copied, 0 at or past end of file.
pub fn read<D: BlockDevice>(
    cache: &BlockCache<D>,
    sb: &SuperBlock,
    file: &Inode,
    offset: u32,
    buf: &mut [u8],
) -> SifsResult<usize> {
    let nr_used = file.nr_used_blocks()?;
    if offset >= file.size || buf.is_empty() {
        return Ok(0);
    }
    let end = (offset as u64 + buf.len() as u64).min(file.size as u64) as u32;
    let index = cache.get_block(file.index_block)?;

    let mut pos = offset;
    let mut copied = 0;
    while pos < end {
        let block_index = pos / BLOCK_SIZE as u32;
        if block_index >= nr_used {
            debug!("read ino {}: stopped at block {}", file.ino, block_index);
            break;
        }
        let ptr = check_data_block(sb, index.read_u32(block_index as usize * 4))?;
        let intra = (pos % BLOCK_SIZE as u32) as usize;
        let chunk = (BLOCK_SIZE - intra).min((end - pos) as usize);

        let data = cache.get_block(ptr)?;
        buf[copied..copied + chunk].copy_from_slice(&data.data()[intra..intra + chunk]);
        copied += chunk;
        pos += chunk as u32;
    }
    debug!("read ino {}: {} bytes at {}", file.ino, copied, offset);
    Ok(copied)
}

/// Reserve, zero and index blocks `from..to`. Every reserved block is pushed
/// to `fresh` before anything else can fail.
fn grow<D: BlockDevice>(
    cache: &BlockCache<D>,
    blocks: &mut Bitmap,
    index: &mut BlockHandle<'_, D>,
    from: u32,
    to: u32,
    fresh: &mut Vec<u32>,
) -> SifsResult<()> {
    for block_index in from..to {
        let new_block = blocks.reserve_next()?;
        fresh.push(new_block);
        cache.get_block(new_block)?.zero();
        index.write_u32(block_index as usize * 4, new_block);
    }
    Ok(())
}

fn copy_in<D: BlockDevice>(
    cache: &BlockCache<D>,
    sb: &SuperBlock,
    index: &BlockHandle<'_, D>,
    offset: u32,
    end: u32,
    data: &[u8],
) -> SifsResult<usize> {
    let mut pos = offset;
    let mut written = 0;
    while pos < end {
        let block_index = pos / BLOCK_SIZE as u32;
        let ptr = check_data_block(sb, index.read_u32(block_index as usize * 4))?;
        let intra = (pos % BLOCK_SIZE as u32) as usize;
        let chunk = (BLOCK_SIZE - intra).min((end - pos) as usize);

        let mut block = cache.get_block(ptr)?;
        block.data_mut()[intra..intra + chunk].copy_from_slice(&data[written..written + chunk]);
        block.mark_dirty();
        written += chunk;
        pos += chunk as u32;
    }
    Ok(written)
}

/// Write `data` at `offset` (or at end of file with [`OpenFlags::APPEND`]),
/// allocating and zeroing blocks as needed. Either the whole buffer is
/// written or no block is taken and `file` is left as it was. The caller
/// persists `file`.
pub fn write<D: BlockDevice>(
    cache: &BlockCache<D>,
    sb: &SuperBlock,
    blocks: &mut Bitmap,
    file: &mut Inode,
    offset: u32,
    data: &[u8],
    flags: OpenFlags,
) -> SifsResult<usize> {
    let nr_used = file.nr_used_blocks()?;
    if file.size >= MAX_FILESIZE {
        return Err(SifsError::FileTooLarge);
    }
    if data.is_empty() {
        return Ok(0);
    }
    let offset = if flags.contains(OpenFlags::APPEND) {
        file.size
    } else {
        offset
    };
    let end = offset as u64 + data.len() as u64;
    if end > MAX_FILESIZE as u64 {
        return Err(SifsError::FileTooLarge);
    }
    let end = end as u32;

    let needed = (end + BLOCK_SIZE as u32 - 1) / BLOCK_SIZE as u32;
    let missing = needed.saturating_sub(nr_used);
    if missing > blocks.free_count() {
        debug!(
            "write ino {}: needs {} blocks, {} free",
            file.ino,
            missing,
            blocks.free_count()
        );
        return Err(SifsError::OutOfSpace);
    }

    let mut index = cache.get_block(file.index_block)?;
    let mut fresh = Vec::with_capacity(missing as usize);
    let res = grow(cache, blocks, &mut index, nr_used, needed, &mut fresh)
        .and_then(|_| copy_in(cache, sb, &index, offset, end, data));
    let written = match res {
        Ok(written) => written,
        Err(e) => {
            for block in fresh {
                if let Err(e2) = blocks.release(block) {
                    error!("write ino {}: cannot give back block {}: {}", file.ino, block, e2);
                }
            }
            return Err(e);
        }
    };

    if needed > nr_used {
        file.kind = InodeKind::RegularFile {
            nr_used_blocks: needed,
        };
    }
    file.size = file.size.max(end);
    debug!(
        "write ino {}: {} bytes at {}, size now {}",
        file.ino, written, offset, file.size
    );
    Ok(written)
}
