//! Formatter. Runs before any cache exists, so it writes to the device
//! directly.

use alloc::vec;

use log::info;

use crate::bitmap::Bitmap;
use crate::block_dev::BlockDevice;
use crate::common::{SifsMode, SifsResult};
use crate::config::FormatOptions;
use crate::inode::{locate, Inode};
use crate::superblock::SuperBlock;
use crate::{BLOCK_SIZE, ROOT_INO, SUPERBLOCK_NO};

/// Lay down an empty filesystem on `device`: superblock, inode table holding
/// the root directory, both bitmaps and the root's empty entry block.
pub fn format<D: BlockDevice>(device: &D, opts: &FormatOptions) -> SifsResult<SuperBlock> {
    let (nr_blocks, nr_inodes) = opts.resolve(device.block_count())?;
    let mut sb = SuperBlock::with_geometry(nr_blocks, nr_inodes)?;
    let root_index = sb.data_start();

    let mut inodes = Bitmap::new_free("ifree", nr_inodes);
    inodes.mark_used(ROOT_INO)?;
    let mut blocks = Bitmap::new_free("bfree", nr_blocks);
    for no in 0..=root_index {
        blocks.mark_used(no)?;
    }
    sb.nr_free_inodes = inodes.free_count();
    sb.nr_free_blocks = blocks.free_count();

    let mut buf = vec![0u8; BLOCK_SIZE];
    sb.write_to(&mut buf);
    device.write_block(SUPERBLOCK_NO, &buf)?;

    let root = Inode::new_directory(ROOT_INO, SifsMode::from_bits_truncate(0o755), root_index);
    let (root_block, root_offset) = locate(ROOT_INO);
    for no in sb.istore_start()..sb.ifree_start() {
        buf.fill(0);
        if no == root_block {
            root.write_record(&mut buf[root_offset..]);
        }
        device.write_block(no, &buf)?;
    }

    write_bitmap(device, &inodes, sb.ifree_start(), sb.nr_ifree_blocks)?;
    write_bitmap(device, &blocks, sb.bfree_start(), sb.nr_bfree_blocks)?;

    buf.fill(0);
    device.write_block(root_index, &buf)?;
    device.flush()?;

    info!("mkfs: {} blocks, {} inodes, data starts at {}", nr_blocks, nr_inodes, root_index);
    sb.log_summary("mkfs");
    Ok(sb)
}

fn write_bitmap<D: BlockDevice>(device: &D, bitmap: &Bitmap, start: u32, nr: u32) -> SifsResult<()> {
    let mut region = vec![0u8; nr as usize * BLOCK_SIZE];
    bitmap.write_to(&mut region);
    for (i, chunk) in region.chunks_exact(BLOCK_SIZE).enumerate() {
        device.write_block(start + i as u32, chunk)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_dev::RamDisk;
    use crate::common::SifsError;
    use crate::{u32, SIFS_MAGIC};

    #[test]
    fn fresh_volume_layout() {
        let disk = RamDisk::new(68);
        let sb = format(&disk, &FormatOptions::new(68, 8)).unwrap();
        assert_eq!(sb.data_start(), 4);
        assert_eq!(sb.nr_free_inodes, 7);
        assert_eq!(sb.nr_free_blocks, 63);

        let image = disk.snapshot();
        assert_eq!(u32!(&image[0..4]), SIFS_MAGIC);
        // root record: directory, no entries, index block 4
        let root = &image[BLOCK_SIZE..BLOCK_SIZE + 16];
        assert_eq!(u32!(&root[0..4]), SifsMode::S_IFDIR.bits() | 0o755);
        assert_eq!(u32!(&root[8..12]), 4);
        assert_eq!(u32!(&root[12..16]), 0);
        // inode 0 used, 1..8 free
        assert_eq!(image[2 * BLOCK_SIZE], 0b1111_1110);
        // blocks 0..=4 used
        assert_eq!(image[3 * BLOCK_SIZE], 0b1110_0000);
    }

    #[test]
    fn partial_device_and_defaults() {
        let disk = RamDisk::new(200);
        let sb = format(&disk, &FormatOptions::default()).unwrap();
        assert_eq!(sb.nr_blocks, 200);
        assert_eq!(sb.nr_inodes, 50);

        let sb = format(&disk, &FormatOptions::new(100, 8)).unwrap();
        assert_eq!(sb.nr_blocks, 100);
    }

    #[test]
    fn rejects_impossible_geometry() {
        let disk = RamDisk::new(68);
        assert!(matches!(
            format(&disk, &FormatOptions::new(100, 8)),
            Err(SifsError::Config(_))
        ));
        assert!(matches!(
            format(&disk, &FormatOptions::new(5, 8)),
            Err(SifsError::Config(_))
        ));
    }
}
