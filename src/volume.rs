//! A mounted volume: the block cache, the superblock and both allocators.
//!
//! Inodes are not cached here. Every operation loads the records it needs
//! through the block cache and writes them back before returning.

use alloc::vec;
use alloc::vec::Vec;

use log::{info, warn};

use crate::bitmap::Bitmap;
use crate::block_cache::BlockCache;
use crate::block_dev::BlockDevice;
use crate::common::{FsStat, OpenFlags, SifsError, SifsResult};
use crate::config::MountOptions;
use crate::dir::{self, DirEntry};
use crate::file;
use crate::inode::{self, Inode};
use crate::superblock::{self, SuperBlock};
use crate::{BLOCK_SIZE, FILENAME_LEN, ROOT_INO};

pub struct Volume<D: BlockDevice> {
    pub(crate) cache: BlockCache<D>,
    pub(crate) sb: SuperBlock,
    pub(crate) inodes: Bitmap,
    pub(crate) blocks: Bitmap,
}

impl<D: BlockDevice> Volume<D> {
    /// Read the superblock and both bitmaps from `device` and check the root
    /// directory.
    pub fn mount(device: D, opts: MountOptions) -> SifsResult<Self> {
        let device_blocks = device.block_count();
        let cache = BlockCache::new(device, opts.cache_capacity);
        let mut sb = superblock::load(&cache)?;
        sb.validate()?;
        if sb.nr_blocks > device_blocks {
            return Err(SifsError::Corrupted("volume larger than its device"));
        }

        let mut inodes = Bitmap::from_bytes(
            "ifree",
            &read_region(&cache, sb.ifree_start(), sb.nr_ifree_blocks)?,
            sb.nr_inodes,
        )?;
        let mut blocks = Bitmap::from_bytes(
            "bfree",
            &read_region(&cache, sb.bfree_start(), sb.nr_bfree_blocks)?,
            sb.nr_blocks,
        )?;
        for no in 0..sb.data_start() {
            if blocks.mark_used(no)? {
                warn!("mount: metadata block {} was marked free", no);
            }
        }

        let root = inode::load(&cache, &sb, ROOT_INO)?;
        file::check_data_block(&sb, root.index_block)?;
        if !root.is_dir() {
            return Err(SifsError::InvalidType);
        }
        if inodes.mark_used(ROOT_INO)? {
            warn!("mount: root inode was marked free");
        }
        if blocks.mark_used(root.index_block)? {
            warn!("mount: root index block {} was marked free", root.index_block);
        }

        if sb.nr_free_inodes != inodes.free_count() {
            warn!(
                "mount: superblock says {} free inodes, bitmap has {}",
                sb.nr_free_inodes,
                inodes.free_count()
            );
            sb.nr_free_inodes = inodes.free_count();
        }
        if sb.nr_free_blocks != blocks.free_count() {
            warn!(
                "mount: superblock says {} free blocks, bitmap has {}",
                sb.nr_free_blocks,
                blocks.free_count()
            );
            sb.nr_free_blocks = blocks.free_count();
        }

        let volume = Self {
            cache,
            sb,
            inodes,
            blocks,
        };
        volume.sb.log_summary("mount");
        Ok(volume)
    }

    /// Write the counters and both bitmaps back, then flush every dirty
    /// block to the device.
    pub fn sync_all(&mut self) -> SifsResult<()> {
        self.sb.nr_free_inodes = self.inodes.free_count();
        self.sb.nr_free_blocks = self.blocks.free_count();
        superblock::store(&self.cache, &self.sb)?;
        write_region(
            &self.cache,
            self.sb.ifree_start(),
            self.sb.nr_ifree_blocks,
            &self.inodes,
        )?;
        write_region(
            &self.cache,
            self.sb.bfree_start(),
            self.sb.nr_bfree_blocks,
            &self.blocks,
        )?;
        self.cache.sync()?;
        self.sb.log_summary("sync");
        Ok(())
    }

    /// Sync and give the device back.
    pub fn unmount(mut self) -> SifsResult<D> {
        self.sync_all()?;
        info!("unmount: done");
        Ok(self.cache.into_device())
    }

    pub fn stat_fs(&self) -> FsStat {
        FsStat {
            f_bsize: BLOCK_SIZE as u32,
            f_blocks: self.sb.nr_blocks,
            f_bfree: self.blocks.free_count(),
            f_files: self.sb.nr_inodes,
            f_ffree: self.inodes.free_count(),
            f_fsid: self.sb.magic,
            f_namemax: FILENAME_LEN as u32,
        }
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.sb
    }

    pub fn free_blocks(&self) -> u32 {
        self.blocks.free_count()
    }

    pub fn free_inodes(&self) -> u32 {
        self.inodes.free_count()
    }

    /// Load inode `ino`. Its index block must lie in the data region.
    pub fn load_inode(&self, ino: u32) -> SifsResult<Inode> {
        let inode = inode::load(&self.cache, &self.sb, ino)?;
        file::check_data_block(&self.sb, inode.index_block)?;
        Ok(inode)
    }

    pub fn persist_inode(&mut self, inode: &Inode) -> SifsResult<()> {
        inode::persist(&self.cache, &self.sb, inode)
    }

    /// Load `ino` and require it to be a directory.
    pub(crate) fn load_dir(&self, ino: u32) -> SifsResult<Inode> {
        let inode = self.load_inode(ino)?;
        if !inode.is_dir() {
            return Err(SifsError::NotDirectory);
        }
        Ok(inode)
    }

    pub fn lookup(&self, dir: u32, name: &str) -> SifsResult<u32> {
        let dir = self.load_dir(dir)?;
        dir::find(&self.cache, &dir, name)?.ok_or(SifsError::NotFound)
    }

    /// Walk an absolute `/`-separated path from the root.
    pub fn resolve_path(&self, path: &str) -> SifsResult<u32> {
        path.split('/')
            .filter(|part| !part.is_empty())
            .try_fold(ROOT_INO, |ino, part| self.lookup(ino, part))
    }

    pub fn readdir(&self, dir: u32) -> SifsResult<Vec<DirEntry>> {
        let dir = self.load_dir(dir)?;
        dir::list(&self.cache, &dir)
    }

    pub fn read_bytes(&self, ino: u32, offset: u32, buf: &mut [u8]) -> SifsResult<usize> {
        let inode = self.load_inode(ino)?;
        file::read(&self.cache, &self.sb, &inode, offset, buf)
    }

    pub fn write_bytes(
        &mut self,
        ino: u32,
        offset: u32,
        data: &[u8],
        flags: OpenFlags,
    ) -> SifsResult<usize> {
        let mut inode = self.load_inode(ino)?;
        let written = file::write(
            &self.cache,
            &self.sb,
            &mut self.blocks,
            &mut inode,
            offset,
            data,
            flags,
        )?;
        if written > 0 {
            inode::persist(&self.cache, &self.sb, &inode)?;
        }
        Ok(written)
    }
}

fn read_region<D: BlockDevice>(cache: &BlockCache<D>, start: u32, nr: u32) -> SifsResult<Vec<u8>> {
    let mut bytes = vec![0u8; nr as usize * BLOCK_SIZE];
    for (i, chunk) in bytes.chunks_exact_mut(BLOCK_SIZE).enumerate() {
        let block = cache.get_block(start + i as u32)?;
        chunk.copy_from_slice(block.data());
    }
    Ok(bytes)
}

fn write_region<D: BlockDevice>(
    cache: &BlockCache<D>,
    start: u32,
    nr: u32,
    bitmap: &Bitmap,
) -> SifsResult<()> {
    let mut bytes = vec![0u8; nr as usize * BLOCK_SIZE];
    bitmap.write_to(&mut bytes);
    for (i, chunk) in bytes.chunks_exact(BLOCK_SIZE).enumerate() {
        let mut block = cache.get_block(start + i as u32)?;
        if block.data() != chunk {
            block.data_mut().copy_from_slice(chunk);
            block.mark_dirty();
        }
    }
    Ok(())
}
