//! Inode table: fixed 16-byte records packed into blocks 1..=nr_istore_blocks.

use log::debug;

use crate::block_cache::BlockCache;
use crate::block_dev::BlockDevice;
use crate::common::{SifsError, SifsFileType, SifsMode, SifsResult};
use crate::superblock::SuperBlock;
use crate::{u32, INODES_PER_BLOCK};

/// Size of one on-disk inode record.
pub const INODE_SIZE: usize = 16;

/// Raw record as stored on disk. `aux` is `nr_entries` for a directory and
/// `nr_used_blocks` for a regular file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DiskInode {
    mode: u32,
    filesize: u32,
    index_block: u32,
    aux: u32,
}

impl DiskInode {
    fn parse(bytes: &[u8]) -> Self {
        Self {
            mode: u32!(&bytes[0..4]),
            filesize: u32!(&bytes[4..8]),
            index_block: u32!(&bytes[8..12]),
            aux: u32!(&bytes[12..16]),
        }
    }

    fn write_to(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.mode.to_le_bytes());
        out[4..8].copy_from_slice(&self.filesize.to_le_bytes());
        out[8..12].copy_from_slice(&self.index_block.to_le_bytes());
        out[12..16].copy_from_slice(&self.aux.to_le_bytes());
    }
}

/// Type-specific part of an inode, chosen once when the record is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    Directory { nr_entries: u32 },
    RegularFile { nr_used_blocks: u32 },
}

/// In-memory copy of an inode record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    pub ino: u32,
    pub mode: SifsMode,
    pub size: u32,
    pub index_block: u32,
    pub kind: InodeKind,
}

impl Inode {
    pub fn new_directory(ino: u32, perm: SifsMode, index_block: u32) -> Self {
        Self {
            ino,
            mode: perm.perm() | SifsMode::S_IFDIR,
            size: 0,
            index_block,
            kind: InodeKind::Directory { nr_entries: 0 },
        }
    }

    pub fn new_file(ino: u32, perm: SifsMode, index_block: u32) -> Self {
        Self {
            ino,
            mode: perm.perm() | SifsMode::S_IFREG,
            size: 0,
            index_block,
            kind: InodeKind::RegularFile { nr_used_blocks: 0 },
        }
    }

    fn from_disk(ino: u32, raw: DiskInode) -> SifsResult<Self> {
        let mode = SifsMode::from_bits_truncate(raw.mode);
        let kind = match SifsFileType::from_mode(mode)? {
            SifsFileType::Directory => InodeKind::Directory {
                nr_entries: raw.aux,
            },
            SifsFileType::RegularFile => InodeKind::RegularFile {
                nr_used_blocks: raw.aux,
            },
        };
        Ok(Self {
            ino,
            mode,
            size: raw.filesize,
            index_block: raw.index_block,
            kind,
        })
    }

    fn to_disk(&self) -> DiskInode {
        let aux = match self.kind {
            InodeKind::Directory { nr_entries } => nr_entries,
            InodeKind::RegularFile { nr_used_blocks } => nr_used_blocks,
        };
        DiskInode {
            mode: self.mode.bits(),
            filesize: self.size,
            index_block: self.index_block,
            aux,
        }
    }

    /// Encode into a raw record slot of [`INODE_SIZE`] bytes.
    pub fn write_record(&self, out: &mut [u8]) {
        self.to_disk().write_to(&mut out[..INODE_SIZE]);
    }

    pub fn file_type(&self) -> SifsFileType {
        match self.kind {
            InodeKind::Directory { .. } => SifsFileType::Directory,
            InodeKind::RegularFile { .. } => SifsFileType::RegularFile,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, InodeKind::Directory { .. })
    }

    /// Number of live entries, or `NotDirectory`.
    pub fn nr_entries(&self) -> SifsResult<u32> {
        match self.kind {
            InodeKind::Directory { nr_entries } => Ok(nr_entries),
            InodeKind::RegularFile { .. } => Err(SifsError::NotDirectory),
        }
    }

    /// Number of data blocks in the index, or `IsDirectory`.
    pub fn nr_used_blocks(&self) -> SifsResult<u32> {
        match self.kind {
            InodeKind::RegularFile { nr_used_blocks } => Ok(nr_used_blocks),
            InodeKind::Directory { .. } => Err(SifsError::IsDirectory),
        }
    }
}

/// Block holding `ino` and the byte offset of its record inside that block.
pub fn locate(ino: u32) -> (u32, usize) {
    let block = 1 + ino / INODES_PER_BLOCK;
    let slot = (ino % INODES_PER_BLOCK) as usize;
    (block, slot * INODE_SIZE)
}

fn check_ino(sb: &SuperBlock, ino: u32) -> SifsResult<()> {
    if ino >= sb.nr_inodes {
        return Err(SifsError::InvalidId(ino));
    }
    Ok(())
}

/// Read inode `ino` through the cache.
pub fn load<D: BlockDevice>(cache: &BlockCache<D>, sb: &SuperBlock, ino: u32) -> SifsResult<Inode> {
    check_ino(sb, ino)?;
    let (block_no, offset) = locate(ino);
    let block = cache.get_block(block_no)?;
    let raw = DiskInode::parse(&block.data()[offset..offset + INODE_SIZE]);
    Inode::from_disk(ino, raw).map_err(|e| {
        debug!("inode {}: bad mode {:#o}", ino, raw.mode);
        e
    })
}

/// Write `inode` back to its slot.
pub fn persist<D: BlockDevice>(
    cache: &BlockCache<D>,
    sb: &SuperBlock,
    inode: &Inode,
) -> SifsResult<()> {
    check_ino(sb, inode.ino)?;
    let (block_no, offset) = locate(inode.ino);
    let mut block = cache.get_block(block_no)?;
    inode.write_record(&mut block.data_mut()[offset..]);
    block.mark_dirty();
    Ok(())
}

/// Zero the record of a freed inode.
pub fn clear<D: BlockDevice>(cache: &BlockCache<D>, sb: &SuperBlock, ino: u32) -> SifsResult<()> {
    check_ino(sb, ino)?;
    let (block_no, offset) = locate(ino);
    let mut block = cache.get_block(block_no)?;
    DiskInode::default().write_to(&mut block.data_mut()[offset..offset + INODE_SIZE]);
    block.mark_dirty();
    Ok(())
}
