//! SIFS: a small indexed block filesystem.
//!
//! The volume is a flat array of fixed-size blocks: a superblock, an inode
//! table, an inode bitmap, a block bitmap and the data region. Every file
//! and directory owns one index block; a directory's index block is its
//! entry array, a file's index block lists its data blocks.
//!
//! [`Volume`] is the mounted filesystem. It is generic over a
//! [`BlockDevice`] and does all of its I/O through a [`BlockCache`].
#![cfg_attr(not(any(test, feature = "std")), no_std)]
extern crate alloc;

pub mod bitmap;
pub mod block_cache;
pub mod block_dev;
pub mod common;
pub mod config;
pub mod dir;
pub mod file;
pub mod inode;
pub mod mkfs;
mod ops;
pub mod superblock;
pub mod undo;
pub mod volume;

#[cfg(test)]
mod sifs_test;

pub use block_cache::{BlockCache, BlockHandle};
#[cfg(feature = "std")]
pub use block_dev::FileDisk;
pub use block_dev::{BlockDevice, RamDisk};
pub use common::{FsStat, OpenFlags, SifsError, SifsFileType, SifsMode, SifsResult};
pub use config::{FormatOptions, MountOptions};
pub use dir::DirEntry;
pub use inode::{Inode, InodeKind, INODE_SIZE};
pub use mkfs::format;
pub use superblock::SuperBlock;
pub use volume::Volume;

/// Size of every block on the volume.
pub const BLOCK_SIZE: usize = 4096;
/// "SIFS" in ASCII.
pub const SIFS_MAGIC: u32 = 0x5349_4653;
pub const SUPERBLOCK_NO: u32 = 0;
pub const ROOT_INO: u32 = 0;

pub const INODES_PER_BLOCK: u32 = (BLOCK_SIZE / INODE_SIZE) as u32;
/// Ids tracked by one bitmap block.
pub const BITS_PER_BLOCK: u32 = (BLOCK_SIZE * 8) as u32;

/// Longest file name a directory slot can hold.
pub const FILENAME_LEN: usize = 28;
pub const DIR_ENTRY_SIZE: usize = 4 + FILENAME_LEN;
pub const MAX_DIR_ENTRIES: u32 = (BLOCK_SIZE / DIR_ENTRY_SIZE) as u32;

/// Block pointers in a file index block.
pub const INDEX_CAPACITY: u32 = (BLOCK_SIZE / 4) as u32;
pub const MAX_FILESIZE: u32 = INDEX_CAPACITY * BLOCK_SIZE as u32;

/// Decode a little-endian u32 from the first four bytes of a slice.
#[macro_export]
macro_rules! u32 {
    ($x:expr) => {{
        let b: &[u8] = $x;
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }};
}

/// Decode a little-endian u64 from the first eight bytes of a slice.
#[macro_export]
macro_rules! u64 {
    ($x:expr) => {{
        let b: &[u8] = $x;
        u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    }};
}
