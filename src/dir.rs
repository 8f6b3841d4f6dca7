//! Directory engine.
//!
//! A directory's index block is an array of [`MAX_DIR_ENTRIES`] slots of
//! `{ino: u32, name: [u8; FILENAME_LEN]}`. A slot with `ino == 0` is empty;
//! the root (ino 0) never appears as an entry. Names shorter than the slot
//! are NUL padded, a name of exactly [`FILENAME_LEN`] bytes is not
//! terminated.

use alloc::string::String;
use alloc::vec::Vec;

use log::debug;

use crate::block_cache::{BlockCache, BlockHandle};
use crate::block_dev::BlockDevice;
use crate::common::{SifsError, SifsResult};
use crate::inode::{Inode, InodeKind};
use crate::{DIR_ENTRY_SIZE, FILENAME_LEN, MAX_DIR_ENTRIES};

/// One live directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub ino: u32,
}

/// Reject names the on-disk slot cannot represent.
pub fn validate_name(name: &str) -> SifsResult<()> {
    if name.is_empty() || name.bytes().any(|b| b == b'/' || b == 0) {
        return Err(SifsError::InvalidName);
    }
    if name.len() > FILENAME_LEN {
        return Err(SifsError::NameTooLong);
    }
    Ok(())
}

fn slot_range(slot: u32) -> core::ops::Range<usize> {
    let start = slot as usize * DIR_ENTRY_SIZE;
    start..start + DIR_ENTRY_SIZE
}

fn slot_ino<D: BlockDevice>(block: &BlockHandle<'_, D>, slot: u32) -> u32 {
    block.read_u32(slot_range(slot).start)
}

fn slot_name<'b, D: BlockDevice>(block: &'b BlockHandle<'_, D>, slot: u32) -> &'b [u8] {
    let range = slot_range(slot);
    let raw = &block.data()[range.start + 4..range.end];
    let len = raw.iter().position(|&b| b == 0).unwrap_or(FILENAME_LEN);
    &raw[..len]
}

fn write_slot<D: BlockDevice>(block: &mut BlockHandle<'_, D>, slot: u32, ino: u32, name: &str) {
    let range = slot_range(slot);
    let data = block.data_mut();
    data[range.start..range.start + 4].copy_from_slice(&ino.to_le_bytes());
    let field = &mut data[range.start + 4..range.end];
    field.fill(0);
    field[..name.len()].copy_from_slice(name.as_bytes());
    block.mark_dirty();
}

fn clear_slot<D: BlockDevice>(block: &mut BlockHandle<'_, D>, slot: u32) {
    let range = slot_range(slot);
    block.data_mut()[range].fill(0);
    block.mark_dirty();
}

fn find_slot<D: BlockDevice>(block: &BlockHandle<'_, D>, name: &str) -> Option<u32> {
    (0..MAX_DIR_ENTRIES)
        .find(|&slot| slot_ino(block, slot) != 0 && slot_name(block, slot) == name.as_bytes())
}

fn set_entry_count(dir: &mut Inode, nr_entries: u32) {
    dir.kind = InodeKind::Directory { nr_entries };
}

/// Inode number stored under `name`, if any.
pub fn find<D: BlockDevice>(cache: &BlockCache<D>, dir: &Inode, name: &str) -> SifsResult<Option<u32>> {
    dir.nr_entries()?;
    let block = cache.get_block(dir.index_block)?;
    Ok(find_slot(&block, name).map(|slot| slot_ino(&block, slot)))
}

/// Check everything [`insert`] would check, without changing anything.
pub fn check_insert<D: BlockDevice>(cache: &BlockCache<D>, dir: &Inode, name: &str) -> SifsResult<()> {
    validate_name(name)?;
    dir.nr_entries()?;
    let block = cache.get_block(dir.index_block)?;
    if find_slot(&block, name).is_some() {
        return Err(SifsError::AlreadyExists);
    }
    if !(0..MAX_DIR_ENTRIES).any(|slot| slot_ino(&block, slot) == 0) {
        return Err(SifsError::OutOfSpace);
    }
    Ok(())
}

/// Add `name -> ino` in the first empty slot and bump the entry count. The
/// caller persists `dir`.
pub fn insert<D: BlockDevice>(
    cache: &BlockCache<D>,
    dir: &mut Inode,
    name: &str,
    ino: u32,
) -> SifsResult<()> {
    validate_name(name)?;
    let count = dir.nr_entries()?;
    let mut block = cache.get_block(dir.index_block)?;
    if find_slot(&block, name).is_some() {
        return Err(SifsError::AlreadyExists);
    }
    let slot = (0..MAX_DIR_ENTRIES)
        .find(|&slot| slot_ino(&block, slot) == 0)
        .ok_or(SifsError::OutOfSpace)?;
    write_slot(&mut block, slot, ino, name);
    set_entry_count(dir, count + 1);
    debug!("dir {}: {} -> {} in slot {}", dir.ino, name, ino, slot);
    Ok(())
}

/// Remove the first entry pointing at `ino`.
pub fn remove<D: BlockDevice>(cache: &BlockCache<D>, dir: &mut Inode, ino: u32) -> SifsResult<()> {
    let count = dir.nr_entries()?;
    let mut block = cache.get_block(dir.index_block)?;
    let slot = (0..MAX_DIR_ENTRIES)
        .find(|&slot| slot_ino(&block, slot) == ino && ino != 0)
        .ok_or(SifsError::NotFound)?;
    clear_slot(&mut block, slot);
    set_entry_count(dir, count.saturating_sub(1));
    debug!("dir {}: removed ino {} from slot {}", dir.ino, ino, slot);
    Ok(())
}

/// Remove the entry called `name` and return the inode it pointed at.
pub fn remove_named<D: BlockDevice>(
    cache: &BlockCache<D>,
    dir: &mut Inode,
    name: &str,
) -> SifsResult<u32> {
    let count = dir.nr_entries()?;
    let mut block = cache.get_block(dir.index_block)?;
    let slot = find_slot(&block, name).ok_or(SifsError::NotFound)?;
    let ino = slot_ino(&block, slot);
    clear_slot(&mut block, slot);
    set_entry_count(dir, count.saturating_sub(1));
    debug!("dir {}: removed {} (ino {})", dir.ino, name, ino);
    Ok(ino)
}

/// Rename an entry without moving it. The entry count is unchanged.
pub fn rename_in_place<D: BlockDevice>(
    cache: &BlockCache<D>,
    dir: &Inode,
    old_name: &str,
    new_name: &str,
) -> SifsResult<()> {
    validate_name(new_name)?;
    dir.nr_entries()?;
    let mut block = cache.get_block(dir.index_block)?;
    let slot = find_slot(&block, old_name).ok_or(SifsError::NotFound)?;
    if old_name != new_name && find_slot(&block, new_name).is_some() {
        return Err(SifsError::AlreadyExists);
    }
    let ino = slot_ino(&block, slot);
    write_slot(&mut block, slot, ino, new_name);
    debug!("dir {}: {} renamed to {}", dir.ino, old_name, new_name);
    Ok(())
}

/// Every live entry in slot order.
pub fn list<D: BlockDevice>(cache: &BlockCache<D>, dir: &Inode) -> SifsResult<Vec<DirEntry>> {
    dir.nr_entries()?;
    let block = cache.get_block(dir.index_block)?;
    let mut entries = Vec::new();
    for slot in 0..MAX_DIR_ENTRIES {
        let ino = slot_ino(&block, slot);
        if ino == 0 {
            continue;
        }
        let name = core::str::from_utf8(slot_name(&block, slot))
            .map_err(|_| SifsError::Corrupted("directory entry name is not utf-8"))?;
        entries.push(DirEntry {
            name: String::from(name),
            ino,
        });
    }
    Ok(entries)
}
