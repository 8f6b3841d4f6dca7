//! Write-back block cache with scoped block handles.
//!
//! Every block the engine touches goes through [`BlockCache::get_block`],
//! which hands out an exclusive [`BlockHandle`]. The handle owns the block
//! buffer while it is alive and gives it back to the cache when dropped, so a
//! block is released on every exit path, `?` included. Changes only reach the
//! device if the handle was marked dirty and the cache is later synced or the
//! block is evicted.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;

use log::{debug, error, warn};
use spin::Mutex;

use crate::block_dev::BlockDevice;
use crate::common::{SifsError, SifsResult};
use crate::{u32, BLOCK_SIZE};

/// Fewest slots a cache may have. Engine operations hold up to three handles
/// at once.
pub const MIN_CACHE_CAPACITY: usize = 8;

struct Slot {
    /// `None` while a handle holds the buffer.
    data: Option<Box<[u8]>>,
    dirty: bool,
}

pub struct BlockCache<D: BlockDevice> {
    device: D,
    capacity: usize,
    slots: Mutex<BTreeMap<u32, Slot>>,
}

impl<D: BlockDevice> BlockCache<D> {
    pub fn new(device: D, capacity: usize) -> Self {
        Self {
            device,
            capacity: capacity.max(MIN_CACHE_CAPACITY),
            slots: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Give the device back. Dirty blocks that were never synced are lost.
    pub fn into_device(self) -> D {
        self.device
    }

    /// Number of blocks currently cached.
    pub fn cached_blocks(&self) -> usize {
        self.slots.lock().len()
    }

    /// Acquire exclusive access to `block`, reading it from the device if it
    /// is not cached yet.
    pub fn get_block(&self, block: u32) -> SifsResult<BlockHandle<'_, D>> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&block) {
            let data = slot.data.take().ok_or_else(|| {
                error!("bcache: block {} acquired twice", block);
                SifsError::BlockBusy(block)
            })?;
            return Ok(BlockHandle::new(self, block, data));
        }

        self.make_room(&mut slots)?;
        let mut data = vec![0u8; BLOCK_SIZE].into_boxed_slice();
        self.device.read_block(block, &mut data).map_err(|e| {
            error!("bcache: cannot read block {}", block);
            e
        })?;
        slots.insert(
            block,
            Slot {
                data: None,
                dirty: false,
            },
        );
        Ok(BlockHandle::new(self, block, data))
    }

    /// Write every dirty block back and flush the device.
    pub fn sync(&self) -> SifsResult<()> {
        let mut slots = self.slots.lock();
        let mut written = 0;
        for (no, slot) in slots.iter_mut() {
            if !slot.dirty {
                continue;
            }
            match slot.data.as_deref() {
                Some(data) => {
                    self.device.write_block(*no, data)?;
                    slot.dirty = false;
                    written += 1;
                }
                None => warn!("bcache: block {} is held during sync, skipped", no),
            }
        }
        drop(slots);
        debug!("bcache: synced {} blocks", written);
        self.device.flush()
    }

    /// Evict one unheld block if the cache is full. Clean blocks go first;
    /// a dirty block is written back before it is dropped.
    fn make_room(&self, slots: &mut BTreeMap<u32, Slot>) -> SifsResult<()> {
        if slots.len() < self.capacity {
            return Ok(());
        }
        let clean = slots
            .iter()
            .find(|(_, s)| s.data.is_some() && !s.dirty)
            .map(|(no, _)| *no);
        if let Some(no) = clean {
            slots.remove(&no);
            return Ok(());
        }
        let dirty = slots
            .iter()
            .find(|(_, s)| s.data.is_some())
            .map(|(no, _)| *no);
        match dirty {
            Some(no) => {
                if let Some(slot) = slots.get(&no) {
                    if let Some(data) = slot.data.as_deref() {
                        self.device.write_block(no, data)?;
                    }
                }
                slots.remove(&no);
            }
            None => debug!("bcache: every cached block is held, growing past capacity"),
        }
        Ok(())
    }

    fn release(&self, block: u32, data: Box<[u8]>, dirty: bool) {
        let mut slots = self.slots.lock();
        match slots.get_mut(&block) {
            Some(slot) => {
                slot.data = Some(data);
                slot.dirty |= dirty;
            }
            None => error!("bcache: released block {} is not cached", block),
        }
    }
}

/// Exclusive access to one cached block, released on drop.
pub struct BlockHandle<'a, D: BlockDevice> {
    cache: &'a BlockCache<D>,
    block: u32,
    data: Box<[u8]>,
    dirty: bool,
}

impl<'a, D: BlockDevice> BlockHandle<'a, D> {
    fn new(cache: &'a BlockCache<D>, block: u32, data: Box<[u8]>) -> Self {
        Self {
            cache,
            block,
            data,
            dirty: false,
        }
    }

    pub fn block_no(&self) -> u32 {
        self.block
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        u32!(&self.data[offset..offset + 4])
    }

    /// Store a little-endian u32 and mark the block dirty.
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        self.dirty = true;
    }

    /// Fill the block with zeros and mark it dirty.
    pub fn zero(&mut self) {
        self.data.fill(0);
        self.dirty = true;
    }
}

impl<D: BlockDevice> Drop for BlockHandle<'_, D> {
    fn drop(&mut self) {
        let data = core::mem::take(&mut self.data);
        self.cache.release(self.block, data, self.dirty);
    }
}
