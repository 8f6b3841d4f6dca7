//! Free-id bitmaps for inodes and blocks.
//!
//! A set bit means the id is free. Words are u64, stored little-endian on
//! disk, bit `i` of word `w` standing for id `w * 64 + i`.

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, warn};

use crate::common::{SifsError, SifsResult};
use crate::u64;

pub const WORD_BITS: u32 = u64::BITS;

pub struct Bitmap {
    words: Vec<u64>,
    capacity: u32,
    free: u32,
    name: &'static str,
}

impl Bitmap {
    /// A bitmap of `capacity` ids, all free.
    pub fn new_free(name: &'static str, capacity: u32) -> Self {
        let mut words = vec![u64::MAX; words_for(capacity)];
        mask_tail(&mut words, capacity);
        Self {
            words,
            capacity,
            free: capacity,
            name,
        }
    }

    /// Load from its on-disk bytes. Bits past `capacity` are ignored.
    pub fn from_bytes(name: &'static str, bytes: &[u8], capacity: u32) -> SifsResult<Self> {
        let nwords = words_for(capacity);
        if bytes.len() < nwords * 8 {
            return Err(SifsError::Corrupted("bitmap shorter than its capacity"));
        }
        let mut words: Vec<u64> = bytes
            .chunks_exact(8)
            .take(nwords)
            .map(|chunk| u64!(chunk))
            .collect();
        mask_tail(&mut words, capacity);
        let free = words.iter().map(|w| w.count_ones()).sum();
        Ok(Self {
            words,
            capacity,
            free,
            name,
        })
    }

    /// Serialize into `out`, which must hold at least `byte_len()` bytes.
    /// Anything past the last word is left untouched.
    pub fn write_to(&self, out: &mut [u8]) {
        for (chunk, word) in out.chunks_exact_mut(8).zip(self.words.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }

    pub fn byte_len(&self) -> usize {
        self.words.len() * 8
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn free_count(&self) -> u32 {
        self.free
    }

    pub fn is_free(&self, id: u32) -> bool {
        id < self.capacity && self.words[word_of(id)] & bit_of(id) != 0
    }

    /// Take the lowest free id.
    pub fn reserve_next(&mut self) -> SifsResult<u32> {
        for (index, word) in self.words.iter_mut().enumerate() {
            if *word == 0 {
                continue;
            }
            let id = index as u32 * WORD_BITS + word.trailing_zeros();
            if id >= self.capacity {
                break;
            }
            *word &= !bit_of(id);
            self.free -= 1;
            debug!("{}: reserved {}", self.name, id);
            return Ok(id);
        }
        debug!("{}: exhausted", self.name);
        Err(SifsError::OutOfSpace)
    }

    /// Give `id` back. Releasing an id that is already free changes nothing.
    pub fn release(&mut self, id: u32) -> SifsResult<()> {
        if id >= self.capacity {
            return Err(SifsError::InvalidId(id));
        }
        let word = &mut self.words[word_of(id)];
        if *word & bit_of(id) != 0 {
            warn!("{}: double free of {}", self.name, id);
            return Ok(());
        }
        *word |= bit_of(id);
        self.free += 1;
        debug!("{}: released {}", self.name, id);
        Ok(())
    }

    /// Mark `id` as used without going through the allocation scan. Returns
    /// whether it was free before.
    pub fn mark_used(&mut self, id: u32) -> SifsResult<bool> {
        if id >= self.capacity {
            return Err(SifsError::InvalidId(id));
        }
        let word = &mut self.words[word_of(id)];
        let was_free = *word & bit_of(id) != 0;
        if was_free {
            *word &= !bit_of(id);
            self.free -= 1;
        }
        Ok(was_free)
    }
}

fn words_for(capacity: u32) -> usize {
    ((capacity + WORD_BITS - 1) / WORD_BITS) as usize
}

fn word_of(id: u32) -> usize {
    (id / WORD_BITS) as usize
}

fn bit_of(id: u32) -> u64 {
    1u64 << (id % WORD_BITS)
}

/// Clear every bit at or past `capacity` in the last word.
fn mask_tail(words: &mut [u64], capacity: u32) {
    let used = capacity % WORD_BITS;
    if used != 0 {
        if let Some(last) = words.last_mut() {
            *last &= (1u64 << used) - 1;
        }
    }
}
