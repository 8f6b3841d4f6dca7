//! Undo log for multi-step metadata operations.
//!
//! An operation records each reservation as it makes it. On success the log
//! is committed (dropped); on failure the recorded steps are handed back
//! newest first so the volume can undo them.

use alloc::vec::Vec;

use log::debug;

/// One reversible change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoStep {
    /// An inode id was taken from the inode bitmap.
    ReleaseInode(u32),
    /// A block was taken from the block bitmap.
    ReleaseBlock(u32),
    /// An inode record was written.
    ClearInode(u32),
    /// `ino` was inserted into the directory being changed.
    RemoveEntry(u32),
}

#[derive(Debug, Default)]
pub struct UndoLog {
    steps: Vec<UndoStep>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn record(&mut self, step: UndoStep) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The operation finished; nothing needs undoing.
    pub fn commit(self) {
        debug!("undo: committed, {} steps dropped", self.steps.len());
    }

    /// Steps in the order they must be undone.
    pub fn into_reverse(self) -> impl Iterator<Item = UndoStep> {
        self.steps.into_iter().rev()
    }
}
