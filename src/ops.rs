//! Namespace operations: create, mkdir, unlink, rmdir and rename.
//!
//! Each operation checks everything it can before touching the volume.
//! `create` records its reservations in an [`UndoLog`] and unwinds them if a
//! later step fails; `rename` inserts the new entry before removing the old
//! one and takes the new entry back out if the removal fails.

use alloc::vec::Vec;

use log::{debug, error, warn};

use crate::block_dev::BlockDevice;
use crate::common::{SifsError, SifsFileType, SifsMode, SifsResult};
use crate::dir;
use crate::file::check_data_block;
use crate::inode::{self, Inode, InodeKind};
use crate::undo::{UndoLog, UndoStep};
use crate::volume::Volume;

impl<D: BlockDevice> Volume<D> {
    /// Create `name` in directory `dir` and return the new inode number.
    ///
    /// `mode` carries the type; a mode without type bits makes a regular
    /// file.
    pub fn create(&mut self, dir: u32, name: &str, mode: SifsMode) -> SifsResult<u32> {
        let file_type = if mode.file_bits() == 0 {
            SifsFileType::RegularFile
        } else {
            SifsFileType::from_mode(mode)?
        };
        let mut parent = self.load_dir(dir)?;
        dir::check_insert(&self.cache, &parent, name)?;

        let mut undo = UndoLog::new();
        match self.create_steps(&mut parent, name, mode.perm(), file_type, &mut undo) {
            Ok(ino) => {
                undo.commit();
                debug!("create: {} -> ino {} in dir {}", name, ino, dir);
                Ok(ino)
            }
            Err(e) => {
                warn!("create {}: {}, undoing {} steps", name, e, undo.len());
                self.unwind(undo, &mut parent);
                Err(e)
            }
        }
    }

    pub fn mkdir(&mut self, dir: u32, name: &str, perm: SifsMode) -> SifsResult<u32> {
        self.create(dir, name, perm.perm() | SifsMode::S_IFDIR)
    }

    fn create_steps(
        &mut self,
        parent: &mut Inode,
        name: &str,
        perm: SifsMode,
        file_type: SifsFileType,
        undo: &mut UndoLog,
    ) -> SifsResult<u32> {
        let ino = self.inodes.reserve_next()?;
        undo.record(UndoStep::ClearInode(ino));
        undo.record(UndoStep::ReleaseInode(ino));
        let index = self.blocks.reserve_next()?;
        undo.record(UndoStep::ReleaseBlock(index));
        self.cache.get_block(index)?.zero();

        let mut inode = match file_type {
            SifsFileType::Directory => Inode::new_directory(ino, perm, index),
            SifsFileType::RegularFile => Inode::new_file(ino, perm, index),
        };
        inode::persist(&self.cache, &self.sb, &inode)?;

        dir::insert(&self.cache, parent, name, ino)?;
        undo.record(UndoStep::RemoveEntry(ino));
        inode::persist(&self.cache, &self.sb, parent)?;

        if file_type == SifsFileType::RegularFile {
            let first = self.blocks.reserve_next()?;
            undo.record(UndoStep::ReleaseBlock(first));
            self.cache.get_block(first)?.zero();
            self.cache.get_block(index)?.write_u32(0, first);
            inode.kind = InodeKind::RegularFile { nr_used_blocks: 1 };
            inode::persist(&self.cache, &self.sb, &inode)?;
        }
        Ok(ino)
    }

    /// Undo recorded steps newest first. Failures are logged and the
    /// remaining steps still run.
    ///
    /// `parent` is the in-memory directory the operation worked on; its
    /// entry count may be ahead of the record on disk.
    fn unwind(&mut self, undo: UndoLog, parent: &mut Inode) {
        for step in undo.into_reverse() {
            let res = match step {
                UndoStep::ReleaseInode(ino) => self.inodes.release(ino),
                UndoStep::ReleaseBlock(block) => self.blocks.release(block),
                UndoStep::ClearInode(ino) => inode::clear(&self.cache, &self.sb, ino),
                UndoStep::RemoveEntry(ino) => dir::remove(&self.cache, parent, ino)
                    .and_then(|_| inode::persist(&self.cache, &self.sb, parent)),
            };
            if let Err(e) = res {
                error!("undo {:?} failed: {}", step, e);
            }
        }
    }

    /// Remove `name` from `parent` and persist it. If the persist fails the
    /// slot is put back, so the entry block and the on-disk count agree.
    fn drop_entry(&self, parent: &mut Inode, name: &str) -> SifsResult<()> {
        let ino = dir::remove_named(&self.cache, parent, name)?;
        if let Err(e) = inode::persist(&self.cache, &self.sb, parent) {
            if let Err(e2) = dir::insert(&self.cache, parent, name, ino) {
                error!("dir {}: cannot restore {}: {}", parent.ino, name, e2);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove the regular file `name` from `dir` and free its storage.
    pub fn unlink(&mut self, dir: u32, name: &str) -> SifsResult<()> {
        let mut parent = self.load_dir(dir)?;
        let ino = dir::find(&self.cache, &parent, name)?.ok_or(SifsError::NotFound)?;
        let target = self.load_inode(ino)?;
        if target.is_dir() {
            return Err(SifsError::IsDirectory);
        }
        self.remove_object(&mut parent, name, &target)
    }

    /// Remove the empty directory `name` from `dir`.
    pub fn rmdir(&mut self, dir: u32, name: &str) -> SifsResult<()> {
        let mut parent = self.load_dir(dir)?;
        let ino = dir::find(&self.cache, &parent, name)?.ok_or(SifsError::NotFound)?;
        let target = self.load_inode(ino)?;
        if target.nr_entries()? != 0 {
            return Err(SifsError::NotEmpty);
        }
        self.remove_object(&mut parent, name, &target)
    }

    /// Shared tail of unlink and rmdir: drop the entry, then the data
    /// blocks, the index block and the inode.
    fn remove_object(&mut self, parent: &mut Inode, name: &str, target: &Inode) -> SifsResult<()> {
        let data_blocks = self.data_blocks_of(target)?;

        dir::remove_named(&self.cache, parent, name)?;
        inode::persist(&self.cache, &self.sb, parent)?;

        for block in data_blocks.iter().copied() {
            self.blocks.release(block)?;
        }
        self.blocks.release(target.index_block)?;
        self.inodes.release(target.ino)?;
        inode::clear(&self.cache, &self.sb, target.ino)?;
        debug!(
            "removed {} (ino {}, {} data blocks)",
            name,
            target.ino,
            data_blocks.len()
        );
        Ok(())
    }

    /// Data blocks listed in a file's index, checked against the data region.
    fn data_blocks_of(&self, target: &Inode) -> SifsResult<Vec<u32>> {
        let nr_used = match target.kind {
            InodeKind::RegularFile { nr_used_blocks } => nr_used_blocks,
            InodeKind::Directory { .. } => return Ok(Vec::new()),
        };
        let index = self.cache.get_block(target.index_block)?;
        (0..nr_used)
            .map(|i| check_data_block(&self.sb, index.read_u32(i as usize * 4)))
            .collect()
    }

    /// Move `old_name` in `old_dir` to `new_name` in `new_dir`, replacing
    /// whatever the destination held. A directory cannot be moved into
    /// itself (`InvalidName`).
    pub fn rename(
        &mut self,
        old_dir: u32,
        old_name: &str,
        new_dir: u32,
        new_name: &str,
    ) -> SifsResult<()> {
        let mut src_parent = self.load_dir(old_dir)?;
        let ino = dir::find(&self.cache, &src_parent, old_name)?.ok_or(SifsError::NotFound)?;
        dir::validate_name(new_name)?;
        if ino == new_dir {
            return Err(SifsError::InvalidName);
        }
        if old_dir == new_dir && old_name == new_name {
            return Ok(());
        }
        let mut dst_parent = if old_dir == new_dir {
            src_parent
        } else {
            self.load_dir(new_dir)?
        };

        match dir::find(&self.cache, &dst_parent, new_name)? {
            Some(victim) => {
                let victim = self.load_inode(victim)?;
                if victim.is_dir() && victim.nr_entries()? != 0 {
                    return Err(SifsError::NotEmpty);
                }
                self.remove_object(&mut dst_parent, new_name, &victim)?;
            }
            None if old_dir != new_dir => dir::check_insert(&self.cache, &dst_parent, new_name)?,
            None => {}
        }

        if old_dir == new_dir {
            dir::rename_in_place(&self.cache, &dst_parent, old_name, new_name)?;
            debug!("rename: {} -> {} in dir {}", old_name, new_name, old_dir);
            return Ok(());
        }

        dir::insert(&self.cache, &mut dst_parent, new_name, ino)?;
        inode::persist(&self.cache, &self.sb, &dst_parent)?;

        if let Err(e) = self.drop_entry(&mut src_parent, old_name) {
            warn!("rename {}: source removal failed ({}), taking back {}", old_name, e, new_name);
            if let Err(e2) = self.drop_entry(&mut dst_parent, new_name) {
                error!("rename {}: cannot take back {}: {}", old_name, new_name, e2);
            }
            return Err(e);
        }
        debug!(
            "rename: {} in dir {} -> {} in dir {}",
            old_name, old_dir, new_name, new_dir
        );
        Ok(())
    }
}
