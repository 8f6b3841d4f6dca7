#[cfg(test)]
mod tests {
    use crate::block_cache::MIN_CACHE_CAPACITY;
    use crate::block_dev::{BlockDevice, RamDisk};
    use crate::common::{OpenFlags, SifsError, SifsMode, SifsResult};
    use crate::config::{FormatOptions, MountOptions};
    use crate::inode::locate;
    use crate::mkfs::format;
    use crate::volume::Volume;
    use crate::{BLOCK_SIZE, MAX_FILESIZE, ROOT_INO};
    use alloc::sync::Arc;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicU32, Ordering};
    use proptest::prelude::*;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn mounted(nr_blocks: u32, nr_inodes: u32) -> Volume<RamDisk> {
        init_log();
        let disk = RamDisk::new(nr_blocks);
        format(&disk, &FormatOptions::new(nr_blocks, nr_inodes)).unwrap();
        Volume::mount(disk, MountOptions::default()).unwrap()
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    fn read_all<D: BlockDevice>(vol: &Volume<D>, ino: u32) -> Vec<u8> {
        let size = vol.load_inode(ino).unwrap().size as usize;
        let mut buf = vec![0u8; size];
        assert_eq!(vol.read_bytes(ino, 0, &mut buf), Ok(size));
        buf
    }

    /// Passes everything through to a RamDisk, except accesses to one
    /// chosen block, which fail.
    struct FaultyDisk {
        inner: RamDisk,
        bad_block: AtomicU32,
    }

    impl FaultyDisk {
        const NONE: u32 = u32::MAX;

        fn new(inner: RamDisk) -> Self {
            Self {
                inner,
                bad_block: AtomicU32::new(Self::NONE),
            }
        }

        fn fail_on(&self, block: u32) {
            self.bad_block.store(block, Ordering::SeqCst);
        }

        fn check(&self, block: u32) -> SifsResult<()> {
            if self.bad_block.load(Ordering::SeqCst) == block {
                return Err(SifsError::Io);
            }
            Ok(())
        }
    }

    impl BlockDevice for FaultyDisk {
        fn read_block(&self, block: u32, buf: &mut [u8]) -> SifsResult<()> {
            self.check(block)?;
            self.inner.read_block(block, buf)
        }

        fn write_block(&self, block: u32, buf: &[u8]) -> SifsResult<()> {
            self.check(block)?;
            self.inner.write_block(block, buf)
        }

        fn block_count(&self) -> u32 {
            self.inner.block_count()
        }
    }

    #[test]
    fn small_volume_accounting() {
        let mut vol = mounted(68, 8);
        assert_eq!(vol.free_inodes(), 7);
        assert_eq!(vol.free_blocks(), 63);

        let a = vol.create(ROOT_INO, "a", SifsMode::empty()).unwrap();
        assert_eq!(vol.free_inodes(), 6);
        assert_eq!(vol.free_blocks(), 61);
        assert_eq!(vol.resolve_path("/a"), Ok(a));

        let data = pattern(5000, 1);
        assert_eq!(vol.write_bytes(a, 0, &data, OpenFlags::empty()), Ok(5000));
        assert_eq!(vol.free_blocks(), 60);
        let inode = vol.load_inode(a).unwrap();
        assert_eq!(inode.size, 5000);
        assert_eq!(inode.nr_used_blocks(), Ok(2));
        assert_eq!(read_all(&vol, a), data);

        vol.unlink(ROOT_INO, "a").unwrap();
        assert_eq!(vol.lookup(ROOT_INO, "a"), Err(SifsError::NotFound));
        assert_eq!((vol.free_inodes(), vol.free_blocks()), (7, 63));
    }

    #[test]
    fn file_size_limit() {
        let mut vol = mounted(1100, 16);
        let f = vol.create(ROOT_INO, "big", SifsMode::empty()).unwrap();
        let data = pattern(MAX_FILESIZE as usize, 7);
        assert_eq!(
            vol.write_bytes(f, 0, &data, OpenFlags::empty()),
            Ok(MAX_FILESIZE as usize)
        );
        assert_eq!(vol.load_inode(f).unwrap().size, MAX_FILESIZE);
        assert_eq!(
            vol.write_bytes(f, MAX_FILESIZE, b"x", OpenFlags::empty()),
            Err(SifsError::FileTooLarge)
        );
        assert_eq!(
            vol.write_bytes(f, 0, b"x", OpenFlags::APPEND),
            Err(SifsError::FileTooLarge)
        );

        let mut tail = [0u8; 16];
        assert_eq!(vol.read_bytes(f, MAX_FILESIZE - 16, &mut tail), Ok(16));
        assert_eq!(&tail[..], &data[data.len() - 16..]);
        assert_eq!(vol.read_bytes(f, MAX_FILESIZE, &mut tail), Ok(0));
    }

    #[test]
    fn one_byte_over_the_limit_writes_nothing() {
        let mut vol = mounted(1100, 16);
        let f = vol.create(ROOT_INO, "big", SifsMode::empty()).unwrap();
        let free = vol.free_blocks();
        let data = vec![0xa5u8; MAX_FILESIZE as usize + 1];
        assert_eq!(
            vol.write_bytes(f, 0, &data, OpenFlags::empty()),
            Err(SifsError::FileTooLarge)
        );
        assert_eq!(vol.free_blocks(), free);
        assert_eq!(vol.load_inode(f).unwrap().size, 0);
    }

    #[test]
    fn rmdir_needs_an_empty_directory() {
        let mut vol = mounted(68, 8);
        let d = vol.mkdir(ROOT_INO, "d", SifsMode::from_bits_truncate(0o755)).unwrap();
        vol.create(d, "x", SifsMode::empty()).unwrap();
        assert_eq!(vol.rmdir(ROOT_INO, "d"), Err(SifsError::NotEmpty));

        vol.unlink(d, "x").unwrap();
        let (fi, fb) = (vol.free_inodes(), vol.free_blocks());
        vol.rmdir(ROOT_INO, "d").unwrap();
        assert_eq!((vol.free_inodes(), vol.free_blocks()), (fi + 1, fb + 1));
        assert_eq!(vol.lookup(ROOT_INO, "d"), Err(SifsError::NotFound));
    }

    #[test]
    fn rename_replaces_existing_file() {
        let mut vol = mounted(68, 8);
        let a = vol.create(ROOT_INO, "a", SifsMode::empty()).unwrap();
        let b = vol.create(ROOT_INO, "b", SifsMode::empty()).unwrap();
        let a_data = pattern(100, 3);
        vol.write_bytes(a, 0, &a_data, OpenFlags::empty()).unwrap();
        vol.write_bytes(b, 0, &pattern(3 * BLOCK_SIZE, 4), OpenFlags::empty())
            .unwrap();

        let (fi, fb) = (vol.free_inodes(), vol.free_blocks());
        vol.rename(ROOT_INO, "a", ROOT_INO, "b").unwrap();
        // b's inode, index block and 3 data blocks come back
        assert_eq!((vol.free_inodes(), vol.free_blocks()), (fi + 1, fb + 4));
        assert_eq!(vol.lookup(ROOT_INO, "b"), Ok(a));
        assert_eq!(vol.lookup(ROOT_INO, "a"), Err(SifsError::NotFound));
        assert_eq!(vol.load_inode(b).err(), Some(SifsError::InvalidType));
        assert_eq!(read_all(&vol, a), a_data);
    }

    #[test]
    fn state_survives_remount() {
        let mut vol = mounted(128, 16);
        let docs = vol.mkdir(ROOT_INO, "docs", SifsMode::empty()).unwrap();
        let note = vol.create(docs, "note", SifsMode::empty()).unwrap();
        let data = pattern(10_000, 9);
        vol.write_bytes(note, 0, &data, OpenFlags::empty()).unwrap();
        vol.create(ROOT_INO, "empty", SifsMode::empty()).unwrap();
        let stat = vol.stat_fs();
        let root_listing = vol.readdir(ROOT_INO).unwrap();

        let disk = vol.unmount().unwrap();
        let vol = Volume::mount(disk, MountOptions::default()).unwrap();
        assert_eq!(vol.stat_fs(), stat);
        assert_eq!(vol.readdir(ROOT_INO).unwrap(), root_listing);
        assert_eq!(vol.resolve_path("/docs/note"), Ok(note));
        assert_eq!(read_all(&vol, note), data);
    }

    #[test]
    fn unsynced_changes_are_not_on_disk() {
        let disk = Arc::new(RamDisk::new(68));
        format(&disk, &FormatOptions::new(68, 8)).unwrap();
        let mut vol = Volume::mount(disk.clone(), MountOptions::default()).unwrap();
        vol.create(ROOT_INO, "pending", SifsMode::empty()).unwrap();

        let vol2 = Volume::mount(RamDisk::from_image(disk.snapshot()), MountOptions::default())
            .unwrap();
        assert_eq!(vol2.lookup(ROOT_INO, "pending"), Err(SifsError::NotFound));

        vol.sync_all().unwrap();
        let vol3 = Volume::mount(RamDisk::from_image(disk.snapshot()), MountOptions::default())
            .unwrap();
        assert!(vol3.lookup(ROOT_INO, "pending").is_ok());
        assert_eq!(vol3.free_inodes(), 6);
    }

    #[test]
    fn mount_rejects_bad_images() {
        init_log();
        assert_eq!(
            Volume::mount(RamDisk::new(68), MountOptions::default()).err(),
            Some(SifsError::BadMagic)
        );

        let disk = RamDisk::new(68);
        format(&disk, &FormatOptions::new(68, 8)).unwrap();
        let mut image = disk.snapshot();
        let (block, offset) = locate(ROOT_INO);
        let at = block as usize * BLOCK_SIZE + offset;
        let file_mode = SifsMode::S_IFREG.bits() | 0o644;
        image[at..at + 4].copy_from_slice(&file_mode.to_le_bytes());
        assert_eq!(
            Volume::mount(RamDisk::from_image(image), MountOptions::default()).err(),
            Some(SifsError::InvalidType)
        );
    }

    #[test]
    fn device_errors_propagate() {
        let mut vol = mounted(68, 8);
        let f = vol.create(ROOT_INO, "f", SifsMode::empty()).unwrap();
        vol.write_bytes(f, 0, &pattern(100, 5), OpenFlags::empty())
            .unwrap();
        let data_block = vol.superblock().data_start() + 2;
        let disk = FaultyDisk::new(vol.unmount().unwrap());

        disk.fail_on(data_block);
        let mut vol = Volume::mount(disk, MountOptions::default()).unwrap();
        let mut buf = [0u8; 100];
        assert_eq!(vol.read_bytes(f, 0, &mut buf), Err(SifsError::Io));
        // the root directory block is fine
        assert_eq!(vol.lookup(ROOT_INO, "f"), Ok(f));
        assert_eq!(vol.rename(ROOT_INO, "f", ROOT_INO, "g"), Ok(()));

        // an unreadable superblock aborts the mount
        let disk = vol.unmount().unwrap();
        disk.fail_on(crate::SUPERBLOCK_NO);
        assert_eq!(
            Volume::mount(disk, MountOptions::default()).err(),
            Some(SifsError::Io)
        );
    }

    #[test]
    fn out_of_space_write_keeps_the_file() {
        let mut vol = mounted(12, 4);
        let f = vol.create(ROOT_INO, "f", SifsMode::empty()).unwrap();
        let free = vol.free_blocks();
        let too_big = vec![1u8; (free as usize + 2) * BLOCK_SIZE];
        assert_eq!(
            vol.write_bytes(f, 0, &too_big, OpenFlags::empty()),
            Err(SifsError::OutOfSpace)
        );
        assert_eq!(vol.free_blocks(), free);
        vol.write_bytes(f, 0, b"fits", OpenFlags::empty()).unwrap();
        assert_eq!(read_all(&vol, f), b"fits");
    }

    fn mounted_faulty(nr_blocks: u32, nr_inodes: u32, opts: MountOptions) -> Volume<FaultyDisk> {
        init_log();
        let disk = RamDisk::new(nr_blocks);
        format(&disk, &FormatOptions::new(nr_blocks, nr_inodes)).unwrap();
        Volume::mount(FaultyDisk::new(disk), opts).unwrap()
    }

    fn small_cache() -> MountOptions {
        MountOptions {
            cache_capacity: MIN_CACHE_CAPACITY,
        }
    }

    /// Fill the rest of a small cache with clean, unrelated blocks, so the
    /// next misses evict the lowest-numbered clean blocks (superblock, then
    /// the first inode table block).
    fn fill_cache(vol: &Volume<FaultyDisk>) {
        let mut no = 300;
        while vol.cache.cached_blocks() < MIN_CACHE_CAPACITY {
            vol.cache.get_block(no).unwrap();
            no += 1;
        }
    }

    #[test]
    fn failed_block_allocation_gives_blocks_back() {
        let mut vol = mounted_faulty(68, 8, MountOptions::default());
        let f = vol.create(ROOT_INO, "a", SifsMode::empty()).unwrap();
        let free = vol.free_blocks();
        assert_eq!(free, 61);

        // blocks 7 and 8 are next; 8 cannot be read
        vol.cache.device().fail_on(8);
        let data = pattern(3 * BLOCK_SIZE, 2);
        assert_eq!(
            vol.write_bytes(f, 0, &data, OpenFlags::empty()),
            Err(SifsError::Io)
        );
        assert_eq!(vol.free_blocks(), free);
        let inode = vol.load_inode(f).unwrap();
        assert_eq!((inode.size, inode.nr_used_blocks()), (0, Ok(1)));

        vol.cache.device().fail_on(FaultyDisk::NONE);
        assert_eq!(vol.write_bytes(f, 0, &data, OpenFlags::empty()), Ok(data.len()));
        assert_eq!(read_all(&vol, f), data);
    }

    #[test]
    fn create_unwinds_when_the_parent_cannot_be_written() {
        // two inode table blocks: 1 holds the root, 2 holds ino 256
        let mut vol = mounted_faulty(400, 300, small_cache());
        for ino in 1..256 {
            vol.inodes.mark_used(ino).unwrap();
        }
        let (fi, fb) = (vol.free_inodes(), vol.free_blocks());
        fill_cache(&vol);

        // block 1 is cached now and evicted before the parent is written
        vol.cache.device().fail_on(1);
        assert_eq!(
            vol.create(ROOT_INO, "x", SifsMode::empty()),
            Err(SifsError::Io)
        );
        vol.cache.device().fail_on(FaultyDisk::NONE);

        assert_eq!((vol.free_inodes(), vol.free_blocks()), (fi, fb));
        assert_eq!(vol.lookup(ROOT_INO, "x"), Err(SifsError::NotFound));
        assert!(vol.readdir(ROOT_INO).unwrap().is_empty());
        assert_eq!(vol.load_inode(ROOT_INO).unwrap().nr_entries(), Ok(0));
        assert_eq!(vol.load_inode(256).err(), Some(SifsError::InvalidType));
    }

    #[test]
    fn failed_rename_keeps_the_source() {
        let mut vol = mounted_faulty(400, 300, small_cache());
        let f = vol.create(ROOT_INO, "f", SifsMode::empty()).unwrap();
        for ino in 2..256 {
            vol.inodes.mark_used(ino).unwrap();
        }
        let d = vol.mkdir(ROOT_INO, "d", SifsMode::empty()).unwrap();
        assert_eq!(d, 256);
        let mut vol = Volume::mount(vol.unmount().unwrap(), small_cache()).unwrap();
        fill_cache(&vol);

        // the destination is written, then writing the root fails
        vol.cache.device().fail_on(1);
        assert_eq!(vol.rename(ROOT_INO, "f", d, "g"), Err(SifsError::Io));
        vol.cache.device().fail_on(FaultyDisk::NONE);

        assert_eq!(vol.lookup(ROOT_INO, "f"), Ok(f));
        assert_eq!(vol.lookup(d, "g"), Err(SifsError::NotFound));
        assert_eq!(vol.load_inode(d).unwrap().nr_entries(), Ok(0));
        let root = vol.load_inode(ROOT_INO).unwrap();
        assert_eq!(root.nr_entries(), Ok(2));
        assert_eq!(vol.readdir(ROOT_INO).unwrap().len(), 2);

        vol.rename(ROOT_INO, "f", d, "g").unwrap();
        assert_eq!(vol.resolve_path("/d/g"), Ok(f));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn write_then_read_same_range(
            offset in 0u32..(3 * BLOCK_SIZE as u32),
            data in proptest::collection::vec(any::<u8>(), 1..(2 * BLOCK_SIZE)),
        ) {
            let mut vol = mounted(68, 8);
            let f = vol.create(ROOT_INO, "p", SifsMode::empty()).unwrap();
            prop_assert_eq!(vol.write_bytes(f, offset, &data, OpenFlags::empty()), Ok(data.len()));

            let mut back = vec![0u8; data.len()];
            prop_assert_eq!(vol.read_bytes(f, offset, &mut back), Ok(data.len()));
            prop_assert_eq!(&back, &data);

            let mut head = vec![0xffu8; offset as usize];
            prop_assert_eq!(vol.read_bytes(f, 0, &mut head), Ok(offset as usize));
            prop_assert!(head.iter().all(|&b| b == 0));
        }
    }
}
