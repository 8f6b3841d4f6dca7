use alloc::sync::Arc;
use alloc::vec::Vec;

use log::error;
use spin::Mutex;

use crate::common::{SifsError, SifsResult};
use crate::BLOCK_SIZE;

/// Raw, block-granular storage underneath the block cache.
///
/// Buffers passed in are exactly [`BLOCK_SIZE`] bytes long.
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, block: u32, buf: &mut [u8]) -> SifsResult<()>;
    fn write_block(&self, block: u32, buf: &[u8]) -> SifsResult<()>;
    fn block_count(&self) -> u32;
    fn flush(&self) -> SifsResult<()> {
        Ok(())
    }
}

impl<D: BlockDevice + ?Sized> BlockDevice for Arc<D> {
    fn read_block(&self, block: u32, buf: &mut [u8]) -> SifsResult<()> {
        (**self).read_block(block, buf)
    }

    fn write_block(&self, block: u32, buf: &[u8]) -> SifsResult<()> {
        (**self).write_block(block, buf)
    }

    fn block_count(&self) -> u32 {
        (**self).block_count()
    }

    fn flush(&self) -> SifsResult<()> {
        (**self).flush()
    }
}

/// In-memory block device.
pub struct RamDisk {
    data: Mutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new(blocks: u32) -> Self {
        Self {
            data: Mutex::new(alloc::vec![0u8; blocks as usize * BLOCK_SIZE]),
        }
    }

    /// Wrap an existing image. Trailing bytes that do not fill a whole block
    /// are ignored.
    pub fn from_image(image: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(image),
        }
    }

    /// Copy of the whole image.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn range(&self, block: u32, len: usize) -> SifsResult<core::ops::Range<usize>> {
        if block >= self.block_count() || len != BLOCK_SIZE {
            error!("ramdisk: access to block {} (len {}) out of range", block, len);
            return Err(SifsError::Io);
        }
        let start = block as usize * BLOCK_SIZE;
        Ok(start..start + BLOCK_SIZE)
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block: u32, buf: &mut [u8]) -> SifsResult<()> {
        let range = self.range(block, buf.len())?;
        buf.copy_from_slice(&self.data.lock()[range]);
        Ok(())
    }

    fn write_block(&self, block: u32, buf: &[u8]) -> SifsResult<()> {
        let range = self.range(block, buf.len())?;
        self.data.lock()[range].copy_from_slice(buf);
        Ok(())
    }

    fn block_count(&self) -> u32 {
        (self.data.lock().len() / BLOCK_SIZE) as u32
    }
}

#[cfg(feature = "std")]
pub use file_disk::FileDisk;

#[cfg(feature = "std")]
mod file_disk {
    use std::fs::{File, OpenOptions};
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::path::Path;

    use log::error;
    use spin::Mutex;

    use super::BlockDevice;
    use crate::common::{SifsError, SifsResult};
    use crate::BLOCK_SIZE;

    /// Block device backed by a host file (a disk image).
    pub struct FileDisk {
        file: Mutex<File>,
        blocks: u32,
    }

    impl FileDisk {
        /// Open an existing image.
        pub fn open<P: AsRef<Path>>(path: P) -> SifsResult<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|e| {
                    error!("filedisk: open failed: {}", e);
                    SifsError::Io
                })?;
            let len = file.metadata().map_err(|_| SifsError::Io)?.len();
            Ok(Self {
                file: Mutex::new(file),
                blocks: (len / BLOCK_SIZE as u64) as u32,
            })
        }

        /// Create (or truncate) an image of `blocks` zeroed blocks.
        pub fn create<P: AsRef<Path>>(path: P, blocks: u32) -> SifsResult<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .map_err(|e| {
                    error!("filedisk: create failed: {}", e);
                    SifsError::Io
                })?;
            file.set_len(blocks as u64 * BLOCK_SIZE as u64)
                .map_err(|_| SifsError::Io)?;
            Ok(Self {
                file: Mutex::new(file),
                blocks,
            })
        }

        fn seek(file: &mut File, block: u32) -> SifsResult<()> {
            file.seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))
                .map(|_| ())
                .map_err(|_| SifsError::Io)
        }
    }

    impl BlockDevice for FileDisk {
        fn read_block(&self, block: u32, buf: &mut [u8]) -> SifsResult<()> {
            if block >= self.blocks {
                return Err(SifsError::Io);
            }
            let mut file = self.file.lock();
            Self::seek(&mut file, block)?;
            file.read_exact(buf).map_err(|e| {
                error!("filedisk: read of block {} failed: {}", block, e);
                SifsError::Io
            })
        }

        fn write_block(&self, block: u32, buf: &[u8]) -> SifsResult<()> {
            if block >= self.blocks {
                return Err(SifsError::Io);
            }
            let mut file = self.file.lock();
            Self::seek(&mut file, block)?;
            file.write_all(buf).map_err(|e| {
                error!("filedisk: write of block {} failed: {}", block, e);
                SifsError::Io
            })
        }

        fn block_count(&self) -> u32 {
            self.blocks
        }

        fn flush(&self) -> SifsResult<()> {
            self.file.lock().sync_all().map_err(|_| SifsError::Io)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramdisk_read_back() {
        let disk = RamDisk::new(4);
        let mut block = [0u8; BLOCK_SIZE];
        block[0] = 0xAB;
        block[BLOCK_SIZE - 1] = 0xCD;
        disk.write_block(2, &block).unwrap();

        let mut out = [0u8; BLOCK_SIZE];
        disk.read_block(2, &mut out).unwrap();
        assert_eq!(out[0], 0xAB);
        assert_eq!(out[BLOCK_SIZE - 1], 0xCD);
        assert_eq!(disk.block_count(), 4);
    }

    #[test]
    fn ramdisk_rejects_out_of_range() {
        let disk = RamDisk::new(2);
        let mut out = [0u8; BLOCK_SIZE];
        assert_eq!(disk.read_block(2, &mut out), Err(SifsError::Io));
        assert_eq!(disk.write_block(7, &out), Err(SifsError::Io));
        assert_eq!(disk.read_block(0, &mut out[..10]), Err(SifsError::Io));
    }
}
