//! Types shared by every layer of the engine: the error enum, mode bits,
//! open flags and the statfs report.

use bitflags::bitflags;
use serde::Serialize;

/// Errors surfaced by the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, onlyerror::Error)]
pub enum SifsError {
    #[error("I/O error on block device")]
    Io,
    #[error("no free inode or block left")]
    OutOfSpace,
    #[error("file name longer than the directory slot")]
    NameTooLong,
    #[error("no such entry")]
    NotFound,
    #[error("directory not empty")]
    NotEmpty,
    #[error("file would exceed the maximum file size")]
    FileTooLarge,
    #[error("inode is neither a directory nor a regular file")]
    InvalidType,
    #[error("bad magic number in superblock")]
    BadMagic,
    #[error("on-disk structure is inconsistent: {0}")]
    Corrupted(&'static str),
    #[error("id {0} out of range")]
    InvalidId(u32),
    #[error("invalid file name")]
    InvalidName,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotDirectory,
    #[error("is a directory")]
    IsDirectory,
    #[error("block {0} is already held")]
    BlockBusy(u32),
    #[error("bad configuration: {0}")]
    Config(&'static str),
}

pub type SifsResult<T> = Result<T, SifsError>;

bitflags! {
    /// Type and permission bits stored in the `mode` field of an inode.
    pub struct SifsMode: u32 {
        const S_IFMT = 0o170000;
        const S_IFSOCK = 0o140000;
        const S_IFLNK = 0o120000;
        const S_IFREG = 0o100000;
        const S_IFBLK = 0o060000;
        const S_IFDIR = 0o040000;
        const S_IFCHR = 0o020000;
        const S_IFIFO = 0o010000;

        const S_ISUID = 0o4000;
        const S_ISGID = 0o2000;
        const S_ISVTX = 0o1000;

        const S_IRWXU = 0o700;
        const S_IRUSR = 0o400;
        const S_IWUSR = 0o200;
        const S_IXUSR = 0o100;

        const S_IRWXG = 0o070;
        const S_IRGRP = 0o040;
        const S_IWGRP = 0o020;
        const S_IXGRP = 0o010;

        const S_IRWXO = 0o007;
        const S_IROTH = 0o004;
        const S_IWOTH = 0o002;
        const S_IXOTH = 0o001;
    }
}

impl SifsMode {
    /// Only the file type bits.
    pub fn file_bits(&self) -> u32 {
        self.bits() & Self::S_IFMT.bits()
    }

    /// Everything except the file type bits.
    pub fn perm(&self) -> SifsMode {
        SifsMode::from_bits_truncate(self.bits() & !Self::S_IFMT.bits())
    }
}

bitflags! {
    /// Flags the host passes along with a write.
    pub struct OpenFlags: u32 {
        const APPEND = 0o2000;
    }
}

/// The two object kinds this format can store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SifsFileType {
    Directory,
    RegularFile,
}

impl SifsFileType {
    /// Decode the type tag of a mode, rejecting anything that is not a
    /// directory or a regular file.
    pub fn from_mode(mode: SifsMode) -> SifsResult<Self> {
        match mode.file_bits() {
            b if b == SifsMode::S_IFDIR.bits() => Ok(SifsFileType::Directory),
            b if b == SifsMode::S_IFREG.bits() => Ok(SifsFileType::RegularFile),
            _ => Err(SifsError::InvalidType),
        }
    }

    pub fn mode_bits(&self) -> SifsMode {
        match self {
            SifsFileType::Directory => SifsMode::S_IFDIR,
            SifsFileType::RegularFile => SifsMode::S_IFREG,
        }
    }
}

/// Filesystem statistics, as reported to a host `statfs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FsStat {
    pub f_bsize: u32,
    pub f_blocks: u32,
    pub f_bfree: u32,
    pub f_files: u32,
    pub f_ffree: u32,
    pub f_fsid: u32,
    pub f_namemax: u32,
}
