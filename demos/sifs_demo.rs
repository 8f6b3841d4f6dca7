//! Work with a SIFS disk image from the command line.
//!
//! ```text
//! cargo run --features std --example sifs_demo -- mkfs /tmp/sifs.img --blocks 1024
//! cargo run --features std --example sifs_demo -- mkdir /tmp/sifs.img /docs
//! cargo run --features std --example sifs_demo -- write /tmp/sifs.img /docs/hello "Hello, SIFS!"
//! cargo run --features std --example sifs_demo -- cat /tmp/sifs.img /docs/hello
//! cargo run --features std --example sifs_demo -- ls /tmp/sifs.img /docs
//! cargo run --features std --example sifs_demo -- stat /tmp/sifs.img
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::info;
use sifs::{
    format, FileDisk, FormatOptions, MountOptions, OpenFlags, SifsError, SifsMode, SifsResult,
    Volume,
};

#[derive(Parser)]
#[command(author, version, about = "SIFS disk image tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create and format a new image.
    Mkfs {
        image: PathBuf,
        #[arg(long, default_value_t = 1024)]
        blocks: u32,
        #[arg(long)]
        inodes: Option<u32>,
    },
    /// List a directory.
    Ls { image: PathBuf, path: String },
    /// Create a directory.
    Mkdir { image: PathBuf, path: String },
    /// Create (if needed) and append text to a file.
    Write {
        image: PathBuf,
        path: String,
        text: String,
    },
    /// Print a file.
    Cat { image: PathBuf, path: String },
    /// Remove a file or an empty directory.
    Rm { image: PathBuf, path: String },
    /// Move an entry.
    Mv {
        image: PathBuf,
        from: String,
        to: String,
    },
    /// Print filesystem statistics as JSON.
    Stat { image: PathBuf },
}

/// Split "/a/b/c" into ("/a/b", "c").
fn split_parent(path: &str) -> SifsResult<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(at) => Ok((&trimmed[..at], &trimmed[at + 1..])),
        None => Err(SifsError::InvalidName),
    }
}

fn mount(image: &Path) -> SifsResult<Volume<FileDisk>> {
    Volume::mount(FileDisk::open(image)?, MountOptions::default())
}

fn run(cli: Cli) -> SifsResult<()> {
    match cli.command {
        Command::Mkfs {
            image,
            blocks,
            inodes,
        } => {
            let disk = FileDisk::create(&image, blocks)?;
            let opts = FormatOptions {
                nr_blocks: Some(blocks),
                nr_inodes: inodes,
            };
            let sb = format(&disk, &opts)?;
            println!("{}", serde_json::to_string_pretty(&sb).map_err(|_| SifsError::Io)?);
        }
        Command::Ls { image, path } => {
            let vol = mount(&image)?;
            let dir = vol.resolve_path(&path)?;
            for entry in vol.readdir(dir)? {
                let inode = vol.load_inode(entry.ino)?;
                let kind = if inode.is_dir() { 'd' } else { '-' };
                println!("{}{:o} {:>8} {}", kind, inode.mode.perm().bits(), inode.size, entry.name);
            }
        }
        Command::Mkdir { image, path } => {
            let mut vol = mount(&image)?;
            let (parent, name) = split_parent(&path)?;
            let parent = vol.resolve_path(parent)?;
            vol.mkdir(parent, name, SifsMode::from_bits_truncate(0o755))?;
            vol.unmount()?;
        }
        Command::Write { image, path, text } => {
            let mut vol = mount(&image)?;
            let (parent, name) = split_parent(&path)?;
            let parent = vol.resolve_path(parent)?;
            let ino = match vol.lookup(parent, name) {
                Ok(ino) => ino,
                Err(SifsError::NotFound) => {
                    vol.create(parent, name, SifsMode::from_bits_truncate(0o644))?
                }
                Err(e) => return Err(e),
            };
            let n = vol.write_bytes(ino, 0, text.as_bytes(), OpenFlags::APPEND)?;
            info!("appended {} bytes to ino {}", n, ino);
            vol.unmount()?;
        }
        Command::Cat { image, path } => {
            let vol = mount(&image)?;
            let ino = vol.resolve_path(&path)?;
            let size = vol.load_inode(ino)?.size as usize;
            let mut buf = vec![0u8; size];
            let n = vol.read_bytes(ino, 0, &mut buf)?;
            println!("{}", String::from_utf8_lossy(&buf[..n]));
        }
        Command::Rm { image, path } => {
            let mut vol = mount(&image)?;
            let (parent, name) = split_parent(&path)?;
            let parent = vol.resolve_path(parent)?;
            match vol.unlink(parent, name) {
                Err(SifsError::IsDirectory) => vol.rmdir(parent, name)?,
                other => other?,
            }
            vol.unmount()?;
        }
        Command::Mv { image, from, to } => {
            let mut vol = mount(&image)?;
            let (old_parent, old_name) = split_parent(&from)?;
            let (new_parent, new_name) = split_parent(&to)?;
            let old_parent = vol.resolve_path(old_parent)?;
            let new_parent = vol.resolve_path(new_parent)?;
            vol.rename(old_parent, old_name, new_parent, new_name)?;
            vol.unmount()?;
        }
        Command::Stat { image } => {
            let vol = mount(&image)?;
            let stat = vol.stat_fs();
            println!("{}", serde_json::to_string_pretty(&stat).map_err(|_| SifsError::Io)?);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sifs: {}", e);
            ExitCode::FAILURE
        }
    }
}
