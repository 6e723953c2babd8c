//! Positional-syscall driver
//!
//! Every call maps directly onto a blocking `pread`/`pwrite` (or
//! `seek_read`/`seek_write` on Windows). Position-independent calls let
//! concurrent readers and writers at disjoint offsets share one handle.

use super::IoDriver;
use crate::durability;
use haystack_common::{Error, IoDriverKind, Result, SyncMode};
use std::fs::File;
use std::io;
use std::time::SystemTime;

/// Blocking positional-syscall driver
pub struct SyscallDriver {
    file: File,
    path: String,
    sync_mode: SyncMode,
}

impl SyscallDriver {
    /// Wrap an open file
    pub fn new(file: File, path: impl Into<String>, sync_mode: SyncMode) -> Self {
        Self {
            file,
            path: path.into(),
            sync_mode,
        }
    }
}

impl IoDriver for SyscallDriver {
    fn kind(&self) -> IoDriverKind {
        IoDriverKind::Syscall
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        read_exact_at(&self.file, buf, offset)
            .map_err(|e| Error::io("read", &self.path, offset, buf.len() as u64, e))?;
        Ok(buf.len())
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        write_all_at(&self.file, buf, offset)
            .map_err(|e| Error::io("write", &self.path, offset, buf.len() as u64, e))?;
        Ok(buf.len())
    }

    fn truncate(&self, size: u64) -> Result<()> {
        self.file
            .set_len(size)
            .map_err(|e| Error::io("truncate", &self.path, size, 0, e))
    }

    fn sync(&self) -> Result<()> {
        durability::sync_file(&self.file, self.sync_mode)
            .map_err(|e| Error::io("sync", &self.path, 0, 0, e))
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn modified(&self) -> Result<SystemTime> {
        Ok(self.file.metadata()?.modified()?)
    }

    fn close(self: Box<Self>) -> Result<()> {
        drop(self.file);
        Ok(())
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ));
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
