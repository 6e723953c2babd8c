//! io_uring driver
//!
//! Each driver owns one completion ring. A call pushes a single submission
//! entry, waits for its completion and only then returns, so the caller's
//! buffer stays borrowed for exactly as long as the kernel may touch it.
//! Every entry carries a sequence tag in `user_data`, and only the
//! completion with the matching tag ends the wait.

use super::IoDriver;
use haystack_common::{Error, IoDriverKind, Result};
use io_uring::{IoUring, opcode, squeue, types};
use parking_lot::Mutex;
use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::warn;

/// Largest transfer submitted in one entry
const MAX_CHUNK: usize = 1 << 30;

/// io_uring-backed driver
///
/// The ring is locked from submission until the matching completion is
/// reaped, so operations on one driver run one at a time, reads included.
/// A volume that needs parallel reads should use the syscall driver.
pub struct UringDriver {
    file: File,
    path: String,
    ring: Mutex<IoUring>,
    next_tag: AtomicU64,
    queue_depth: u32,
}

impl UringDriver {
    /// Set up a ring of `queue_depth` entries for `file`
    pub fn new(file: File, path: impl Into<String>, queue_depth: u32) -> Result<Self> {
        let path = path.into();
        let ring = IoUring::new(queue_depth).map_err(|e| {
            Error::UnsupportedDriver(format!(
                "io_uring setup with {queue_depth} entries failed for {path}: {e}"
            ))
        })?;

        Ok(Self {
            file,
            path,
            ring: Mutex::new(ring),
            next_tag: AtomicU64::new(0),
            queue_depth,
        })
    }

    /// Ring size this driver was built with
    pub fn queue_depth(&self) -> u32 {
        self.queue_depth
    }

    fn fd(&self) -> types::Fd {
        types::Fd(self.file.as_raw_fd())
    }

    /// Submit one entry and block until its completion is reaped
    ///
    /// Completions carrying another tag are left over from an earlier
    /// failed wait; they are logged and dropped.
    ///
    /// # Safety
    ///
    /// Any buffer referenced by `entry` must stay valid and untouched until
    /// this function returns.
    unsafe fn submit_and_wait(&self, entry: squeue::Entry) -> io::Result<u32> {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let entry = entry.user_data(tag);
        let mut ring = self.ring.lock();

        // SAFETY: the caller guarantees the buffer outlives this call and we
        // hold the ring lock until the completion below has been consumed.
        unsafe {
            ring.submission()
                .push(&entry)
                .map_err(|_| io::Error::other("io_uring submission queue is full"))?;
        }

        loop {
            match ring.submit_and_wait(1) {
                Ok(_) => {}
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            }

            for cqe in ring.completion() {
                if cqe.user_data() != tag {
                    warn!(
                        "Dropping stale io_uring completion {} on {} (waiting for {})",
                        cqe.user_data(),
                        self.path,
                        tag
                    );
                    continue;
                }
                let res = cqe.result();
                return if res < 0 {
                    Err(io::Error::from_raw_os_error(-res))
                } else {
                    Ok(res.unsigned_abs())
                };
            }
        }
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let mut done = 0usize;
        while done < buf.len() {
            let chunk = &mut buf[done..];
            let len = chunk.len().min(MAX_CHUNK);
            let entry = opcode::Read::new(self.fd(), chunk.as_mut_ptr(), len as u32)
                .offset(offset + done as u64)
                .build();
            // SAFETY: `chunk` is mutably borrowed for the whole call.
            let n = unsafe { self.submit_and_wait(entry) }?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ));
            }
            done += n as usize;
        }
        Ok(())
    }

    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        let mut done = 0usize;
        while done < buf.len() {
            let chunk = &buf[done..];
            let len = chunk.len().min(MAX_CHUNK);
            let entry = opcode::Write::new(self.fd(), chunk.as_ptr(), len as u32)
                .offset(offset + done as u64)
                .build();
            // SAFETY: `chunk` is borrowed for the whole call.
            let n = unsafe { self.submit_and_wait(entry) }?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero));
            }
            done += n as usize;
        }
        Ok(())
    }
}

impl IoDriver for UringDriver {
    fn kind(&self) -> IoDriverKind {
        IoDriverKind::IoUring
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.read_exact_at(buf, offset)
            .map_err(|e| Error::io("read", &self.path, offset, buf.len() as u64, e))?;
        Ok(buf.len())
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        self.write_all_at(buf, offset)
            .map_err(|e| Error::io("write", &self.path, offset, buf.len() as u64, e))?;
        Ok(buf.len())
    }

    // IORING_OP_FTRUNCATE needs Linux 6.9, so truncate goes through the
    // plain syscall.
    fn truncate(&self, size: u64) -> Result<()> {
        self.file
            .set_len(size)
            .map_err(|e| Error::io("truncate", &self.path, size, 0, e))
    }

    fn sync(&self) -> Result<()> {
        let entry = opcode::Fsync::new(self.fd()).build();
        // SAFETY: fsync references no user memory.
        unsafe { self.submit_and_wait(entry) }
            .map(|_| ())
            .map_err(|e| Error::io("sync", &self.path, 0, 0, e))
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn modified(&self) -> Result<SystemTime> {
        Ok(self.file.metadata()?.modified()?)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let Self { file, ring, .. } = *self;
        drop(ring);
        drop(file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    // Kernels or sandboxes without io_uring make setup fail; those runs
    // have nothing to test here.
    fn driver() -> Option<(NamedTempFile, UringDriver)> {
        let temp = NamedTempFile::new().unwrap();
        let file = temp.reopen().unwrap();
        match UringDriver::new(file, "uring.dat", 8) {
            Ok(driver) => Some((temp, driver)),
            Err(Error::UnsupportedDriver(_)) => None,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_uring_write_read_sync() {
        let Some((_temp, driver)) = driver() else {
            return;
        };
        assert_eq!(driver.queue_depth(), 8);
        assert_eq!(driver.write_at(b"ring buffer", 16).unwrap(), 11);

        let mut buf = [0u8; 11];
        driver.read_at(&mut buf, 16).unwrap();
        assert_eq!(&buf, b"ring buffer");
        driver.sync().unwrap();
        assert_eq!(driver.size().unwrap(), 27);
    }

    #[test]
    fn test_uring_skips_completion_of_other_entry() {
        let Some((_temp, driver)) = driver() else {
            return;
        };
        driver.write_at(b"abcd", 0).unwrap();
        {
            // Leave an unreaped no-op completion in the queue
            let mut ring = driver.ring.lock();
            let nop = opcode::Nop::new().build().user_data(u64::MAX);
            // SAFETY: a no-op references no user memory.
            unsafe { ring.submission().push(&nop).unwrap() };
            ring.submit_and_wait(1).unwrap();
        }

        let mut buf = [0u8; 4];
        assert_eq!(driver.read_at(&mut buf, 0).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(driver.ring.lock().completion().len(), 0);
    }

    #[test]
    fn test_uring_short_read_is_an_error() {
        let Some((_temp, driver)) = driver() else {
            return;
        };
        driver.write_at(b"abc", 0).unwrap();
        let mut buf = [0u8; 4];
        let err = driver.read_at(&mut buf, 0).unwrap_err();
        assert!(matches!(err, Error::Io { op: "read", .. }));
    }
}
