//! Positional I/O drivers
//!
//! An [`IoDriver`] binds to one open file for its whole lifetime and offers
//! read-at, write-at, truncate, sync and close. Two implementations exist:
//! - [`SyscallDriver`]: blocking `pread`/`pwrite`, always available
//! - `UringDriver`: an io_uring completion ring (Linux, `io-uring` feature)
//!
//! Both present a synchronous interface. A call does not return until the
//! kernel has finished with the caller's buffer.

mod syscall;
#[cfg(all(target_os = "linux", feature = "io-uring"))]
mod uring;

pub use syscall::SyscallDriver;
#[cfg(all(target_os = "linux", feature = "io-uring"))]
pub use uring::UringDriver;

use haystack_common::{IoConfig, IoDriverKind, Result};
use std::fs::File;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Low-level positional I/O over one open file handle
pub trait IoDriver: Send + Sync {
    /// Which implementation this is
    fn kind(&self) -> IoDriverKind;

    /// Fill `buf` from `offset`
    ///
    /// Either the whole buffer is read or an error is returned; hitting end
    /// of file early is an `UnexpectedEof` I/O error, never a short count.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Write all of `buf` at `offset`, returning `buf.len()` on success
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize>;

    /// Resize the underlying file
    fn truncate(&self, size: u64) -> Result<()>;

    /// Force previously written data to durable storage
    ///
    /// No write is durable until this returns `Ok`.
    fn sync(&self) -> Result<()>;

    /// Current file size as reported by the OS
    fn size(&self) -> Result<u64>;

    /// Last modification time as reported by the OS
    fn modified(&self) -> Result<SystemTime>;

    /// Release the file handle
    fn close(self: Box<Self>) -> Result<()>;
}

/// Build the ring driver
///
/// Fails with `UnsupportedDriver` on platforms or builds without io_uring,
/// and when the kernel refuses to set up the ring.
#[cfg(all(target_os = "linux", feature = "io-uring"))]
pub fn new_uring_driver(file: File, path: &str, queue_depth: u32) -> Result<Box<dyn IoDriver>> {
    Ok(Box::new(UringDriver::new(file, path, queue_depth)?))
}

/// Build the ring driver
///
/// Fails with `UnsupportedDriver` on platforms or builds without io_uring,
/// and when the kernel refuses to set up the ring.
#[cfg(not(all(target_os = "linux", feature = "io-uring")))]
pub fn new_uring_driver(_file: File, path: &str, queue_depth: u32) -> Result<Box<dyn IoDriver>> {
    Err(haystack_common::Error::UnsupportedDriver(format!(
        "io_uring (queue depth {queue_depth}) is not available for {path}: {}",
        if cfg!(target_os = "linux") {
            "built without the io-uring feature"
        } else {
            "requires Linux"
        }
    )))
}

/// Build the driver selected by `config` for an already opened file
///
/// A ring driver that cannot be constructed falls back to the syscall
/// driver with a warning.
pub fn new_driver(file: File, path: &str, config: &IoConfig) -> Box<dyn IoDriver> {
    if config.driver == IoDriverKind::IoUring {
        let ring = file
            .try_clone()
            .map_err(haystack_common::Error::from)
            .and_then(|dup| new_uring_driver(dup, path, config.queue_depth));
        match ring {
            Ok(driver) => {
                debug!(
                    "Opened {} with io_uring driver (queue depth {})",
                    path, config.queue_depth
                );
                return driver;
            }
            Err(e) => {
                warn!("io_uring unavailable for {}, using syscall driver: {}", path, e);
            }
        }
    }

    Box::new(SyscallDriver::new(file, path, config.sync_mode))
}

/// Drivers for exercising failure paths in tests
#[cfg(test)]
pub(crate) mod testing {
    use super::{IoDriver, SyscallDriver};
    use haystack_common::{Error, IoDriverKind, Result, SyncMode};
    use std::fs::OpenOptions;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::SystemTime;

    /// Syscall driver whose sync fails while `fail_sync` is set
    pub(crate) struct FlakyDriver {
        inner: SyscallDriver,
        path: String,
        fail_sync: Arc<AtomicBool>,
    }

    impl FlakyDriver {
        /// Open `path` with sync working; flip the returned flag to break it
        pub(crate) fn open(path: &Path) -> (Self, Arc<AtomicBool>) {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .unwrap();
            let path = path.to_string_lossy().to_string();
            let fail_sync = Arc::new(AtomicBool::new(false));
            let driver = Self {
                inner: SyscallDriver::new(file, path.as_str(), SyncMode::default()),
                path,
                fail_sync: Arc::clone(&fail_sync),
            };
            (driver, fail_sync)
        }
    }

    impl IoDriver for FlakyDriver {
        fn kind(&self) -> IoDriverKind {
            self.inner.kind()
        }
        fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
            self.inner.read_at(buf, offset)
        }
        fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
            self.inner.write_at(buf, offset)
        }
        fn truncate(&self, size: u64) -> Result<()> {
            self.inner.truncate(size)
        }
        fn sync(&self) -> Result<()> {
            if self.fail_sync.load(Ordering::SeqCst) {
                return Err(Error::io(
                    "sync",
                    &self.path,
                    0,
                    0,
                    std::io::Error::other("device gone"),
                ));
            }
            self.inner.sync()
        }
        fn size(&self) -> Result<u64> {
            self.inner.size()
        }
        fn modified(&self) -> Result<SystemTime> {
            self.inner.modified()
        }
        fn close(self: Box<Self>) -> Result<()> {
            Box::new(self.inner).close()
        }
    }
}
