//! Volume data file
//!
//! A [`DiskFile`] wraps one [`IoDriver`] and turns it into a size-tracked,
//! append-capable record store:
//! - the size watermark starts at the file size rounded up to
//!   the needle padding size and only grows, except on explicit truncate
//! - `close` forces durability before releasing the driver
//! - every operation after a successful `close` fails with `InvalidState`

use crate::io_driver::{self, IoDriver};
use haystack_common::{Error, IoConfig, IoDriverKind, Result, padded_offset};
use parking_lot::{Mutex, RwLock};
use std::fs::OpenOptions;
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Size watermark and modification time, updated together
#[derive(Clone, Copy, Debug)]
struct Watermark {
    size: u64,
    modified: SystemTime,
}

/// One open volume data file
pub struct DiskFile {
    path: String,
    kind: IoDriverKind,
    /// `None` once closed
    driver: RwLock<Option<Box<dyn IoDriver>>>,
    watermark: Mutex<Watermark>,
    /// Serializes `append` so two appends never pick the same offset
    append_lock: Mutex<()>,
}

impl DiskFile {
    /// Open (or create) a data file with the driver selected by `config`
    pub fn open(path: impl AsRef<Path>, config: &IoConfig) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::io("open", &path_str, 0, 0, e))?;

        let driver = io_driver::new_driver(file, &path_str, config);
        Self::with_driver(path_str, driver)
    }

    /// Wrap an already constructed driver
    pub fn with_driver(path: impl Into<String>, driver: Box<dyn IoDriver>) -> Result<Self> {
        let path = path.into();
        let actual = driver.size()?;
        let modified = driver.modified()?;
        let size = padded_offset(actual);

        debug!(
            "Opened {} with {} driver: size={}, watermark={}",
            path,
            driver.kind(),
            actual,
            size
        );

        Ok(Self {
            path,
            kind: driver.kind(),
            driver: RwLock::new(Some(driver)),
            watermark: Mutex::new(Watermark { size, modified }),
            append_lock: Mutex::new(()),
        })
    }

    /// Get the file path
    pub fn name(&self) -> &str {
        &self.path
    }

    /// Driver this file was opened with
    pub fn driver_kind(&self) -> IoDriverKind {
        self.kind
    }

    /// Whether `close` has completed
    pub fn is_closed(&self) -> bool {
        self.driver.read().is_none()
    }

    fn closed(&self) -> Error {
        Error::invalid_state(format!("{} is closed", self.path))
    }

    /// Read `buf.len()` bytes at `offset`
    ///
    /// No bounds check against the watermark; reading past the end of the
    /// file surfaces as the driver's I/O error.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let driver = self.driver.read();
        let driver = driver.as_ref().ok_or_else(|| self.closed())?;
        driver.read_at(buf, offset)
    }

    /// Write `buf` at `offset`, advancing the watermark if the write ends
    /// past it
    pub fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        let driver = self.driver.read();
        let driver = driver.as_ref().ok_or_else(|| self.closed())?;
        let n = driver.write_at(buf, offset)?;

        let end = offset + n as u64;
        let mut mark = self.watermark.lock();
        if end > mark.size {
            mark.size = end;
            mark.modified = SystemTime::now();
        }
        Ok(n)
    }

    /// Append `buf` at the current watermark, returning the offset written
    pub fn append(&self, buf: &[u8]) -> Result<u64> {
        let _append = self.append_lock.lock();
        let offset = self.watermark.lock().size;
        self.write_at(buf, offset)?;
        Ok(offset)
    }

    /// Resize the file; the watermark becomes exactly `size`
    pub fn truncate(&self, size: u64) -> Result<()> {
        let driver = self.driver.read();
        let driver = driver.as_ref().ok_or_else(|| self.closed())?;
        driver.truncate(size)?;

        let mut mark = self.watermark.lock();
        mark.size = size;
        mark.modified = SystemTime::now();
        Ok(())
    }

    /// Force written data to durable storage
    ///
    /// No-op on Apple platforms, where writes rely on the filesystem's own
    /// ordering.
    pub fn sync(&self) -> Result<()> {
        let driver = self.driver.read();
        let driver = driver.as_ref().ok_or_else(|| self.closed())?;
        Self::sync_driver(driver.as_ref())
    }

    fn sync_driver(driver: &dyn IoDriver) -> Result<()> {
        if cfg!(target_vendor = "apple") {
            return Ok(());
        }
        driver.sync()
    }

    /// Sync, then release the driver
    ///
    /// Waits for in-flight reads and writes to finish. If the sync fails the
    /// file stays open and its durability is unknown; the error is returned.
    pub fn close(&self) -> Result<()> {
        let mut slot = self.driver.write();
        let driver = slot.as_ref().ok_or_else(|| self.closed())?;
        Self::sync_driver(driver.as_ref())?;

        match slot.take() {
            Some(driver) => driver.close()?,
            None => return Err(self.closed()),
        }
        debug!("Closed {}", self.path);
        Ok(())
    }

    /// Current watermark and modification time
    pub fn stat(&self) -> Result<(u64, SystemTime)> {
        if self.is_closed() {
            return Err(self.closed());
        }
        let mark = *self.watermark.lock();
        Ok((mark.size, mark.modified))
    }
}

impl Drop for DiskFile {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            warn!("{} dropped without close, syncing", self.path);
            if let Err(e) = Self::sync_driver(driver.as_ref()) {
                warn!("Sync of dropped {} failed, recent writes may be lost: {}", self.path, e);
            }
            if let Err(e) = driver.close() {
                warn!("Close of dropped {} failed: {}", self.path, e);
            }
        }
    }
}

impl std::fmt::Debug for DiskFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskFile")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("watermark", &self.watermark.lock().size)
            .field("closed", &self.is_closed())
            .finish()
    }
}
