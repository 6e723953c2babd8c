//! Platform durability primitives
//!
//! `sync_file` is the single durability boundary used by the syscall driver.
//! On Apple platforms `fsync` only hands data to the drive, so the driver
//! starts at the configured [`SyncMode`] and falls back
//! `Full -> Barrier -> Fsync` when a filesystem rejects a primitive.
//! Everywhere else it is a plain `fsync`.

use haystack_common::SyncMode;
use std::fs::File;
use std::io;

/// Next weaker primitive to try after `mode` is rejected
#[must_use]
pub const fn fallback(mode: SyncMode) -> Option<SyncMode> {
    match mode {
        SyncMode::Full => Some(SyncMode::Barrier),
        SyncMode::Barrier => Some(SyncMode::Fsync),
        SyncMode::Fsync => None,
    }
}

/// Force previously written data of `file` to durable storage
#[cfg(not(target_vendor = "apple"))]
pub fn sync_file(file: &File, _mode: SyncMode) -> io::Result<()> {
    file.sync_all()
}

/// Force previously written data of `file` to durable storage
#[cfg(target_vendor = "apple")]
pub fn sync_file(file: &File, mode: SyncMode) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    use tracing::debug;

    const F_BARRIERFSYNC: libc::c_int = 85;

    let fd = file.as_raw_fd();
    let mut mode = mode;
    loop {
        // SAFETY: `fd` is owned by `file`, which outlives the call.
        let ret = unsafe {
            match mode {
                SyncMode::Full => libc::fcntl(fd, libc::F_FULLFSYNC),
                SyncMode::Barrier => libc::fcntl(fd, F_BARRIERFSYNC),
                SyncMode::Fsync => libc::fsync(fd),
            }
        };
        if ret != -1 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        let rejected = matches!(
            err.raw_os_error(),
            Some(libc::ENOTSUP | libc::EINVAL | libc::ENOTTY)
        );
        match fallback(mode) {
            Some(next) if rejected => {
                debug!("sync mode {:?} rejected ({}), trying {:?}", mode, err, next);
                mode = next;
            }
            _ => return Err(err),
        }
    }
}
