//! Haystack Storage Engine - Volume data files
//!
//! This crate implements the storage side of a volume server:
//! - Positional I/O drivers (blocking syscalls or an io_uring ring)
//! - `DiskFile`, a volume data file with a size watermark
//! - Platform durability primitives
//! - `Volume` and the `Store` that serves volumes from a directory

pub mod disk_file;
pub mod durability;
pub mod io_driver;
pub mod store;
pub mod volume;

// Re-exports
pub use disk_file::DiskFile;
pub use io_driver::{IoDriver, SyscallDriver, new_driver};
pub use store::{Store, VolumeLookup};
pub use volume::Volume;
