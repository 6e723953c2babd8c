//! Configuration types for Haystack
//!
//! Configuration is read once at startup and handed to constructors
//! explicitly; nothing here is process-global.

use crate::error::{Error, Result};
use crate::types::MAX_POSSIBLE_VOLUME_SIZE;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default submission queue depth for the io_uring driver
pub const DEFAULT_QUEUE_DEPTH: u32 = 256;

/// Largest ring the kernel accepts
pub const MAX_QUEUE_DEPTH: u32 = 32768;

/// Root configuration for a volume server
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration
    pub server: ServerConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Remote tier configuration
    pub remote: RemoteConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check the values that cannot be expressed in the type system
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        if self.remote.fetch_timeout_secs == 0 {
            return Err(Error::Configuration(
                "remote.fetch_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Network configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address for the gRPC volume service
    pub listen: SocketAddr,
    /// Address for the metrics and health endpoint
    pub metrics_listen: SocketAddr,
    /// Maximum gRPC message size in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 18080)),
            metrics_listen: SocketAddr::from(([0, 0, 0, 0], 9327)),
            max_message_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the volume data files
    pub dir: PathBuf,
    /// I/O driver selection for newly opened volume files
    pub io: IoConfig,
    /// Sync the data file after every needle write
    pub fsync: bool,
    /// Maximum content size of a single volume in bytes
    pub max_volume_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./volume-data"),
            io: IoConfig::default(),
            fsync: false,
            max_volume_size: MAX_POSSIBLE_VOLUME_SIZE,
        }
    }
}

impl StorageConfig {
    /// Storage configuration rooted at `dir` with defaults for everything else
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.io.validate()?;
        if self.max_volume_size == 0 || self.max_volume_size > MAX_POSSIBLE_VOLUME_SIZE {
            return Err(Error::Configuration(format!(
                "storage.max_volume_size must be in 1..={MAX_POSSIBLE_VOLUME_SIZE}, got {}",
                self.max_volume_size
            )));
        }
        Ok(())
    }
}

/// I/O driver configuration
///
/// Read when a volume file is opened; changing it later does not affect
/// files that are already open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Which driver new volume files use
    pub driver: IoDriverKind,
    /// Ring size for the io_uring driver
    pub queue_depth: u32,
    /// First durability primitive tried on Apple platforms
    pub sync_mode: SyncMode,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            driver: IoDriverKind::Syscall,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            sync_mode: SyncMode::default(),
        }
    }
}

impl IoConfig {
    /// Configuration selecting the io_uring driver with the default ring size
    #[must_use]
    pub fn io_uring() -> Self {
        Self {
            driver: IoDriverKind::IoUring,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_depth == 0 || self.queue_depth > MAX_QUEUE_DEPTH {
            return Err(Error::Configuration(format!(
                "storage.io.queue_depth must be in 1..={MAX_QUEUE_DEPTH}, got {}",
                self.queue_depth
            )));
        }
        Ok(())
    }
}

/// I/O driver implementation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoDriverKind {
    /// Blocking positional syscalls (pread/pwrite), always available
    #[default]
    Syscall,
    /// io_uring completion ring (Linux, `io-uring` feature)
    IoUring,
}

impl IoDriverKind {
    /// Get the driver name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Syscall => "syscall",
            Self::IoUring => "io_uring",
        }
    }
}

impl std::fmt::Display for IoDriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for IoDriverKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "syscall" | "pread" | "std" | "" => Ok(Self::Syscall),
            "io_uring" | "io-uring" | "uring" => Ok(Self::IoUring),
            _ => Err(format!("unknown io driver: {s}")),
        }
    }
}

/// Durability primitive used by `sync` on Apple platforms
///
/// Other platforms always use `fsync`. On Apple platforms the driver starts
/// at the configured mode and falls back `Full -> Barrier -> Fsync` when the
/// filesystem rejects a primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `F_FULLFSYNC`: flush the drive's cache to permanent storage
    Full,
    /// `F_BARRIERFSYNC`: order writes with a barrier, no full device flush
    #[default]
    Barrier,
    /// Plain `fsync`
    Fsync,
}

/// Remote tier configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Upper bound for a single remote range fetch, in seconds
    pub fetch_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 60,
        }
    }
}

impl RemoteConfig {
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
