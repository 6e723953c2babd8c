//! Error types for Haystack
//!
//! This module defines the common error types used throughout the system.

use crate::types::{NeedleId, VolumeId};
use thiserror::Error;

/// Common result type for Haystack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Haystack
#[derive(Debug, Error)]
pub enum Error {
    // Lookup errors
    #[error("volume not found: {volume_id}")]
    VolumeNotFound { volume_id: VolumeId },

    #[error("volume already exists: {0}")]
    VolumeAlreadyExists(VolumeId),

    // Storage errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("{op} failed on {path} at offset {offset} size {size}: {source}")]
    Io {
        op: &'static str,
        path: String,
        offset: u64,
        size: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unsupported I/O driver: {0}")]
    UnsupportedDriver(String),

    #[error("volume {volume_id} size limit {limit} exceeded, current size is {size}")]
    VolumeFull {
        volume_id: VolumeId,
        size: u64,
        limit: u64,
    },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    // Remote tier errors
    #[error("unsupported remote storage backend: {0}")]
    UnsupportedBackend(String),

    #[error("remote storage authentication failed: {0}")]
    Authentication(String),

    #[error("read from remote {location}: {reason}")]
    RemoteFetch { location: String, reason: String },

    // RPC-level wrappers
    #[error("read needle blob offset {offset} size {size}: {source}")]
    Read {
        volume_id: VolumeId,
        offset: i64,
        size: i32,
        #[source]
        source: Box<Error>,
    },

    #[error("write blob needle {needle_id} size {size}: {source}")]
    Write {
        volume_id: VolumeId,
        needle_id: NeedleId,
        size: i32,
        #[source]
        source: Box<Error>,
    },

    // Internal errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a positional I/O error with the failing range attached
    pub fn io(
        op: &'static str,
        path: impl Into<String>,
        offset: u64,
        size: u64,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            op,
            path: path.into(),
            offset,
            size,
            source,
        }
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a remote fetch error for the given location
    pub fn remote_fetch(location: impl ToString, reason: impl ToString) -> Self {
        Self::RemoteFetch {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    /// The innermost error, looking through the RPC-level wrappers
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Read { source, .. } | Self::Write { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Check if this is a not found error
    ///
    /// A missing volume is an expected condition (the volume may have moved)
    /// and callers redirect rather than alarm on it.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::VolumeNotFound { .. })
    }

    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.root_cause(), Self::RemoteFetch { .. })
    }
}
