//! Core type definitions for Haystack
//!
//! This module defines the identifiers and address types shared by the
//! storage engine, the RPC layer and the remote tier.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Alignment unit for needles inside a volume file.
///
/// Every needle starts at a multiple of this value; the bytes between the
/// end of one needle and the start of the next are implicit padding.
pub const NEEDLE_PADDING_SIZE: u64 = 8;

/// Largest content size a single volume may hold.
///
/// Offsets are indexed in units of the padding size with 4 bytes, so a
/// volume cannot address more than `2^32 * NEEDLE_PADDING_SIZE` bytes.
pub const MAX_POSSIBLE_VOLUME_SIZE: u64 = (1 << 32) * NEEDLE_PADDING_SIZE;

/// Identifier of a volume (one append-only data file)
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into, Display,
)]
#[display("{_0}")]
pub struct VolumeId(u32);

impl VolumeId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Parse a volume id from a data file stem such as `7` or `pics_7`
    #[must_use]
    pub fn from_file_stem(stem: &str) -> Option<(Option<String>, Self)> {
        match stem.rsplit_once('_') {
            Some((collection, id)) => {
                let id = id.parse().ok()?;
                Some((Some(collection.to_string()), Self(id)))
            }
            None => stem.parse().ok().map(|id| (None, Self(id))),
        }
    }
}

impl fmt::Debug for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VolumeId({})", self.0)
    }
}

/// Identifier of a needle (one stored record) within a volume
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into)]
pub struct NeedleId(u64);

impl NeedleId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Debug for NeedleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NeedleId({:x})", self.0)
    }
}

impl fmt::Display for NeedleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Location of a needle's bytes inside its volume file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedleValue {
    /// Byte offset of the first needle byte
    pub offset: u64,
    /// Stored length in bytes
    pub size: u32,
}

impl NeedleValue {
    #[must_use]
    pub const fn new(offset: u64, size: u32) -> Self {
        Self { offset, size }
    }
}

/// Round `offset` up to the next multiple of [`NEEDLE_PADDING_SIZE`]
#[must_use]
pub const fn padded_offset(offset: u64) -> u64 {
    let rem = offset % NEEDLE_PADDING_SIZE;
    if rem == 0 {
        offset
    } else {
        offset + (NEEDLE_PADDING_SIZE - rem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_offset() {
        assert_eq!(padded_offset(0), 0);
        assert_eq!(padded_offset(1), 8);
        assert_eq!(padded_offset(3), 8);
        assert_eq!(padded_offset(8), 8);
        assert_eq!(padded_offset(9), 16);
    }

    #[test]
    fn test_volume_id_from_file_stem() {
        assert_eq!(VolumeId::from_file_stem("7"), Some((None, VolumeId::new(7))));
        assert_eq!(
            VolumeId::from_file_stem("pics_12"),
            Some((Some("pics".to_string()), VolumeId::new(12)))
        );
        assert_eq!(
            VolumeId::from_file_stem("a_b_3"),
            Some((Some("a_b".to_string()), VolumeId::new(3)))
        );
        assert_eq!(VolumeId::from_file_stem("notes"), None);
        assert_eq!(VolumeId::from_file_stem("pics_x"), None);
    }

    #[test]
    fn test_needle_id_display_is_hex() {
        assert_eq!(NeedleId::new(255).to_string(), "ff");
        assert_eq!(format!("{:?}", NeedleId::new(1)), "NeedleId(1)");
    }

    #[test]
    fn test_max_volume_size() {
        assert_eq!(MAX_POSSIBLE_VOLUME_SIZE, 32 * 1024 * 1024 * 1024);
    }
}
