//! Volume: one data file plus its in-memory needle map
//!
//! Needles are appended at the next padded offset after the current
//! watermark. The needle map is kept in memory only.

use crate::disk_file::DiskFile;
use haystack_common::{
    Error, IoDriverKind, NeedleId, NeedleValue, Result, StorageConfig, VolumeId, padded_offset,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One volume and the data file it owns
pub struct Volume {
    id: VolumeId,
    collection: Option<String>,
    data: DiskFile,
    needles: RwLock<HashMap<NeedleId, NeedleValue>>,
    /// Held while choosing an offset and writing a needle
    write_lock: Mutex<()>,
    fsync: bool,
    max_size: u64,
}

impl Volume {
    /// Data file path for a volume
    fn data_file_path(dir: &Path, collection: Option<&str>, id: VolumeId) -> PathBuf {
        match collection {
            Some(c) if !c.is_empty() => dir.join(format!("{c}_{id}.dat")),
            _ => dir.join(format!("{id}.dat")),
        }
    }

    /// Open or create a volume in `dir`
    pub fn open(
        dir: &Path,
        collection: Option<&str>,
        id: VolumeId,
        config: &StorageConfig,
    ) -> Result<Self> {
        let path = Self::data_file_path(dir, collection, id);
        let data = DiskFile::open(&path, &config.io)?;

        info!(
            "Loaded volume {} from {} ({} driver, {} bytes)",
            id,
            path.display(),
            data.driver_kind(),
            data.stat()?.0
        );

        Ok(Self::with_data_file(id, collection, data, config))
    }

    /// Build a volume around an already opened data file
    pub fn with_data_file(
        id: VolumeId,
        collection: Option<&str>,
        data: DiskFile,
        config: &StorageConfig,
    ) -> Self {
        Self {
            id,
            collection: collection.filter(|c| !c.is_empty()).map(str::to_string),
            data,
            needles: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            fsync: config.fsync,
            max_size: config.max_volume_size,
        }
    }

    pub fn id(&self) -> VolumeId {
        self.id
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn driver_kind(&self) -> IoDriverKind {
        self.data.driver_kind()
    }

    /// Underlying data file
    pub fn data_file(&self) -> &DiskFile {
        &self.data
    }

    /// Current size watermark of the data file
    pub fn content_size(&self) -> Result<u64> {
        Ok(self.data.stat()?.0)
    }

    /// Number of needles written since the volume was opened
    pub fn file_count(&self) -> usize {
        self.needles.read().len()
    }

    /// Location of a needle written through this volume
    pub fn needle(&self, needle_id: NeedleId) -> Option<NeedleValue> {
        self.needles.read().get(&needle_id).copied()
    }

    /// Read exactly `size` raw bytes at `offset`
    pub fn read_needle_blob(&self, offset: u64, size: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size as usize];
        self.data.read_at(&mut buf, offset)?;
        Ok(buf)
    }

    /// Append a raw needle blob and record it in the needle map
    ///
    /// Returns the offset the blob was written at.
    pub fn write_needle_blob(&self, needle_id: NeedleId, blob: &[u8], size: u32) -> Result<u64> {
        if blob.len() as u64 != u64::from(size) {
            return Err(Error::SizeMismatch {
                expected: u64::from(size),
                actual: blob.len() as u64,
            });
        }

        let _guard = self.write_lock.lock();
        let current = self.content_size()?;
        let offset = padded_offset(current);
        if offset + u64::from(size) > self.max_size {
            return Err(Error::VolumeFull {
                volume_id: self.id,
                size: current,
                limit: self.max_size,
            });
        }

        self.data.write_at(blob, offset)?;
        if self.fsync {
            self.data.sync()?;
        }

        self.needles
            .write()
            .insert(needle_id, NeedleValue::new(offset, size));

        debug!(
            "Wrote needle {} to volume {}: offset={}, size={}",
            needle_id, self.id, offset, size
        );
        Ok(offset)
    }

    /// Force written needles to durable storage
    pub fn sync(&self) -> Result<()> {
        self.data.sync()
    }

    /// Sync and close the data file
    pub fn close(&self) -> Result<()> {
        self.data.close()?;
        info!("Closed volume {} ({})", self.id, self.data.name());
        Ok(())
    }
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("id", &self.id)
            .field("collection", &self.collection)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_volume(dir: &Path, id: u32) -> Volume {
        let config = StorageConfig::with_dir(dir);
        Volume::open(dir, None, VolumeId::new(id), &config).unwrap()
    }

    #[test]
    fn test_data_file_path() {
        let dir = Path::new("/data");
        assert_eq!(
            Volume::data_file_path(dir, None, VolumeId::new(7)),
            PathBuf::from("/data/7.dat")
        );
        assert_eq!(
            Volume::data_file_path(dir, Some("pics"), VolumeId::new(7)),
            PathBuf::from("/data/pics_7.dat")
        );
        assert_eq!(
            Volume::data_file_path(dir, Some(""), VolumeId::new(7)),
            PathBuf::from("/data/7.dat")
        );
    }

    #[test]
    fn test_write_then_read_needle_blob() {
        let dir = tempdir().unwrap();
        let volume = open_volume(dir.path(), 7);

        let offset = volume
            .write_needle_blob(NeedleId::new(1), &[0x01, 0x02, 0x03], 3)
            .unwrap();
        assert_eq!(offset, 0);
        assert_eq!(volume.content_size().unwrap(), 3);
        assert_eq!(volume.read_needle_blob(0, 3).unwrap(), vec![0x01, 0x02, 0x03]);
        assert_eq!(volume.needle(NeedleId::new(1)), Some(NeedleValue::new(0, 3)));
        volume.close().unwrap();
    }

    #[test]
    fn test_next_needle_starts_at_padded_offset() {
        let dir = tempdir().unwrap();
        let volume = open_volume(dir.path(), 1);

        volume.write_needle_blob(NeedleId::new(1), b"abc", 3).unwrap();
        let second = volume.write_needle_blob(NeedleId::new(2), b"defgh", 5).unwrap();
        assert_eq!(second, 8);
        assert_eq!(volume.content_size().unwrap(), 13);
        assert_eq!(volume.read_needle_blob(8, 5).unwrap(), b"defgh");
        assert_eq!(volume.file_count(), 2);
        volume.close().unwrap();
    }

    #[test]
    fn test_size_mismatch_writes_nothing() {
        let dir = tempdir().unwrap();
        let volume = open_volume(dir.path(), 2);

        let err = volume
            .write_needle_blob(NeedleId::new(1), b"abcd", 3)
            .unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { expected: 3, actual: 4 }));
        assert_eq!(volume.content_size().unwrap(), 0);
        assert_eq!(volume.needle(NeedleId::new(1)), None);
        volume.close().unwrap();
    }

    #[test]
    fn test_volume_full() {
        let dir = tempdir().unwrap();
        let mut config = StorageConfig::with_dir(dir.path());
        config.max_volume_size = 16;
        config.fsync = true;
        let volume = Volume::open(dir.path(), Some("small"), VolumeId::new(3), &config).unwrap();

        volume.write_needle_blob(NeedleId::new(1), &[1u8; 10], 10).unwrap();
        let err = volume
            .write_needle_blob(NeedleId::new(2), &[2u8; 10], 10)
            .unwrap_err();
        assert!(matches!(err, Error::VolumeFull { limit: 16, .. }));
        assert_eq!(volume.content_size().unwrap(), 10);
        volume.close().unwrap();
    }

    #[test]
    fn test_volume_full_counts_padding() {
        let dir = tempdir().unwrap();
        let mut config = StorageConfig::with_dir(dir.path());
        config.max_volume_size = 16;
        let volume = Volume::open(dir.path(), None, VolumeId::new(6), &config).unwrap();

        volume.write_needle_blob(NeedleId::new(1), &[1u8; 10], 10).unwrap();
        // 10 + 6 fits, but the needle would start at 16
        let err = volume
            .write_needle_blob(NeedleId::new(2), &[2u8; 6], 6)
            .unwrap_err();
        assert!(matches!(err, Error::VolumeFull { limit: 16, .. }));
        assert_eq!(volume.content_size().unwrap(), 10);
        assert_eq!(volume.needle(NeedleId::new(2)), None);
        volume.close().unwrap();
    }

    #[test]
    fn test_needle_may_end_exactly_at_limit() {
        let dir = tempdir().unwrap();
        let mut config = StorageConfig::with_dir(dir.path());
        config.max_volume_size = 16;
        let volume = Volume::open(dir.path(), None, VolumeId::new(8), &config).unwrap();

        volume.write_needle_blob(NeedleId::new(1), &[1u8; 5], 5).unwrap();
        assert_eq!(volume.write_needle_blob(NeedleId::new(2), &[2u8; 8], 8).unwrap(), 8);
        assert_eq!(volume.content_size().unwrap(), 16);
        volume.close().unwrap();
    }

    #[test]
    fn test_reopen_keeps_data_and_aligns() {
        let dir = tempdir().unwrap();
        {
            let volume = open_volume(dir.path(), 4);
            volume.write_needle_blob(NeedleId::new(1), b"hello", 5).unwrap();
            volume.close().unwrap();
        }

        let volume = open_volume(dir.path(), 4);
        assert_eq!(volume.content_size().unwrap(), 8);
        assert_eq!(volume.read_needle_blob(0, 5).unwrap(), b"hello");
        let offset = volume.write_needle_blob(NeedleId::new(2), b"x", 1).unwrap();
        assert_eq!(offset, 8);
        volume.close().unwrap();
    }

    #[test]
    fn test_concurrent_needle_writes_get_distinct_offsets() {
        let dir = tempdir().unwrap();
        let volume = open_volume(dir.path(), 5);

        std::thread::scope(|s| {
            for t in 0..4u64 {
                let volume = &volume;
                s.spawn(move || {
                    for i in 0..25u64 {
                        let id = NeedleId::new(t * 100 + i);
                        volume.write_needle_blob(id, &[t as u8; 5], 5).unwrap();
                    }
                });
            }
        });

        assert_eq!(volume.file_count(), 100);
        for t in 0..4u64 {
            for i in 0..25u64 {
                let loc = volume.needle(NeedleId::new(t * 100 + i)).unwrap();
                assert_eq!(loc.offset % 8, 0);
                assert_eq!(volume.read_needle_blob(loc.offset, 5).unwrap(), vec![t as u8; 5]);
            }
        }
        volume.close().unwrap();
    }
}
