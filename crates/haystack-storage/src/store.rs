//! Volume store
//!
//! Holds the volumes served from one data directory and resolves volume ids
//! to open volumes.

use crate::volume::Volume;
use haystack_common::{Error, Result, StorageConfig, VolumeId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Resolves a volume id to the volume that serves it
pub trait VolumeLookup: Send + Sync {
    /// The volume for `id`, or `None` when it is not served here
    fn get_volume(&self, id: VolumeId) -> Option<Arc<Volume>>;
}

/// Volumes served from a single directory
pub struct Store {
    config: StorageConfig,
    volumes: RwLock<HashMap<VolumeId, Arc<Volume>>>,
}

impl Store {
    /// Create an empty store; the directory is created if missing
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.dir)?;
        Ok(Self {
            config,
            volumes: RwLock::new(HashMap::new()),
        })
    }

    /// Create a store and load every `.dat` file already in the directory
    pub fn open(config: StorageConfig) -> Result<Self> {
        let store = Self::new(config)?;
        let loaded = store.load_existing()?;
        info!(
            "Store at {} loaded {} volumes",
            store.config.dir.display(),
            loaded
        );
        Ok(store)
    }

    /// Scan the directory and open volumes that are not loaded yet
    ///
    /// Files whose names do not parse as `<id>.dat` or `<collection>_<id>.dat`
    /// are skipped. Returns how many volumes were opened.
    pub fn load_existing(&self) -> Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(&self.config.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("dat") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some((collection, id)) = VolumeId::from_file_stem(stem) else {
                warn!("Skipping unrecognized data file {}", path.display());
                continue;
            };
            if self.volumes.read().contains_key(&id) {
                continue;
            }

            let volume = Volume::open(&self.config.dir, collection.as_deref(), id, &self.config)?;
            self.volumes.write().insert(id, Arc::new(volume));
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Create (or open) a volume and start serving it
    pub fn add_volume(&self, id: VolumeId, collection: Option<&str>) -> Result<Arc<Volume>> {
        let mut volumes = self.volumes.write();
        if volumes.contains_key(&id) {
            return Err(Error::VolumeAlreadyExists(id));
        }
        let volume = Arc::new(Volume::open(&self.config.dir, collection, id, &self.config)?);
        volumes.insert(id, Arc::clone(&volume));
        Ok(volume)
    }

    /// Close a volume's data file and stop serving it
    ///
    /// If the close fails the volume stays in the store, still open, so the
    /// unload can be retried.
    pub fn unload_volume(&self, id: VolumeId) -> Result<()> {
        let volume = self
            .get_volume(id)
            .ok_or(Error::VolumeNotFound { volume_id: id })?;
        volume.close()?;
        self.forget(id, &volume);
        Ok(())
    }

    /// Drop `volume` from the map unless `id` was re-added meanwhile
    fn forget(&self, id: VolumeId, volume: &Arc<Volume>) {
        let mut volumes = self.volumes.write();
        if volumes.get(&id).is_some_and(|v| Arc::ptr_eq(v, volume)) {
            volumes.remove(&id);
        }
    }

    /// Ids of all served volumes, ascending
    pub fn volume_ids(&self) -> Vec<VolumeId> {
        let mut ids: Vec<_> = self.volumes.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.read().len()
    }

    /// Close every volume; the first error is returned after all were tried
    ///
    /// Volumes that fail to close stay in the store.
    pub fn close_all(&self) -> Result<()> {
        let mut first_err = None;
        for id in self.volume_ids() {
            let Some(volume) = self.get_volume(id) else {
                continue;
            };
            match volume.close() {
                Ok(()) => self.forget(id, &volume),
                Err(e) => {
                    warn!("Failed to close volume {}: {}", id, e);
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl VolumeLookup for Store {
    fn get_volume(&self, id: VolumeId) -> Option<Arc<Volume>> {
        self.volumes.read().get(&id).cloned()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.config.dir)
            .field("volumes", &self.volume_ids())
            .finish()
    }
}
