//! In-process remote store
//!
//! Objects live in a shared map keyed by `(bucket, path)`; every client made
//! from the same [`MemoryRemoteStorageMaker`] sees the same objects.

use crate::client::{RemoteConf, RemoteLocation, RemoteStorageClient, RemoteStorageMaker};
use async_trait::async_trait;
use bytes::Bytes;
use haystack_common::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Backend kind served by [`MemoryRemoteStorageMaker`]
pub const MEMORY_KIND: &str = "memory";

/// Shared in-memory object map
#[derive(Clone, Debug, Default)]
pub struct MemoryRemoteStorage {
    objects: Arc<RwLock<HashMap<(String, String), Bytes>>>,
}

impl MemoryRemoteStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object, replacing any previous one
    pub fn put(&self, bucket: impl Into<String>, path: impl Into<String>, data: impl Into<Bytes>) {
        self.objects
            .write()
            .insert((bucket.into(), path.into()), data.into());
    }

    /// Remove an object, returning whether it existed
    pub fn remove(&self, bucket: &str, path: &str) -> bool {
        self.objects
            .write()
            .remove(&(bucket.to_string(), path.to_string()))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl RemoteStorageClient for MemoryRemoteStorage {
    async fn read_file(&self, location: &RemoteLocation, offset: i64, size: i64) -> Result<Bytes> {
        let object = self
            .objects
            .read()
            .get(&(location.bucket.clone(), location.path.clone()))
            .cloned()
            .ok_or_else(|| Error::remote_fetch(location, "object not found"))?;

        let (Ok(start), Ok(len)) = (usize::try_from(offset), usize::try_from(size)) else {
            return Err(Error::remote_fetch(
                location,
                format!("invalid range offset {offset} size {size}"),
            ));
        };
        let end = start.saturating_add(len);
        if end > object.len() {
            return Err(Error::remote_fetch(
                location,
                format!(
                    "range {start}..{end} beyond object length {}",
                    object.len()
                ),
            ));
        }
        Ok(object.slice(start..end))
    }
}

/// Maker for the `memory` backend
///
/// When credentials are required, a [`RemoteConf`] must present exactly the
/// configured access/secret key pair.
#[derive(Clone, Debug, Default)]
pub struct MemoryRemoteStorageMaker {
    storage: MemoryRemoteStorage,
    credentials: Option<(String, String)>,
}

impl MemoryRemoteStorageMaker {
    pub fn new(storage: MemoryRemoteStorage) -> Self {
        Self {
            storage,
            credentials: None,
        }
    }

    /// Require an access/secret key pair from every client
    #[must_use]
    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.credentials = Some((access_key.into(), secret_key.into()));
        self
    }

    /// The object map clients read from
    pub fn storage(&self) -> &MemoryRemoteStorage {
        &self.storage
    }
}

impl RemoteStorageMaker for MemoryRemoteStorageMaker {
    fn kind(&self) -> &str {
        MEMORY_KIND
    }

    fn make(&self, conf: &RemoteConf) -> Result<Arc<dyn RemoteStorageClient>> {
        if let Some((access_key, secret_key)) = &self.credentials {
            if conf.access_key != *access_key || conf.secret_key != *secret_key {
                return Err(Error::Authentication(format!(
                    "remote {} rejected access key {:?}",
                    conf.name, conf.access_key
                )));
            }
        }
        Ok(Arc::new(self.storage.clone()))
    }
}
