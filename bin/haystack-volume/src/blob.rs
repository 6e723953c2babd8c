//! Needle blob operations
//!
//! Raw needle reads and writes against local volumes, and hydration of a
//! needle from a remote tier. Local disk I/O runs on the blocking pool; the
//! remote fetch is async and bounded by a deadline.

use haystack_common::{Error, NeedleId, Result, VolumeId};
use haystack_remote::{RemoteConf, RemoteLocation, RemoteStorageRegistry};
use haystack_storage::{Volume, VolumeLookup};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Remote source for one needle hydration
#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub volume_id: VolumeId,
    pub needle_id: NeedleId,
    /// Backend descriptor used to build the client
    pub remote: RemoteConf,
    /// Object holding the needle bytes
    pub location: RemoteLocation,
    /// Range start inside the remote object
    pub offset: i64,
    /// Needle size, also the number of bytes fetched
    pub size: i32,
}

/// Read, write and fetch-and-write of raw needle blobs
pub struct NeedleBlobService<L> {
    lookup: Arc<L>,
    remotes: RemoteStorageRegistry,
    fetch_timeout: Duration,
}

impl<L: VolumeLookup + 'static> NeedleBlobService<L> {
    pub fn new(lookup: Arc<L>, remotes: RemoteStorageRegistry, fetch_timeout: Duration) -> Self {
        Self {
            lookup,
            remotes,
            fetch_timeout,
        }
    }

    fn volume(&self, volume_id: VolumeId) -> Result<Arc<Volume>> {
        self.lookup
            .get_volume(volume_id)
            .ok_or(Error::VolumeNotFound { volume_id })
    }

    /// Read exactly `size` bytes at `offset` from a volume
    pub async fn read_needle_blob(
        &self,
        volume_id: VolumeId,
        offset: i64,
        size: i32,
    ) -> Result<Vec<u8>> {
        debug!(%volume_id, offset, size, "ReadNeedleBlob");
        let volume = self.volume(volume_id)?;

        let result = match (u64::try_from(offset), u32::try_from(size)) {
            (Ok(off), Ok(len)) => {
                run_blocking(move || volume.read_needle_blob(off, len)).await
            }
            _ => Err(Error::invalid_argument(format!(
                "offset and size must not be negative, got offset {offset} size {size}"
            ))),
        };

        result.map_err(|e| {
            warn!(%volume_id, offset, size, error = %e, "ReadNeedleBlob failed");
            Error::Read {
                volume_id,
                offset,
                size,
                source: Box::new(e),
            }
        })
    }

    /// Append `blob` as needle `needle_id`, returning the offset it landed at
    pub async fn write_needle_blob(
        &self,
        volume_id: VolumeId,
        needle_id: NeedleId,
        blob: Vec<u8>,
        size: i32,
    ) -> Result<u64> {
        debug!(%volume_id, %needle_id, size, "WriteNeedleBlob");
        let volume = self.volume(volume_id)?;
        self.write_to_volume(volume, needle_id, blob, size, false)
            .await
    }

    /// Fetch a needle's bytes from a remote tier and write them locally
    ///
    /// The fetch is bounded by the configured fetch timeout, or `deadline`
    /// when that is shorter. The fetched bytes are synced before returning.
    pub async fn fetch_and_write_needle(
        &self,
        req: FetchRequest,
        deadline: Option<Duration>,
    ) -> Result<u64> {
        let FetchRequest {
            volume_id,
            needle_id,
            remote,
            location,
            offset,
            size,
        } = req;
        debug!(
            %volume_id,
            %needle_id,
            offset,
            size,
            remote = %remote.kind,
            %location,
            "FetchAndWriteNeedle"
        );
        let volume = self.volume(volume_id)?;

        if offset < 0 || size < 0 {
            return Err(Error::invalid_argument(format!(
                "offset and size must not be negative, got offset {offset} size {size}"
            )));
        }

        let client = self.remotes.make_client(&remote).inspect_err(|e| {
            warn!(%volume_id, %needle_id, remote = %remote.kind, error = %e, "get remote client failed");
        })?;

        let timeout = deadline.map_or(self.fetch_timeout, |d| d.min(self.fetch_timeout));
        let fetched = match tokio::time::timeout(
            timeout,
            client.read_file(&location, offset, i64::from(size)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::remote_fetch(
                &location,
                format!("timed out after {timeout:?}"),
            )),
        };
        let data = fetched.inspect_err(|e| {
            warn!(%volume_id, %needle_id, %location, offset, size, error = %e, "remote fetch failed");
        })?;

        // No partial hydration
        if data.len() as u64 != u64::from(size.unsigned_abs()) {
            let e = Error::remote_fetch(
                &location,
                format!("expected {size} bytes, got {}", data.len()),
            );
            warn!(%volume_id, %needle_id, %location, error = %e, "remote fetch returned wrong length");
            return Err(e);
        }

        self.write_to_volume(volume, needle_id, data.to_vec(), size, true)
            .await
    }

    async fn write_to_volume(
        &self,
        volume: Arc<Volume>,
        needle_id: NeedleId,
        blob: Vec<u8>,
        size: i32,
        sync: bool,
    ) -> Result<u64> {
        let volume_id = volume.id();
        let result = match u32::try_from(size) {
            Ok(len) => {
                run_blocking(move || {
                    let offset = volume.write_needle_blob(needle_id, &blob, len)?;
                    if sync {
                        volume.sync()?;
                    }
                    Ok(offset)
                })
                .await
            }
            Err(_) => Err(Error::invalid_argument(format!(
                "size must not be negative, got {size}"
            ))),
        };

        result.map_err(|e| {
            warn!(%volume_id, %needle_id, size, error = %e, "WriteNeedleBlob failed");
            Error::Write {
                volume_id,
                needle_id,
                size,
                source: Box::new(e),
            }
        })
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::internal(format!("blocking task failed: {e}")))?
}
