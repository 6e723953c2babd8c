//! Remote storage client trait and descriptor types

use async_trait::async_trait;
use bytes::Bytes;
use haystack_common::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Connection descriptor for a remote store
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConf {
    /// Backend kind, e.g. `s3` or `memory`
    pub kind: String,
    /// Name of the configured remote
    pub name: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub endpoint: String,
}

impl RemoteConf {
    /// Create a descriptor without credentials
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the access/secret key pair
    #[must_use]
    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = access_key.into();
        self.secret_key = secret_key.into();
        self
    }

    /// Set the region
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set the endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

// Keep the secret out of logs
impl fmt::Debug for RemoteConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConf")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Object address inside a remote store
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteLocation {
    /// Name of the configured remote
    pub name: String,
    pub bucket: String,
    /// Object key
    pub path: String,
}

impl RemoteLocation {
    pub fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            bucket: bucket.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for RemoteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.name, self.bucket, self.path)
    }
}

/// Ranged reads from one remote store
#[async_trait]
pub trait RemoteStorageClient: Send + Sync {
    /// Fetch `size` bytes of the object at `location` starting at `offset`
    ///
    /// Fails with `RemoteFetch` carrying the location on transport or
    /// backend failure.
    async fn read_file(&self, location: &RemoteLocation, offset: i64, size: i64) -> Result<Bytes>;
}

/// Builds clients for one backend kind
pub trait RemoteStorageMaker: Send + Sync {
    /// Backend kind this maker handles
    fn kind(&self) -> &str;

    /// Build a client for `conf`
    ///
    /// Fails with `Authentication` when the credentials are rejected.
    fn make(&self, conf: &RemoteConf) -> Result<Arc<dyn RemoteStorageClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        let loc = RemoteLocation::new("s3", "cold", "obj-2");
        assert_eq!(loc.to_string(), "s3/cold/obj-2");
    }

    #[test]
    fn test_conf_debug_redacts_secret() {
        let conf = RemoteConf::new("s3", "cold")
            .with_credentials("AKID", "hunter2")
            .with_region("eu-west-1")
            .with_endpoint("http://minio:9000");
        assert_eq!(conf.region, "eu-west-1");
        assert_eq!(conf.endpoint, "http://minio:9000");
        let debug = format!("{conf:?}");
        assert!(debug.contains("AKID"));
        assert!(debug.contains("eu-west-1"));
        assert!(!debug.contains("hunter2"));
    }
}
