//! Haystack Remote - Remote storage tier
//!
//! This crate defines the contract the volume server uses to pull needle
//! bytes from a cold tier:
//! - [`RemoteStorageClient`]: ranged reads from one remote store
//! - [`RemoteStorageMaker`]: builds clients for one backend kind
//! - [`RemoteStorageRegistry`]: resolves a [`RemoteConf`] to a client
//!
//! The only built-in backend is [`MemoryRemoteStorage`], an in-process
//! object map used for local development and tests.

pub mod client;
pub mod memory;
pub mod registry;

pub use client::{RemoteConf, RemoteLocation, RemoteStorageClient, RemoteStorageMaker};
pub use memory::{MemoryRemoteStorage, MemoryRemoteStorageMaker};
pub use registry::RemoteStorageRegistry;
