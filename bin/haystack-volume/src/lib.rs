//! Haystack volume server
//!
//! Needle blob operations and their gRPC surface. The binary in `main.rs`
//! wires these to a [`haystack_storage::Store`] and a remote backend
//! registry.

pub mod blob;
pub mod service;

pub use blob::{FetchRequest, NeedleBlobService};
pub use service::{GrpcMetrics, VolumeService, error_to_status};
