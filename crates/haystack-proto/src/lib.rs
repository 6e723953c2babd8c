//! Haystack Protocol - gRPC service definitions
//!
//! This crate contains the protobuf-generated code for the volume server's
//! needle I/O service.

/// Volume service (raw needle reads, writes and remote hydration)
pub mod volume {
    tonic::include_proto!("haystack.volume");
}
