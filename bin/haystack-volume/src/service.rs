//! Volume server gRPC service implementation

use crate::blob::{FetchRequest, NeedleBlobService};
use haystack_common::{Error, NeedleId, VolumeId};
use haystack_proto::volume::{
    FetchAndWriteNeedleRequest, FetchAndWriteNeedleResponse, ReadNeedleBlobRequest,
    ReadNeedleBlobResponse, WriteNeedleBlobRequest, WriteNeedleBlobResponse,
    volume_server_server::VolumeServer,
};
use haystack_remote::{RemoteConf, RemoteLocation};
use haystack_storage::VolumeLookup;
use prost::Message;
use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

/// gRPC method metrics
#[derive(Debug, Default)]
pub struct GrpcMethodMetrics {
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_error: AtomicU64,
    pub latency_sum_us: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
}

impl GrpcMethodMetrics {
    pub fn record(&self, success: bool, latency_us: u64, bytes_in: u64, bytes_out: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_error.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes_out, Ordering::Relaxed);
    }
}

/// gRPC metrics collector for the volume server
#[derive(Debug, Default)]
pub struct GrpcMetrics {
    pub read_needle_blob: GrpcMethodMetrics,
    pub write_needle_blob: GrpcMethodMetrics,
    pub fetch_and_write_needle: GrpcMethodMetrics,
}

impl GrpcMetrics {
    fn methods(&self) -> [(&'static str, &GrpcMethodMetrics); 3] {
        [
            ("ReadNeedleBlob", &self.read_needle_blob),
            ("WriteNeedleBlob", &self.write_needle_blob),
            ("FetchAndWriteNeedle", &self.fetch_and_write_needle),
        ]
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self, server: &str) -> String {
        let mut output = String::with_capacity(2 * 1024);
        let methods = self.methods();

        // Requests total by method and status
        let _ = writeln!(
            output,
            "# HELP haystack_volume_grpc_requests_total Total gRPC requests by method and status"
        );
        let _ = writeln!(output, "# TYPE haystack_volume_grpc_requests_total counter");
        for (method, metrics) in &methods {
            for (status, counter) in [
                ("success", &metrics.requests_success),
                ("error", &metrics.requests_error),
            ] {
                let _ = writeln!(
                    output,
                    "haystack_volume_grpc_requests_total{{server=\"{server}\",method=\"{method}\",status=\"{status}\"}} {}",
                    counter.load(Ordering::Relaxed)
                );
            }
        }

        // Latency sum (for calculating average)
        let _ = writeln!(
            output,
            "# HELP haystack_volume_grpc_latency_seconds_sum Sum of gRPC request latencies"
        );
        let _ = writeln!(output, "# TYPE haystack_volume_grpc_latency_seconds_sum counter");
        for (method, metrics) in &methods {
            let sum_us = metrics.latency_sum_us.load(Ordering::Relaxed);
            let _ = writeln!(
                output,
                "haystack_volume_grpc_latency_seconds_sum{{server=\"{server}\",method=\"{method}\"}} {}",
                sum_us as f64 / 1_000_000.0
            );
        }

        // Bytes sent/received
        for (name, help, sent) in [
            (
                "haystack_volume_grpc_bytes_received_total",
                "Total bytes received via gRPC",
                false,
            ),
            (
                "haystack_volume_grpc_bytes_sent_total",
                "Total bytes sent via gRPC",
                true,
            ),
        ] {
            let _ = writeln!(output, "# HELP {name} {help}");
            let _ = writeln!(output, "# TYPE {name} counter");
            for (method, metrics) in &methods {
                let counter = if sent {
                    &metrics.bytes_sent
                } else {
                    &metrics.bytes_received
                };
                let bytes = counter.load(Ordering::Relaxed);
                if bytes > 0 {
                    let _ = writeln!(
                        output,
                        "{name}{{server=\"{server}\",method=\"{method}\"}} {bytes}"
                    );
                }
            }
        }

        output
    }
}

/// Map a service error to a gRPC status
///
/// The code follows the innermost error; the message keeps the full
/// context chain.
pub fn error_to_status(err: &Error) -> Status {
    let msg = err.to_string();
    match err.root_cause() {
        Error::VolumeNotFound { .. } => Status::not_found(msg),
        Error::InvalidArgument(_) | Error::SizeMismatch { .. } => Status::invalid_argument(msg),
        Error::UnsupportedBackend(_) | Error::UnsupportedDriver(_) => Status::unimplemented(msg),
        Error::Authentication(_) => Status::unauthenticated(msg),
        Error::RemoteFetch { .. } => Status::unavailable(msg),
        Error::VolumeFull { .. } => Status::resource_exhausted(msg),
        Error::InvalidState(_) => Status::failed_precondition(msg),
        _ => Status::internal(msg),
    }
}

/// Parse the `grpc-timeout` request header
///
/// The value is at most 8 digits followed by a unit: `H`, `M`, `S`, `m`
/// (millis), `u` (micros) or `n` (nanos).
pub fn grpc_timeout(metadata: &MetadataMap) -> Option<Duration> {
    let value = metadata.get("grpc-timeout")?.to_str().ok()?;
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    match unit {
        "H" => Some(Duration::from_secs(amount * 3600)),
        "M" => Some(Duration::from_secs(amount * 60)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

fn elapsed_us(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}

/// Volume server gRPC service state
pub struct VolumeService<L> {
    blobs: NeedleBlobService<L>,
    grpc_metrics: Arc<GrpcMetrics>,
}

impl<L: VolumeLookup + 'static> VolumeService<L> {
    pub fn new(blobs: NeedleBlobService<L>) -> Self {
        Self {
            blobs,
            grpc_metrics: Arc::new(GrpcMetrics::default()),
        }
    }

    /// Get gRPC metrics for export
    pub fn grpc_metrics(&self) -> &Arc<GrpcMetrics> {
        &self.grpc_metrics
    }
}

#[tonic::async_trait]
impl<L: VolumeLookup + 'static> VolumeServer for VolumeService<L> {
    async fn read_needle_blob(
        &self,
        request: Request<ReadNeedleBlobRequest>,
    ) -> Result<Response<ReadNeedleBlobResponse>, Status> {
        let start = Instant::now();
        let req = request.into_inner();
        let bytes_in = req.encoded_len() as u64;

        let result = self
            .blobs
            .read_needle_blob(VolumeId::new(req.volume_id), req.offset, req.size)
            .await;

        match result {
            Ok(needle_blob) => {
                let bytes_out = needle_blob.len() as u64;
                self.grpc_metrics
                    .read_needle_blob
                    .record(true, elapsed_us(start), bytes_in, bytes_out);
                Ok(Response::new(ReadNeedleBlobResponse { needle_blob }))
            }
            Err(e) => {
                self.grpc_metrics
                    .read_needle_blob
                    .record(false, elapsed_us(start), bytes_in, 0);
                Err(error_to_status(&e))
            }
        }
    }

    async fn write_needle_blob(
        &self,
        request: Request<WriteNeedleBlobRequest>,
    ) -> Result<Response<WriteNeedleBlobResponse>, Status> {
        let start = Instant::now();
        let req = request.into_inner();
        let bytes_in = req.needle_blob.len() as u64;

        let result = self
            .blobs
            .write_needle_blob(
                VolumeId::new(req.volume_id),
                NeedleId::new(req.needle_id),
                req.needle_blob,
                req.size,
            )
            .await;

        match result {
            Ok(offset) => {
                let resp = WriteNeedleBlobResponse {
                    offset: i64::try_from(offset).unwrap_or(i64::MAX),
                };
                self.grpc_metrics.write_needle_blob.record(
                    true,
                    elapsed_us(start),
                    bytes_in,
                    resp.encoded_len() as u64,
                );
                Ok(Response::new(resp))
            }
            Err(e) => {
                self.grpc_metrics
                    .write_needle_blob
                    .record(false, elapsed_us(start), bytes_in, 0);
                Err(error_to_status(&e))
            }
        }
    }

    async fn fetch_and_write_needle(
        &self,
        request: Request<FetchAndWriteNeedleRequest>,
    ) -> Result<Response<FetchAndWriteNeedleResponse>, Status> {
        let start = Instant::now();
        let deadline = grpc_timeout(request.metadata());
        let req = request.into_inner();
        let bytes_in = req.encoded_len() as u64;

        let fetch = FetchRequest {
            volume_id: VolumeId::new(req.volume_id),
            needle_id: NeedleId::new(req.needle_id),
            remote: RemoteConf::new(req.remote_type, req.remote_name.clone())
                .with_credentials(req.s3_access_key, req.s3_secret_key)
                .with_region(req.s3_region)
                .with_endpoint(req.s3_endpoint),
            location: RemoteLocation::new(req.remote_name, req.remote_bucket, req.remote_key),
            offset: req.offset,
            size: req.size,
        };

        match self.blobs.fetch_and_write_needle(fetch, deadline).await {
            Ok(offset) => {
                let resp = FetchAndWriteNeedleResponse {
                    offset: i64::try_from(offset).unwrap_or(i64::MAX),
                };
                self.grpc_metrics.fetch_and_write_needle.record(
                    true,
                    elapsed_us(start),
                    bytes_in,
                    resp.encoded_len() as u64,
                );
                Ok(Response::new(resp))
            }
            Err(e) => {
                self.grpc_metrics
                    .fetch_and_write_needle
                    .record(false, elapsed_us(start), bytes_in, 0);
                Err(error_to_status(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haystack_common::StorageConfig;
    use haystack_remote::{MemoryRemoteStorage, MemoryRemoteStorageMaker, RemoteStorageRegistry};
    use haystack_storage::Store;
    use tempfile::{TempDir, tempdir};
    use tonic::Code;

    fn service() -> (TempDir, MemoryRemoteStorage, VolumeService<Store>) {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::new(StorageConfig::with_dir(dir.path())).unwrap());
        store.add_volume(VolumeId::new(7), None).unwrap();

        let cold = MemoryRemoteStorage::new();
        let mut remotes = RemoteStorageRegistry::new();
        remotes.register(MemoryRemoteStorageMaker::new(cold.clone()));

        let blobs = NeedleBlobService::new(store, remotes, Duration::from_secs(60));
        (dir, cold, VolumeService::new(blobs))
    }

    #[test]
    fn test_error_to_status() {
        let cases = [
            (
                Error::VolumeNotFound {
                    volume_id: VolumeId::new(1),
                },
                Code::NotFound,
            ),
            (Error::invalid_argument("neg"), Code::InvalidArgument),
            (
                Error::SizeMismatch {
                    expected: 3,
                    actual: 4,
                },
                Code::InvalidArgument,
            ),
            (Error::UnsupportedBackend("tape".into()), Code::Unimplemented),
            (Error::Authentication("bad key".into()), Code::Unauthenticated),
            (Error::remote_fetch("a/b/c", "reset"), Code::Unavailable),
            (
                Error::VolumeFull {
                    volume_id: VolumeId::new(1),
                    size: 10,
                    limit: 10,
                },
                Code::ResourceExhausted,
            ),
            (Error::invalid_state("closed"), Code::FailedPrecondition),
            (Error::internal("boom"), Code::Internal),
        ];
        for (err, code) in cases {
            assert_eq!(error_to_status(&err).code(), code, "{err}");
        }
    }

    #[test]
    fn test_wrapped_error_maps_by_root_cause() {
        let err = Error::Write {
            volume_id: VolumeId::new(7),
            needle_id: NeedleId::new(2),
            size: 100,
            source: Box::new(Error::invalid_state("closed")),
        };
        let status = error_to_status(&err);
        assert_eq!(status.code(), Code::FailedPrecondition);
        assert!(status.message().contains("write blob needle 2 size 100"));
    }

    #[test]
    fn test_grpc_timeout_parse() {
        let mut md = MetadataMap::new();
        assert_eq!(grpc_timeout(&md), None);

        md.insert("grpc-timeout", "250m".parse().unwrap());
        assert_eq!(grpc_timeout(&md), Some(Duration::from_millis(250)));
        md.insert("grpc-timeout", "2S".parse().unwrap());
        assert_eq!(grpc_timeout(&md), Some(Duration::from_secs(2)));
        md.insert("grpc-timeout", "1H".parse().unwrap());
        assert_eq!(grpc_timeout(&md), Some(Duration::from_secs(3600)));
        md.insert("grpc-timeout", "10x".parse().unwrap());
        assert_eq!(grpc_timeout(&md), None);
        md.insert("grpc-timeout", "123456789S".parse().unwrap());
        assert_eq!(grpc_timeout(&md), None);
    }

    #[tokio::test]
    async fn test_write_then_read_over_rpc() {
        let (_dir, _cold, svc) = service();

        let resp = svc
            .write_needle_blob(Request::new(WriteNeedleBlobRequest {
                volume_id: 7,
                needle_id: 1,
                size: 3,
                needle_blob: vec![1, 2, 3],
            }))
            .await
            .unwrap();
        assert_eq!(resp.into_inner().offset, 0);

        let resp = svc
            .read_needle_blob(Request::new(ReadNeedleBlobRequest {
                volume_id: 7,
                offset: 0,
                size: 3,
            }))
            .await
            .unwrap();
        assert_eq!(resp.into_inner().needle_blob, vec![1, 2, 3]);

        let metrics = svc.grpc_metrics();
        assert_eq!(metrics.write_needle_blob.requests_success.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.read_needle_blob.bytes_sent.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_missing_volume_over_rpc() {
        let (_dir, _cold, svc) = service();
        let status = svc
            .read_needle_blob(Request::new(ReadNeedleBlobRequest {
                volume_id: 99,
                offset: 0,
                size: 3,
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(
            svc.grpc_metrics()
                .read_needle_blob
                .requests_error
                .load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_fetch_and_write_over_rpc() {
        let (_dir, cold, svc) = service();
        cold.put("cold", "obj-2", vec![5u8; 100]);

        let request = |remote_type: &str| FetchAndWriteNeedleRequest {
            volume_id: 7,
            needle_id: 2,
            offset: 0,
            size: 100,
            remote_type: remote_type.to_string(),
            remote_name: "dev".to_string(),
            remote_bucket: "cold".to_string(),
            remote_key: "obj-2".to_string(),
            ..Default::default()
        };

        let status = svc
            .fetch_and_write_needle(Request::new(request("s3")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unimplemented);

        let mut req = Request::new(request("memory"));
        req.metadata_mut()
            .insert("grpc-timeout", "5S".parse().unwrap());
        let resp = svc.fetch_and_write_needle(req).await.unwrap();
        assert_eq!(resp.into_inner().offset, 0);

        let resp = svc
            .read_needle_blob(Request::new(ReadNeedleBlobRequest {
                volume_id: 7,
                offset: 0,
                size: 100,
            }))
            .await
            .unwrap();
        assert_eq!(resp.into_inner().needle_blob, vec![5u8; 100]);
    }

    #[test]
    fn test_export_prometheus() {
        let metrics = GrpcMetrics::default();
        metrics.read_needle_blob.record(true, 1500, 10, 4096);
        metrics.write_needle_blob.record(false, 20, 64, 0);

        let out = metrics.export_prometheus("vs1");
        assert!(out.contains(
            "haystack_volume_grpc_requests_total{server=\"vs1\",method=\"ReadNeedleBlob\",status=\"success\"} 1"
        ));
        assert!(out.contains(
            "haystack_volume_grpc_requests_total{server=\"vs1\",method=\"WriteNeedleBlob\",status=\"error\"} 1"
        ));
        assert!(out.contains(
            "haystack_volume_grpc_bytes_sent_total{server=\"vs1\",method=\"ReadNeedleBlob\"} 4096"
        ));
        assert!(!out.contains("haystack_volume_grpc_bytes_sent_total{server=\"vs1\",method=\"WriteNeedleBlob\"}"));
    }
}
