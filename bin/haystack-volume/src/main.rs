//! Haystack volume server
//!
//! This binary serves raw needle reads, writes and remote hydration for the
//! volumes in one data directory.

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use clap::Parser;
use haystack_common::{Config, IoDriverKind, VolumeId};
use haystack_proto::volume::volume_server_server::VolumeServerServer;
use haystack_remote::RemoteStorageRegistry;
use haystack_storage::{Store, VolumeLookup};
use haystack_volume::{NeedleBlobService, VolumeService};
use std::fmt::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "haystack-volume")]
#[command(about = "Haystack volume server")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/haystack/volume.toml")]
    config: PathBuf,

    /// Listen address for gRPC
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Directory holding the volume data files
    #[arg(long)]
    dir: Option<PathBuf>,

    /// I/O driver for volume files (syscall or io_uring)
    #[arg(long, env = "HAYSTACK_IO_DRIVER")]
    io_driver: Option<IoDriverKind>,

    /// Submission queue depth for the io_uring driver
    #[arg(long)]
    queue_depth: Option<u32>,

    /// Volume ids to create if they do not exist yet
    #[arg(long, value_delimiter = ',')]
    volumes: Vec<u32>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Metrics server port (Prometheus)
    #[arg(long)]
    metrics_port: Option<u16>,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config: Config = if args.config.exists() {
        let config_str = std::fs::read_to_string(&args.config)
            .with_context(|| format!("reading {}", args.config.display()))?;
        toml::from_str(&config_str)
            .with_context(|| format!("parsing {}", args.config.display()))?
    } else {
        Config::default()
    };

    // CLI takes precedence over the config file
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(port) = args.metrics_port {
        config.server.metrics_listen.set_port(port);
    }
    if let Some(dir) = &args.dir {
        config.storage.dir.clone_from(dir);
    }
    if let Some(driver) = args.io_driver {
        config.storage.io.driver = driver;
    }
    if let Some(depth) = args.queue_depth {
        config.storage.io.queue_depth = depth;
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    let config = load_config(&args)?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Haystack volume server");
    info!("Config file: {}", args.config.display());
    info!("Data directory: {}", config.storage.dir.display());
    info!(
        "I/O driver: {} (queue depth {}, sync mode {:?})",
        config.storage.io.driver, config.storage.io.queue_depth, config.storage.io.sync_mode
    );

    let store = match Store::open(config.storage.clone()) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    for id in args.volumes.iter().copied().map(VolumeId::new) {
        if store.get_volume(id).is_none() {
            store.add_volume(id, None)?;
            info!("Created volume {}", id);
        }
    }
    info!("Serving {} volumes", store.volume_count());

    let blobs = NeedleBlobService::new(
        Arc::clone(&store),
        RemoteStorageRegistry::with_defaults(),
        config.remote.fetch_timeout(),
    );
    let volume_service = Arc::new(VolumeService::new(blobs));

    // Start metrics server
    let metrics_state = Arc::new(MetricsState {
        service: Arc::clone(&volume_service),
        store: Arc::clone(&store),
        server_id: config.server.listen.to_string(),
        start_time: Instant::now(),
    });
    let metrics_addr = config.server.metrics_listen;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_addr, metrics_state).await {
            error!("Metrics server error: {}", e);
        }
    });

    let addr = config.server.listen;
    info!("Starting gRPC server on {}", addr);
    info!("Metrics available at http://{}/metrics", metrics_addr);

    let max_message_size = config.server.max_message_size;
    let grpc_service = VolumeServerServer::from_arc(volume_service)
        .max_decoding_message_size(max_message_size)
        .max_encoding_message_size(max_message_size);

    Server::builder()
        .add_service(grpc_service)
        .serve_with_shutdown(addr, async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    store.close_all()?;
    info!("Volume server shut down gracefully");

    Ok(())
}

/// Metrics state for the HTTP server
struct MetricsState {
    service: Arc<VolumeService<Store>>,
    store: Arc<Store>,
    server_id: String,
    start_time: Instant,
}

/// Metrics HTTP handler
async fn metrics_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    let mut output = String::with_capacity(8 * 1024);
    let server = &state.server_id;

    let uptime = state.start_time.elapsed().as_secs();
    let _ = writeln!(
        output,
        "# HELP haystack_volume_uptime_seconds Volume server uptime in seconds"
    );
    let _ = writeln!(output, "# TYPE haystack_volume_uptime_seconds counter");
    let _ = writeln!(
        output,
        "haystack_volume_uptime_seconds{{server=\"{server}\"}} {uptime}"
    );

    let _ = writeln!(output, "# HELP haystack_volume_volumes Volumes served");
    let _ = writeln!(output, "# TYPE haystack_volume_volumes gauge");
    let _ = writeln!(
        output,
        "haystack_volume_volumes{{server=\"{server}\"}} {}",
        state.store.volume_count()
    );

    // Per-volume metrics
    let _ = writeln!(
        output,
        "# HELP haystack_volume_content_bytes Volume data file size watermark"
    );
    let _ = writeln!(output, "# TYPE haystack_volume_content_bytes gauge");
    let _ = writeln!(
        output,
        "# HELP haystack_volume_needles Needles written since the volume was loaded"
    );
    let _ = writeln!(output, "# TYPE haystack_volume_needles gauge");
    for id in state.store.volume_ids() {
        let Some(volume) = state.store.get_volume(id) else {
            continue;
        };
        if let Ok(size) = volume.content_size() {
            let _ = writeln!(
                output,
                "haystack_volume_content_bytes{{server=\"{server}\",volume=\"{id}\"}} {size}"
            );
        }
        let _ = writeln!(
            output,
            "haystack_volume_needles{{server=\"{server}\",volume=\"{id}\"}} {}",
            volume.file_count()
        );
    }

    // Export gRPC metrics
    output.push_str(&state.service.grpc_metrics().export_prometheus(server));

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}

/// Health check handler
async fn health_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    let healthy = state.store.volume_ids().into_iter().all(|id| {
        state
            .store
            .get_volume(id)
            .is_some_and(|v| !v.data_file().is_closed())
    });

    if healthy {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "UNHEALTHY")
    }
}

/// Start the metrics HTTP server
async fn start_metrics_server(addr: SocketAddr, state: Arc<MetricsState>) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    info!("Starting metrics server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
