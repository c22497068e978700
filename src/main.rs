//! edgecoop
//!
//! Runs an in-process cooperative edge cluster against a synthetic workload
//! and prints per-edge statistics as JSON.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           edgecoop                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Workload   │───▶│   Cluster    │───▶│    Cloud     │       │
//! │  │   clients    │    │  edge 0..N   │    │  (in-memory) │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │                      /metrics, /healthz                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use edgecoop::cluster::{Cluster, ClusterConfig};
use edgecoop::workload::{self, WorkloadConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Cooperative multi-edge key-value cache simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON cluster configuration; flags below override it
    #[arg(long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Number of edges
    #[arg(long, env = "EDGE_COUNT")]
    edge_count: Option<u32>,

    /// Local cache capacity per edge, in bytes
    #[arg(long, env = "CAPACITY_BYTES")]
    capacity_bytes: Option<u64>,

    /// Cache policy (lru, lfu, sieve, cooperative, segment)
    #[arg(long, env = "CACHE_POLICY")]
    cache_policy: Option<String>,

    /// Worker tasks per edge
    #[arg(long, env = "WORKERS_PER_EDGE")]
    workers_per_edge: Option<usize>,

    /// Total requests issued by the workload
    #[arg(long, env = "REQUEST_COUNT", default_value = "10000")]
    request_count: u64,

    /// Number of distinct keys
    #[arg(long, env = "KEYSPACE", default_value = "1000")]
    keyspace: u64,

    /// Size of written values and of unseen cloud objects, in bytes
    #[arg(long, env = "OBJECT_SIZE", default_value = "1024")]
    object_size: u32,

    /// Percentage of writes in the workload
    #[arg(long, env = "WRITE_PERCENT", default_value = "5")]
    write_percent: u8,

    /// Concurrent workload clients
    #[arg(long, env = "CLIENTS", default_value = "8")]
    clients: usize,

    /// Metrics and health server bind address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Keep serving metrics after the workload until interrupted
    #[arg(long, env = "LINGER")]
    linger: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn cluster_config(&self) -> anyhow::Result<ClusterConfig> {
        let mut config = match &self.config {
            Some(path) => ClusterConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ClusterConfig::default(),
        };
        if let Some(edge_count) = self.edge_count {
            config.edgecnt = edge_count;
        }
        if let Some(capacity) = self.capacity_bytes {
            config.edge.capacity_bytes = capacity;
        }
        if let Some(policy) = &self.cache_policy {
            config.edge.policy = policy.clone();
        }
        if let Some(workers) = self.workers_per_edge {
            config.edge.worker_count = workers;
        }
        config.cloud_default_object_size = self.object_size;
        config.validate().context("invalid cluster configuration")?;
        Ok(config)
    }

    fn workload_config(&self) -> WorkloadConfig {
        WorkloadConfig {
            request_count: self.request_count,
            keyspace: self.keyspace,
            object_size: self.object_size,
            write_percent: self.write_percent,
            clients: self.clients,
            ..Default::default()
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let cluster_config = args.cluster_config()?;
    let workload_config = args.workload_config();

    info!("Starting edgecoop");
    info!("  Edges: {}", cluster_config.edgecnt);
    info!("  Policy: {}", cluster_config.edge.policy);
    info!("  Capacity per edge: {} bytes", cluster_config.edge.capacity_bytes);
    info!("  Requests: {}", workload_config.request_count);

    if let Some(addr) = args.metrics_addr.clone() {
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&addr).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let cluster = Cluster::start(cluster_config).context("starting cluster")?;
    let report = workload::run(&cluster, &workload_config)
        .await
        .context("running workload")?;

    let summary = serde_json::json!({
        "workload": report,
        "edges": cluster.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if args.linger && args.metrics_addr.is_some() {
        info!("Workload done; serving metrics until interrupted");
        tokio::signal::ctrl_c()
            .await
            .context("waiting for interrupt")?;
    }

    cluster.shutdown().await.context("edge stopped on a fatal error")?;
    info!("Shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> edgecoop::Result<()> {
    use edgecoop::Error;
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
    }

    async fn handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => match edgecoop::metrics::gather_text() {
                Ok(text) => respond(StatusCode::OK, text),
                Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            },
            "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, "ok"),
            _ => respond(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handler))
                .await
            {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
