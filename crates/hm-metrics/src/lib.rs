//! ---
//! hm_section: "03-persistence-logging"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Metrics collection and export utilities."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, HistogramOpts, HistogramTimer, HistogramVec, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder, TEXT_FORMAT,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the daemon.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;
    let addr = listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Address the exporter is bound to, with the real port when `:0` was requested.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Outcome label for counted operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// Label value.
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }

    /// Outcome of a result.
    pub fn of<T, E>(result: &std::result::Result<T, E>) -> Self {
        if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// Metrics recorded by the host manager daemon.
#[derive(Clone, Debug)]
pub struct HostMetrics {
    registry: SharedRegistry,
    cluster_operations: IntCounterVec,
    tool_call_seconds: HistogramVec,
    managed_clusters: IntGauge,
    initializations: IntCounterVec,
    build_info: GaugeVec,
}

impl HostMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let cluster_operations = IntCounterVec::new(
            Opts::new(
                "host_manager_cluster_operations_total",
                "Cluster operations handled by the orchestrator, by operation and outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(cluster_operations.clone()))?;

        // kind create routinely takes minutes; the top bucket is ~27 minutes.
        let buckets = prometheus::exponential_buckets(0.05, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let tool_call_seconds = HistogramVec::new(
            HistogramOpts::new(
                "host_manager_tool_call_seconds",
                "Wall time of cluster tool invocations",
            )
            .buckets(buckets),
            &["operation"],
        )?;
        registry.register(Box::new(tool_call_seconds.clone()))?;

        let managed_clusters = IntGauge::with_opts(Opts::new(
            "host_manager_managed_clusters",
            "Clusters currently tracked in host state",
        ))?;
        registry.register(Box::new(managed_clusters.clone()))?;

        let initializations = IntCounterVec::new(
            Opts::new(
                "host_manager_initialization_total",
                "Host initialization runs by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(initializations.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "host_manager_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "git_sha", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            cluster_operations,
            tool_call_seconds,
            managed_clusters,
            initializations,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_operation(&self, operation: &str, outcome: Outcome) {
        self.cluster_operations
            .with_label_values(&[operation, outcome.as_str()])
            .inc();
    }

    /// Timer observing into the tool-call histogram when dropped.
    pub fn tool_timer(&self, operation: &str) -> HistogramTimer {
        self.tool_call_seconds
            .with_label_values(&[operation])
            .start_timer()
    }

    pub fn set_managed_clusters(&self, count: usize) {
        self.managed_clusters.set(count as i64);
    }

    pub fn record_initialization(&self, outcome: &str) {
        self.initializations.with_label_values(&[outcome]).inc();
    }

    pub fn set_build_info(&self, version: &str, git_sha: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, git_sha, profile])
            .set(1.0);
    }
}

pub use prometheus;
