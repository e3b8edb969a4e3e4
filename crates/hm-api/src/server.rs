//! ---
//! hm_section: "05-networking-external-interfaces"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "axum routes over the cluster orchestrator."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use hm_common::version::API_VERSION;
use hm_common::VersionInfo;
use hm_core::{ClusterOrchestrator, ClusterView, Health, RegistryStatus};
use hm_state::HostState;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::ApiError;
use crate::wire::{
    ActionResponse, ClusterList, CreateClusterRequest, CreateClusterResponse, LoadImageRequest,
    VersionResponse,
};

/// Shared API state exposed to handlers.
pub struct ApiState {
    orchestrator: Arc<ClusterOrchestrator>,
    version: VersionInfo,
}

impl ApiState {
    pub fn new(orchestrator: Arc<ClusterOrchestrator>, version: VersionInfo) -> Self {
        Self {
            orchestrator,
            version,
        }
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("version", &self.version)
            .field("base_cluster", &self.orchestrator.base_name())
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    /// Bound address, with the real port when `:0` was requested.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

/// All routes with CORS and request tracing applied.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/host/status", get(get_host_status))
        .route("/version", get(get_version))
        .route("/clusters", get(list_clusters).post(create_cluster))
        .route("/clusters/:name", get(get_cluster).delete(delete_cluster))
        .route("/clusters/:name/kubeconfig", get(get_kubeconfig))
        .route("/clusters/:name/load-image", post(load_image))
        .route("/registry/status", get(registry_status))
        .route("/registry/start", post(start_registry))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve the API until [`ApiServer::shutdown`].
pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let router = router(state);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;
    let addr = tcp_listener
        .local_addr()
        .context("failed to read API listener address")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %addr, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %addr, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn get_health(State(state): State<Arc<ApiState>>) -> ApiResult<Json<Health>> {
    Ok(Json(state.orchestrator.health()?))
}

async fn get_host_status(State(state): State<Arc<ApiState>>) -> ApiResult<Json<HostState>> {
    Ok(Json(state.orchestrator.host_status()?))
}

async fn get_version(State(state): State<Arc<ApiState>>) -> Json<VersionResponse> {
    Json(VersionResponse {
        service_version: state.version.cli_string(),
        api_version: API_VERSION.to_owned(),
    })
}

async fn list_clusters(State(state): State<Arc<ApiState>>) -> ApiResult<Json<ClusterList>> {
    Ok(Json(ClusterList {
        clusters: state.orchestrator.list_clusters()?,
    }))
}

async fn create_cluster(
    State(state): State<Arc<ApiState>>,
    payload: std::result::Result<Json<CreateClusterRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreateClusterResponse>)> {
    let Json(request) = payload?;
    let cluster = state
        .orchestrator
        .create_cluster(&request.name, request.kubevirt)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateClusterResponse {
            success: true,
            cluster,
        }),
    ))
}

async fn get_cluster(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<ClusterView>> {
    Ok(Json(state.orchestrator.get_cluster(&name)?))
}

async fn delete_cluster(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<ActionResponse>> {
    state.orchestrator.delete_cluster(&name).await?;
    Ok(Json(ActionResponse::ok(format!("cluster {name} deleted"))))
}

async fn get_kubeconfig(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let kubeconfig = state.orchestrator.kubeconfig(&name).await?;
    Ok(([(header::CONTENT_TYPE, "application/x-yaml")], kubeconfig))
}

async fn load_image(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
    payload: std::result::Result<Json<LoadImageRequest>, JsonRejection>,
) -> ApiResult<Json<ActionResponse>> {
    let Json(request) = payload?;
    state
        .orchestrator
        .load_image(&name, &request.image)
        .await?;
    Ok(Json(ActionResponse::ok(format!(
        "image {} loaded into {name}",
        request.image
    ))))
}

async fn registry_status(State(state): State<Arc<ApiState>>) -> ApiResult<Json<RegistryStatus>> {
    Ok(Json(state.orchestrator.registry_status().await?))
}

async fn start_registry(State(state): State<Arc<ApiState>>) -> ApiResult<Json<ActionResponse>> {
    state.orchestrator.start_registry().await?;
    Ok(Json(ActionResponse::ok("registry started")))
}
