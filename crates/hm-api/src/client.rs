//! ---
//! hm_section: "05-networking-external-interfaces"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Typed HTTP client for the host manager API."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::time::Duration;

use hm_core::{ClusterView, ErrorKind, Health, RegistryStatus};
use hm_state::HostState;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::wire::{
    ActionResponse, ClusterList, CreateClusterRequest, CreateClusterResponse, ErrorBody,
    LoadImageRequest, VersionResponse,
};

/// Default server address used by the CLI.
pub const DEFAULT_SERVER: &str = "http://localhost:8080";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to host manager failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a structured error body.
    #[error("{kind}: {message} (HTTP {status})")]
    Api {
        status: u16,
        kind: ErrorKind,
        message: String,
    },
    /// The server answered with an error that is not an API error body.
    #[error("unexpected HTTP {status}: {body}")]
    Unexpected { status: u16, body: String },
}

impl ClientError {
    /// API error kind, when the server reported one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Api { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Client for a running host manager daemon.
#[derive(Debug, Clone)]
pub struct HostClient {
    base: String,
    http: reqwest::Client,
}

impl HostClient {
    /// Client for `base` (for example `http://localhost:8080`).
    pub fn new(base: impl Into<String>) -> ClientResult<Self> {
        // Cluster creation takes minutes; no overall request deadline.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_owned(),
            http,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn health(&self) -> ClientResult<Health> {
        self.json(self.request(Method::GET, "/health")).await
    }

    pub async fn host_status(&self) -> ClientResult<HostState> {
        self.json(self.request(Method::GET, "/host/status")).await
    }

    pub async fn version(&self) -> ClientResult<VersionResponse> {
        self.json(self.request(Method::GET, "/version")).await
    }

    pub async fn list_clusters(&self) -> ClientResult<Vec<ClusterView>> {
        let list: ClusterList = self.json(self.request(Method::GET, "/clusters")).await?;
        Ok(list.clusters)
    }

    pub async fn create_cluster(&self, name: &str, kubevirt: bool) -> ClientResult<ClusterView> {
        let request = CreateClusterRequest {
            name: name.to_owned(),
            kubevirt,
        };
        let created: CreateClusterResponse = self
            .json(self.request(Method::POST, "/clusters").json(&request))
            .await?;
        Ok(created.cluster)
    }

    pub async fn get_cluster(&self, name: &str) -> ClientResult<ClusterView> {
        self.json(self.request(Method::GET, &format!("/clusters/{name}")))
            .await
    }

    pub async fn delete_cluster(&self, name: &str) -> ClientResult<ActionResponse> {
        self.json(self.request(Method::DELETE, &format!("/clusters/{name}")))
            .await
    }

    pub async fn kubeconfig(&self, name: &str) -> ClientResult<String> {
        let response = self
            .request(Method::GET, &format!("/clusters/{name}/kubeconfig"))
            .send()
            .await?;
        Ok(checked(response).await?.text().await?)
    }

    pub async fn load_image(&self, name: &str, image: &str) -> ClientResult<ActionResponse> {
        let request = LoadImageRequest {
            image: image.to_owned(),
        };
        self.json(
            self.request(Method::POST, &format!("/clusters/{name}/load-image"))
                .json(&request),
        )
        .await
    }

    pub async fn registry_status(&self) -> ClientResult<RegistryStatus> {
        self.json(self.request(Method::GET, "/registry/status")).await
    }

    pub async fn start_registry(&self) -> ClientResult<ActionResponse> {
        self.json(self.request(Method::POST, "/registry/start")).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base);
        debug!(%method, %url, "host manager request");
        self.http.request(method, url)
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = checked(request.send().await?).await?;
        Ok(response.json().await?)
    }
}

async fn checked(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await?;
    Err(match serde_json::from_str::<ErrorBody>(&body) {
        Ok(error) => ClientError::Api {
            status: status.as_u16(),
            kind: error.kind,
            message: error.message,
        },
        Err(_) => ClientError::Unexpected {
            status: status.as_u16(),
            body,
        },
    })
}
