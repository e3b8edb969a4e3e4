//! ---
//! hm_section: "05-networking-external-interfaces"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Networking API surface of the host manager."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
//! HTTP adapter over [`hm_core::ClusterOrchestrator`] plus the typed client
//! used by `hostctl`.

pub mod client;
pub mod error;
pub mod server;
pub mod wire;

pub use client::{ClientError, ClientResult, HostClient, DEFAULT_SERVER};
pub use error::{status_for, ApiError};
pub use server::{router, spawn_api_server, ApiServer, ApiState};
