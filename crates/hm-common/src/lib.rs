//! ---
//! hm_section: "01-core-functionality"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Shared primitives and utilities for the host manager."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
//! Shared primitives for the host-manager workspace.
//! This crate exposes configuration loading, tracing initialisation, and
//! version metadata consumed by the daemon, the API, and the CLI.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{
    ApiConfig, AppConfig, ClusterConfig, HostConfig, LoadedAppConfig, LoggingConfig,
    MetricsConfig, RegistryConfig, StateConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use version::VersionInfo;
