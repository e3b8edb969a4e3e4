//! ---
//! hm_section: "01-core-functionality"
//! hm_subsection: "binary"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Binary entrypoint for the host manager daemon."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use hm_api::{spawn_api_server, ApiServer, ApiState};
use hm_common::{init_tracing, AppConfig, LoadedAppConfig, VersionInfo};
use hm_core::ClusterOrchestrator;
use hm_host::{
    DnfPackageInstaller, Ec2StorageDetector, HostInitializer, InitOutcome,
    SystemStorageConfigurator,
};
use hm_kind::{ClusterTool, KindCli};
use hm_metrics::{new_registry, spawn_http_server, HostMetrics, MetricsServer};
use hm_state::StateStore;
use tracing::{error, info, warn};

mod daemon;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Bootstraps this VM into a local Kubernetes host and serves the cluster API",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "HTTP API port, overriding api.listen")]
    port: Option<u16>,

    #[arg(long, value_name = "FILE", help = "State file, overriding state.path")]
    state_file: Option<PathBuf>,

    #[arg(long, help = "Run in the foreground instead of detaching")]
    foreground: bool,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,
}

fn load_config(cli: &Cli) -> Result<LoadedAppConfig> {
    let candidates = match &cli.config {
        Some(path) if !path.exists() => {
            bail!("configuration file {} does not exist", path.display())
        }
        Some(path) => vec![path.clone()],
        None => AppConfig::default_candidates(),
    };
    let mut loaded = AppConfig::load_with_source(&candidates)?;
    if let Some(port) = cli.port {
        loaded.config.api.listen.set_port(port);
    }
    if let Some(path) = &cli.state_file {
        loaded.config.state.path = path.clone();
    }
    loaded.config.validate()?;
    Ok(loaded)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }

    if daemon::running_in_container() {
        bail!("the host manager cannot run inside a container");
    }
    if !daemon::running_as_root() {
        bail!("the host manager must run as root");
    }

    let LoadedAppConfig { config, source } = load_config(&cli)?;

    if !cli.foreground {
        let pid = daemon::daemonize()?;
        println!("Host manager daemon started with PID {pid}");
        return Ok(());
    }

    init_tracing("hostd", &config.logging)?;
    match &source {
        Some(path) => info!(config = %path.display(), version = %version.semver, "configuration loaded"),
        None => info!(version = %version.semver, "no configuration file found; using defaults"),
    }

    run_daemon(config, version).await
}

async fn run_daemon(config: AppConfig, version: VersionInfo) -> Result<()> {
    let registry = new_registry();
    let metrics = HostMetrics::new(registry.clone())?;
    metrics.set_build_info(&version.semver, &version.git_sha, &version.profile);

    let store = Arc::new(StateStore::open(&config.state.path));
    let tool: Arc<dyn ClusterTool> = Arc::new(KindCli::new(
        config.cluster.clone(),
        config.registry.clone(),
    ));

    let initializer = HostInitializer::new(
        Arc::clone(&store),
        Arc::clone(&tool),
        Arc::new(Ec2StorageDetector::new(&config.host)?),
        Arc::new(DnfPackageInstaller::new(&config.host)?),
        Arc::new(SystemStorageConfigurator::new(&config.host, &config.cluster)),
        config.cluster.base_name.clone(),
    );
    match initializer.run().await {
        Ok(InitOutcome::AlreadyInitialized) => metrics.record_initialization("skipped"),
        Ok(InitOutcome::Initialized {
            instance_type,
            storage,
        }) => {
            metrics.record_initialization("success");
            info!(%instance_type, storage_type = %storage.storage_type, "host initialization complete");
        }
        Err(err) => {
            metrics.record_initialization("failure");
            error!(phase = %err.phase, error = %err, "host initialization failed; the next start retries from the beginning");
            return Err(err).context("host setup failed");
        }
    }

    let metrics_server: Option<MetricsServer> = if config.metrics.enabled {
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let orchestrator = Arc::new(
        ClusterOrchestrator::new(store, tool, &config.cluster, &config.registry)
            .with_metrics(metrics),
    );

    let api_server: Option<ApiServer> = if config.api.enabled {
        let state = Arc::new(ApiState::new(orchestrator, version));
        let server = spawn_api_server(state, config.api.listen)?;
        info!(address = %server.addr(), "api server listening");
        Some(server)
    } else {
        warn!("api server disabled by configuration; nothing left to serve");
        None
    };

    wait_for_shutdown().await?;

    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    info!("host manager stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("ctrl-c received; shutting down");
        }
        _ = terminate.recv() => info!("SIGTERM received; shutting down"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("ctrl-c received; shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.toml");
        std::fs::write(&config, "[api]\nlisten = \"127.0.0.1:8080\"\n").unwrap();

        let cli = Cli::parse_from([
            "hostd",
            "--config",
            config.to_str().unwrap(),
            "--port",
            "9090",
            "--state-file",
            "/tmp/hm-state.json",
            "--foreground",
        ]);
        let loaded = load_config(&cli).unwrap();
        assert_eq!(loaded.source.as_deref(), Some(config.as_path()));
        assert_eq!(loaded.config.api.listen.to_string(), "127.0.0.1:9090");
        assert_eq!(loaded.config.state.path, PathBuf::from("/tmp/hm-state.json"));
        assert!(cli.foreground);
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let cli = Cli::parse_from(["hostd", "--config", "/nonexistent/host-manager.toml"]);
        assert!(load_config(&cli).is_err());
    }
}
