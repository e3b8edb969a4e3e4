//! ---
//! hm_section: "05-networking-external-interfaces"
//! hm_subsection: "binary"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Control CLI for operators talking to a host manager daemon."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use hm_api::{HostClient, DEFAULT_SERVER};
use hm_common::logging::init_cli_tracing;
use hm_common::VersionInfo;

mod clusters;
mod registry;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Host manager control utility",
    long_about = None
)]
struct Cli {
    #[arg(
        long,
        env = "HOST_MANAGER_URL",
        default_value = DEFAULT_SERVER,
        help = "Base URL of the host manager API"
    )]
    server: String,
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Check that the daemon is up")]
    Health,
    #[command(about = "Print the persisted host state")]
    Status,
    #[command(subcommand, about = "Manage kind clusters")]
    Clusters(clusters::ClustersCommand),
    #[command(subcommand, about = "Inspect or start the local image registry")]
    Registry(registry::RegistryCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    init_cli_tracing();
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().extended());
        return Ok(());
    }
    let Some(command) = cli.command else {
        anyhow::bail!("no command given; see `hostctl --help`");
    };

    let client = HostClient::new(cli.server)?;
    match command {
        Commands::Health => {
            let health = client.health().await?;
            println!(
                "{} (initialized: {}, version {})",
                health.status, health.initialized, health.version
            );
        }
        Commands::Status => {
            let state = client.host_status().await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::Clusters(cmd) => clusters::run(&client, cmd).await?,
        Commands::Registry(cmd) => registry::run(&client, cmd).await?,
    }
    Ok(())
}
