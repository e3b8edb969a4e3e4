//! ---
//! hm_section: "05-networking-external-interfaces"
//! hm_subsection: "binary"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Registry subcommands of the control CLI."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use anyhow::Result;
use clap::Subcommand;
use hm_api::HostClient;

#[derive(Debug, Subcommand)]
pub enum RegistryCommand {
    /// Show whether the registry is running and where.
    Status,
    /// Start the registry container if needed.
    Start,
}

pub async fn run(client: &HostClient, command: RegistryCommand) -> Result<()> {
    match command {
        RegistryCommand::Status => {
            let status = client.registry_status().await?;
            let state = if status.running { "running" } else { "stopped" };
            println!("registry {state} at {} (port {})", status.url, status.port);
        }
        RegistryCommand::Start => println!("{}", client.start_registry().await?.message),
    }
    Ok(())
}
