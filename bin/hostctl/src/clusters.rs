//! ---
//! hm_section: "05-networking-external-interfaces"
//! hm_subsection: "binary"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Cluster subcommands of the control CLI."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use anyhow::Result;
use clap::{Args, Subcommand};
use hm_api::HostClient;
use hm_core::ClusterView;
use tracing::debug;

/// Cluster lifecycle commands.
#[derive(Debug, Subcommand)]
pub enum ClustersCommand {
    /// List tracked clusters.
    List,
    /// Create a development cluster.
    Create(CreateOptions),
    /// Show one cluster.
    Get(NameArg),
    /// Delete a cluster.
    Delete(NameArg),
    /// Print a cluster's kubeconfig.
    Kubeconfig(NameArg),
    /// Load a local container image into a cluster.
    LoadImage(LoadImageOptions),
}

#[derive(Debug, Args)]
pub struct NameArg {
    /// Cluster name.
    pub name: String,
}

#[derive(Debug, Args)]
pub struct CreateOptions {
    /// Cluster name: lowercase letters, digits and hyphens.
    pub name: String,
    /// Install KubeVirt once the cluster is up.
    #[arg(long)]
    pub kubevirt: bool,
}

#[derive(Debug, Args)]
pub struct LoadImageOptions {
    /// Cluster name.
    pub name: String,
    /// Image reference, for example `localhost:5001/app:dev`.
    pub image: String,
}

pub async fn run(client: &HostClient, command: ClustersCommand) -> Result<()> {
    debug!(server = client.base(), ?command, "clusters command");
    match command {
        ClustersCommand::List => {
            let clusters = client.list_clusters().await?;
            print!("{}", render_table(&clusters));
        }
        ClustersCommand::Create(opts) => {
            let cluster = client.create_cluster(&opts.name, opts.kubevirt).await?;
            println!(
                "Created cluster {} ({}, kubevirt: {})",
                cluster.name, cluster.cluster_type, cluster.kubevirt
            );
        }
        ClustersCommand::Get(arg) => {
            let cluster = client.get_cluster(&arg.name).await?;
            println!("{}", serde_json::to_string_pretty(&cluster)?);
        }
        ClustersCommand::Delete(arg) => {
            println!("{}", client.delete_cluster(&arg.name).await?.message);
        }
        ClustersCommand::Kubeconfig(arg) => {
            print!("{}", client.kubeconfig(&arg.name).await?);
        }
        ClustersCommand::LoadImage(opts) => {
            println!("{}", client.load_image(&opts.name, &opts.image).await?.message);
        }
    }
    Ok(())
}

/// Fixed-width listing, one cluster per line.
fn render_table(clusters: &[ClusterView]) -> String {
    if clusters.is_empty() {
        return "No clusters\n".to_owned();
    }
    let width = clusters
        .iter()
        .map(|c| c.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());
    let mut out = format!(
        "{:<width$}  {:<8}  {:<14}  {:<8}  CREATED\n",
        "NAME", "STATUS", "TYPE", "KUBEVIRT"
    );
    for cluster in clusters {
        let created = cluster
            .created
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_owned());
        out.push_str(&format!(
            "{:<width$}  {:<8}  {:<14}  {:<8}  {created}\n",
            cluster.name,
            cluster.status.as_str(),
            cluster.cluster_type.as_str(),
            if cluster.kubevirt { "yes" } else { "no" },
        ));
    }
    out
}
