//! ---
//! hm_section: "04-cluster-tooling"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "kind cluster configuration templates and rendering."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
//! Cluster configuration is kept as data. Placeholders use the `{{name}}`
//! form and are substituted verbatim.

use std::path::PathBuf;

/// Cluster whose nodes resolve the shared registry through containerd's
/// `certs.d` directory.
pub const REGISTRY_CLUSTER: &str = r#"kind: Cluster
apiVersion: kind.x-k8s.io/v1alpha4
containerdConfigPatches:
- |-
  [plugins."io.containerd.grpc.v1.cri".registry]
    config_path = "/etc/containerd/certs.d"
kubeadmConfigPatches:
- |
  apiVersion: kubeadm.k8s.io/v1
  kind: ClusterConfiguration
  metadata:
    name: config
  kubernetesVersion: "{{kubernetes_version}}"
nodes:
- role: control-plane
{{port_mappings}}{{extra_mounts}}"#;

/// Single control-plane cluster without registry wiring.
pub const BASIC_CLUSTER: &str = r#"kind: Cluster
apiVersion: kind.x-k8s.io/v1alpha4
kubeadmConfigPatches:
- |
  apiVersion: kubeadm.k8s.io/v1
  kind: ClusterConfiguration
  metadata:
    name: config
  kubernetesVersion: "{{kubernetes_version}}"
nodes:
- role: control-plane
"#;

/// Node port forwarded to the host for SSH access into the base cluster.
pub const SSH_NODE_PORT: u16 = 32222;

const PORT_MAPPINGS: &str = r#"  extraPortMappings:
  - containerPort: {{container_port}}
    hostPort: {{host_port}}
"#;

const EXTRA_MOUNTS: &str = r#"  extraMounts:
  - containerPath: /local
    hostPath: {{host_path}}
"#;

/// containerd `hosts.toml` pointing a registry alias at the registry container.
pub const REGISTRY_HOSTS_TOML: &str = "[host.\"http://{{registry_name}}:{{registry_port}}\"]\n";

/// Substitute every `{{key}}` in `template` with its value.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_owned(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{key}}}}}"), value)
    })
}

/// Inputs for rendering a cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTemplate {
    /// Kubernetes version pinned in the kubeadm patch.
    pub kubernetes_version: String,
    /// Wire the containerd registry mirror directory.
    pub with_registry: bool,
    /// Host port mapped to [`SSH_NODE_PORT`].
    pub ssh_host_port: Option<u16>,
    /// Host directory mounted at `/local` in the node.
    pub host_mount: Option<PathBuf>,
}

impl ClusterTemplate {
    /// Render the kind configuration document.
    pub fn render(&self) -> String {
        if !self.with_registry {
            return render(
                BASIC_CLUSTER,
                &[("kubernetes_version", self.kubernetes_version.as_str())],
            );
        }

        let port_mappings = match self.ssh_host_port {
            Some(port) => render(
                PORT_MAPPINGS,
                &[
                    ("container_port", SSH_NODE_PORT.to_string().as_str()),
                    ("host_port", port.to_string().as_str()),
                ],
            ),
            None => String::new(),
        };
        let extra_mounts = match &self.host_mount {
            Some(path) => render(EXTRA_MOUNTS, &[("host_path", path.display().to_string().as_str())]),
            None => String::new(),
        };

        render(
            REGISTRY_CLUSTER,
            &[
                ("kubernetes_version", self.kubernetes_version.as_str()),
                ("port_mappings", port_mappings.as_str()),
                ("extra_mounts", extra_mounts.as_str()),
            ],
        )
    }
}

/// containerd host configuration for the shared registry.
pub fn registry_hosts_toml(registry_name: &str, registry_port: u16) -> String {
    render(
        REGISTRY_HOSTS_TOML,
        &[
            ("registry_name", registry_name),
            ("registry_port", registry_port.to_string().as_str()),
        ],
    )
}
