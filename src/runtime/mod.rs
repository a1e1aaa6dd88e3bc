//! Container runtime collaborator.
//!
//! [`ContainerRuntime`] is the narrow set of Docker-compatible API calls the
//! orchestrator, host resolver and readiness checks rely on. It speaks in
//! crate-owned types so the rest of the crate never touches transport
//! models directly. [`DockerRuntime`] implements it with bollard.

pub mod docker;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::auth::RegistryCredentials;
use crate::error::RuntimeError;

pub use docker::DockerRuntime;

/// The runtime's create-request shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateRequest {
    /// Container name, if one was requested.
    pub name: Option<String>,
    /// Image reference
    pub image: String,
    /// Command override
    pub cmd: Option<Vec<String>>,
    /// Entrypoint override
    pub entrypoint: Option<Vec<String>>,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    /// Container labels
    pub labels: HashMap<String, String>,
    /// Keys of the form `port/protocol`.
    pub exposed_ports: Vec<String>,
    /// Container-level health check
    pub healthcheck: Option<HealthCheck>,
    /// Working directory inside the container
    pub working_dir: Option<String>,
    /// User the process runs as
    pub user: Option<String>,
    /// Omitted entirely when every host-level field is default.
    pub host_config: Option<HostSettings>,
}

/// Host-level container settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostSettings {
    /// `port/protocol` to host bindings.
    pub port_bindings: HashMap<String, Vec<HostBinding>>,
    /// Run in privileged mode
    pub privileged: bool,
    /// Bind mounts
    pub mounts: Vec<BindMount>,
    /// Network mode (`bridge`, `host`, or a network name)
    pub network_mode: Option<String>,
}

/// A host address a container port is published on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBinding {
    /// Host interface; empty or a wildcard means every interface
    pub host_ip: String,
    /// Host port, as the runtime reports it
    pub host_port: String,
}

/// A bind mount from the host into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Host path
    pub source: String,
    /// Path inside the container
    pub target: String,
    /// Mount read-only
    pub read_only: bool,
}

/// Container health-check definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// Test command, e.g. `["CMD-SHELL", "pg_isready"]`.
    pub test: Vec<String>,
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub start_period: Option<Duration>,
}

impl HealthCheck {
    /// A `CMD-SHELL` health check.
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            test: vec!["CMD-SHELL".to_string(), command.into()],
            interval: None,
            timeout: None,
            retries: None,
            start_period: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_start_period(mut self, start_period: Duration) -> Self {
        self.start_period = Some(start_period);
        self
    }
}

/// Per-network attachment details from an inspect call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkEndpoint {
    pub network_id: String,
    pub ip_address: String,
    pub gateway: String,
}

/// Inspect data for one container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSnapshot {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub running: bool,
    /// Runtime status string (`created`, `running`, `exited`, ...).
    pub status: String,
    pub exit_code: Option<i64>,
    /// Health status (`starting`, `healthy`, `unhealthy`), if a health check is defined.
    pub health: Option<String>,
    pub entrypoint: Option<Vec<String>>,
    pub has_healthcheck: bool,
    pub privileged: bool,
    /// `port/protocol` to the host addresses it is published on.
    pub ports: HashMap<String, Vec<HostBinding>>,
    pub networks: HashMap<String, NetworkEndpoint>,
}

/// Result of running a command inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exec_id: String,
    /// Interleaved stdout and stderr.
    pub output: Vec<u8>,
    pub exit_code: Option<i64>,
}

/// Options for extracting a tar stream into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveUpload {
    /// Extraction root inside the container.
    pub path: String,
    pub no_overwrite_dir_non_dir: bool,
    pub copy_uid_gid: bool,
}

impl Default for ArchiveUpload {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            no_overwrite_dir_non_dir: false,
            copy_uid_gid: false,
        }
    }
}

/// Docker-compatible runtime operations.
///
/// Implementations must be safe to share between concurrent orchestrations.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates a container, returning its id.
    ///
    /// Fails with `RuntimeError::ImageNotFound` when the image is absent locally.
    async fn create_container(&self, request: &CreateRequest) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn restart_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerSnapshot, RuntimeError>;

    /// Creates and starts an exec instance, collecting its combined output.
    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput, RuntimeError>;

    /// Returns the container's log stream collected so far.
    async fn logs(&self, id: &str) -> Result<Vec<u8>, RuntimeError>;

    /// Returns the gateway of each IPAM config entry of a network.
    async fn network_gateways(&self, network: &str) -> Result<Vec<Option<String>>, RuntimeError>;

    /// Pulls `name:tag`, returning once the pull has completed.
    async fn pull_image(
        &self,
        name: &str,
        tag: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<(), RuntimeError>;

    /// Extracts a tar stream into the container's filesystem.
    async fn put_archive(
        &self,
        id: &str,
        archive: Vec<u8>,
        options: &ArchiveUpload,
    ) -> Result<(), RuntimeError>;
}
