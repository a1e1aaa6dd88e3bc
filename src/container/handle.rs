//! Handles to started and stopped containers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::spec::ExposedPort;
use crate::error::ContainerError;
use crate::host::HostResolver;
use crate::runtime::{ContainerRuntime, ContainerSnapshot};

/// Output of a command run inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: Option<i64>,
    /// Combined output with control characters (including newlines) removed.
    pub output: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Removes ASCII control bytes (0x00-0x1F and 0x7F) before decoding.
pub(crate) fn strip_control_bytes(raw: &[u8]) -> String {
    let kept: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| *b > 0x1F && *b != 0x7F)
        .collect();
    String::from_utf8_lossy(&kept).into_owned()
}

/// A running container produced by
/// [`ContainerOrchestrator::start`](super::ContainerOrchestrator::start).
///
/// The inspect snapshot is fetched lazily and cached; [`inspect`] refreshes
/// it and [`restart`] drops it. The host comes from the shared
/// [`HostResolver`], which resolves it once per endpoint.
///
/// [`inspect`]: StartedContainer::inspect
/// [`restart`]: StartedContainer::restart
pub struct StartedContainer {
    id: String,
    image: String,
    runtime: Arc<dyn ContainerRuntime>,
    resolver: Arc<HostResolver>,
    snapshot: RwLock<Option<Arc<ContainerSnapshot>>>,
    last_exec_id: Mutex<Option<String>>,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for StartedContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartedContainer")
            .field("id", &self.id)
            .field("image", &self.image)
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl StartedContainer {
    pub(crate) fn new(
        id: String,
        image: String,
        runtime: Arc<dyn ContainerRuntime>,
        resolver: Arc<HostResolver>,
    ) -> Self {
        Self {
            id,
            image,
            runtime,
            resolver,
            snapshot: RwLock::new(None),
            last_exec_id: Mutex::new(None),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Id of the most recent exec instance, if any command was run.
    pub fn last_exec_id(&self) -> Option<String> {
        self.last_exec_id.lock().ok().and_then(|id| id.clone())
    }

    /// Cached inspect snapshot, fetched on first use.
    pub async fn snapshot(&self) -> Result<Arc<ContainerSnapshot>, ContainerError> {
        if let Some(snapshot) = self.snapshot.read().await.as_ref() {
            return Ok(snapshot.clone());
        }
        self.inspect().await
    }

    /// Re-inspects the container and replaces the cached snapshot.
    pub async fn inspect(&self) -> Result<Arc<ContainerSnapshot>, ContainerError> {
        let snapshot = Arc::new(self.runtime.inspect_container(&self.id).await?);
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Address the container's published ports are reachable at.
    pub async fn host(&self) -> Result<String, ContainerError> {
        Ok(self.resolver.resolve_host().await?)
    }

    /// Host port bound to a container port.
    pub async fn mapped_port(&self, port: impl Into<ExposedPort>) -> Result<u16, ContainerError> {
        let snapshot = self.snapshot().await?;
        mapped_port(&self.id, &snapshot, &port.into().to_string())
    }

    /// Host port of the lowest published container port.
    pub async fn first_mapped_port(&self) -> Result<u16, ContainerError> {
        let snapshot = self.snapshot().await?;
        first_mapped_port(&self.id, &snapshot)
    }

    pub async fn network_id(&self, network: &str) -> Result<String, ContainerError> {
        let snapshot = self.snapshot().await?;
        network_field(&self.id, &snapshot, network, |n| n.network_id.clone())
    }

    pub async fn ip_address(&self, network: &str) -> Result<String, ContainerError> {
        let snapshot = self.snapshot().await?;
        network_field(&self.id, &snapshot, network, |n| n.ip_address.clone())
    }

    /// Container name without the runtime's leading `/`.
    pub async fn name(&self) -> Result<String, ContainerError> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.name.trim_start_matches('/').to_string())
    }

    pub async fn labels(&self) -> Result<HashMap<String, String>, ContainerError> {
        Ok(self.snapshot().await?.labels.clone())
    }

    /// Runs a command inside the container.
    pub async fn exec<S: AsRef<str>>(&self, cmd: &[S]) -> Result<ExecResult, ContainerError> {
        let cmd: Vec<String> = cmd.iter().map(|s| s.as_ref().to_string()).collect();
        debug!(container = %self.id, cmd = ?cmd, "Executing command");
        let output = self.runtime.exec(&self.id, &cmd).await?;
        if let Ok(mut last) = self.last_exec_id.lock() {
            *last = Some(output.exec_id.clone());
        }
        Ok(ExecResult {
            exit_code: output.exit_code,
            output: strip_control_bytes(&output.output),
        })
    }

    /// Stdout and stderr collected so far.
    pub async fn logs(&self) -> Result<String, ContainerError> {
        let raw = self.runtime.logs(&self.id).await?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Restarts the container in place; the id is unchanged.
    pub async fn restart(&self) -> Result<&Self, ContainerError> {
        self.runtime.restart_container(&self.id).await?;
        *self.snapshot.write().await = None;
        info!(container = %self.id, "Container restarted");
        Ok(self)
    }

    /// Stops and removes the container.
    pub async fn stop(self) -> Result<StoppedContainer, ContainerError> {
        self.runtime.stop_container(&self.id).await?;
        self.runtime.remove_container(&self.id).await?;
        info!(container = %self.id, "Container stopped and removed");
        let snapshot = self.snapshot.into_inner();
        Ok(StoppedContainer {
            id: self.id,
            snapshot,
        })
    }
}

/// A container that has been stopped and removed.
///
/// Port and network queries answer from the last cached snapshot and may be
/// stale.
#[derive(Debug, Clone)]
pub struct StoppedContainer {
    id: String,
    snapshot: Option<Arc<ContainerSnapshot>>,
}

impl StoppedContainer {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn last_snapshot(&self) -> Option<&ContainerSnapshot> {
        self.snapshot.as_deref()
    }

    pub fn mapped_port(&self, port: impl Into<ExposedPort>) -> Result<u16, ContainerError> {
        let key = port.into().to_string();
        match &self.snapshot {
            Some(snapshot) => mapped_port(&self.id, snapshot, &key),
            None => Err(port_not_found(&self.id, &key)),
        }
    }

    pub fn ip_address(&self, network: &str) -> Result<String, ContainerError> {
        match &self.snapshot {
            Some(snapshot) => network_field(&self.id, snapshot, network, |n| n.ip_address.clone()),
            None => Err(ContainerError::NetworkNotFound {
                id: self.id.clone(),
                network: network.to_string(),
            }),
        }
    }
}

fn port_not_found(id: &str, port: &str) -> ContainerError {
    ContainerError::PortNotFound {
        id: id.to_string(),
        port: port.to_string(),
    }
}

fn mapped_port(id: &str, snapshot: &ContainerSnapshot, key: &str) -> Result<u16, ContainerError> {
    snapshot
        .ports
        .get(key)
        .and_then(|bindings| {
            bindings
                .iter()
                .find_map(|binding| binding.host_port.parse::<u16>().ok())
        })
        .ok_or_else(|| port_not_found(id, key))
}

fn first_mapped_port(id: &str, snapshot: &ContainerSnapshot) -> Result<u16, ContainerError> {
    let mut keys: Vec<&String> = snapshot.ports.keys().collect();
    keys.sort_by_key(|key| port_number(key));
    keys.into_iter()
        .find_map(|key| mapped_port(id, snapshot, key).ok())
        .ok_or_else(|| port_not_found(id, "<any>"))
}

fn port_number(key: &str) -> (u32, String) {
    let (port, protocol) = key.split_once('/').unwrap_or((key, ""));
    (port.parse().unwrap_or(u32::MAX), protocol.to_string())
}

fn network_field(
    id: &str,
    snapshot: &ContainerSnapshot,
    network: &str,
    field: impl Fn(&crate::runtime::NetworkEndpoint) -> String,
) -> Result<String, ContainerError> {
    snapshot
        .networks
        .get(network)
        .map(field)
        .ok_or_else(|| ContainerError::NetworkNotFound {
            id: id.to_string(),
            network: network.to_string(),
        })
}
