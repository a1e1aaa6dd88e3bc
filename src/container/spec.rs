//! Caller-built description of a container to launch.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

use crate::archive::ArchiveBuilder;
use crate::error::ArchiveError;
use crate::ports::{PortAllocator, PortError};
use crate::runtime::{BindMount, CreateRequest, HealthCheck, HostBinding, HostSettings};
use crate::wait::WaitStrategy;

/// Host IP container ports are published on.
pub const PUBLISH_HOST_IP: &str = "0.0.0.0";

/// Transport protocol of an exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Sctp => write!(f, "sctp"),
        }
    }
}

/// A container port and its protocol, rendered as `port/protocol`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExposedPort {
    pub port: u16,
    pub protocol: Protocol,
}

impl ExposedPort {
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
        }
    }

    pub fn udp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Udp,
        }
    }
}

impl From<u16> for ExposedPort {
    fn from(port: u16) -> Self {
        Self::tcp(port)
    }
}

impl fmt::Display for ExposedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

/// Everything needed to create, populate and wait for one container.
///
/// Built incrementally, then consumed by
/// [`ContainerOrchestrator::start`](super::ContainerOrchestrator::start).
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Image reference, e.g. `postgres:16` or `ghcr.io/org/app@sha256:...`
    pub image: String,
    /// Container name (runtime-generated when unset)
    pub name: Option<String>,
    /// Command overriding the image's `CMD`
    pub cmd: Option<Vec<String>>,
    /// Entrypoint overriding the image's `ENTRYPOINT`
    pub entrypoint: Option<Vec<String>>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Container labels
    pub labels: BTreeMap<String, String>,
    /// Unique by port and protocol.
    pub exposed_ports: BTreeSet<ExposedPort>,
    /// Host bind mounts
    pub mounts: Vec<BindMount>,
    /// Container-level health check
    pub healthcheck: Option<HealthCheck>,
    /// Run in privileged mode
    pub privileged: bool,
    /// Network mode or user-defined network to attach to
    pub network: Option<String>,
    /// Working directory inside the container
    pub working_dir: Option<String>,
    /// User (and optional group) the process runs as
    pub user: Option<String>,
    /// Entries uploaded to the container's root after start.
    pub copies: ArchiveBuilder,
    /// Readiness strategy; the runtime's running state when unset.
    pub wait: Option<WaitStrategy>,
}

impl ContainerSpec {
    /// Create a description for `image` with everything else unset.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: None,
            cmd: None,
            entrypoint: None,
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            exposed_ports: BTreeSet::new(),
            mounts: Vec::new(),
            healthcheck: None,
            privileged: false,
            network: None,
            working_dir: None,
            user: None,
            copies: ArchiveBuilder::new(),
            wait: None,
        }
    }

    /// Set the container name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the command.
    pub fn with_cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = Some(cmd.into_iter().map(Into::into).collect());
        self
    }

    /// Set the entrypoint.
    pub fn with_entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = Some(entrypoint.into_iter().map(Into::into).collect());
        self
    }

    /// Add an environment variable; a repeated key keeps the last value.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Exposes a container port; adding the same port twice is a no-op.
    pub fn with_exposed_port(mut self, port: impl Into<ExposedPort>) -> Self {
        self.exposed_ports.insert(port.into());
        self
    }

    /// Bind-mount a host path into the container.
    pub fn with_bind_mount(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        read_only: bool,
    ) -> Self {
        self.mounts.push(BindMount {
            source: source.into(),
            target: target.into(),
            read_only,
        });
        self
    }

    /// Set the container-level health check.
    pub fn with_healthcheck(mut self, healthcheck: HealthCheck) -> Self {
        self.healthcheck = Some(healthcheck);
        self
    }

    /// Enable or disable privileged mode.
    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Attach to a network.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Copies a host file into the container after start.
    pub fn with_copy_file(
        mut self,
        source: impl Into<PathBuf>,
        target: impl Into<String>,
        mode: Option<u32>,
    ) -> Result<Self, ArchiveError> {
        self.copies.add_file(source, target, mode)?;
        Ok(self)
    }

    /// Copies a host directory into the container after start.
    pub fn with_copy_directory(
        mut self,
        source: impl Into<PathBuf>,
        target: impl Into<String>,
        mode: Option<u32>,
    ) -> Result<Self, ArchiveError> {
        self.copies.add_directory(source, target, mode)?;
        Ok(self)
    }

    /// Writes literal content into the container after start.
    pub fn with_copy_content(
        mut self,
        content: impl Into<Vec<u8>>,
        target: impl Into<String>,
        mode: Option<u32>,
    ) -> Result<Self, ArchiveError> {
        self.copies.add_inline(content, target, mode)?;
        Ok(self)
    }

    /// Set the readiness strategy.
    pub fn with_wait(mut self, wait: WaitStrategy) -> Self {
        self.wait = Some(wait);
        self
    }

    /// Translates this description into the runtime's create-request shape.
    ///
    /// Each exposed port is published on `0.0.0.0` at a host port drawn from
    /// `allocator`. The host configuration is left out entirely when every
    /// host-level field is default.
    pub fn to_create_request(
        &self,
        allocator: &dyn PortAllocator,
    ) -> Result<CreateRequest, PortError> {
        let mut port_bindings = HashMap::new();
        for port in &self.exposed_ports {
            let host_port = allocator.allocate()?;
            port_bindings.insert(
                port.to_string(),
                vec![HostBinding {
                    host_ip: PUBLISH_HOST_IP.to_string(),
                    host_port: host_port.to_string(),
                }],
            );
        }

        let host = HostSettings {
            port_bindings,
            privileged: self.privileged,
            mounts: self.mounts.clone(),
            network_mode: self.network.clone(),
        };
        let host_config = if host == HostSettings::default() {
            None
        } else {
            Some(host)
        };

        Ok(CreateRequest {
            name: self.name.clone(),
            image: self.image.clone(),
            cmd: self.cmd.clone(),
            entrypoint: self.entrypoint.clone(),
            env: self.env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
            labels: self
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            exposed_ports: self.exposed_ports.iter().map(ToString::to_string).collect(),
            healthcheck: self.healthcheck.clone(),
            working_dir: self.working_dir.clone(),
            user: self.user.clone(),
            host_config,
        })
    }
}
