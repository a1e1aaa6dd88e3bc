//! Docker API implementation of [`ContainerRuntime`] using the bollard crate.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, HealthConfig, HostConfig, Mount, MountTypeEnum, PortBinding,
};
use bollard::network::InspectNetworkOptions;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, warn};

use super::{
    ArchiveUpload, ContainerRuntime, ContainerSnapshot, CreateRequest, ExecOutput, HostBinding,
    HostSettings, NetworkEndpoint,
};
use crate::auth::RegistryCredentials;
use crate::config::Settings;
use crate::error::RuntimeError;

/// Request timeout for the daemon connection, in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Seconds the daemon waits for a graceful stop before killing.
const STOP_TIMEOUT_SECS: i64 = 10;

/// Docker daemon client.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the endpoint named by `settings`, falling back to the
    /// default TCP endpoint.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Transport` if the endpoint cannot be used.
    pub fn connect(settings: &Settings) -> Result<Self, RuntimeError> {
        let endpoint = settings.endpoint();
        let scheme = endpoint.split_once("://").map(|(s, _)| s).unwrap_or("");
        let docker = match scheme {
            "tcp" | "http" => Docker::connect_with_http(
                endpoint,
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            "https" => {
                let certs = settings.cert_dir().ok_or_else(|| {
                    RuntimeError::Transport(format!(
                        "no TLS certificate directory for endpoint '{endpoint}'; set DOCKER_CERT_PATH"
                    ))
                })?;
                Docker::connect_with_ssl(
                    endpoint,
                    &certs.join("key.pem"),
                    &certs.join("cert.pem"),
                    &certs.join("ca.pem"),
                    CONNECT_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                )
            }
            #[cfg(unix)]
            "unix" => Docker::connect_with_unix(
                endpoint,
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            #[cfg(windows)]
            "npipe" => Docker::connect_with_named_pipe(
                endpoint,
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            other => {
                return Err(RuntimeError::Transport(format!(
                    "cannot connect to endpoint '{endpoint}' with scheme '{other}'"
                )))
            }
        }
        .map_err(|e| RuntimeError::Transport(format!("Failed to connect: {e}")))?;

        debug!(endpoint = %endpoint, "Connected to container runtime");
        Ok(Self { docker })
    }

    /// Wraps an existing bollard client.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }
}

fn map_error(e: BollardError) -> RuntimeError {
    match e {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Api {
            status_code,
            message,
        },
        other => RuntimeError::Transport(other.to_string()),
    }
}

/// Maps a create failure; only a 404 naming a missing image becomes
/// `ImageNotFound`, other 404s (a missing network, say) stay `NotFound`.
fn map_create_error(e: BollardError, image: &str) -> RuntimeError {
    match map_error(e) {
        RuntimeError::NotFound(message) if message.to_lowercase().contains("no such image") => {
            RuntimeError::ImageNotFound(image.to_string())
        }
        other => other,
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn nanos(duration: std::time::Duration) -> i64 {
    duration.as_nanos().min(i64::MAX as u128) as i64
}

fn host_config(settings: &HostSettings) -> HostConfig {
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = settings
        .port_bindings
        .iter()
        .map(|(port, bindings)| {
            let bindings = bindings
                .iter()
                .map(|b| PortBinding {
                    host_ip: Some(b.host_ip.clone()),
                    host_port: Some(b.host_port.clone()),
                })
                .collect();
            (port.clone(), Some(bindings))
        })
        .collect();

    let mounts: Vec<Mount> = settings
        .mounts
        .iter()
        .map(|m| Mount {
            source: Some(m.source.clone()),
            target: Some(m.target.clone()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(m.read_only),
            ..Default::default()
        })
        .collect();

    HostConfig {
        port_bindings: if port_bindings.is_empty() {
            None
        } else {
            Some(port_bindings)
        },
        privileged: settings.privileged.then_some(true),
        mounts: non_empty(mounts),
        network_mode: settings.network_mode.clone(),
        ..Default::default()
    }
}

fn container_config(request: &CreateRequest) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = request
        .exposed_ports
        .iter()
        .map(|port| (port.clone(), HashMap::new()))
        .collect();

    let healthcheck = request.healthcheck.as_ref().map(|hc| HealthConfig {
        test: Some(hc.test.clone()),
        interval: hc.interval.map(nanos),
        timeout: hc.timeout.map(nanos),
        retries: hc.retries.map(i64::from),
        start_period: hc.start_period.map(nanos),
        ..Default::default()
    });

    Config {
        image: Some(request.image.clone()),
        cmd: request.cmd.clone(),
        entrypoint: request.entrypoint.clone(),
        env: non_empty(request.env.clone()),
        labels: if request.labels.is_empty() {
            None
        } else {
            Some(request.labels.clone())
        },
        exposed_ports: if exposed_ports.is_empty() {
            None
        } else {
            Some(exposed_ports)
        },
        healthcheck,
        working_dir: request.working_dir.clone(),
        user: request.user.clone(),
        host_config: request.host_config.as_ref().map(host_config),
        ..Default::default()
    }
}

fn snapshot(info: ContainerInspectResponse) -> ContainerSnapshot {
    let state = info.state.unwrap_or_default();
    let config = info.config.unwrap_or_default();
    let network_settings = info.network_settings.unwrap_or_default();

    let ports = network_settings
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|(port, bindings)| {
            let bindings = bindings
                .unwrap_or_default()
                .into_iter()
                .filter_map(|b| {
                    Some(HostBinding {
                        host_ip: b.host_ip.unwrap_or_default(),
                        host_port: b.host_port?,
                    })
                })
                .collect();
            (port, bindings)
        })
        .collect();

    let networks = network_settings
        .networks
        .unwrap_or_default()
        .into_iter()
        .map(|(name, endpoint)| {
            (
                name,
                NetworkEndpoint {
                    network_id: endpoint.network_id.unwrap_or_default(),
                    ip_address: endpoint.ip_address.unwrap_or_default(),
                    gateway: endpoint.gateway.unwrap_or_default(),
                },
            )
        })
        .collect();

    ContainerSnapshot {
        id: info.id.unwrap_or_default(),
        name: info
            .name
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        labels: config.labels.unwrap_or_default(),
        running: state.running.unwrap_or(false),
        status: state.status.map(|s| s.to_string()).unwrap_or_default(),
        exit_code: state.exit_code,
        health: state
            .health
            .and_then(|h| h.status)
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty()),
        entrypoint: config.entrypoint,
        has_healthcheck: config.healthcheck.is_some(),
        privileged: info
            .host_config
            .and_then(|hc| hc.privileged)
            .unwrap_or(false),
        ports,
        networks,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_container(&self, request: &CreateRequest) -> Result<String, RuntimeError> {
        let options = request.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, container_config(request))
            .await
            .map_err(|e| map_create_error(e, &request.image))?;

        for warning in &response.warnings {
            warn!(container = %response.id, warning = %warning, "Runtime warning on create");
        }

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_error)
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };

        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(container = %id, "Container already removed");
                Ok(())
            }
            Err(e) => Err(map_error(e)),
        }
    }

    async fn restart_container(&self, id: &str) -> Result<(), RuntimeError> {
        let options = RestartContainerOptions {
            t: STOP_TIMEOUT_SECS as isize,
        };

        self.docker
            .restart_container(id, Some(options))
            .await
            .map_err(map_error)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerSnapshot, RuntimeError> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(map_error)?;

        Ok(snapshot(info))
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput, RuntimeError> {
        let exec_options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, exec_options)
            .await
            .map_err(map_error)?;

        let mut output = Vec::new();
        if let StartExecResults::Attached { output: mut stream, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(map_error)?
        {
            while let Some(chunk) = stream.next().await {
                match chunk.map_err(map_error)? {
                    LogOutput::StdOut { message }
                    | LogOutput::StdErr { message }
                    | LogOutput::Console { message } => output.extend_from_slice(&message),
                    LogOutput::StdIn { .. } => {}
                }
            }
        }

        let exec_info = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(map_error)?;

        Ok(ExecOutput {
            exec_id: exec.id,
            output,
            exit_code: exec_info.exit_code,
        })
    }

    async fn logs(&self, id: &str) -> Result<Vec<u8>, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: false,
            ..Default::default()
        };

        let mut logs = self.docker.logs(id, Some(options));
        let mut output = Vec::new();

        while let Some(chunk) = logs.next().await {
            match chunk.map_err(map_error)? {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => output.extend_from_slice(&message),
                LogOutput::StdIn { .. } => {}
            }
        }

        Ok(output)
    }

    async fn network_gateways(&self, network: &str) -> Result<Vec<Option<String>>, RuntimeError> {
        let info = self
            .docker
            .inspect_network(network, None::<InspectNetworkOptions<String>>)
            .await
            .map_err(map_error)?;

        Ok(info
            .ipam
            .and_then(|ipam| ipam.config)
            .unwrap_or_default()
            .into_iter()
            .map(|config| config.gateway)
            .collect())
    }

    async fn pull_image(
        &self,
        name: &str,
        tag: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<(), RuntimeError> {
        let options = CreateImageOptions {
            from_image: name.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        let credentials = credentials.map(|c| DockerCredentials {
            username: Some(c.username.clone()),
            password: Some(c.password.clone()),
            serveraddress: Some(c.registry.clone()),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(Some(options), None, credentials);

        while let Some(result) = stream.next().await {
            let info = result.map_err(map_error)?;
            if let Some(status) = info.status {
                debug!(image = %name, tag = %tag, status = %status, "Pull progress");
            }
        }

        Ok(())
    }

    async fn put_archive(
        &self,
        id: &str,
        archive: Vec<u8>,
        options: &ArchiveUpload,
    ) -> Result<(), RuntimeError> {
        if options.copy_uid_gid {
            warn!(container = %id, "copyUIDGID is not supported by this transport; ignoring");
        }

        let upload_options = UploadToContainerOptions {
            path: options.path.clone(),
            no_overwrite_dir_non_dir: options.no_overwrite_dir_non_dir.to_string(),
        };

        self.docker
            .upload_to_container(id, Some(upload_options), archive.into())
            .await
            .map_err(map_error)
    }
}
