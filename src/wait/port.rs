use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::ReadinessCheck;
use crate::container::StartedContainer;
use crate::error::ContainerError;

/// Host addresses that mean "every interface" and must be replaced by the
/// resolved host before connecting.
const WILDCARD_HOSTS: [&str; 3] = ["", "0.0.0.0", "::"];

/// Ready once every published TCP port accepts a connection.
#[derive(Debug, Clone)]
pub struct PortOpen {
    /// Bound on a single connection attempt.
    pub probe_timeout: Duration,
}

impl Default for PortOpen {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(1),
        }
    }
}

impl PortOpen {
    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    async fn connects(&self, host: &str, port: u16) -> bool {
        match timeout(self.probe_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(host = %host, port, error = %e, "Port not accepting connections");
                false
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ReadinessCheck for PortOpen {
    async fn is_ready(&self, container: &StartedContainer) -> Result<bool, ContainerError> {
        let snapshot = container.snapshot().await?;
        let host = container.host().await?;

        for (port, bindings) in &snapshot.ports {
            if !port.ends_with("/tcp") {
                continue;
            }
            for binding in bindings {
                let Ok(host_port) = binding.host_port.parse::<u16>() else {
                    continue;
                };
                let target = if WILDCARD_HOSTS.contains(&binding.host_ip.as_str()) {
                    host.as_str()
                } else {
                    binding.host_ip.as_str()
                };
                if !self.connects(target, host_port).await {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn describe(&self) -> String {
        "published ports open".to_string()
    }
}
