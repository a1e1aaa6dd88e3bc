//! Readiness strategies polled after a container starts.
//!
//! A [`WaitStrategy`] pairs one [`ReadinessCheck`] with a timeout and a poll
//! interval. The deadline is checked before every probe, so an expired
//! deadline never issues another probe. Transient probe errors count as "not
//! ready"; fatal ones (see [`ContainerError::is_fatal`]) end the wait at once.

mod exec;
mod http;
mod port;
mod state;

pub use exec::{ExecProbe, LogPattern};
pub use http::HttpProbe;
pub use port::PortOpen;
pub use state::{Healthy, RunningState};

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::container::StartedContainer;
use crate::error::ContainerError;

/// Default time allowed for a container to become ready.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default pause between probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A single readiness probe.
#[async_trait]
pub trait ReadinessCheck: Send + Sync + Debug {
    /// One probe attempt. `Ok(false)` and non-fatal errors mean "not ready
    /// yet".
    async fn is_ready(&self, container: &StartedContainer) -> Result<bool, ContainerError>;

    fn describe(&self) -> String;
}

/// A readiness check bounded by a timeout.
#[derive(Debug, Clone)]
pub struct WaitStrategy {
    check: Arc<dyn ReadinessCheck>,
    timeout: Duration,
    poll_interval: Duration,
}

impl Default for WaitStrategy {
    fn default() -> Self {
        Self::running()
    }
}

impl WaitStrategy {
    pub fn new(check: impl ReadinessCheck + 'static) -> Self {
        Self {
            check: Arc::new(check),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Waits for the runtime to report the container running.
    pub fn running() -> Self {
        Self::new(RunningState)
    }

    /// Waits for the container's own healthcheck to report healthy.
    pub fn healthy() -> Self {
        Self::new(Healthy)
    }

    /// Waits until every published TCP port accepts connections.
    pub fn port_open() -> Self {
        Self::new(PortOpen::default())
    }

    pub fn http(probe: HttpProbe) -> Self {
        Self::new(probe)
    }

    pub fn exec(probe: ExecProbe) -> Self {
        Self::new(probe)
    }

    /// Waits until the logs match `pattern` once.
    pub fn log(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::new(LogPattern::new(pattern)?))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn check(&self) -> &dyn ReadinessCheck {
        self.check.as_ref()
    }

    /// Polls the check until it passes or the timeout elapses.
    ///
    /// # Errors
    ///
    /// `ContainerError::WaitTimeout` naming the container. The container is
    /// left running. A fatal probe error is returned as is, without waiting
    /// for the deadline.
    pub async fn wait_until_ready(&self, container: &StartedContainer) -> Result<(), ContainerError> {
        let started = Instant::now();
        let description = self.check.describe();
        debug!(container = %container.id(), check = %description, timeout = ?self.timeout, "Waiting for container");

        let mut attempts = 0u32;
        loop {
            if started.elapsed() >= self.timeout {
                warn!(container = %container.id(), check = %description, attempts, "Container not ready before timeout");
                return Err(ContainerError::WaitTimeout {
                    id: container.id().to_string(),
                    timeout: self.timeout,
                });
            }

            attempts += 1;
            match self.check.is_ready(container).await {
                Ok(true) => {
                    info!(
                        container = %container.id(),
                        check = %description,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Container ready"
                    );
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) if e.is_fatal() => {
                    warn!(container = %container.id(), check = %description, error = %e, "Readiness check cannot succeed");
                    return Err(e);
                }
                Err(e) => {
                    debug!(container = %container.id(), error = %e, "Readiness probe error");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
