use async_trait::async_trait;
use tracing::debug;

use super::ReadinessCheck;
use crate::container::StartedContainer;
use crate::error::ContainerError;

/// Ready once the runtime reports the container running.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningState;

#[async_trait]
impl ReadinessCheck for RunningState {
    async fn is_ready(&self, container: &StartedContainer) -> Result<bool, ContainerError> {
        let snapshot = container.inspect().await?;
        if !snapshot.running {
            debug!(container = %container.id(), status = %snapshot.status, "Container not running yet");
        }
        Ok(snapshot.running)
    }

    fn describe(&self) -> String {
        "running state".to_string()
    }
}

/// Ready once the container's healthcheck reports `healthy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Healthy;

#[async_trait]
impl ReadinessCheck for Healthy {
    async fn is_ready(&self, container: &StartedContainer) -> Result<bool, ContainerError> {
        let snapshot = container.inspect().await?;
        if !snapshot.has_healthcheck {
            return Err(ContainerError::Probe(format!(
                "container '{}' has no healthcheck",
                container.id()
            )));
        }
        Ok(snapshot.health.as_deref() == Some("healthy"))
    }

    fn describe(&self) -> String {
        "healthcheck".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ContainerRuntime, CreateRequest, HealthCheck};
    use crate::testing::FakeRuntime;
    use crate::wait::test_support::started;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_running_state_reads_fresh_snapshot() {
        let runtime = Arc::new(FakeRuntime::new());
        let request = CreateRequest {
            image: "alpine".to_string(),
            ..Default::default()
        };
        let container = started(runtime.clone(), request).await;
        assert!(RunningState.is_ready(&container).await.unwrap());

        runtime.stop_container(container.id()).await.unwrap();
        assert!(!RunningState.is_ready(&container).await.unwrap());
    }

    #[tokio::test]
    async fn test_healthy_follows_health_status() {
        let runtime = Arc::new(FakeRuntime::new());
        let request = CreateRequest {
            image: "postgres:16".to_string(),
            healthcheck: Some(HealthCheck::shell("pg_isready")),
            ..Default::default()
        };
        let container = started(runtime.clone(), request).await;

        let mut snapshot = (*container.inspect().await.unwrap()).clone();
        snapshot.health = Some("starting".to_string());
        runtime.set_snapshot(container.id(), snapshot.clone());
        assert!(!Healthy.is_ready(&container).await.unwrap());

        snapshot.health = Some("healthy".to_string());
        runtime.set_snapshot(container.id(), snapshot);
        assert!(Healthy.is_ready(&container).await.unwrap());
    }

    #[tokio::test]
    async fn test_healthy_without_healthcheck_errors() {
        let runtime = Arc::new(FakeRuntime::new());
        let request = CreateRequest {
            image: "alpine".to_string(),
            ..Default::default()
        };
        let container = started(runtime, request).await;
        assert!(Healthy.is_ready(&container).await.is_err());
    }
}
