//! Create, start, populate and wait for containers.

use std::sync::Arc;

use tracing::{debug, info};

use super::create_with_pull;
use super::handle::StartedContainer;
use super::spec::ContainerSpec;
use crate::auth::RegistryAuth;
use crate::config::Settings;
use crate::error::ContainerError;
use crate::host::HostResolver;
use crate::ports::{PortAllocator, RandomPortAllocator};
use crate::runtime::{ArchiveUpload, ContainerRuntime, DockerRuntime};

/// Launches containers against one runtime.
///
/// Safe to share across tasks: concurrent [`start`](Self::start) calls draw
/// host ports from the same allocator and never collide.
#[derive(Clone)]
pub struct ContainerOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    resolver: Arc<HostResolver>,
    allocator: Arc<dyn PortAllocator>,
    auth: Option<Arc<RegistryAuth>>,
}

impl std::fmt::Debug for ContainerOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerOrchestrator")
            .field("resolver", &self.resolver)
            .field("auth", &self.auth)
            .finish()
    }
}

impl ContainerOrchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, resolver: Arc<HostResolver>) -> Self {
        Self {
            runtime,
            resolver,
            allocator: Arc::new(RandomPortAllocator::new()),
            auth: None,
        }
    }

    /// Connects to the Docker endpoint in `settings` and loads registry auth.
    pub fn from_settings(settings: Arc<Settings>) -> Result<Self, ContainerError> {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect(&settings)?);
        let auth = RegistryAuth::load(&settings)?;
        let resolver = Arc::new(HostResolver::new(settings, runtime.clone()));
        Ok(Self::new(runtime, resolver).with_auth(Arc::new(auth)))
    }

    pub fn with_port_allocator(mut self, allocator: Arc<dyn PortAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_auth(mut self, auth: Arc<RegistryAuth>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn resolver(&self) -> &Arc<HostResolver> {
        &self.resolver
    }

    /// Creates and starts a container, uploads its copy entries and waits
    /// until it is ready.
    ///
    /// A missing image is pulled and creation retried once. Failures after
    /// creation leave the container in place; the error names its id.
    ///
    /// # Errors
    ///
    /// `Creation`, `Start`, `Upload` or `WaitTimeout`, plus port allocation
    /// and archive errors. A host-resolution error from a readiness check is
    /// returned without waiting for the timeout.
    pub async fn start(&self, spec: ContainerSpec) -> Result<StartedContainer, ContainerError> {
        let request = spec.to_create_request(self.allocator.as_ref())?;
        let id = create_with_pull(self.runtime.as_ref(), &request, self.auth.as_deref()).await?;
        info!(container = %id, image = %spec.image, "Container created");

        self.runtime
            .start_container(&id)
            .await
            .map_err(|source| ContainerError::Start {
                id: id.clone(),
                source,
            })?;

        if !spec.copies.is_empty() {
            let archive = spec.copies.build_archive()?;
            debug!(container = %id, bytes = archive.len(), entries = spec.copies.entries().len(), "Uploading archive");
            self.runtime
                .put_archive(&id, archive, &ArchiveUpload::default())
                .await
                .map_err(|source| ContainerError::Upload {
                    id: id.clone(),
                    source,
                })?;
        }

        let container = StartedContainer::new(
            id,
            spec.image,
            self.runtime.clone(),
            self.resolver.clone(),
        );
        let wait = spec.wait.unwrap_or_default();
        wait.wait_until_ready(&container).await?;
        info!(container = %container.id(), "Container ready");
        Ok(container)
    }
}
