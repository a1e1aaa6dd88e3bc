//! ephemera: ephemeral containers for integration tests.
//!
//! Creates containers from a [`ContainerSpec`], publishes their ports on
//! collision-free host ports, uploads files into them, waits until they are
//! ready and reports the host address they are reachable at.

pub mod archive;
pub mod auth;
pub mod cli;
pub mod config;
pub mod container;
pub mod error;
pub mod host;
pub mod ports;
pub mod process;
pub mod runtime;
pub mod wait;

#[cfg(test)]
mod testing;

pub use archive::{ArchiveBuilder, ArchiveEntry};
pub use config::Settings;
pub use container::{
    ContainerOrchestrator, ContainerSpec, ExecResult, ExposedPort, StartedContainer,
    StoppedContainer,
};
pub use error::{ArchiveError, AuthError, ContainerError, HostError, RuntimeError};
pub use host::HostResolver;
pub use ports::{PortAllocator, RandomPortAllocator};
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use wait::{ReadinessCheck, WaitStrategy};
