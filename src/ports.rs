//! Host port allocation for published container ports.

use std::collections::{HashSet, VecDeque};
use std::net::TcpListener;
use std::sync::Mutex;

use thiserror::Error;

/// Errors raised while allocating host ports.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("No free host port available: {0}")]
    Exhausted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chooses the host port a container port is published on.
///
/// Allocators are shared between concurrent orchestrations and must never
/// hand out the same port twice.
pub trait PortAllocator: Send + Sync {
    fn allocate(&self) -> Result<u16, PortError>;
}

/// Allocates OS-assigned ephemeral ports, never repeating one within the
/// process.
#[derive(Debug, Default)]
pub struct RandomPortAllocator {
    issued: Mutex<HashSet<u16>>,
}

/// Attempts before giving up on finding a port not yet issued.
const MAX_ATTEMPTS: usize = 64;

impl RandomPortAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PortAllocator for RandomPortAllocator {
    fn allocate(&self) -> Result<u16, PortError> {
        for _ in 0..MAX_ATTEMPTS {
            let port = TcpListener::bind(("0.0.0.0", 0))?.local_addr()?.port();
            let mut issued = self
                .issued
                .lock()
                .map_err(|_| PortError::Exhausted("allocator lock poisoned".to_string()))?;
            if issued.insert(port) {
                return Ok(port);
            }
        }
        Err(PortError::Exhausted(format!(
            "no unused port after {MAX_ATTEMPTS} attempts"
        )))
    }
}

/// Hands out ports from a fixed list in order, for deterministic tests.
#[derive(Debug)]
pub struct FixedPortAllocator {
    ports: Mutex<VecDeque<u16>>,
}

impl FixedPortAllocator {
    pub fn new(ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            ports: Mutex::new(ports.into_iter().collect()),
        }
    }
}

impl PortAllocator for FixedPortAllocator {
    fn allocate(&self) -> Result<u16, PortError> {
        self.ports
            .lock()
            .map_err(|_| PortError::Exhausted("allocator lock poisoned".to_string()))?
            .pop_front()
            .ok_or_else(|| PortError::Exhausted("fixed port list is empty".to_string()))
    }
}
