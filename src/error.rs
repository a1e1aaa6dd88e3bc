//! Error types for ephemera operations.
//!
//! Defines error types for each subsystem:
//! - Runtime transport (the Docker-compatible API)
//! - Archive staging
//! - Registry authentication
//! - Host resolution
//! - Container orchestration and readiness

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors reported by the container runtime collaborator.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Resource '{0}' not found")]
    NotFound(String),

    #[error("Image '{0}' not found locally")]
    ImageNotFound(String),

    #[error("Runtime API error ({status_code}): {message}")]
    Api { status_code: u16, message: String },

    #[error("Runtime transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns true if the error denotes a missing image.
    pub fn is_image_not_found(&self) -> bool {
        matches!(self, RuntimeError::ImageNotFound(_))
    }
}

/// Errors raised while staging archive entries.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Source '{0}' does not exist")]
    SourceNotFound(PathBuf),

    #[error("Source '{0}' is not a regular file")]
    NotAFile(PathBuf),

    #[error("Source '{0}' is not a directory")]
    NotADirectory(PathBuf),

    #[error("Target path must not be empty")]
    EmptyTarget,

    #[error("Invalid target path '{0}': parent components are not allowed")]
    InvalidTarget(String),

    #[error("Invalid mode {0:#o}: must be within 0o0..=0o777")]
    InvalidMode(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while resolving registry credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid registry auth config: {0}")]
    InvalidConfig(String),

    #[error("Credential helper '{helper}' failed for registry '{registry}': {message}")]
    CredentialHelper {
        helper: String,
        registry: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while resolving the container host address.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Invalid runtime endpoint '{endpoint}': {reason}")]
    Configuration { endpoint: String, reason: String },

    #[error("Unsupported runtime endpoint scheme '{scheme}'")]
    UnsupportedScheme { scheme: String },
}

/// Errors raised by container orchestration and the live handle.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Failed to create container from image '{image}': {source}")]
    Creation {
        image: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Failed to start container '{id}': {source}")]
    Start {
        id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Failed to upload archive to container '{id}': {source}")]
    Upload {
        id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Container '{id}' was not ready after {timeout:?}")]
    WaitTimeout { id: String, timeout: Duration },

    #[error("Port '{port}' is not mapped for container '{id}'")]
    PortNotFound { id: String, port: String },

    #[error("Network '{network}' not found for container '{id}'")]
    NetworkNotFound { id: String, network: String },

    #[error("Readiness probe failed: {0}")]
    Probe(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Port(#[from] crate::ports::PortError),
}

impl ContainerError {
    /// Returns true for configuration errors that no amount of polling can
    /// clear.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ContainerError::Host(_) | ContainerError::Auth(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_timeout_names_container() {
        let err = ContainerError::WaitTimeout {
            id: "abc123".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("abc123"));
    }

    #[test]
    fn test_unsupported_scheme_names_scheme() {
        let err = HostError::UnsupportedScheme {
            scheme: "invalid".to_string(),
        };
        assert!(err.to_string().contains("'invalid'"));
    }

    #[test]
    fn test_creation_error_names_image() {
        let err = ContainerError::Creation {
            image: "redis:7".to_string(),
            source: RuntimeError::ImageNotFound("redis:7".to_string()),
        };
        assert!(err.to_string().contains("redis:7"));
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        let host = ContainerError::Host(HostError::UnsupportedScheme {
            scheme: "invalid".to_string(),
        });
        assert!(host.is_fatal());
        assert!(ContainerError::Auth(AuthError::InvalidConfig("bad".to_string())).is_fatal());
        assert!(!ContainerError::Probe("refused".to_string()).is_fatal());
        assert!(!ContainerError::Runtime(RuntimeError::Transport("reset".to_string())).is_fatal());
    }

    #[test]
    fn test_invalid_mode_is_octal() {
        let err = ArchiveError::InvalidMode(9999);
        assert!(err.to_string().contains("0o23417"));
    }
}
