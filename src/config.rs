//! Process-scoped settings read from the environment.
//!
//! Construct [`Settings`] once at the entry point and share it by `Arc` with
//! the runtime, host resolver and auth lookup.

use std::path::PathBuf;

/// Runtime endpoint used when `DOCKER_HOST` is unset.
pub const DEFAULT_DOCKER_HOST: &str = "tcp://127.0.0.1:2375";

/// Environment variable naming the runtime endpoint.
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";
/// Environment variable that overrides host resolution entirely.
pub const HOST_OVERRIDE_ENV: &str = "TESTCONTAINERS_HOST_OVERRIDE";
/// Environment variable carrying an inline registry-auth document.
pub const AUTH_CONFIG_ENV: &str = "DOCKER_AUTH_CONFIG";
/// Environment variable naming the directory holding TLS client certificates.
pub const CERT_PATH_ENV: &str = "DOCKER_CERT_PATH";
/// Environment variable that disables the host override when set to false.
pub const ALLOW_OVERRIDE_ENV: &str = "EPHEMERA_ALLOW_HOST_OVERRIDE";

/// Settings for talking to a container runtime.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Runtime endpoint URI, if configured.
    pub docker_host: Option<String>,
    /// Host override returned verbatim by host resolution.
    pub host_override: Option<String>,
    /// Whether `host_override` is honored.
    pub allow_host_override: bool,
    /// Inline registry-auth JSON.
    pub auth_config: Option<String>,
    /// Home directory, used to locate `.docker/config.json`.
    pub home_dir: Option<PathBuf>,
    /// Directory with `key.pem`, `cert.pem` and `ca.pem` for `https` endpoints.
    pub cert_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            docker_host: None,
            host_override: None,
            allow_host_override: true,
            auth_config: None,
            home_dir: None,
            cert_path: None,
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Self {
        Self {
            docker_host: non_empty_var(DOCKER_HOST_ENV),
            host_override: non_empty_var(HOST_OVERRIDE_ENV),
            allow_host_override: non_empty_var(ALLOW_OVERRIDE_ENV)
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
            auth_config: non_empty_var(AUTH_CONFIG_ENV),
            home_dir: non_empty_var("HOME").map(PathBuf::from),
            cert_path: non_empty_var(CERT_PATH_ENV).map(PathBuf::from),
        }
    }

    /// Sets the runtime endpoint.
    pub fn with_docker_host(mut self, host: impl Into<String>) -> Self {
        self.docker_host = Some(host.into());
        self
    }

    /// Sets the host override.
    pub fn with_host_override(mut self, host: impl Into<String>) -> Self {
        self.host_override = Some(host.into());
        self
    }

    /// Enables or disables the host override.
    pub fn with_allow_host_override(mut self, allow: bool) -> Self {
        self.allow_host_override = allow;
        self
    }

    /// Sets the inline registry-auth JSON.
    pub fn with_auth_config(mut self, json: impl Into<String>) -> Self {
        self.auth_config = Some(json.into());
        self
    }

    /// Sets the home directory.
    pub fn with_home_dir(mut self, home: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home.into());
        self
    }

    /// Sets the TLS certificate directory.
    pub fn with_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_path = Some(path.into());
        self
    }

    /// TLS certificate directory: `cert_path`, else `~/.docker`.
    pub fn cert_dir(&self) -> Option<PathBuf> {
        self.cert_path
            .clone()
            .or_else(|| self.home_dir.as_ref().map(|home| home.join(".docker")))
    }

    /// Returns the configured endpoint or the default TCP endpoint.
    pub fn endpoint(&self) -> &str {
        self.docker_host.as_deref().unwrap_or(DEFAULT_DOCKER_HOST)
    }

    /// Returns the effective host override, if one is set and permitted.
    pub fn effective_override(&self) -> Option<&str> {
        if self.allow_host_override {
            self.host_override.as_deref()
        } else {
            None
        }
    }

    /// Path of the default registry-auth file.
    pub fn docker_config_path(&self) -> Option<PathBuf> {
        self.home_dir
            .as_ref()
            .map(|home| home.join(".docker").join("config.json"))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}
