//! Registry credentials for image pulls.
//!
//! Reads the Docker-style auth document (inline `DOCKER_AUTH_CONFIG` or
//! `$HOME/.docker/config.json`) and resolves credentials for a registry from
//! credential helpers, inline `auths` entries or the default credential store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tracing::debug;

use crate::config::Settings;
use crate::error::AuthError;
use crate::process::{ExecutableLookup, PathLookup, ProcessRunner, TokioProcessRunner};

/// Canonical key for Docker Hub.
pub const DOCKER_HUB: &str = "docker.io";

/// Server URL that credential helpers store Docker Hub credentials under.
pub const DOCKER_HUB_SERVER: &str = "https://index.docker.io/v1/";

const DOCKER_HUB_ALIASES: [&str; 3] = ["docker.io", "index.docker.io", "registry-1.docker.io"];

/// Username/password pair for a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub registry: String,
    pub username: String,
    pub password: String,
}

/// Shape of the Docker auth document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthDocument {
    #[serde(default)]
    pub auths: HashMap<String, AuthEntry>,
    #[serde(default)]
    pub creds_store: Option<String>,
    #[serde(default)]
    pub cred_helpers: HashMap<String, String>,
}

/// A single `auths` entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthEntry {
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelperResponse {
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Secret")]
    secret: String,
}

/// Normalizes a registry key: drops the scheme and trailing slashes and maps
/// every Docker Hub alias onto [`DOCKER_HUB`].
pub fn normalize_registry(key: &str) -> String {
    let trimmed = key.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let stripped = without_scheme.trim_end_matches('/');
    let host = stripped.split('/').next().unwrap_or(stripped);

    if DOCKER_HUB_ALIASES.contains(&host) {
        DOCKER_HUB.to_string()
    } else {
        stripped.to_string()
    }
}

/// Returns the registry an image reference pulls from.
///
/// The first path component names a registry only when it looks like a host
/// (contains `.` or `:`, or is `localhost`); otherwise the image lives on
/// Docker Hub.
pub fn registry_from_image(image: &str) -> String {
    match image.split_once('/') {
        Some((first, _))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            first.to_string()
        }
        _ => DOCKER_HUB.to_string(),
    }
}

/// Parsed auth document plus the means to run credential helpers.
pub struct RegistryAuth {
    document: AuthDocument,
    runner: Arc<dyn ProcessRunner>,
    lookup: Arc<dyn ExecutableLookup>,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("registries", &self.document.auths.keys().collect::<Vec<_>>())
            .field("creds_store", &self.document.creds_store)
            .field("cred_helpers", &self.document.cred_helpers)
            .finish()
    }
}

impl RegistryAuth {
    /// Loads the auth document: inline JSON first, then the default file.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidConfig` if the document is not valid JSON.
    pub fn load(settings: &Settings) -> Result<Self, AuthError> {
        let document = if let Some(json) = &settings.auth_config {
            parse_document(json)?
        } else if let Some(path) = settings.docker_config_path().filter(|p| p.is_file()) {
            debug!(path = %path.display(), "Loading registry auth file");
            parse_document(&std::fs::read_to_string(path)?)?
        } else {
            AuthDocument::default()
        };

        Ok(Self::from_document(document))
    }

    /// Wraps an already parsed document.
    pub fn from_document(document: AuthDocument) -> Self {
        Self {
            document,
            runner: Arc::new(TokioProcessRunner),
            lookup: Arc::new(PathLookup),
        }
    }

    /// Replaces the process runner and executable lookup.
    pub fn with_process(
        mut self,
        runner: Arc<dyn ProcessRunner>,
        lookup: Arc<dyn ExecutableLookup>,
    ) -> Self {
        self.runner = runner;
        self.lookup = lookup;
        self
    }

    /// The `auths` section keyed by normalized registry.
    pub fn registries(&self) -> HashMap<String, AuthEntry> {
        self.document
            .auths
            .iter()
            .map(|(key, entry)| (normalize_registry(key), entry.clone()))
            .collect()
    }

    /// Resolves credentials for `registry`.
    ///
    /// Lookup order is the registry's credential helper, then the inline
    /// `auths` entry, then the default credential store.
    pub async fn credentials_for(
        &self,
        registry: &str,
    ) -> Result<Option<RegistryCredentials>, AuthError> {
        let registry = normalize_registry(registry);

        let helper = self
            .document
            .cred_helpers
            .iter()
            .find(|(key, _)| normalize_registry(key) == registry)
            .map(|(_, helper)| helper.clone());
        if let Some(helper) = helper {
            return self.run_helper(&helper, &registry).await;
        }

        if let Some(entry) = self.registries().get(&registry) {
            if let Some(credentials) = decode_entry(&registry, entry)? {
                return Ok(Some(credentials));
            }
        }

        match &self.document.creds_store {
            Some(store) => self.run_helper(store, &registry).await,
            None => Ok(None),
        }
    }

    /// Resolves credentials for the registry an image pulls from.
    pub async fn credentials_for_image(
        &self,
        image: &str,
    ) -> Result<Option<RegistryCredentials>, AuthError> {
        self.credentials_for(&registry_from_image(image)).await
    }

    async fn run_helper(
        &self,
        helper: &str,
        registry: &str,
    ) -> Result<Option<RegistryCredentials>, AuthError> {
        let program_name = format!("docker-credential-{helper}");
        let helper_error = |message: String| AuthError::CredentialHelper {
            helper: helper.to_string(),
            registry: registry.to_string(),
            message,
        };

        let program: PathBuf = self
            .lookup
            .find(&program_name)
            .ok_or_else(|| helper_error(format!("executable '{program_name}' not found")))?;

        let server = if registry == DOCKER_HUB {
            DOCKER_HUB_SERVER
        } else {
            registry
        };

        let output = self
            .runner
            .run(&program, &["get"], Some(server.as_bytes()))
            .await
            .map_err(|e| helper_error(e.to_string()))?;

        if !output.success() {
            let message = format!("{}{}", output.stdout, output.stderr);
            if message.to_lowercase().contains("credentials not found") {
                debug!(helper = %helper, registry = %registry, "No stored credentials");
                return Ok(None);
            }
            return Err(helper_error(message.trim().to_string()));
        }

        let response: HelperResponse = serde_json::from_str(output.stdout.trim())
            .map_err(|e| helper_error(format!("malformed helper output: {e}")))?;

        Ok(Some(RegistryCredentials {
            registry: registry.to_string(),
            username: response.username,
            password: response.secret,
        }))
    }
}

fn parse_document(json: &str) -> Result<AuthDocument, AuthError> {
    serde_json::from_str(json).map_err(|e| AuthError::InvalidConfig(e.to_string()))
}

fn decode_entry(
    registry: &str,
    entry: &AuthEntry,
) -> Result<Option<RegistryCredentials>, AuthError> {
    if let Some(encoded) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|e| AuthError::InvalidConfig(format!("auth for '{registry}': {e}")))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|e| AuthError::InvalidConfig(format!("auth for '{registry}': {e}")))?;
        let (username, password) = decoded.split_once(':').ok_or_else(|| {
            AuthError::InvalidConfig(format!("auth for '{registry}' is not user:password"))
        })?;
        return Ok(Some(RegistryCredentials {
            registry: registry.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }));
    }

    match (&entry.username, &entry.password) {
        (Some(username), Some(password)) => Ok(Some(RegistryCredentials {
            registry: registry.to_string(),
            username: username.clone(),
            password: password.clone(),
        })),
        _ => Ok(None),
    }
}
