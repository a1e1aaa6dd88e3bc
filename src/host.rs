//! Resolution of the address a freshly created container is reachable at.
//!
//! Resolution order:
//! 1. the host override, when permitted, verbatim;
//! 2. for `tcp`/`http`/`https` endpoints, the endpoint's host;
//! 3. for `unix`/`npipe` endpoints outside a container, `localhost`;
//! 4. inside a container, the gateway of the runtime's default network, then
//!    the default route seen from a short-lived probe container, then
//!    `localhost`.
//!
//! Topology probes are best effort: their failures fall through to the next
//! candidate and never abort resolution.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::config::Settings;
use crate::container::create_with_pull;
use crate::error::HostError;
use crate::runtime::{ContainerRuntime, CreateRequest};

/// Image used for the default-gateway probe container.
pub const DEFAULT_PROBE_IMAGE: &str = "alpine:3.20";

/// Host returned when nothing more specific applies.
pub const LOCALHOST: &str = "localhost";

const DEFAULT_ROUTE_CMD: &str = "ip route | awk '/default/ { print $3 }'";

/// Label marking probe containers.
const PROBE_LABEL: &str = "org.ephemera.probe";

/// Reports whether this process runs inside a container.
pub type ContainerDetector = Arc<dyn Fn() -> bool + Send + Sync>;

/// Detects Docker (`/.dockerenv`) and Podman (`/run/.containerenv`) containers.
pub fn running_in_container() -> bool {
    Path::new("/.dockerenv").exists() || Path::new("/run/.containerenv").exists()
}

/// Resolves the container host for one runtime endpoint.
///
/// A successful resolution is cached for the resolver's lifetime; failures
/// are not.
pub struct HostResolver {
    settings: Arc<Settings>,
    runtime: Arc<dyn ContainerRuntime>,
    in_container: ContainerDetector,
    probe_image: String,
    resolved: OnceCell<String>,
}

impl std::fmt::Debug for HostResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostResolver")
            .field("endpoint", &self.settings.endpoint())
            .field("probe_image", &self.probe_image)
            .finish()
    }
}

impl HostResolver {
    pub fn new(settings: Arc<Settings>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            settings,
            runtime,
            in_container: Arc::new(running_in_container),
            probe_image: DEFAULT_PROBE_IMAGE.to_string(),
            resolved: OnceCell::new(),
        }
    }

    /// Replaces the in-container detection.
    pub fn with_container_detector(
        mut self,
        detector: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        self.in_container = Arc::new(detector);
        self
    }

    /// Sets the image used for the default-gateway probe.
    pub fn with_probe_image(mut self, image: impl Into<String>) -> Self {
        self.probe_image = image.into();
        self
    }

    /// Returns the address containers created through this runtime are
    /// reachable at.
    ///
    /// # Errors
    ///
    /// `HostError::Configuration` for an unparsable endpoint and
    /// `HostError::UnsupportedScheme` for a scheme other than
    /// `tcp`/`http`/`https`/`unix`/`npipe`.
    pub async fn resolve_host(&self) -> Result<String, HostError> {
        self.resolved
            .get_or_try_init(|| self.resolve_uncached())
            .await
            .cloned()
    }

    async fn resolve_uncached(&self) -> Result<String, HostError> {
        if let Some(host) = self.settings.effective_override() {
            debug!(host = %host, "Using host override");
            return Ok(host.to_string());
        }

        let endpoint = self.settings.endpoint();
        let url = Url::parse(endpoint).map_err(|e| HostError::Configuration {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "tcp" | "http" | "https" => Ok(url.host_str().unwrap_or(LOCALHOST).to_string()),
            "unix" | "npipe" => {
                if !(self.in_container)() {
                    return Ok(LOCALHOST.to_string());
                }

                let network = if url.path().contains("podman") {
                    "podman"
                } else {
                    "bridge"
                };
                if let Some(gateway) = self.network_gateway(network).await {
                    info!(network = %network, gateway = %gateway, "Resolved host from network gateway");
                    return Ok(gateway);
                }
                if let Some(gateway) = self.default_gateway().await {
                    info!(gateway = %gateway, "Resolved host from default route");
                    return Ok(gateway);
                }
                Ok(LOCALHOST.to_string())
            }
            other => Err(HostError::UnsupportedScheme {
                scheme: other.to_string(),
            }),
        }
    }

    /// First non-empty gateway among the network's IPAM config entries.
    async fn network_gateway(&self, network: &str) -> Option<String> {
        match self.runtime.network_gateways(network).await {
            Ok(gateways) => gateways
                .into_iter()
                .flatten()
                .find(|gateway| !gateway.is_empty()),
            Err(e) => {
                debug!(network = %network, error = %e, "Network inspect failed");
                None
            }
        }
    }

    /// Default route of a probe container; the probe is always torn down.
    async fn default_gateway(&self) -> Option<String> {
        let mut labels = HashMap::new();
        labels.insert(PROBE_LABEL.to_string(), "true".to_string());
        let request = CreateRequest {
            name: Some(format!("ephemera-gateway-probe-{}", Uuid::new_v4().simple())),
            image: self.probe_image.clone(),
            cmd: Some(vec!["sleep".to_string(), "30".to_string()]),
            labels,
            ..Default::default()
        };

        let id = match create_with_pull(self.runtime.as_ref(), &request, None).await {
            Ok(id) => id,
            Err(e) => {
                debug!(image = %self.probe_image, error = %e, "Probe container creation failed");
                return None;
            }
        };

        let guard = ProbeGuard::new(self.runtime.clone(), id);
        let gateway = self.query_default_route(guard.id()).await;
        guard.teardown().await;
        gateway
    }

    async fn query_default_route(&self, id: &str) -> Option<String> {
        if let Err(e) = self.runtime.start_container(id).await {
            debug!(container = %id, error = %e, "Probe container failed to start");
            return None;
        }

        let cmd = vec![
            "sh".to_string(),
            "-c".to_string(),
            DEFAULT_ROUTE_CMD.to_string(),
        ];
        match self.runtime.exec(id, &cmd).await {
            Ok(output) => {
                let text = String::from_utf8_lossy(&output.output);
                text.lines()
                    .map(str::trim)
                    .find(|line| line.parse::<Ipv4Addr>().is_ok())
                    .map(str::to_string)
            }
            Err(e) => {
                debug!(container = %id, error = %e, "Default route query failed");
                None
            }
        }
    }
}

/// Stops and removes a probe container, on drop if not torn down explicitly.
struct ProbeGuard {
    runtime: Arc<dyn ContainerRuntime>,
    id: Option<String>,
}

impl ProbeGuard {
    fn new(runtime: Arc<dyn ContainerRuntime>, id: String) -> Self {
        Self {
            runtime,
            id: Some(id),
        }
    }

    fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    async fn teardown(mut self) {
        if let Some(id) = self.id.take() {
            remove_probe(self.runtime.as_ref(), &id).await;
        }
    }
}

async fn remove_probe(runtime: &dyn ContainerRuntime, id: &str) {
    if let Err(e) = runtime.stop_container(id).await {
        debug!(container = %id, error = %e, "Failed to stop probe container");
    }
    if let Err(e) = runtime.remove_container(id).await {
        debug!(container = %id, error = %e, "Failed to remove probe container");
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        // Reached only when the resolving future was dropped mid-probe.
        if let Some(id) = self.id.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let runtime = self.runtime.clone();
                handle.spawn(async move {
                    remove_probe(runtime.as_ref(), &id).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::runtime::ExecOutput;
    use crate::testing::FakeRuntime;

    fn resolver(
        endpoint: &str,
        runtime: Arc<FakeRuntime>,
        in_container: bool,
    ) -> HostResolver {
        let settings = Settings::default().with_docker_host(endpoint);
        HostResolver::new(Arc::new(settings), runtime).with_container_detector(move || in_container)
    }

    #[tokio::test]
    async fn test_network_schemes_return_uri_host() {
        for (endpoint, expected) in [
            ("tcp://10.1.2.3:2375", "10.1.2.3"),
            ("http://docker.internal:2375", "docker.internal"),
            ("https://remote.example.com:2376", "remote.example.com"),
        ] {
            for in_container in [false, true] {
                let runtime = Arc::new(FakeRuntime::new());
                let host = resolver(endpoint, runtime.clone(), in_container)
                    .resolve_host()
                    .await
                    .unwrap();
                assert_eq!(host, expected);
                assert!(runtime.calls().is_empty());
            }
        }
    }

    #[tokio::test]
    async fn test_default_endpoint_is_loopback() {
        let runtime = Arc::new(FakeRuntime::new());
        let resolver = HostResolver::new(Arc::new(Settings::default()), runtime)
            .with_container_detector(|| false);
        assert_eq!(resolver.resolve_host().await.unwrap(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_override_wins_even_for_unsupported_scheme() {
        let runtime = Arc::new(FakeRuntime::new());
        let settings = Settings::default()
            .with_docker_host("invalid://unknown")
            .with_host_override("override.local");
        let resolver = HostResolver::new(Arc::new(settings), runtime);
        assert_eq!(resolver.resolve_host().await.unwrap(), "override.local");
    }

    #[tokio::test]
    async fn test_override_ignored_when_disabled() {
        let runtime = Arc::new(FakeRuntime::new());
        let settings = Settings::default()
            .with_docker_host("tcp://10.0.0.9:2375")
            .with_host_override("override.local")
            .with_allow_host_override(false);
        let resolver = HostResolver::new(Arc::new(settings), runtime);
        assert_eq!(resolver.resolve_host().await.unwrap(), "10.0.0.9");
    }

    #[tokio::test]
    async fn test_unsupported_scheme_names_scheme() {
        let runtime = Arc::new(FakeRuntime::new());
        let err = resolver("invalid://unknown", runtime, false)
            .resolve_host()
            .await
            .unwrap_err();
        match err {
            HostError::UnsupportedScheme { scheme } => assert_eq!(scheme, "invalid"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unparsable_endpoint_is_configuration_error() {
        let runtime = Arc::new(FakeRuntime::new());
        let err = resolver("not a uri", runtime, false)
            .resolve_host()
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_socket_outside_container_is_localhost() {
        for endpoint in ["unix:///var/run/docker.sock", "npipe:////./pipe/docker_engine"] {
            let runtime = Arc::new(FakeRuntime::new());
            runtime.set_gateways("bridge", vec![Some("172.17.0.1".to_string())]);
            let host = resolver(endpoint, runtime.clone(), false)
                .resolve_host()
                .await
                .unwrap();
            assert_eq!(host, LOCALHOST);
            assert!(runtime.calls().is_empty());
        }
    }

    #[tokio::test]
    async fn test_network_gateway_has_priority() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_gateways("bridge", vec![None, Some("172.17.0.1".to_string())]);
        let host = resolver("unix:///var/run/docker.sock", runtime.clone(), true)
            .resolve_host()
            .await
            .unwrap();
        assert_eq!(host, "172.17.0.1");
        assert!(runtime.created().is_empty(), "no probe container expected");
    }

    #[tokio::test]
    async fn test_podman_socket_inspects_podman_network() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_gateways("podman", vec![Some("10.88.0.1".to_string())]);
        let host = resolver("unix:///run/user/1000/podman/podman.sock", runtime.clone(), true)
            .resolve_host()
            .await
            .unwrap();
        assert_eq!(host, "10.88.0.1");
        assert!(runtime.calls().contains(&"network:podman".to_string()));
    }

    #[tokio::test]
    async fn test_default_route_probe_when_network_missing() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.script_exec(Ok(ExecOutput {
            exec_id: "exec-1".to_string(),
            output: b"172.18.0.1\n".to_vec(),
            exit_code: Some(0),
        }));
        let host = resolver("unix:///var/run/docker.sock", runtime.clone(), true)
            .resolve_host()
            .await
            .unwrap();
        assert_eq!(host, "172.18.0.1");

        let probe = &runtime.created()[0];
        assert_eq!(probe.image, DEFAULT_PROBE_IMAGE);
        let calls = runtime.calls();
        assert!(calls.iter().any(|c| c.starts_with("stop:")));
        assert!(calls.iter().any(|c| c.starts_with("remove:")));
    }

    #[tokio::test]
    async fn test_gateway_lookup_runs_once_per_resolver() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.script_exec(Ok(ExecOutput {
            exec_id: "exec-1".to_string(),
            output: b"172.18.0.1\n".to_vec(),
            exit_code: Some(0),
        }));
        let resolver = resolver("unix:///var/run/docker.sock", runtime.clone(), true);
        assert_eq!(resolver.resolve_host().await.unwrap(), "172.18.0.1");
        assert_eq!(resolver.resolve_host().await.unwrap(), "172.18.0.1");
        assert_eq!(runtime.created().len(), 1);
    }

    #[tokio::test]
    async fn test_probe_torn_down_when_exec_fails() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.script_exec(Err(RuntimeError::Transport("exec broke".to_string())));
        let host = resolver("unix:///var/run/docker.sock", runtime.clone(), true)
            .resolve_host()
            .await
            .unwrap();
        assert_eq!(host, LOCALHOST);
        let calls = runtime.calls();
        assert!(calls.iter().any(|c| c.starts_with("stop:")));
        assert!(calls.iter().any(|c| c.starts_with("remove:")));
    }

    #[tokio::test]
    async fn test_probe_torn_down_when_start_fails() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_start();
        let host = resolver("unix:///var/run/docker.sock", runtime.clone(), true)
            .resolve_host()
            .await
            .unwrap();
        assert_eq!(host, LOCALHOST);
        let calls = runtime.calls();
        assert!(calls.iter().any(|c| c.starts_with("remove:")));
    }

    #[tokio::test]
    async fn test_localhost_when_every_probe_fails() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.script_create(Err(RuntimeError::Transport("daemon gone".to_string())));
        let host = resolver("unix:///var/run/docker.sock", runtime.clone(), true)
            .resolve_host()
            .await
            .unwrap();
        assert_eq!(host, LOCALHOST);
        assert!(!runtime.calls().iter().any(|c| c.starts_with("stop:")));
    }

    #[tokio::test]
    async fn test_teardown_errors_do_not_override_result() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_stop();
        runtime.script_exec(Ok(ExecOutput {
            exec_id: "exec-1".to_string(),
            output: b"172.19.0.1".to_vec(),
            exit_code: Some(0),
        }));
        let host = resolver("unix:///var/run/docker.sock", runtime.clone(), true)
            .resolve_host()
            .await
            .unwrap();
        assert_eq!(host, "172.19.0.1");
    }
}
