use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use tokio::sync::OnceCell;
use tracing::debug;

use super::ReadinessCheck;
use crate::container::{ExposedPort, StartedContainer};
use crate::error::ContainerError;

/// Ready once an HTTP request to a published port returns the expected status.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    path: String,
    port: Option<ExposedPort>,
    method: Method,
    tls: bool,
    insecure: bool,
    headers: Vec<(String, String)>,
    read_timeout: Duration,
    expected_status: u16,
    /// Built on the first attempt and reused; reset by TLS and timeout changes.
    client: OnceCell<Client>,
}

impl HttpProbe {
    /// `GET path` over plain HTTP on the first published port, expecting 200.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            path,
            port: None,
            method: Method::GET,
            tls: false,
            insecure: false,
            headers: Vec::new(),
            read_timeout: Duration::from_secs(1),
            expected_status: 200,
            client: OnceCell::new(),
        }
    }

    pub fn with_port(mut self, port: impl Into<ExposedPort>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_tls(mut self) -> Self {
        self.tls = true;
        self
    }

    /// Accepts any server certificate.
    pub fn with_insecure_tls(mut self) -> Self {
        self.tls = true;
        self.insecure = true;
        self.client = OnceCell::new();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self.client = OnceCell::new();
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    fn url(&self, host: &str, port: u16) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        format!("{scheme}://{host}:{port}{}", self.path)
    }

    async fn client(&self) -> Result<&Client, ContainerError> {
        self.client
            .get_or_try_init(|| async {
                Client::builder()
                    .danger_accept_invalid_certs(self.insecure)
                    .timeout(self.read_timeout)
                    .build()
                    .map_err(|e| ContainerError::Probe(e.to_string()))
            })
            .await
    }
}

#[async_trait]
impl ReadinessCheck for HttpProbe {
    async fn is_ready(&self, container: &StartedContainer) -> Result<bool, ContainerError> {
        let host = container.host().await?;
        let port = match self.port {
            Some(port) => container.mapped_port(port).await?,
            None => container.first_mapped_port().await?,
        };
        let url = self.url(&host, port);

        let client = self.client().await?;
        let mut request = client.request(self.method.clone(), &url);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if status != self.expected_status {
                    debug!(url = %url, status, expected = self.expected_status, "Unexpected HTTP status");
                }
                Ok(status == self.expected_status)
            }
            Err(e) => {
                debug!(url = %url, error = %e, "HTTP probe failed");
                Ok(false)
            }
        }
    }

    fn describe(&self) -> String {
        format!("HTTP {} {} -> {}", self.method, self.path, self.expected_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{CreateRequest, HostBinding, HostSettings};
    use crate::testing::FakeRuntime;
    use crate::wait::test_support::started;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `status` to every connection, recording request heads.
    async fn serve(status: &'static str) -> (u16, Arc<tokio::sync::Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let recorded = seen.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                recorded
                    .lock()
                    .await
                    .push(String::from_utf8_lossy(&buf[..n]).into_owned());
                let response =
                    format!("HTTP/1.1 {status}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok");
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (port, seen)
    }

    fn request(host_port: u16) -> CreateRequest {
        let mut host = HostSettings::default();
        host.port_bindings.insert(
            "8080/tcp".to_string(),
            vec![HostBinding {
                host_ip: "0.0.0.0".to_string(),
                host_port: host_port.to_string(),
            }],
        );
        CreateRequest {
            image: "app".to_string(),
            host_config: Some(host),
            ..Default::default()
        }
    }

    #[test]
    fn test_url_building() {
        let probe = HttpProbe::new("health");
        assert_eq!(probe.url("localhost", 8080), "http://localhost:8080/health");
        let probe = HttpProbe::new("/").with_tls();
        assert_eq!(probe.url("::1", 443), "https://[::1]:443/");
    }

    #[tokio::test]
    async fn test_expected_status_is_ready() {
        let (port, seen) = serve("200 OK").await;
        let container = started(Arc::new(FakeRuntime::new()), request(port)).await;

        let probe = HttpProbe::new("/health")
            .with_port(8080)
            .with_header("X-Probe", "ephemera");
        assert!(probe.is_ready(&container).await.unwrap());

        let head = seen.lock().await[0].clone();
        assert!(head.starts_with("GET /health HTTP/1.1"));
        assert!(head.to_lowercase().contains("x-probe: ephemera"));
    }

    #[tokio::test]
    async fn test_client_reused_across_attempts() {
        let (port, seen) = serve("200 OK").await;
        let container = started(Arc::new(FakeRuntime::new()), request(port)).await;

        let probe = HttpProbe::new("/ready");
        assert!(probe.client.get().is_none());
        assert!(probe.is_ready(&container).await.unwrap());
        assert!(probe.client.get().is_some());
        assert!(probe.is_ready(&container).await.unwrap());
        assert_eq!(seen.lock().await.len(), 2);

        let probe = probe.with_read_timeout(Duration::from_secs(2));
        assert!(probe.client.get().is_none());
    }

    #[tokio::test]
    async fn test_other_status_is_not_ready() {
        let (port, _) = serve("503 Service Unavailable").await;
        let container = started(Arc::new(FakeRuntime::new()), request(port)).await;
        assert!(!HttpProbe::new("/").is_ready(&container).await.unwrap());
        assert!(HttpProbe::new("/")
            .with_status(503)
            .is_ready(&container)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_connection_refused_is_not_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let container = started(Arc::new(FakeRuntime::new()), request(port)).await;
        assert!(!HttpProbe::new("/").is_ready(&container).await.unwrap());
    }
}
