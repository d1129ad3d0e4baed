//! Liveness probing.
//!
//! A server counts as live as soon as its completion endpoint answers with
//! any HTTP response; an error status still proves the API server is up.

use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether something is answering HTTP on `port`.
    async fn is_live(&self, port: u16) -> bool;
}

/// Probes `http://<host>:<port><path>` with a GET request.
pub struct HttpProbe {
    client: reqwest::Client,
    host: String,
    path: String,
}

impl HttpProbe {
    pub fn new(host: impl Into<String>, path: impl Into<String>, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            host: host.into(),
            path: path.into(),
        }
    }

    pub fn url(&self, port: u16) -> String {
        format!("http://{}:{}{}", self.host, port, self.path)
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn is_live(&self, port: u16) -> bool {
        let url = self.url(port);
        match self.client.get(&url).send().await {
            Ok(resp) => {
                trace!(url, status = %resp.status(), "Probe answered");
                true
            }
            Err(e) => {
                trace!(url, error = %e, "Probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        let probe = HttpProbe::new("localhost", "/v1/completions", Duration::from_secs(1));
        assert_eq!(probe.url(8100), "http://localhost:8100/v1/completions");
    }

    #[tokio::test]
    async fn test_closed_port_is_not_live() {
        // Bind and drop to get a port nothing listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let probe = HttpProbe::new("127.0.0.1", "/v1/completions", Duration::from_secs(1));
        assert!(!probe.is_live(port).await);
    }
}
