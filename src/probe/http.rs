//! HTTP probe implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::ProbeError;

/// Result of one HTTP GET.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpOutcome {
    /// Wall-clock milliseconds until the body was fully read.
    pub elapsed_ms: Option<f64>,
    pub status: Option<u16>,
    pub error: Option<String>,
}

impl HttpOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            elapsed_ms: None,
            status: None,
            error: Some(error.into()),
        }
    }
}

/// Runs one HTTP probe against a host.
#[async_trait]
pub trait HttpRunner: Send + Sync {
    /// Never fails: network errors are reported in [`HttpOutcome::error`].
    async fn get(&self, host: &str) -> HttpOutcome;
}

/// [`HttpRunner`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestHttp {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestHttp {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Network(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    /// Wrap an already configured client.
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl HttpRunner for ReqwestHttp {
    async fn get(&self, host: &str) -> HttpOutcome {
        let url = probe_url(host);
        match run_http_probe(&self.client, &url, self.timeout).await {
            Ok((elapsed_ms, status)) => HttpOutcome {
                elapsed_ms: Some(elapsed_ms),
                status: Some(status),
                error: None,
            },
            Err(e) => {
                tracing::debug!("HTTP probe of {} failed: {}", url, e);
                HttpOutcome::failed(e.to_string())
            }
        }
    }
}

/// Hosts without a scheme are probed over HTTPS.
pub fn probe_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

/// GET `url` and return (elapsed milliseconds, status code).
///
/// Any response counts as success, whatever its status.
async fn run_http_probe(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<(f64, u16), ProbeError> {
    let start = Instant::now();

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    })?;
    let status = response.status().as_u16();

    // Read the full body to measure complete transfer time
    let _body = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    })?;

    Ok((start.elapsed().as_secs_f64() * 1000.0, status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_url_adds_scheme() {
        assert_eq!(probe_url("www.google.com"), "https://www.google.com");
        assert_eq!(probe_url("http://example.com"), "http://example.com");
        assert_eq!(probe_url("https://example.com/health"), "https://example.com/health");
    }

    #[tokio::test]
    async fn test_http_probe_invalid_host() {
        let http = ReqwestHttp::new(Duration::from_millis(200)).unwrap();
        let outcome = http.get("http://256.256.256.256").await;
        assert!(outcome.elapsed_ms.is_none());
        assert!(outcome.status.is_none());
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_http_probe_reports_status_of_local_server() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 4\r\nconnection: close\r\n\r\ndown")
                .await;
        });

        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let http = ReqwestHttp::with_client(client, Duration::from_secs(2));
        let outcome = http.get(&format!("http://{}", addr)).await;
        assert_eq!(outcome.status, Some(503));
        assert!(outcome.elapsed_ms.unwrap() >= 0.0);
        assert!(outcome.error.is_none());
    }
}
