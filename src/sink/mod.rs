//! Best-effort forwarding of measurements to a remote collector.
//!
//! Pushes run on spawned tasks with their own timeout and are never retried.
//! A failed push is logged at DEBUG and dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::IngestConfig;
use crate::db::Measurement;

/// Sink error types.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("collector returned HTTP {0}")]
    Status(u16),
}

/// A remote destination for measurements.
#[async_trait]
pub trait RowSink: Send + Sync {
    async fn push(&self, measurement: &Measurement) -> Result<(), SinkError>;

    /// Disabled sinks are skipped without spawning a task.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Sink used when no collector is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl RowSink for NoopSink {
    async fn push(&self, _measurement: &Measurement) -> Result<(), SinkError> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// POSTs each measurement as JSON to `<base_url>/ingest`.
#[derive(Debug, Clone)]
pub struct HttpIngestSink {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpIngestSink {
    pub fn new(config: &IngestConfig, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &IngestConfig) -> Self {
        Self {
            client,
            url: ingest_url(&config.base_url),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl RowSink for HttpIngestSink {
    async fn push(&self, measurement: &Measurement) -> Result<(), SinkError> {
        let resp = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .json(measurement)
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(SinkError::Status(resp.status().as_u16()))
        }
    }
}

fn ingest_url(base_url: &str) -> String {
    format!("{}/ingest", base_url.trim_end_matches('/'))
}

/// Pick the sink for this process: HTTP when an ingest URL is configured,
/// otherwise the no-op sink.
pub fn sink_from_config(
    ingest: Option<&IngestConfig>,
    timeout: Duration,
) -> Result<Arc<dyn RowSink>, SinkError> {
    match ingest {
        Some(cfg) => {
            tracing::info!("Forwarding measurements to {}", ingest_url(&cfg.base_url));
            Ok(Arc::new(HttpIngestSink::new(cfg, timeout)?))
        }
        None => Ok(Arc::new(NoopSink)),
    }
}

/// Fires measurements at a sink without waiting for the result.
#[derive(Clone)]
pub struct SinkDispatcher {
    sink: Arc<dyn RowSink>,
    timeout: Duration,
}

impl SinkDispatcher {
    pub fn new(sink: Arc<dyn RowSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink), Duration::from_secs(5))
    }

    /// Spawn a push of `measurement`. Must be called inside a tokio runtime.
    pub fn dispatch(&self, measurement: Measurement) -> Option<tokio::task::JoinHandle<()>> {
        if !self.sink.is_enabled() {
            return None;
        }

        let sink = self.sink.clone();
        let timeout = self.timeout;
        Some(tokio::spawn(async move {
            match tokio::time::timeout(timeout, sink.push(&measurement)).await {
                Ok(Ok(())) => tracing::debug!("Pushed {} row to collector", measurement.host),
                Ok(Err(e)) => tracing::debug!("Collector push failed (ignored): {}", e),
                Err(_) => tracing::debug!("Collector push timed out after {:?} (ignored)", timeout),
            }
        }))
    }
}
