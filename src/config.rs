//! Configuration module for netprobe.
//!
//! Settings come from an optional JSON file with per-field defaults, then
//! environment overrides for the ingest sink.

use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::db::ProbeMethod;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A monitored endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub host: String,
    #[serde(rename = "prefer", default)]
    pub preferred_method: ProbeMethod,
}

impl Endpoint {
    pub fn new(name: &str, host: &str, preferred_method: ProbeMethod) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            preferred_method,
        }
    }
}

/// Remote ingestion endpoint for the async sink.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

/// Probe engine configuration. Immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub endpoints: Vec<Endpoint>,
    /// Average latency above this raises a `latency_ms` alert (default: 200)
    pub latency_alert_ms: f64,
    /// Packet loss at or above this raises a `packet_loss_pct` alert (default: 20)
    pub packet_loss_alert_pct: f64,
    /// Echo requests per ICMP probe (default: 4)
    pub ping_count: u32,
    /// Per-packet ICMP timeout in milliseconds (default: 1000)
    pub ping_timeout_ms: u64,
    /// HTTP probe timeout in seconds (default: 3)
    pub http_timeout_secs: f64,
    /// Probes allowed in flight at once within a cycle (default: 4)
    pub max_concurrent_probes: usize,
    /// Timeout for a single ingest push in seconds (default: 5)
    pub ingest_timeout_secs: f64,
    pub ingest: Option<IngestConfig>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            latency_alert_ms: 200.0,
            packet_loss_alert_pct: 20.0,
            ping_count: 4,
            ping_timeout_ms: 1000,
            http_timeout_secs: 3.0,
            max_concurrent_probes: 4,
            ingest_timeout_secs: 5.0,
            ingest: None,
        }
    }
}

/// Endpoints monitored when no config file is given.
pub fn default_endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::new("Google DNS", "8.8.8.8", ProbeMethod::Icmp),
        Endpoint::new("Google", "www.google.com", ProbeMethod::Http),
        Endpoint::new("Yahoo", "www.yahoo.com", ProbeMethod::Http),
        Endpoint::new("Bing", "www.bing.com", ProbeMethod::Http),
        Endpoint::new("Cloudflare DNS", "1.1.1.1", ProbeMethod::Icmp),
    ]
}

impl ProbeConfig {
    /// Load configuration from `path` (or defaults), then apply environment
    /// overrides and validate.
    ///
    /// Environment variables:
    /// - `NETPROBE_INGEST_URL`: ingest base URL (enables the remote sink)
    /// - `NETPROBE_INGEST_API_KEY`: API key sent with every push
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw)?
            }
            None => Self::default(),
        };

        if let Ok(base_url) = env::var("NETPROBE_INGEST_URL") {
            if !base_url.trim().is_empty() {
                let api_key = cfg
                    .ingest
                    .as_ref()
                    .map(|i| i.api_key.clone())
                    .unwrap_or_default();
                cfg.ingest = Some(IngestConfig { base_url, api_key });
            }
        }

        if let Ok(api_key) = env::var("NETPROBE_INGEST_API_KEY") {
            if let Some(ingest) = cfg.ingest.as_mut() {
                ingest.api_key = api_key;
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check the settings the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid("no endpoints configured".to_string()));
        }
        for ep in &self.endpoints {
            if ep.name.trim().is_empty() || ep.host.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "endpoint {:?} needs both a name and a host",
                    ep
                )));
            }
        }
        if self.ping_count == 0 {
            return Err(ConfigError::Invalid("ping_count must be at least 1".to_string()));
        }
        if self.ping_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "ping_timeout_ms must be positive".to_string(),
            ));
        }
        if !(self.http_timeout_secs > 0.0) || !(self.ingest_timeout_secs > 0.0) {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        if self.latency_alert_ms < 0.0 || !(0.0..=100.0).contains(&self.packet_loss_alert_pct) {
            return Err(ConfigError::Invalid(
                "alert thresholds out of range".to_string(),
            ));
        }
        if self.max_concurrent_probes == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_probes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.http_timeout_secs)
    }

    pub fn ingest_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ingest_timeout_secs)
    }
}
