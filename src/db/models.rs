//! Measurement and alert record types.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::Endpoint;

/// Probe method that produced a measurement's primary latency value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    #[default]
    Icmp,
    Http,
}

impl ProbeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeMethod::Icmp => "icmp",
            ProbeMethod::Http => "http",
        }
    }
}

impl fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "icmp" => Ok(ProbeMethod::Icmp),
            "http" => Ok(ProbeMethod::Http),
            other => Err(format!("unknown probe method: {}", other)),
        }
    }
}

/// One normalized probe result for one endpoint in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub host: String,
    pub method: ProbeMethod,
    pub avg_ms: Option<f64>,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    /// Per-packet round-trip times in milliseconds, in reply order
    pub rtts: Vec<u32>,
    pub sent: Option<u32>,
    pub received: Option<u32>,
    pub packet_loss_pct: Option<f64>,
    pub http_status: Option<u16>,
    pub error: Option<String>,
}

impl Measurement {
    /// Empty measurement for `endpoint`, stamped with the probe start time.
    pub fn new(endpoint: &Endpoint, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            name: endpoint.name.clone(),
            host: endpoint.host.clone(),
            method: endpoint.preferred_method,
            avg_ms: None,
            min_ms: None,
            max_ms: None,
            rtts: Vec::new(),
            sent: None,
            received: None,
            packet_loss_pct: None,
            http_status: None,
            error: None,
        }
    }

    /// ISO-8601 timestamp as written to storage.
    pub fn timestamp_str(&self) -> String {
        format_timestamp(&self.timestamp)
    }

    /// `rtts` serialized as a JSON array.
    pub fn rtts_json(&self) -> String {
        serde_json::to_string(&self.rtts).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Metric an alert fired on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    LatencyMs,
    PacketLossPct,
    Unreachable,
}

impl AlertMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertMetric::LatencyMs => "latency_ms",
            AlertMetric::PacketLossPct => "packet_loss_pct",
            AlertMetric::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latency_ms" => Ok(AlertMetric::LatencyMs),
            "packet_loss_pct" => Ok(AlertMetric::PacketLossPct),
            "unreachable" => Ok(AlertMetric::Unreachable),
            other => Err(format!("unknown alert metric: {}", other)),
        }
    }
}

/// A threshold breach on a single measurement.
///
/// Shares `timestamp` and `host` with the measurement it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub host: String,
    pub metric: AlertMetric,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

impl Alert {
    pub fn timestamp_str(&self) -> String {
        format_timestamp(&self.timestamp)
    }
}

/// Format a timestamp the way every sink stores it, e.g. `2024-05-01T12:00:00.123456Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by [`format_timestamp`] (or any RFC 3339 string).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_format_round_trip() {
        let ts = Utc::now();
        let s = format_timestamp(&ts);
        assert!(s.ends_with('Z'));
        let parsed = parse_timestamp(&s).unwrap();
        assert_eq!(format_timestamp(&parsed), s);
    }

    #[test]
    fn test_enum_names_match_storage() {
        assert_eq!(ProbeMethod::Http.to_string(), "http");
        assert_eq!("icmp".parse::<ProbeMethod>().unwrap(), ProbeMethod::Icmp);
        assert_eq!(AlertMetric::PacketLossPct.as_str(), "packet_loss_pct");
        assert!("jitter".parse::<AlertMetric>().is_err());
        assert_eq!(
            serde_json::to_string(&AlertMetric::LatencyMs).unwrap(),
            "\"latency_ms\""
        );
    }
}
