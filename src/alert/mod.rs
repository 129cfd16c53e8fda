//! Threshold alerts derived from a measurement.

use crate::config::ProbeConfig;
use crate::db::{Alert, AlertMetric, Measurement};

/// Static alert thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    pub latency_ms: f64,
    pub packet_loss_pct: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            latency_ms: 200.0,
            packet_loss_pct: 20.0,
        }
    }
}

impl AlertThresholds {
    pub fn from_config(cfg: &ProbeConfig) -> Self {
        Self {
            latency_ms: cfg.latency_alert_ms,
            packet_loss_pct: cfg.packet_loss_alert_pct,
        }
    }
}

/// Evaluate every rule against `m`, in latency, packet loss, unreachable order.
///
/// Rules are independent; one measurement can raise all three.
pub fn evaluate_alerts(m: &Measurement, thresholds: &AlertThresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if let Some(avg) = m.avg_ms {
        if avg > thresholds.latency_ms {
            alerts.push(alert_for(
                m,
                AlertMetric::LatencyMs,
                avg,
                thresholds.latency_ms,
                format!("High latency {:.1} ms > {} ms", avg, thresholds.latency_ms),
            ));
        }
    }

    if let Some(loss) = m.packet_loss_pct {
        if loss >= thresholds.packet_loss_pct {
            alerts.push(alert_for(
                m,
                AlertMetric::PacketLossPct,
                loss,
                thresholds.packet_loss_pct,
                format!(
                    "High packet loss {:.1}% >= {}%",
                    loss, thresholds.packet_loss_pct
                ),
            ));
        }
    }

    if m.received == Some(0) && m.http_status.is_none() {
        alerts.push(alert_for(
            m,
            AlertMetric::Unreachable,
            1.0,
            0.0,
            "No responses from host".to_string(),
        ));
    }

    alerts
}

fn alert_for(
    m: &Measurement,
    metric: AlertMetric,
    value: f64,
    threshold: f64,
    message: String,
) -> Alert {
    Alert {
        timestamp: m.timestamp,
        name: m.name.clone(),
        host: m.host.clone(),
        metric,
        value,
        threshold,
        message,
    }
}
