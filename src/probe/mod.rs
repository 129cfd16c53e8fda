//! Probe module for endpoint reachability.
//!
//! An endpoint is measured with an ICMP probe (external `ping`) and an HTTP
//! probe; which one is primary depends on the endpoint's preferred method.

mod http;
mod parse;
mod ping;

pub use http::*;
pub use parse::*;
pub use ping::*;

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{Endpoint, ProbeConfig};
use crate::db::{Measurement, ProbeMethod};

/// Probe error types.
///
/// These never reach the scheduler; the prober folds them into the
/// measurement's `error` field.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Produces one measurement for an endpoint.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, endpoint: &Endpoint) -> Measurement;
}

/// ICMP-with-HTTP-fallback prober.
pub struct ReachabilityProber<P, H> {
    ping: P,
    http: H,
}

impl ReachabilityProber<CommandPing, ReqwestHttp> {
    /// Prober using the system `ping` and a `reqwest` client.
    pub fn from_config(cfg: &ProbeConfig) -> Result<Self, ProbeError> {
        let ping = CommandPing::new(PingOptions::new(cfg.ping_count, cfg.ping_timeout()));
        let http = ReqwestHttp::new(cfg.http_timeout())?;
        Ok(Self::new(ping, http))
    }
}

impl<P: PingRunner, H: HttpRunner> ReachabilityProber<P, H> {
    pub fn new(ping: P, http: H) -> Self {
        Self { ping, http }
    }

    /// ICMP first; on total loss, HTTP supplies the latency.
    async fn probe_icmp_first(&self, m: &mut Measurement) {
        let stats = self.ping.ping(&m.host).await;
        m.method = ProbeMethod::Icmp;
        apply_ping_counts(m, &stats);
        apply_ping_timing(m, &stats);
        m.error = stats.error;

        if stats.loss_pct >= 100.0 {
            tracing::info!("{} ({}) lost every ping, trying HTTP", m.name, m.host);
            let outcome = self.http.get(&m.host).await;
            m.method = ProbeMethod::Http;
            m.avg_ms = outcome.elapsed_ms;
            m.http_status = outcome.status;
            m.error = outcome.error;
        }
    }

    /// HTTP first; ICMP adds packet counts and backfills the per-packet
    /// timing HTTP cannot provide.
    ///
    /// A timed HTTP leg keeps its `avg_ms`, so `min_ms`/`max_ms`/`rtts` then
    /// describe the ICMP packets while `avg_ms` is the request latency.
    async fn probe_http_first(&self, m: &mut Measurement) {
        let outcome = self.http.get(&m.host).await;
        m.method = ProbeMethod::Http;
        m.avg_ms = outcome.elapsed_ms;
        m.http_status = outcome.status;
        m.error = outcome.error;

        let stats = self.ping.ping(&m.host).await;
        apply_ping_counts(m, &stats);

        if m.min_ms.is_none() && !stats.rtts.is_empty() {
            if m.avg_ms.is_none() {
                m.method = ProbeMethod::Icmp;
                apply_ping_timing(m, &stats);
            } else {
                m.min_ms = stats.min_ms;
                m.max_ms = stats.max_ms;
                m.rtts = stats.rtts.clone();
            }
        }

        if m.error.is_none() {
            m.error = stats.error;
        }
    }
}

#[async_trait]
impl<P: PingRunner, H: HttpRunner> Prober for ReachabilityProber<P, H> {
    async fn probe(&self, endpoint: &Endpoint) -> Measurement {
        let mut m = Measurement::new(endpoint, Utc::now());

        match endpoint.preferred_method {
            ProbeMethod::Icmp => self.probe_icmp_first(&mut m).await,
            ProbeMethod::Http => self.probe_http_first(&mut m).await,
        }

        m
    }
}

fn apply_ping_counts(m: &mut Measurement, stats: &PingStats) {
    m.sent = Some(stats.sent);
    m.received = Some(stats.received);
    m.packet_loss_pct = Some(stats.loss_pct);
}

fn apply_ping_timing(m: &mut Measurement, stats: &PingStats) {
    m.avg_ms = stats.avg_ms;
    m.min_ms = stats.min_ms;
    m.max_ms = stats.max_ms;
    m.rtts = stats.rtts.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakePing {
        stats: PingStats,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PingRunner for FakePing {
        async fn ping(&self, _host: &str) -> PingStats {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.stats.clone()
        }
    }

    struct FakeHttp {
        outcome: HttpOutcome,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl HttpRunner for FakeHttp {
        async fn get(&self, _host: &str) -> HttpOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn healthy_ping() -> PingStats {
        parse_ping_output("time=10ms time=20ms time=30ms time=40ms", 4)
    }

    fn http_ok(ms: f64) -> HttpOutcome {
        HttpOutcome {
            elapsed_ms: Some(ms),
            status: Some(200),
            error: None,
        }
    }

    fn prober(
        stats: PingStats,
        outcome: HttpOutcome,
    ) -> (ReachabilityProber<FakePing, FakeHttp>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let ping_calls = Arc::new(AtomicUsize::new(0));
        let http_calls = Arc::new(AtomicUsize::new(0));
        let p = ReachabilityProber::new(
            FakePing {
                stats,
                calls: ping_calls.clone(),
            },
            FakeHttp {
                outcome,
                calls: http_calls.clone(),
            },
        );
        (p, ping_calls, http_calls)
    }

    #[tokio::test]
    async fn test_icmp_success_skips_http() {
        let (p, ping_calls, http_calls) = prober(healthy_ping(), http_ok(5.0));
        let ep = Endpoint::new("DNS", "8.8.8.8", ProbeMethod::Icmp);
        let m = p.probe(&ep).await;

        assert_eq!(m.method, ProbeMethod::Icmp);
        assert_eq!(m.avg_ms, Some(25.0));
        assert_eq!(m.min_ms, Some(10.0));
        assert_eq!(m.max_ms, Some(40.0));
        assert_eq!(m.rtts, vec![10, 20, 30, 40]);
        assert_eq!((m.sent, m.received), (Some(4), Some(4)));
        assert_eq!(m.packet_loss_pct, Some(0.0));
        assert!(m.http_status.is_none());
        assert_eq!(ping_calls.load(Ordering::SeqCst), 1);
        assert_eq!(http_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_total_loss_falls_back_to_http() {
        let (p, _, http_calls) = prober(PingStats::total_loss(4, "timed out"), http_ok(42.0));
        let ep = Endpoint::new("DNS", "1.1.1.1", ProbeMethod::Icmp);
        let m = p.probe(&ep).await;

        assert_eq!(http_calls.load(Ordering::SeqCst), 1);
        assert_eq!(m.method, ProbeMethod::Http);
        assert_eq!(m.avg_ms, Some(42.0));
        assert_eq!(m.http_status, Some(200));
        assert!(m.error.is_none());
        // ICMP counts are kept for the record.
        assert_eq!((m.sent, m.received), (Some(4), Some(0)));
        assert_eq!(m.packet_loss_pct, Some(100.0));
        assert!(m.rtts.is_empty());
    }

    #[tokio::test]
    async fn test_total_loss_and_http_failure() {
        let (p, _, _) = prober(
            parse_ping_output("no replies", 4),
            HttpOutcome::failed("connection refused"),
        );
        let ep = Endpoint::new("Dead", "10.255.255.1", ProbeMethod::Icmp);
        let m = p.probe(&ep).await;

        assert_eq!(m.method, ProbeMethod::Http);
        assert!(m.avg_ms.is_none());
        assert!(m.http_status.is_none());
        assert_eq!(m.error.as_deref(), Some("connection refused"));
        assert_eq!(m.received, Some(0));
    }

    #[tokio::test]
    async fn test_http_first_keeps_http_avg_and_backfills_packets() {
        let (p, ping_calls, _) = prober(healthy_ping(), http_ok(123.0));
        let ep = Endpoint::new("Site", "www.example.com", ProbeMethod::Http);
        let m = p.probe(&ep).await;

        assert_eq!(ping_calls.load(Ordering::SeqCst), 1);
        assert_eq!(m.method, ProbeMethod::Http);
        assert_eq!(m.avg_ms, Some(123.0));
        assert_eq!(m.http_status, Some(200));
        assert_eq!(m.min_ms, Some(10.0));
        assert_eq!(m.max_ms, Some(40.0));
        assert_eq!(m.rtts, vec![10, 20, 30, 40]);
        assert_eq!((m.sent, m.received), (Some(4), Some(4)));
        assert_eq!(m.packet_loss_pct, Some(0.0));
        assert!(m.error.is_none());
    }

    #[tokio::test]
    async fn test_http_first_without_replies_leaves_packet_timing_empty() {
        let (p, _, _) = prober(PingStats::total_loss(4, "timed out"), http_ok(55.0));
        let ep = Endpoint::new("Site", "www.example.com", ProbeMethod::Http);
        let m = p.probe(&ep).await;

        assert_eq!(m.method, ProbeMethod::Http);
        assert_eq!(m.avg_ms, Some(55.0));
        assert!(m.min_ms.is_none() && m.max_ms.is_none());
        assert!(m.rtts.is_empty());
        assert_eq!(m.received, Some(0));
    }

    #[tokio::test]
    async fn test_http_failure_backfills_from_icmp() {
        let (p, _, _) = prober(healthy_ping(), HttpOutcome::failed("tls handshake"));
        let ep = Endpoint::new("Site", "www.example.com", ProbeMethod::Http);
        let m = p.probe(&ep).await;

        assert_eq!(m.method, ProbeMethod::Icmp);
        assert_eq!(m.avg_ms, Some(25.0));
        assert_eq!(m.min_ms, Some(10.0));
        assert_eq!(m.max_ms, Some(40.0));
        assert_eq!(m.rtts.len(), 4);
        assert!(m.http_status.is_none());
        assert_eq!(m.error.as_deref(), Some("tls handshake"));
    }

    #[tokio::test]
    async fn test_http_first_records_ping_error_when_http_succeeds() {
        let (p, _, _) = prober(PingStats::total_loss(4, "failed to execute ping"), http_ok(80.0));
        let ep = Endpoint::new("Site", "www.example.com", ProbeMethod::Http);
        let m = p.probe(&ep).await;

        assert_eq!(m.method, ProbeMethod::Http);
        assert_eq!(m.avg_ms, Some(80.0));
        assert_eq!(m.packet_loss_pct, Some(100.0));
        assert_eq!(m.error.as_deref(), Some("failed to execute ping"));
    }

    #[tokio::test]
    async fn test_measurement_invariants_hold() {
        let cases = vec![
            (healthy_ping(), http_ok(10.0)),
            (PingStats::total_loss(4, "x"), http_ok(10.0)),
            (PingStats::total_loss(4, "x"), HttpOutcome::failed("y")),
            (parse_ping_output("time=5ms", 4), HttpOutcome::failed("y")),
        ];
        for method in [ProbeMethod::Icmp, ProbeMethod::Http] {
            for (stats, outcome) in cases.clone() {
                let (p, _, _) = prober(stats, outcome);
                let m = p.probe(&Endpoint::new("e", "h", method)).await;

                if let (Some(sent), Some(received)) = (m.sent, m.received) {
                    assert!(received <= sent);
                }
                if let (Some(loss), Some(received)) = (m.packet_loss_pct, m.received) {
                    assert_eq!(loss == 100.0, received == 0);
                }
                let http_timing = m.method == ProbeMethod::Http && m.avg_ms.is_some();
                assert_eq!(m.avg_ms.is_none(), m.rtts.is_empty() && !http_timing);
            }
        }
    }
}
