//! Ping output parsing.
//!
//! Ping text differs by platform and locale, so summary lines are tried
//! against an ordered list of named matchers. When none match, packet counts
//! are estimated from the number of per-packet RTT tokens. Parsing never fails.

use std::sync::OnceLock;

use regex::Regex;

/// Packet counts taken from a ping summary line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketSummary {
    pub sent: u32,
    pub received: u32,
    pub loss_pct: f64,
}

/// Structured statistics for one ICMP probe.
#[derive(Debug, Clone, PartialEq)]
pub struct PingStats {
    pub sent: u32,
    pub received: u32,
    pub loss_pct: f64,
    pub rtts: Vec<u32>,
    pub avg_ms: Option<f64>,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    /// Set when the ping process could not be run to completion.
    pub error: Option<String>,
}

impl PingStats {
    /// Statistics for a probe whose process failed to launch or timed out.
    pub fn total_loss(count: u32, error: impl Into<String>) -> Self {
        Self {
            sent: count,
            received: 0,
            loss_pct: 100.0,
            rtts: Vec::new(),
            avg_ms: None,
            min_ms: None,
            max_ms: None,
            error: Some(error.into()),
        }
    }
}

/// A named summary-line pattern.
struct SummaryMatcher {
    name: &'static str,
    parse: fn(&str) -> Option<PacketSummary>,
}

/// Tried in order; the first match wins.
const SUMMARY_MATCHERS: &[SummaryMatcher] = &[
    SummaryMatcher {
        name: "windows",
        parse: match_windows_summary,
    },
    SummaryMatcher {
        name: "posix",
        parse: match_posix_summary,
    },
];

/// Parse raw ping output into statistics.
///
/// `configured_count` is the number of echo requests that were asked for; it
/// is used when no summary line can be recognized.
pub fn parse_ping_output(output: &str, configured_count: u32) -> PingStats {
    let rtts = extract_rtts(output);

    let summary = SUMMARY_MATCHERS.iter().find_map(|m| {
        let found = (m.parse)(output);
        if found.is_some() {
            tracing::trace!("ping output matched {} summary", m.name);
        }
        found
    });

    let summary = summary.unwrap_or_else(|| fallback_summary(configured_count, rtts.len()));
    let summary = normalize(summary);

    let (avg_ms, min_ms, max_ms) = summarize_rtts(&rtts);

    PingStats {
        sent: summary.sent,
        received: summary.received,
        loss_pct: summary.loss_pct,
        rtts,
        avg_ms,
        min_ms,
        max_ms,
        error: None,
    }
}

/// Every `time=<n>ms`, `time=<n.n> ms` or `time<1ms` token, in order.
///
/// Fractional values are rounded to whole milliseconds; `time<N` is recorded
/// as 0, i.e. "below one millisecond".
pub fn extract_rtts(output: &str) -> Vec<u32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"time(?P<op>[=<])\s*(?P<val>\d+(?:\.\d+)?)\s*ms").expect("valid rtt regex")
    });

    re.captures_iter(output)
        .filter_map(|caps| {
            if &caps["op"] == "<" {
                return Some(0);
            }
            caps["val"]
                .parse::<f64>()
                .ok()
                .map(|ms| ms.round().max(0.0) as u32)
        })
        .collect()
}

/// `Packets: Sent = 4, Received = 4, Lost = 0 (0% loss)`
fn match_windows_summary(output: &str) -> Option<PacketSummary> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"Packets:\s*Sent\s*=\s*(\d+),\s*Received\s*=\s*(\d+),\s*Lost\s*=\s*(\d+)\s*\((\d+(?:\.\d+)?)%\s*loss\)",
        )
        .expect("valid windows summary regex")
    });

    let caps = re.captures(output)?;
    Some(PacketSummary {
        sent: caps[1].parse().ok()?,
        received: caps[2].parse().ok()?,
        loss_pct: caps[4].parse().ok()?,
    })
}

/// `4 packets transmitted, 4 received, 0% packet loss` (Linux) or
/// `4 packets transmitted, 4 packets received, 0.0% packet loss` (BSD/macOS).
fn match_posix_summary(output: &str) -> Option<PacketSummary> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"(\d+)\s+packets?\s+transmitted,\s+(\d+)\s+(?:packets?\s+)?received,.*?(\d+(?:\.\d+)?)%\s+packet\s+loss",
        )
        .expect("valid posix summary regex")
    });

    let caps = re.captures(output)?;
    Some(PacketSummary {
        sent: caps[1].parse().ok()?,
        received: caps[2].parse().ok()?,
        loss_pct: caps[3].parse().ok()?,
    })
}

/// Estimate counts from the RTT tokens that were seen.
fn fallback_summary(configured_count: u32, replies: usize) -> PacketSummary {
    let sent = configured_count;
    let received = (replies as u32).min(sent);
    let loss_pct = if sent == 0 {
        100.0
    } else {
        (sent - received) as f64 / sent as f64 * 100.0
    };
    PacketSummary {
        sent,
        received,
        loss_pct,
    }
}

/// Keep `received <= sent` and total loss consistent with zero replies.
fn normalize(mut summary: PacketSummary) -> PacketSummary {
    summary.received = summary.received.min(summary.sent);
    summary.loss_pct = summary.loss_pct.clamp(0.0, 100.0);

    if summary.received == 0 {
        summary.loss_pct = 100.0;
    } else if summary.loss_pct >= 100.0 {
        summary.loss_pct =
            (summary.sent - summary.received) as f64 / summary.sent as f64 * 100.0;
    }
    summary
}

/// Mean, min and max of the samples, or all `None` when there are none.
pub fn summarize_rtts(rtts: &[u32]) -> (Option<f64>, Option<f64>, Option<f64>) {
    if rtts.is_empty() {
        return (None, None, None);
    }
    let sum: f64 = rtts.iter().map(|&r| r as f64).sum();
    let avg = sum / rtts.len() as f64;
    let min = rtts.iter().copied().min().map(|v| v as f64);
    let max = rtts.iter().copied().max().map(|v| v as f64);
    (Some(avg), min, max)
}
