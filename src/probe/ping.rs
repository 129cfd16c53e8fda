//! ICMP probe via the system `ping` executable.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::parse::{parse_ping_output, PingStats};
use super::ProbeError;

/// Extra time granted to the ping process on top of the per-packet budget.
const PROCESS_SAFETY_MARGIN: Duration = Duration::from_secs(5);

/// Runs one ICMP probe against a host.
#[async_trait]
pub trait PingRunner: Send + Sync {
    /// Never fails: launch errors and timeouts degrade to total loss.
    async fn ping(&self, host: &str) -> PingStats;
}

/// Packet count and per-packet timeout for an ICMP probe.
#[derive(Debug, Clone, Copy)]
pub struct PingOptions {
    pub count: u32,
    pub timeout: Duration,
}

impl PingOptions {
    pub fn new(count: u32, timeout: Duration) -> Self {
        Self { count, timeout }
    }

    /// Upper bound on the whole ping process: `count * timeout + 5s`.
    pub fn process_timeout(&self) -> Duration {
        self.timeout * self.count + PROCESS_SAFETY_MARGIN
    }
}

/// [`PingRunner`] backed by the platform `ping` command.
#[derive(Debug, Clone)]
pub struct CommandPing {
    program: String,
    options: PingOptions,
}

impl CommandPing {
    pub fn new(options: PingOptions) -> Self {
        Self {
            program: "ping".to_string(),
            options,
        }
    }

    /// Use a different executable than `ping` from `PATH`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl PingRunner for CommandPing {
    async fn ping(&self, host: &str) -> PingStats {
        match run_ping_command(&self.program, host, &self.options).await {
            Ok(output) => parse_ping_output(&output, self.options.count),
            Err(e) => {
                tracing::warn!("Ping to {} failed: {}", host, e);
                PingStats::total_loss(self.options.count, e.to_string())
            }
        }
    }
}

/// Which `ping` command-line dialect to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingFlavor {
    /// `-n <count> -w <timeout_ms>`
    Windows,
    /// `-c <count> -W <timeout_ms>` (macOS and the BSDs)
    Bsd,
    /// `-c <count> -W <timeout_s>` (iputils and busybox)
    Linux,
}

impl PingFlavor {
    pub fn current() -> Self {
        if cfg!(windows) {
            PingFlavor::Windows
        } else if cfg!(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )) {
            PingFlavor::Bsd
        } else {
            PingFlavor::Linux
        }
    }
}

/// Command-line arguments for `flavor`.
fn ping_args(host: &str, options: &PingOptions, flavor: PingFlavor) -> Vec<String> {
    let (count_flag, wait_flag, wait) = match flavor {
        PingFlavor::Windows => ("-n", "-w", options.timeout.as_millis()),
        PingFlavor::Bsd => ("-c", "-W", options.timeout.as_millis().max(1)),
        // Whole seconds only.
        PingFlavor::Linux => ("-c", "-W", u128::from(options.timeout.as_secs().max(1))),
    };

    vec![
        count_flag.to_string(),
        options.count.to_string(),
        wait_flag.to_string(),
        wait.to_string(),
        host.to_string(),
    ]
}

/// Run ping and return its combined stdout and stderr.
///
/// A non-zero exit status is not an error: ping exits non-zero on packet
/// loss, and the output still carries the statistics.
async fn run_ping_command(
    program: &str,
    host: &str,
    options: &PingOptions,
) -> Result<String, ProbeError> {
    let limit = options.process_timeout();

    let child = Command::new(program)
        .args(ping_args(host, options, PingFlavor::current()))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(limit, child)
        .await
        .map_err(|_| ProbeError::Timeout(limit))?
        .map_err(|e| ProbeError::Command(format!("failed to execute {}: {}", program, e)))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text)
}
