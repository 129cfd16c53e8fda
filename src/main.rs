//! netprobe - probe endpoints on an interval and record the results.
//!
//! Run once: `netprobe --once`
//! Run continuously: `netprobe --interval 5` (minutes)

use clap::Parser;
use netprobe::alert::AlertThresholds;
use netprobe::config::ProbeConfig;
use netprobe::db::Recorder;
use netprobe::logging;
use netprobe::probe::ReachabilityProber;
use netprobe::scheduler::{RunMode, Scheduler};
use netprobe::sink::{sink_from_config, SinkDispatcher};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Endpoint reachability and latency prober
#[derive(Parser, Debug)]
#[command(name = "netprobe", version, about, long_about = None)]
struct Cli {
    /// Run a single probe cycle and exit
    #[arg(long)]
    once: bool,

    /// Minutes between cycles in continuous mode
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// JSON file with endpoints and thresholds (built-in defaults otherwise)
    #[arg(short, long, env = "NETPROBE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for metrics.db, probes.csv, alerts.csv and probe.log
    #[arg(long, default_value = "data", env = "NETPROBE_DATA_DIR")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Initialize logging; the guard flushes probe.log on exit
    let _log_guard = logging::init(&cli.data_dir)?;

    // Load configuration
    let cfg = ProbeConfig::load(cli.config.as_deref())?;
    tracing::info!("Monitoring {} endpoints", cfg.endpoints.len());

    // Initialize storage
    let recorder = Recorder::open(&cli.data_dir)?;
    tracing::info!("Writing results under {}", cli.data_dir.display());

    let prober = Arc::new(ReachabilityProber::from_config(&cfg)?);
    let sink = sink_from_config(cfg.ingest.as_ref(), cfg.ingest_timeout())?;

    let scheduler = Scheduler::new(
        cfg.endpoints.clone(),
        prober,
        recorder,
        AlertThresholds::from_config(&cfg),
        SinkDispatcher::new(sink, cfg.ingest_timeout()),
    )
    .with_max_concurrent(cfg.max_concurrent_probes);

    // Ctrl+C stops the scheduler; stop_tx stays alive so the channel never closes early
    let (stop_tx, mut stop_rx) = broadcast::channel(1);
    let stop_signal = stop_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received, shutting down");
                let _ = stop_signal.send(());
            }
            Err(e) => tracing::warn!("Cannot listen for Ctrl+C: {}", e),
        }
    });

    let mode = if cli.once {
        RunMode::Once
    } else {
        tracing::info!(
            "Starting continuous probe (every {} minute(s)). Ctrl+C to stop.",
            cli.interval
        );
        RunMode::Continuous {
            interval: Duration::from_secs(cli.interval * 60),
        }
    };

    scheduler.run(mode, &mut stop_rx).await;
    drop(stop_tx);

    Ok(())
}
