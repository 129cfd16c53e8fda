//! Scheduler module for running probe cycles.
//!
//! A cycle probes every endpoint with bounded parallelism, then persists each
//! measurement, evaluates and persists its alerts and forwards it to the sink.
//! Continuous mode repeats cycles on a wall-clock interval until stopped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;

use crate::alert::{evaluate_alerts, AlertThresholds};
use crate::config::Endpoint;
use crate::db::{Measurement, Recorder};
use crate::probe::Prober;
use crate::sink::SinkDispatcher;

/// How many cycles to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Exactly one cycle.
    Once,
    /// Cycles every `interval` until stopped.
    Continuous { interval: Duration },
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Endpoints that produced a measurement.
    pub probed: usize,
    /// Endpoints whose probe task died.
    pub failed: usize,
    pub alerts: usize,
    /// The cycle was cut short by a stop signal.
    pub interrupted: bool,
}

/// Time to wait before the next cycle. Zero when the cycle overran.
pub fn sleep_duration(interval: Duration, cycle_time: Duration) -> Duration {
    interval.saturating_sub(cycle_time)
}

/// Drives probe cycles over a fixed set of endpoints.
pub struct Scheduler {
    endpoints: Vec<Endpoint>,
    prober: Arc<dyn Prober>,
    recorder: Recorder,
    thresholds: AlertThresholds,
    sink: SinkDispatcher,
    max_concurrent: usize,
}

impl Scheduler {
    pub fn new(
        endpoints: Vec<Endpoint>,
        prober: Arc<dyn Prober>,
        recorder: Recorder,
        thresholds: AlertThresholds,
        sink: SinkDispatcher,
    ) -> Self {
        Self {
            endpoints,
            prober,
            recorder,
            thresholds,
            sink,
            max_concurrent: 4,
        }
    }

    /// Limit how many probes are in flight at once (at least 1).
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Run cycles according to `mode`. Returns the number of completed cycles.
    ///
    /// Any message on `stop_rx`, or the sender being dropped, stops the loop
    /// at the next await point: either the inter-cycle sleep or while waiting
    /// on probes.
    pub async fn run(&self, mode: RunMode, stop_rx: &mut broadcast::Receiver<()>) -> u64 {
        tracing::info!("Starting scheduler with {} endpoints", self.endpoints.len());
        let mut completed = 0;

        loop {
            let started = Instant::now();
            let report = self.run_cycle(stop_rx).await;
            let elapsed = started.elapsed();

            if report.interrupted {
                tracing::info!("Stopping by request during a cycle");
                break;
            }
            completed += 1;
            tracing::info!(
                "Cycle {} finished in {:.1}s: {} probed, {} failed, {} alerts",
                completed,
                elapsed.as_secs_f64(),
                report.probed,
                report.failed,
                report.alerts
            );

            let interval = match mode {
                RunMode::Once => break,
                RunMode::Continuous { interval } => interval,
            };

            let pause = sleep_duration(interval, elapsed);
            if pause.is_zero() {
                tracing::warn!(
                    "Cycle took {:.1}s, longer than the {:.1}s interval; starting next cycle now",
                    elapsed.as_secs_f64(),
                    interval.as_secs_f64()
                );
            }

            tokio::select! {
                _ = stop_rx.recv() => {
                    tracing::info!("Stopping by request");
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        completed
    }

    /// Probe every endpoint once and persist the results.
    ///
    /// A panicking probe only costs its own endpoint. Rows are written between
    /// await points, so a stop never leaves a partial row behind.
    pub async fn run_cycle(&self, stop_rx: &mut broadcast::Receiver<()>) -> CycleReport {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        for endpoint in self.endpoints.iter().cloned() {
            let prober = self.prober.clone();
            let semaphore = semaphore.clone();
            let label = format!("{} ({})", endpoint.name, endpoint.host);

            let handle = tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                tracing::info!("Probing {} ({}) ...", endpoint.name, endpoint.host);
                prober.probe(&endpoint).await
            });
            names.insert(handle.id(), label);
        }

        let mut report = CycleReport::default();

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    tasks.abort_all();
                    report.interrupted = true;
                    break;
                }
                joined = tasks.join_next_with_id() => match joined {
                    None => break,
                    Some(Ok((_, measurement))) => {
                        report.probed += 1;
                        report.alerts += self.handle_measurement(measurement).await;
                    }
                    Some(Err(e)) => {
                        report.failed += 1;
                        let label = names.get(&e.id()).map(String::as_str).unwrap_or("unknown endpoint");
                        tracing::error!("Probe of {} failed: {}", label, e);
                    }
                },
            }
        }

        report
    }

    /// Persist `m`, then derive and persist its alerts, then forward it.
    /// Returns the number of alerts raised.
    ///
    /// Writes run on the blocking pool since SQLite may wait on a lock held
    /// by another process.
    async fn handle_measurement(&self, m: Measurement) -> usize {
        let recorder = self.recorder.clone();
        let thresholds = self.thresholds;
        let written = tokio::task::spawn_blocking(move || {
            let persisted = recorder.record_measurement(&m);
            let alerts = evaluate_alerts(&m, &thresholds);
            for alert in &alerts {
                tracing::warn!("ALERT: {} {}", alert.host, alert.message);
            }
            recorder.record_alerts(&alerts, persisted);
            (m, persisted, alerts.len())
        })
        .await;

        let (m, persisted, alerts) = match written {
            Ok(written) => written,
            Err(e) => {
                tracing::error!("Recording a measurement failed: {}", e);
                return 0;
            }
        };

        tracing::info!(
            "Recorded: host={} method={} avg_ms={:?} loss={:?}",
            m.host,
            m.method,
            m.avg_ms,
            m.packet_loss_pct
        );

        if persisted.db || persisted.log {
            self.sink.dispatch(m);
        }

        alerts
    }
}
