//! Writes measurements and alerts to both the SQLite store and the flat logs.

use std::path::{Path, PathBuf};

use super::flat_log::FlatLog;
use super::models::*;
use super::store::{DbError, Store};

pub const DB_FILE: &str = "metrics.db";
pub const PROBE_LOG_FILE: &str = "probes.csv";
pub const ALERT_LOG_FILE: &str = "alerts.csv";

/// Which sinks accepted a measurement row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persisted {
    pub db: bool,
    pub log: bool,
}

impl Persisted {
    pub fn all(&self) -> bool {
        self.db && self.log
    }
}

/// Persistence for one process. Sinks fail independently; every failure is
/// logged at ERROR since it means lost data.
#[derive(Clone)]
pub struct Recorder {
    store: Store,
    probe_log: FlatLog,
    alert_log: FlatLog,
}

impl Recorder {
    pub fn new(store: Store, probe_log: FlatLog, alert_log: FlatLog) -> Self {
        Self {
            store,
            probe_log,
            alert_log,
        }
    }

    /// Open `metrics.db`, `probes.csv` and `alerts.csv` under `data_dir`,
    /// creating the directory if needed.
    pub fn open(data_dir: &Path) -> Result<Self, DbError> {
        std::fs::create_dir_all(data_dir)?;
        let store = Store::new(data_dir.join(DB_FILE))?;
        Ok(Self::new(
            store,
            FlatLog::probes(data_dir.join(PROBE_LOG_FILE)),
            FlatLog::alerts(data_dir.join(ALERT_LOG_FILE)),
        ))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn probe_log_path(&self) -> PathBuf {
        self.probe_log.path().to_path_buf()
    }

    /// Append `m` to both sinks.
    pub fn record_measurement(&self, m: &Measurement) -> Persisted {
        let db = match self.store.insert_probe(m) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to store probe for {} ({}): {}", m.name, m.host, e);
                false
            }
        };

        let log = match self.probe_log.append_probe(m) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to log probe for {} ({}): {}", m.name, m.host, e);
                false
            }
        };

        Persisted { db, log }
    }

    /// Append `alerts` to each sink that already holds their measurement.
    ///
    /// Returns the number of alert rows written across both sinks.
    pub fn record_alerts(&self, alerts: &[Alert], measurement: Persisted) -> usize {
        let mut written = 0;

        for alert in alerts {
            if measurement.db {
                match self.store.insert_alert(alert) {
                    Ok(_) => written += 1,
                    Err(e) => tracing::error!(
                        "Failed to store {} alert for {}: {}",
                        alert.metric,
                        alert.host,
                        e
                    ),
                }
            }
            if measurement.log {
                match self.alert_log.append_alert(alert) {
                    Ok(()) => written += 1,
                    Err(e) => tracing::error!(
                        "Failed to log {} alert for {}: {}",
                        alert.metric,
                        alert.host,
                        e
                    ),
                }
            }
        }

        if !alerts.is_empty() && !measurement.all() {
            tracing::error!(
                "Skipped alert rows for {} in sinks missing its probe row (db={}, log={})",
                alerts[0].host,
                measurement.db,
                measurement.log
            );
        }

        written
    }
}
