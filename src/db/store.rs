//! SQLite database store implementation.

use rusqlite::types::Type;
use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("database connection lock poisoned")]
    Poisoned,
}

/// Thread-safe, append-only probe and alert store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        // Waits out a concurrent reader such as the dashboard.
        conn.busy_timeout(Duration::from_secs(30))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Probes ---

    /// Append a measurement and return its row ID.
    pub fn insert_probe(&self, m: &Measurement) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO probes (timestamp, name, host, method, avg_ms, min_ms, max_ms, rtts, sent, received, packet_loss_pct, http_status, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                m.timestamp_str(),
                m.name,
                m.host,
                m.method.as_str(),
                m.avg_ms,
                m.min_ms,
                m.max_ms,
                m.rtts_json(),
                m.sent,
                m.received,
                m.packet_loss_pct,
                m.http_status,
                m.error,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The newest `limit` measurements, oldest first.
    pub fn recent_probes(&self, limit: u32) -> Result<Vec<Measurement>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, name, host, method, avg_ms, min_ms, max_ms, rtts, sent, received, packet_loss_pct, http_status, error
             FROM probes ORDER BY id DESC LIMIT ?1",
        )?;

        let mut probes = stmt
            .query_map(params![limit], probe_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        probes.reverse();

        Ok(probes)
    }

    // --- Alerts ---

    /// Append an alert and return its row ID.
    pub fn insert_alert(&self, a: &Alert) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO alerts (timestamp, name, host, metric, value, threshold, message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                a.timestamp_str(),
                a.name,
                a.host,
                a.metric.as_str(),
                a.value,
                a.threshold,
                a.message,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The newest `limit` alerts, oldest first.
    pub fn recent_alerts(&self, limit: u32) -> Result<Vec<Alert>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, name, host, metric, value, threshold, message
             FROM alerts ORDER BY id DESC LIMIT ?1",
        )?;

        let mut alerts = stmt
            .query_map(params![limit], |row| {
                Ok(Alert {
                    timestamp: timestamp_column(row, 0)?,
                    name: row.get(1)?,
                    host: row.get(2)?,
                    metric: parsed_column(row, 3)?,
                    value: row.get(4)?,
                    threshold: row.get(5)?,
                    message: row.get(6)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        alerts.reverse();

        Ok(alerts)
    }
}

fn probe_from_row(row: &Row<'_>) -> SqlResult<Measurement> {
    let rtts: String = row.get(7)?;
    let rtts = serde_json::from_str(&rtts)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

    Ok(Measurement {
        timestamp: timestamp_column(row, 0)?,
        name: row.get(1)?,
        host: row.get(2)?,
        method: parsed_column(row, 3)?,
        avg_ms: row.get(4)?,
        min_ms: row.get(5)?,
        max_ms: row.get(6)?,
        rtts,
        sent: row.get(8)?,
        received: row.get(9)?,
        packet_loss_pct: row.get(10)?,
        http_status: row.get(11)?,
        error: row.get(12)?,
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> SqlResult<chrono::DateTime<chrono::Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp: {}", raw).into(),
        )
    })
}

fn parsed_column<T>(row: &Row<'_>, idx: usize) -> SqlResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{evaluate_alerts, AlertThresholds};
    use crate::config::Endpoint;
    use chrono::Utc;
    use tempfile::NamedTempFile;
    use tokio_test::assert_ok;

    fn sample_measurement() -> Measurement {
        let ep = Endpoint::new("Google DNS", "8.8.8.8", ProbeMethod::Icmp);
        let mut m = Measurement::new(&ep, Utc::now());
        m.avg_ms = Some(250.0);
        m.min_ms = Some(240.0);
        m.max_ms = Some(260.0);
        m.rtts = vec![240, 250, 250, 260];
        m.sent = Some(4);
        m.received = Some(4);
        m.packet_loss_pct = Some(0.0);
        m
    }

    #[test]
    fn test_probe_insert_and_read_back() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let m = sample_measurement();
        let id = store.insert_probe(&m).unwrap();
        assert!(id > 0);

        let mut failed = Measurement::new(
            &Endpoint::new("Bing", "www.bing.com", ProbeMethod::Http),
            Utc::now(),
        );
        failed.method = ProbeMethod::Http;
        failed.error = Some("dns error".to_string());
        let id2 = store.insert_probe(&failed).unwrap();
        assert!(id2 > id);

        let probes = store.recent_probes(10).unwrap();
        assert_eq!(probes.len(), 2);
        assert_eq!(probes[0].rtts, m.rtts);
        assert_eq!(probes[0].avg_ms, Some(250.0));
        assert_eq!(probes[0].timestamp_str(), m.timestamp_str());
        assert_eq!(probes[1].method, ProbeMethod::Http);
        assert!(probes[1].avg_ms.is_none());
        assert!(probes[1].rtts.is_empty());
        assert_eq!(probes[1].error.as_deref(), Some("dns error"));
    }

    #[test]
    fn test_alerts_insert_and_read_back() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let m = sample_measurement();
        assert_ok!(store.insert_probe(&m));
        for alert in evaluate_alerts(&m, &AlertThresholds::default()) {
            assert_ok!(store.insert_alert(&alert));
        }

        let alerts = store.recent_alerts(10).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, AlertMetric::LatencyMs);
        assert_eq!(alerts[0].host, m.host);
        assert_eq!(alerts[0].timestamp_str(), m.timestamp_str());
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let store = Store::new(tmp.path()).unwrap();
            store.insert_probe(&sample_measurement()).unwrap();
        }
        let store = Store::new(tmp.path()).unwrap();
        store.insert_probe(&sample_measurement()).unwrap();
        assert_eq!(store.recent_probes(10).unwrap().len(), 2);
        assert_eq!(store.recent_probes(1).unwrap().len(), 1);
    }
}
