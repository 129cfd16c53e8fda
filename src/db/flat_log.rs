//! Append-only CSV logs mirroring the `probes` and `alerts` tables.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::models::*;

/// Column order of the probe log.
pub const PROBE_LOG_HEADER: [&str; 13] = [
    "timestamp",
    "name",
    "host",
    "method",
    "avg_ms",
    "min_ms",
    "max_ms",
    "rtts",
    "sent",
    "received",
    "packet_loss_pct",
    "http_status",
    "error",
];

/// Column order of the alert log.
pub const ALERT_LOG_HEADER: [&str; 7] = [
    "timestamp",
    "name",
    "host",
    "metric",
    "value",
    "threshold",
    "message",
];

/// Flat log error types.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed row {row}: {reason}")]
    Malformed { row: usize, reason: String },
}

/// A CSV file that only ever grows.
#[derive(Debug, Clone)]
pub struct FlatLog {
    path: PathBuf,
    header: &'static [&'static str],
}

impl FlatLog {
    pub fn new(path: impl Into<PathBuf>, header: &'static [&'static str]) -> Self {
        Self {
            path: path.into(),
            header,
        }
    }

    pub fn probes(path: impl Into<PathBuf>) -> Self {
        Self::new(path, &PROBE_LOG_HEADER)
    }

    pub fn alerts(path: impl Into<PathBuf>) -> Self {
        Self::new(path, &ALERT_LOG_HEADER)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, writing the header first if the file is new or empty.
    pub fn append(&self, record: &[String]) -> Result<(), LogError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;
        let needs_header = file
            .metadata()
            .map_err(|source| self.io_error(source))?
            .len()
            == 0;

        let mut writer = csv::Writer::from_writer(file);
        if needs_header {
            writer.write_record(self.header)?;
        }
        writer.write_record(record)?;
        writer.flush().map_err(|source| self.io_error(source))?;
        Ok(())
    }

    pub fn append_probe(&self, m: &Measurement) -> Result<(), LogError> {
        self.append(&probe_record(m))
    }

    pub fn append_alert(&self, a: &Alert) -> Result<(), LogError> {
        self.append(&alert_record(a))
    }

    /// Read every row of a probe log back into measurements.
    pub fn read_probes(&self) -> Result<Vec<Measurement>, LogError> {
        let file = File::open(&self.path).map_err(|source| self.io_error(source))?;
        let mut reader = csv::Reader::from_reader(file);

        let mut probes = Vec::new();
        for (i, record) in reader.records().enumerate() {
            probes.push(probe_from_record(&record?).map_err(|reason| LogError::Malformed {
                row: i + 1,
                reason,
            })?);
        }
        Ok(probes)
    }

    fn io_error(&self, source: std::io::Error) -> LogError {
        LogError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// Nulls become empty fields.
fn probe_record(m: &Measurement) -> Vec<String> {
    vec![
        m.timestamp_str(),
        m.name.clone(),
        m.host.clone(),
        m.method.to_string(),
        opt(&m.avg_ms),
        opt(&m.min_ms),
        opt(&m.max_ms),
        m.rtts_json(),
        opt(&m.sent),
        opt(&m.received),
        opt(&m.packet_loss_pct),
        opt(&m.http_status),
        opt(&m.error),
    ]
}

fn alert_record(a: &Alert) -> Vec<String> {
    vec![
        a.timestamp_str(),
        a.name.clone(),
        a.host.clone(),
        a.metric.to_string(),
        a.value.to_string(),
        a.threshold.to_string(),
        a.message.clone(),
    ]
}

fn field<'r>(record: &'r csv::StringRecord, idx: usize) -> Result<&'r str, String> {
    record
        .get(idx)
        .ok_or_else(|| format!("missing column {}", PROBE_LOG_HEADER[idx]))
}

fn nullable<T: std::str::FromStr>(record: &csv::StringRecord, idx: usize) -> Result<Option<T>, String> {
    let raw = field(record, idx)?;
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| format!("invalid {}: {}", PROBE_LOG_HEADER[idx], raw))
}

fn probe_from_record(record: &csv::StringRecord) -> Result<Measurement, String> {
    let timestamp = field(record, 0)?;
    let rtts = field(record, 7)?;
    let error = field(record, 12)?;

    Ok(Measurement {
        timestamp: parse_timestamp(timestamp)
            .ok_or_else(|| format!("invalid timestamp: {}", timestamp))?,
        name: field(record, 1)?.to_string(),
        host: field(record, 2)?.to_string(),
        method: field(record, 3)?.parse()?,
        avg_ms: nullable(record, 4)?,
        min_ms: nullable(record, 5)?,
        max_ms: nullable(record, 6)?,
        rtts: serde_json::from_str(rtts).map_err(|e| format!("invalid rtts: {}", e))?,
        sent: nullable(record, 8)?,
        received: nullable(record, 9)?,
        packet_loss_pct: nullable(record, 10)?,
        http_status: nullable(record, 11)?,
        error: (!error.is_empty()).then(|| error.to_string()),
    })
}
