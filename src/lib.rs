//! netprobe - endpoint reachability and latency monitoring.
//!
//! Probes a fixed set of endpoints with `ping` and HTTP, stores every
//! measurement in SQLite and CSV, and records threshold alerts.

pub mod alert;
pub mod config;
pub mod db;
pub mod logging;
pub mod probe;
pub mod scheduler;
pub mod sink;
