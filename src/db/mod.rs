//! Database module for netprobe.
//!
//! Append-only persistence: SQLite tables plus CSV logs.

mod flat_log;
mod models;
mod recorder;
mod store;

pub use flat_log::*;
pub use models::*;
pub use recorder::*;
pub use store::*;
