//! Tracing setup: console output plus a persistent `probe.log` in the data
//! directory.

use std::fs::OpenOptions;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE: &str = "probe.log";

/// Non-blocking writer appending to `<data_dir>/probe.log`.
///
/// Lines are flushed by a background thread until the guard is dropped.
pub fn log_file_writer(data_dir: &Path) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(data_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(data_dir.join(LOG_FILE))?;
    Ok(tracing_appender::non_blocking(file))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file lines are lost.
pub fn init(data_dir: &Path) -> Result<WorkerGuard, Box<dyn std::error::Error + Send + Sync>> {
    let (file_writer, guard) = log_file_writer(data_dir)?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .with(EnvFilter::from_default_env().add_directive("netprobe=info".parse()?))
        .try_init()?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_events_reach_log_file() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data");

        let (writer, guard) = log_file_writer(&data).unwrap();
        let subscriber = tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(writer));
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("Failed to store probe for Google (www.google.com)");
        });
        drop(guard);

        let contents = std::fs::read_to_string(data.join(LOG_FILE)).unwrap();
        assert!(contents.contains("ERROR"));
        assert!(contents.contains("Failed to store probe for Google (www.google.com)"));
    }

    #[test]
    fn test_log_file_is_appended_across_runs() {
        let dir = tempdir().unwrap();

        for run in ["first run", "second run"] {
            let (writer, guard) = log_file_writer(dir.path()).unwrap();
            let subscriber = tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(writer));
            tracing::subscriber::with_default(subscriber, || tracing::info!("{}", run));
            drop(guard);
        }

        let contents = std::fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
        let first = contents.find("first run").unwrap();
        let second = contents.find("second run").unwrap();
        assert!(first < second);
    }
}
