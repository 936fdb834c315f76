//! Logging setup for duosync
//!
//! Console output always goes to stderr. With `--log-file`, a detailed trace
//! log is also written to `<data_dir>/logs/duosync-{uuid}.log`.

use std::path::PathBuf;

use tracing_subscriber::Layer as _;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Log file info returned when file logging is enabled.
///
/// Keeps the file logger alive until dropped.
pub struct LogFile {
    pub path: PathBuf,
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Initialize console logging, plus file logging if `log_dir` is given.
///
/// The returned guard must be kept alive for the duration of the program.
///
/// # Errors
/// Returns an error if the log directory can't be created.
pub fn init(verbose: bool, log_dir: Option<PathBuf>) -> color_eyre::Result<Option<LogFile>> {
    let console_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_level);

    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry().with(console_layer).init();
        return Ok(None);
    };

    std::fs::create_dir_all(&log_dir)?;
    let log_filename = format!("duosync-{}.log", uuid::Uuid::new_v4());
    let log_path = log_dir.join(&log_filename);

    let file_appender = tracing_appender::rolling::never(&log_dir, &log_filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // File layer: everything from duosync crates
    let file_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,duosync=trace,duosync_core=trace"));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(file_filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(Some(LogFile {
        path: log_path,
        _guard: guard,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Installs the global subscriber, so this is the only test that may call `init`.
    #[test]
    fn test_log_file_flushed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = init(false, Some(dir.path().to_path_buf())).unwrap().unwrap();
        let path = log_file.path.clone();
        assert!(path.starts_with(dir.path()));

        tracing::error!("written before drop");
        drop(log_file);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("written before drop"), "{contents}");
    }
}
