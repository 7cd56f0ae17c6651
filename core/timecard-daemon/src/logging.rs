use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const DEBUG_ENV: &str = "TIMECARD_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "timecard-daemon.log";

/// Installs the global subscriber. Logs go to stderr so stdout stays free for
/// the display sink, or to a daily rolling file when `directory` is set.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the background file writer.
pub fn init(debug_config: bool, directory: Option<&Path>) -> Option<WorkerGuard> {
    let filter = if debug_enabled() || debug_config {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    match directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

fn debug_enabled() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}
