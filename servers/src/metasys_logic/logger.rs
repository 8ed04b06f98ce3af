use anyhow::{Context, Result};
use lib_ingest::loggers::{self, LogOptions};
use tracing_appender::non_blocking::WorkerGuard;

/// Installs console and daily file logging for the service.
///
/// The returned guard must live until shutdown.
pub fn setup_logging(options: &LogOptions) -> Result<WorkerGuard> {
    let options = LogOptions { file_prefix: "server_metasys".to_string(), ..options.clone() };
    loggers::init(&options).with_context(|| format!("failed to initialise logging in {}", options.dir.display()))
}
