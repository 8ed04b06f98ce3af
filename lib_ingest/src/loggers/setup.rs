//! # Tracing Setup
//!
//! Installs the process-wide `tracing` subscriber: an `EnvFilter` (the
//! configured level unless `RUST_LOG` says otherwise), a console layer and a
//! daily-rotated file layer behind a non-blocking writer. Old log files are
//! pruned before the new one is opened.

use std::fs;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{IngestError, IngestResult};

const LOG_SUFFIX: &str = "log";

/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub dir: PathBuf,
    /// File name prefix, usually the binary name.
    pub file_prefix: String,
    /// Default filter directive, e.g. `info` or `lib_ingest=debug,info`.
    pub level: String,
    /// Emit JSON lines to the file instead of plain text.
    pub json_file: bool,
    /// Log files kept on startup, the newest first.
    pub keep_files: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_prefix: "server_metasys".to_string(),
            level: "info".to_string(),
            json_file: false,
            keep_files: 5,
        }
    }
}

/// `RUST_LOG` when set and valid, otherwise `level`.
pub fn env_filter(level: &str) -> IngestResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| IngestError::Config(format!("invalid log level '{}': {}", level, e)))
}

/// Non-blocking writer for the daily rotated file `<prefix>.<date>.log`.
pub fn file_writer(dir: &Path, prefix: &str) -> IngestResult<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(dir)
        .map_err(|e| IngestError::Config(format!("cannot create log dir {}: {}", dir.display(), e)))?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix(LOG_SUFFIX)
        .build(dir)
        .map_err(|e| IngestError::Config(format!("cannot open log file in {}: {}", dir.display(), e)))?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Deletes all but the `keep` most recently modified `<prefix>*.log` files.
///
/// Returns the number of files removed; individual failures are reported on
/// stderr since logging is not up yet.
pub fn prune_logs(dir: &Path, prefix: &str, keep: usize) -> IngestResult<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut entries: Vec<(std::time::SystemTime, PathBuf)> = fs::read_dir(dir)
        .map_err(|e| IngestError::Config(format!("cannot read log dir {}: {}", dir.display(), e)))?
        .filter_map(|res| res.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(prefix) && name.ends_with(LOG_SUFFIX)
        })
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, e.path()))
        })
        .collect();

    // Newest first
    entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    let mut removed = 0;
    for (_, path) in entries.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}

/// Installs the global subscriber. Keep the returned guard alive for the
/// life of the process, or buffered file lines are lost.
pub fn init(options: &LogOptions) -> IngestResult<WorkerGuard> {
    prune_logs(&options.dir, &options.file_prefix, options.keep_files)?;
    let (writer, guard) = file_writer(&options.dir, &options.file_prefix)?;

    let console = fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry().with(env_filter(&options.level)?).with(console);

    let installed = if options.json_file {
        registry.with(fmt::layer().json().with_ansi(false).with_writer(writer)).try_init()
    } else {
        registry.with(fmt::layer().with_ansi(false).with_writer(writer)).try_init()
    };
    installed.map_err(|e| IngestError::Config(format!("tracing already initialised: {}", e)))?;

    tracing::info!(dir = %options.dir.display(), level = %options.level, "Logging initialised");
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn touch(dir: &Path, name: &str, age_secs: u64) {
        let path = dir.join(name);
        fs::write(&path, b"x").unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs)).unwrap();
    }

    #[test]
    fn prune_keeps_newest_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "server_metasys.2024-01-01.log", 300);
        touch(dir.path(), "server_metasys.2024-01-02.log", 200);
        touch(dir.path(), "server_metasys.2024-01-03.log", 100);
        touch(dir.path(), "other.log", 1000);
        touch(dir.path(), "server_metasys.notes.txt", 1000);

        assert_eq!(prune_logs(dir.path(), "server_metasys", 2).unwrap(), 1);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                "other.log",
                "server_metasys.2024-01-02.log",
                "server_metasys.2024-01-03.log",
                "server_metasys.notes.txt",
            ]
        );
    }

    #[test]
    fn prune_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(prune_logs(&dir.path().join("absent"), "x", 1).unwrap(), 0);
    }

    #[test]
    fn rejects_bad_filter_directive() {
        if std::env::var("RUST_LOG").is_err() {
            assert!(env_filter("info").is_ok());
            assert!(matches!(env_filter("info,lib_ingest=notalevel"), Err(IngestError::Config(_))));
        }
    }

    #[test]
    fn file_writer_receives_events() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, guard) = file_writer(&dir.path().join("logs"), "unit").unwrap();
        let subscriber = tracing_subscriber::registry().with(fmt::layer().with_ansi(false).with_writer(writer));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(guid = "g1", "Successfully subscribed to GUID");
        });
        drop(guard);

        let logs = dir.path().join("logs");
        let file = fs::read_dir(&logs).unwrap().next().unwrap().unwrap().path();
        let name = file.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("unit.") && name.ends_with(".log"));
        let contents = fs::read_to_string(file).unwrap();
        assert!(contents.contains("Successfully subscribed to GUID"));
        assert!(contents.contains("guid=\"g1\""));
    }
}
