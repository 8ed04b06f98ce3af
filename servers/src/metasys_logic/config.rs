use clap::Parser;
use lib_ingest::loggers::LogOptions;
use lib_ingest::{InfluxSettings, IngestError, IngestSettings, ReconnectPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "server_metasys.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("missing required setting '{0}'")]
    Missing(&'static str),
    #[error(transparent)]
    Invalid(#[from] IngestError),
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Building-automation telemetry ingestion service", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "METASYS_PORT", help = "Port for the HTTP control API.")]
    pub port: Option<u16>,

    #[clap(long, env = "METASYS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "METASYS_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "METASYS_LOG_LEVEL", help = "Logging level or filter directive (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "BASE_URL", help = "Platform root URL, e.g. https://gt-metasys.org.")]
    pub base_url: Option<String>,

    #[clap(long, env = "METASYS_USER", help = "Platform service account.")]
    pub username: Option<String>,

    #[clap(long, env = "METASYS_PASSWORD", help = "Platform service account password.", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub password: Option<String>,

    #[clap(long, env = "METASYS_SUBSCRIBE_HEADER", help = "Header binding a subscribe call to the stream.")]
    pub subscribe_header: Option<String>,

    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL connection URL.")]
    pub database_url: Option<String>,

    #[clap(long, env = "METASYS_DB_POOL_SIZE", help = "Maximum PostgreSQL connections.")]
    pub db_pool_size: Option<u32>,

    #[clap(long, env = "REDIS_URL", help = "Redis URL holding the stream checkpoint.")]
    pub redis_url: Option<String>,

    #[clap(long, env = "INFLUXDB_URL", help = "Time-series write endpoint.")]
    pub influx_url: Option<String>,

    #[clap(long, env = "INFLUXDB_TOKEN", help = "Bearer token for the time-series endpoint.", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub influx_token: Option<String>,

    #[clap(long, env = "INFLUXDB_ORG", help = "Organisation query parameter.")]
    pub influx_org: Option<String>,

    #[clap(long, env = "INFLUXDB_BUCKET", help = "Bucket query parameter.")]
    pub influx_bucket: Option<String>,

    #[clap(long, env = "METASYS_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for stream reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "METASYS_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for stream reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "METASYS_RECONNECT_MAX_ATTEMPTS", help = "Reconnect attempts per outage before giving up.")]
    pub reconnect_max_attempts: Option<u32>,

    #[clap(long, env = "METASYS_KEEPALIVE_SECONDS", help = "Seconds between stream keepalives.")]
    pub keepalive_seconds: Option<u64>,

    #[clap(long, env = "METASYS_REFRESH_WINDOW_SECONDS", help = "Refresh the token this many seconds before expiry.")]
    pub refresh_window_seconds: Option<u64>,

    #[clap(long, env = "METASYS_MAINTENANCE_TICK_SECONDS", help = "Seconds between refresh/keepalive checks on a quiet stream.")]
    pub maintenance_tick_seconds: Option<u64>,

    #[clap(long, env = "METASYS_HTTP_RETRIES", help = "Transient-failure retries for unary HTTP calls.")]
    pub http_retries: Option<u32>,
}

/// Fully resolved settings for one service instance.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub port: u16,
    pub ingest: IngestSettings,
    pub influx: InfluxSettings,
    pub database_url: String,
    pub db_pool_size: u32,
    pub redis_url: String,
    pub log: LogOptions,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            base_url: other.base_url.or(self.base_url),
            username: other.username.or(self.username),
            password: other.password.or(self.password),
            subscribe_header: other.subscribe_header.or(self.subscribe_header),
            database_url: other.database_url.or(self.database_url),
            db_pool_size: other.db_pool_size.or(self.db_pool_size),
            redis_url: other.redis_url.or(self.redis_url),
            influx_url: other.influx_url.or(self.influx_url),
            influx_token: other.influx_token.or(self.influx_token),
            influx_org: other.influx_org.or(self.influx_org),
            influx_bucket: other.influx_bucket.or(self.influx_bucket),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            reconnect_max_attempts: other.reconnect_max_attempts.or(self.reconnect_max_attempts),
            keepalive_seconds: other.keepalive_seconds.or(self.keepalive_seconds),
            refresh_window_seconds: other.refresh_window_seconds.or(self.refresh_window_seconds),
            maintenance_tick_seconds: other.maintenance_tick_seconds.or(self.maintenance_tick_seconds),
            http_retries: other.http_retries.or(self.http_retries),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(8080),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            base_url: Some("https://gt-metasys.org".to_string()),
            subscribe_header: Some(lib_ingest::configs::settings::DEFAULT_SUBSCRIBE_HEADER.to_string()),
            db_pool_size: Some(5),
            reconnect_base_delay_ms: Some(1000),
            reconnect_max_delay_ms: Some(60000),
            reconnect_max_attempts: Some(10),
            keepalive_seconds: Some(1800),
            refresh_window_seconds: Some(1800),
            maintenance_tick_seconds: Some(60),
            http_retries: Some(3),
            ..Default::default()
        }
    }

    /// Turns the merged layers into settings, checking required values.
    pub fn resolve(&self) -> Result<ServiceSettings, ConfigError> {
        let defaults = Config::defaults();
        let merged = defaults.merge(self.clone());
        let required = |value: Option<String>, name: &'static str| {
            value.filter(|v| !v.trim().is_empty()).ok_or(ConfigError::Missing(name))
        };

        let ingest = IngestSettings {
            base_url: required(merged.base_url, "baseUrl")?,
            username: required(merged.username, "username")?,
            password: required(merged.password, "password")?,
            subscribe_header: required(merged.subscribe_header, "subscribeHeader")?,
            refresh_window: Duration::from_secs(merged.refresh_window_seconds.unwrap_or(1800)),
            keepalive_interval: Duration::from_secs(merged.keepalive_seconds.unwrap_or(1800)),
            maintenance_tick: Duration::from_secs(merged.maintenance_tick_seconds.unwrap_or(60)),
            http_retries: merged.http_retries.unwrap_or(3),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(merged.reconnect_base_delay_ms.unwrap_or(1000)),
                max_delay: Duration::from_millis(merged.reconnect_max_delay_ms.unwrap_or(60000)),
                max_attempts: merged.reconnect_max_attempts.unwrap_or(10),
            },
            ..IngestSettings::default()
        };
        ingest.validate()?;

        let influx = InfluxSettings {
            url: required(merged.influx_url, "influxUrl")?,
            token: merged.influx_token.unwrap_or_default(),
            org: merged.influx_org,
            bucket: merged.influx_bucket,
        };
        influx.write_url()?;

        Ok(ServiceSettings {
            port: merged.port.unwrap_or(8080),
            ingest,
            influx,
            database_url: required(merged.database_url, "databaseUrl")?,
            db_pool_size: merged.db_pool_size.unwrap_or(5).max(1),
            redis_url: required(merged.redis_url, "redisUrl")?,
            log: LogOptions {
                dir: merged.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
                level: merged.log_level.unwrap_or_else(|| "info".to_string()),
                ..LogOptions::default()
            },
        })
    }
}

/// Defaults, then the JSON config file, then environment and CLI.
pub fn load_config() -> Result<Config, ConfigError> {
    layer_config(Config::parse())
}

pub fn layer_config(cli: Config) -> Result<Config, ConfigError> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)
            .map_err(|source| ConfigError::Read { path: config_file_path.clone(), source })?;
        let file_config = serde_json::from_str::<Config>(&config_str)
            .map_err(|source| ConfigError::Parse { path: config_file_path.clone(), source })?;
        current_config = current_config.merge(file_config);
    }

    // clap has already folded environment variables into the CLI layer.
    current_config = current_config.merge(cli);
    current_config.config_path = Some(config_file_path);
    Ok(current_config)
}
