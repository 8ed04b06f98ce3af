//! # Ingestion Settings
//!
//! Plain, already-resolved settings handed to the engine by the binary. The
//! layering (defaults, config file, environment, CLI) happens in the
//! `servers` crate; this module only holds values, defaults and validation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{IngestError, IngestResult};
use crate::model::check_guid;

/// Header that binds a subscribe call to a stream.
pub const DEFAULT_SUBSCRIBE_HEADER: &str = "METASYS-SUBSCRIBE";
/// Versioned API prefix of the platform.
pub const DEFAULT_API_PREFIX: &str = "api/v4";

/// Bounded exponential backoff for re-establishing the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for the doubled delay.
    pub max_delay: Duration,
    /// Attempts per outage, including the first; 0 is treated as 1.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60000),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.base_delay;
        for _ in 1..attempt {
            delay = std::cmp::min(delay.saturating_mul(2), self.max_delay);
        }
        std::cmp::min(delay, self.max_delay)
    }

    /// Effective attempt limit.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Everything the engine needs to talk to the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Platform root, e.g. `https://gt-metasys.org`.
    pub base_url: String,
    pub api_prefix: String,
    pub username: String,
    pub password: String,
    pub subscribe_header: String,
    /// Refresh the token once this close to expiry.
    pub refresh_window: Duration,
    /// Minimum spacing between stream keepalives.
    pub keepalive_interval: Duration,
    /// How often a quiet stream still runs refresh/keepalive checks.
    pub maintenance_tick: Duration,
    /// Transient-failure retries for unary HTTP calls.
    pub http_retries: u32,
    pub reconnect: ReconnectPolicy,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            base_url: "https://gt-metasys.org".to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            username: String::new(),
            password: String::new(),
            subscribe_header: DEFAULT_SUBSCRIBE_HEADER.to_string(),
            refresh_window: Duration::from_secs(1800),
            keepalive_interval: Duration::from_secs(1800),
            maintenance_tick: Duration::from_secs(60),
            http_retries: 3,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl IngestSettings {
    /// Checks the settings that would otherwise fail late, at first use.
    pub fn validate(&self) -> IngestResult<()> {
        self.api_root()?;
        if self.username.is_empty() {
            return Err(IngestError::Config("platform username is empty".to_string()));
        }
        if self.subscribe_header.trim().is_empty() {
            return Err(IngestError::Config("subscribe header name is empty".to_string()));
        }
        if chrono::TimeDelta::from_std(self.refresh_window).is_err() {
            return Err(IngestError::Config(format!("refresh window {:?} is out of range", self.refresh_window)));
        }
        if self.maintenance_tick.is_zero() {
            return Err(IngestError::Config("maintenance tick must be positive".to_string()));
        }
        Ok(())
    }

    /// Absolute URL of the versioned API, always ending in `/`.
    pub fn api_root(&self) -> IngestResult<Url> {
        let base = self.base_url.trim_end_matches('/');
        let prefix = self.api_prefix.trim_matches('/');
        let root = if prefix.is_empty() { format!("{}/", base) } else { format!("{}/{}/", base, prefix) };
        Ok(Url::parse(&root)?)
    }

    /// Relative path of the present-value attribute of `guid`.
    pub fn subscribe_path(guid: &str) -> IngestResult<String> {
        let guid = check_guid(guid)?;
        Ok(format!("objects/{}/attributes/presentValue", guid))
    }
}

/// Where derived metric records are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfluxSettings {
    /// Write endpoint, e.g. `http://influx.local:8086/api/v2/write`.
    pub url: String,
    pub token: String,
    pub org: Option<String>,
    pub bucket: Option<String>,
}

impl InfluxSettings {
    /// Endpoint with `org` and `bucket` query parameters when set.
    pub fn write_url(&self) -> IngestResult<Url> {
        let mut url = Url::parse(&self.url)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(org) = self.org.as_deref().filter(|o| !o.is_empty()) {
                query.append_pair("org", org);
            }
            if let Some(bucket) = self.bucket.as_deref().filter(|b| !b.is_empty()) {
                query.append_pair("bucket", bucket);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            max_attempts: 0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(30), Duration::from_secs(5));
        assert_eq!(policy.attempts(), 1);
    }

    #[test]
    fn api_root_joins_cleanly() {
        let settings = IngestSettings { base_url: "https://host.example/".into(), ..Default::default() };
        let root = settings.api_root().unwrap();
        assert_eq!(root.as_str(), "https://host.example/api/v4/");
        assert_eq!(
            root.join(&IngestSettings::subscribe_path("g1").unwrap()).unwrap().as_str(),
            "https://host.example/api/v4/objects/g1/attributes/presentValue"
        );
    }

    #[test]
    fn subscribe_path_refuses_guids_that_escape_the_segment() {
        for guid in ["g1?x", "g1#frag", "../login", "..", "a/b", "g%2F1", "g 1", ""] {
            assert!(
                matches!(IngestSettings::subscribe_path(guid), Err(IngestError::Config(_))),
                "accepted {:?}",
                guid
            );
        }
        assert_eq!(IngestSettings::subscribe_path(" g-1 ").unwrap(), "objects/g-1/attributes/presentValue");
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut settings = IngestSettings { username: "svc".into(), ..Default::default() };
        assert!(settings.validate().is_ok());
        settings.base_url = "not a url".into();
        assert!(matches!(settings.validate(), Err(IngestError::Config(_))));
        settings.base_url = "https://host.example".into();
        settings.username.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validation_refuses_out_of_range_refresh_window() {
        let settings = IngestSettings {
            username: "svc".into(),
            refresh_window: Duration::from_secs(u64::MAX),
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(IngestError::Config(_))));
    }

    #[test]
    fn influx_url_carries_optional_org_and_bucket() {
        let mut influx = InfluxSettings { url: "http://influx.local:8086/api/v2/write".into(), ..Default::default() };
        assert_eq!(influx.write_url().unwrap().as_str(), "http://influx.local:8086/api/v2/write");

        influx.org = Some("acme".into());
        influx.bucket = Some("building".into());
        assert_eq!(
            influx.write_url().unwrap().as_str(),
            "http://influx.local:8086/api/v2/write?org=acme&bucket=building"
        );
    }
}
