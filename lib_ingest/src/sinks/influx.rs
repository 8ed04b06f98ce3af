//! # InfluxDB Metrics Sink
//!
//! Forwards one JSON metric record per update to a time-series write
//! endpoint with a bearer token. Any 2xx answer counts as written.

use async_trait::async_trait;
use reqwest::Method;

use crate::configs::InfluxSettings;
use crate::core::ports::MetricsSink;
use crate::errors::{IngestError, IngestResult};
use crate::model::MetricRecord;
use crate::retrieve::ky_http::ApiClient;

pub struct InfluxSink {
    api: ApiClient,
    token: String,
}

impl InfluxSink {
    pub fn new(settings: &InfluxSettings, max_retries: u32) -> IngestResult<Self> {
        let url = settings
            .write_url()
            .map_err(|e| IngestError::Config(format!("invalid influx url '{}': {}", settings.url, e)))?;
        Ok(Self { api: ApiClient::new(url, max_retries), token: settings.token.clone() })
    }
}

#[async_trait]
impl MetricsSink for InfluxSink {
    async fn forward(&self, record: &MetricRecord) -> IngestResult<()> {
        let response = self
            .api
            .send(Method::POST, "", Some(self.token.as_str()), None, Some(record))
            .await
            .map_err(|e| IngestError::Sink(e.to_string()))?;

        if response.success {
            tracing::debug!(guid = %record.guid, status = response.status, "Metric forwarded");
            Ok(())
        } else {
            Err(IngestError::Sink(format!(
                "write refused with status {}: {}",
                response.status,
                response.error_body.unwrap_or_default()
            )))
        }
    }
}
