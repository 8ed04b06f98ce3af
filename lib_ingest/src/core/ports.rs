//! # Collaborator Ports
//!
//! Object-safe traits for everything the engine talks to: the platform API,
//! the durable stores and the metrics sink. Components are built once in
//! `main` and injected as `Arc<dyn ...>`; tests swap in in-memory fakes.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::errors::IngestResult;
use crate::model::{Credential, MetricRecord, SubscriptionRecord, TelemetryEvent};

/// Raw body chunks of the event stream.
pub type ByteStream = BoxStream<'static, IngestResult<Bytes>>;

/// Status and body of a platform call whose outcome the caller classifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformReply {
    pub status: u16,
    pub body: String,
}

impl PlatformReply {
    /// Statuses the platform uses to acknowledge a subscription.
    pub fn is_subscribe_ack(&self) -> bool {
        matches!(self.status, 200 | 202 | 204)
    }
}

/// The building-automation platform's REST and stream endpoints.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// `POST /login`.
    async fn login(&self, username: &str, password: &str) -> IngestResult<Credential>;
    /// `GET /refreshToken`.
    async fn refresh(&self, token: &str) -> IngestResult<Credential>;
    /// `GET /stream/keepalive`.
    async fn keepalive(&self, token: &str) -> IngestResult<()>;
    /// `GET /objects/{guid}/attributes/presentValue` bound to `stream_id`.
    async fn subscribe(&self, token: &str, stream_id: &str, guid: &str) -> IngestResult<PlatformReply>;
    /// `POST /stream`, returning the body as a chunk stream.
    async fn open_stream(&self, token: &str) -> IngestResult<ByteStream>;
}

/// Append-only telemetry event storage.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: &TelemetryEvent) -> IngestResult<()>;
}

/// Durable subscription records.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// GUIDs of active records, in stored order.
    async fn active_guids(&self) -> IngestResult<Vec<String>>;
    async fn add(&self, record: &SubscriptionRecord) -> IngestResult<()>;
}

/// Single-key string storage backing the checkpoint cursor.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> IngestResult<()>;
    async fn get(&self, key: &str) -> IngestResult<Option<String>>;
}

/// Time-series destination for derived metric records.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn forward(&self, record: &MetricRecord) -> IngestResult<()>;
}
