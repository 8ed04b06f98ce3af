//! # Stream Session
//!
//! One long-lived platform stream connection. The first event on a fresh
//! connection must be `hello`, carrying the stream id every later subscribe
//! call is bound to. Events are handed out in send order, without reordering
//! or deduplication.

use crate::core::ports::{ByteStream, PlatformApi};
use crate::core::token::TokenManager;
use crate::errors::{IngestError, IngestResult};
use crate::ingestors::sse::SseStream;
use crate::model::{EventKind, SseEvent};

/// A connected, possibly handshaked, event stream.
pub struct StreamSession {
    events: SseStream,
    stream_id: Option<String>,
}

impl StreamSession {
    /// Opens the stream with the current bearer token.
    ///
    /// Fails with `Transport` (or `Auth` for 401/403); the caller owns retry.
    pub async fn connect(api: &dyn PlatformApi, tokens: &TokenManager) -> IngestResult<Self> {
        let token = tokens.access_token().await?;
        let body = api.open_stream(&token).await?;
        tracing::info!("Stream connection opened");
        Ok(Self::from_byte_stream(body))
    }

    /// Wraps an already-open body stream.
    pub fn from_byte_stream(body: ByteStream) -> Self {
        Self { events: SseStream::new(body), stream_id: None }
    }

    /// Consumes the first event and records the stream id it carries.
    ///
    /// # Errors
    /// `Protocol` if the first event is not `hello`, its id is empty, the
    /// stream ends first, or the handshake already happened. `Transport` if
    /// the body fails before the first event.
    pub async fn handshake(&mut self) -> IngestResult<String> {
        if let Some(existing) = &self.stream_id {
            return Err(IngestError::Protocol(format!("handshake already completed for stream {}", existing)));
        }

        let first = match self.events.next_event().await {
            Some(event) => event?,
            None => return Err(IngestError::Protocol("stream ended before hello".to_string())),
        };
        tracing::info!(event = %first.event, "Received first stream event");

        if first.kind() != EventKind::Hello {
            return Err(IngestError::Protocol(format!("expected hello as first event, found '{}'", first.event)));
        }

        let stream_id = first.data.trim().trim_matches('"').to_string();
        if stream_id.is_empty() {
            return Err(IngestError::Protocol("hello carried an empty stream id".to_string()));
        }

        tracing::info!(stream_id = %stream_id, "Stream ID set");
        self.stream_id = Some(stream_id.clone());
        Ok(stream_id)
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    /// Next event after the handshake; `None` when the stream has ended.
    pub async fn next_event(&mut self) -> Option<IngestResult<SseEvent>> {
        self.events.next_event().await
    }
}
