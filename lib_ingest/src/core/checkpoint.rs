//! # Checkpoint
//!
//! Durable cursor of the last consumed event id. Every write is an
//! unconditional overwrite (last writer wins). The cursor is recorded for
//! operators and future resume support; the stream is never resumed from it.

use std::sync::Arc;

use crate::core::ports::CheckpointStore;
use crate::errors::IngestResult;

/// Store key holding the last seen event id.
pub const CHECKPOINT_KEY: &str = "STREAM_LAST_EVENT_ID";

pub struct Checkpoint {
    store: Arc<dyn CheckpointStore>,
    key: String,
}

impl Checkpoint {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self::with_key(store, CHECKPOINT_KEY)
    }

    pub fn with_key(store: Arc<dyn CheckpointStore>, key: impl Into<String>) -> Self {
        Self { store, key: key.into() }
    }

    /// Overwrites the cursor with `event_id`.
    pub async fn advance(&self, event_id: &str) -> IngestResult<()> {
        self.store.set(&self.key, event_id).await?;
        tracing::debug!(event_id, "Checkpoint advanced");
        Ok(())
    }

    /// Last recorded event id, if any.
    pub async fn last(&self) -> IngestResult<Option<String>> {
        self.store.get(&self.key).await
    }
}
