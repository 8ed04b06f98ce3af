//! # Redis Cache Implementation
//!
//! Async key-value access over a self-reconnecting `ConnectionManager`. Backs
//! the stream checkpoint.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};

use crate::core::ports::CheckpointStore;
use crate::errors::{IngestError, IngestResult};

/// A handler for Redis cache interactions.
#[derive(Clone)]
pub struct CacheHandler {
    conn: ConnectionManager,
}

impl CacheHandler {
    /// Connects to the server at `url` (e.g. "redis://127.0.0.1/").
    pub async fn new(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Stores a string value in the cache.
    pub async fn set_string(&self, key: &str, value: &str) -> RedisResult<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await
    }

    pub async fn get_string(&self, key: &str) -> RedisResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await
    }
}

fn persistence(e: redis::RedisError) -> IngestError {
    IngestError::Persistence(format!("redis: {}", e))
}

#[async_trait]
impl CheckpointStore for CacheHandler {
    async fn set(&self, key: &str, value: &str) -> IngestResult<()> {
        self.set_string(key, value).await.map_err(persistence)
    }

    async fn get(&self, key: &str) -> IngestResult<Option<String>> {
        self.get_string(key).await.map_err(persistence)
    }
}
