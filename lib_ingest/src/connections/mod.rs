//! # Connections Module
//!
//! Persistent connections to external services: the database holding events
//! and subscriptions, and the cache holding the stream checkpoint.

/// PostgreSQL pool, schema and the event/subscription stores.
pub mod db_postgres;

/// Redis connection and the checkpoint store.
pub mod cache_redis;

pub use cache_redis::CacheHandler;
pub use db_postgres::{Database, DbError};
