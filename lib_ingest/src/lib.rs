//! Streaming ingestion engine for building-automation telemetry.
//!
//! Logs in to the platform, holds one server-sent-event stream open,
//! subscribes object present values onto it and routes every update to a
//! durable event store and a time-series sink, checkpointing the last event
//! id. Reconnects with backoff and replays durable subscriptions on every new
//! stream.

// Declare the modules to re-export
pub mod configs;
#[cfg(feature = "connections")]
pub mod connections;
pub mod core;
pub mod errors;
pub mod ingestors;
pub mod loggers;
pub mod model;
pub mod retrieve;
pub mod sinks;

#[cfg(test)]
mod fakes;

// Re-export the everyday types
pub use configs::{InfluxSettings, IngestSettings, ReconnectPolicy};
pub use errors::{IngestError, IngestResult};
