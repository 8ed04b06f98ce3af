//! # Configs Module
//!
//! Resolved engine settings and the reconnect backoff policy.

/// Engine settings with defaults and validation.
pub mod settings;

pub use settings::{InfluxSettings, IngestSettings, ReconnectPolicy};
