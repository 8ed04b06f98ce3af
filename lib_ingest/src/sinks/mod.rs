//! # Metrics Sinks
//!
//! Destinations for the metric records derived from stream updates.

/// HTTP write endpoint of an InfluxDB-compatible store.
pub mod influx;

pub use influx::InfluxSink;
