/// Global `tracing` subscriber, rolling file output and log pruning.
pub mod setup;

pub use setup::{init, LogOptions};
