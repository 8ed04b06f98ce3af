//! # Core Engine Module
//!
//! The ingestion engine proper. Everything here talks to the outside world
//! only through the traits in [`ports`], so the whole pipeline runs against
//! in-memory fakes in unit tests.
//!
//! ## Core Components:
//!
//! - **`token`**: Bearer credential lifecycle with a monotonic expiry and a
//!   refresh window.
//!
//! - **`registry`**: Idempotent subscription bookkeeping bound to the current
//!   stream id, with durable replay on reconnect.
//!
//! - **`checkpoint`**: Last-seen event id cursor.
//!
//! - **`dispatcher`**: The per-session state machine that routes stream
//!   events to storage and the metrics sink.
//!
//! - **`supervisor`**: Login, reconnect with backoff and session wiring.

#![forbid(unsafe_code)]

/// Object-safe collaborator traits.
pub mod ports;
/// Token refresh and expiry tracking.
pub mod token;
/// Subscription bookkeeping and bootstrap replay.
pub mod registry;
/// Last-seen event id cursor.
pub mod checkpoint;
/// Per-session event routing.
pub mod dispatcher;
/// Reconnect loop.
pub mod supervisor;

// --- Public API Re-exports ---
pub use checkpoint::{Checkpoint, CHECKPOINT_KEY};
pub use dispatcher::{DispatchDeps, DispatchHealth, DispatchState, EventDispatcher};
pub use ports::{ByteStream, CheckpointStore, EventStore, MetricsSink, PlatformApi, PlatformReply, SubscriptionStore};
pub use registry::{BootstrapReport, SubscribeOutcome, SubscriptionRegistry, UnsubscribeOutcome};
pub use supervisor::Supervisor;
pub use token::{RefreshOutcome, TokenManager};
