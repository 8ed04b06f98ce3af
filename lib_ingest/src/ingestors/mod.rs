//! # Data Ingestors Module
//!
//! Clients for the building-automation platform and the framing of its
//! server-sent-event stream.
//!
//! ## Contained Modules:
//! - **`metasys`**: REST client implementing [`PlatformApi`](crate::core::PlatformApi)
//!   (login, refresh, keepalive, subscribe, stream open).
//! - **`sse`**: Incremental `text/event-stream` decoder.
//! - **`stream_session`**: One handshaked stream connection.

#![forbid(unsafe_code)]

/// REST client for the platform API.
pub mod metasys;
/// Server-sent-event framing.
pub mod sse;
/// A single stream connection and its handshake.
pub mod stream_session;

// --- Public API Re-exports ---
pub use metasys::MetasysClient;
pub use sse::{SseDecoder, SseStream};
pub use stream_session::StreamSession;
