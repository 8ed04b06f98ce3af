//! # Ingestion Errors
//!
//! One error enum for the whole engine. Each variant is a *kind* the
//! supervisor applies a policy to: `Auth` on login is fatal, `Protocol` and
//! `Transport` end the current session, `Persistence`, `Sink` and `Decode`
//! are logged per event and never stop the loop.

use thiserror::Error;

/// Errors produced by the ingestion engine and its collaborators.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IngestError {
    /// Login or token refresh failed, or no token has been obtained yet.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The stream violated the handshake or ordering contract.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection establishment or mid-stream I/O failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The platform answered a subscribe call with a non-success status.
    #[error("Subscription for GUID {guid} rejected with status {status}: {body}")]
    Rejected {
        /// The GUID that was being subscribed.
        guid: String,
        /// The HTTP status returned by the platform.
        status: u16,
        /// Response body, kept for diagnostics.
        body: String,
    },

    /// A payload could not be decoded into the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A durable store (events, subscriptions, checkpoint) failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The time-series sink refused or failed a write.
    #[error("Sink error: {0}")]
    Sink(String),

    /// Invalid or missing settings.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    /// Short, stable label used in structured log fields and health reports.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Auth(_) => "auth",
            IngestError::Protocol(_) => "protocol",
            IngestError::Transport(_) => "transport",
            IngestError::Rejected { .. } => "rejected",
            IngestError::Decode(_) => "decode",
            IngestError::Persistence(_) => "persistence",
            IngestError::Sink(_) => "sink",
            IngestError::Config(_) => "config",
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(e: reqwest::Error) -> Self {
        IngestError::Transport(e.to_string())
    }
}

impl From<reqwest_middleware::Error> for IngestError {
    fn from(e: reqwest_middleware::Error) -> Self {
        IngestError::Transport(e.to_string())
    }
}

impl From<url::ParseError> for IngestError {
    fn from(e: url::ParseError) -> Self {
        IngestError::Config(format!("Invalid URL: {}", e))
    }
}

/// Convenience alias used throughout the crate.
pub type IngestResult<T> = Result<T, IngestError>;
