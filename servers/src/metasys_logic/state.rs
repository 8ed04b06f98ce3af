use lib_ingest::core::{DispatchHealth, SubscriptionRegistry};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shared handles for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SubscriptionRegistry>,
    health: watch::Receiver<DispatchHealth>,
    // Cancels the stream supervisor only; the API keeps serving.
    stream_cancel: CancellationToken,
}

impl AppState {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        health: watch::Receiver<DispatchHealth>,
        stream_cancel: CancellationToken,
    ) -> Self {
        Self { registry, health, stream_cancel }
    }

    pub fn health(&self) -> DispatchHealth {
        self.health.borrow().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stream_cancel.is_cancelled()
    }

    /// Stops the stream supervisor. Returns false if it was already stopped.
    pub fn stop_streaming(&self) -> bool {
        if self.stream_cancel.is_cancelled() {
            return false;
        }
        self.stream_cancel.cancel();
        true
    }
}
