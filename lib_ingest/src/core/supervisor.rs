//! # Stream Supervisor
//!
//! Owns the service lifecycle: initial login, then a loop of stream sessions.
//! Each session connects, handshakes, rebinds the subscription registry to
//! the new stream id, replays durable subscriptions and hands the stream to
//! the dispatcher.
//!
//! When a session ends with a protocol or transport error the supervisor
//! reconnects with bounded exponential backoff. An `Auth` error forces a
//! fresh login before the next attempt. A session that got as far as a
//! successful handshake resets the attempt count; running out of attempts
//! returns the last error. Cancellation stops everything with `Ok(())`.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::configs::ReconnectPolicy;
use crate::core::checkpoint::Checkpoint;
use crate::core::dispatcher::{DispatchHealth, EventDispatcher};
use crate::core::ports::PlatformApi;
use crate::core::registry::SubscriptionRegistry;
use crate::core::token::TokenManager;
use crate::errors::{IngestError, IngestResult};
use crate::ingestors::stream_session::StreamSession;

/// How a single session attempt finished.
enum SessionEnd {
    Cancelled,
    /// `established` is true once the handshake succeeded.
    Failed { established: bool, error: IngestError },
}

pub struct Supervisor {
    api: Arc<dyn PlatformApi>,
    tokens: Arc<TokenManager>,
    registry: Arc<SubscriptionRegistry>,
    checkpoint: Arc<Checkpoint>,
    dispatcher: EventDispatcher,
    policy: ReconnectPolicy,
    needs_login: bool,
}

impl Supervisor {
    pub fn new(
        api: Arc<dyn PlatformApi>,
        tokens: Arc<TokenManager>,
        registry: Arc<SubscriptionRegistry>,
        checkpoint: Arc<Checkpoint>,
        dispatcher: EventDispatcher,
        policy: ReconnectPolicy,
    ) -> Self {
        Self { api, tokens, registry, checkpoint, dispatcher, policy, needs_login: false }
    }

    pub fn health(&self) -> watch::Receiver<DispatchHealth> {
        self.dispatcher.health()
    }

    /// Runs until cancelled or until reconnect attempts are exhausted.
    ///
    /// # Errors
    /// `Auth` if the initial login fails; otherwise the error of the last
    /// failed attempt once no attempts remain.
    pub async fn run(mut self, cancel: CancellationToken) -> IngestResult<()> {
        self.tokens.login().await?;

        match self.checkpoint.last().await {
            Ok(Some(id)) => tracing::info!(last_event_id = %id, "Previous checkpoint found; stream starts fresh"),
            Ok(None) => tracing::info!("No previous checkpoint"),
            Err(e) => tracing::warn!(error = %e, "Could not read checkpoint"),
        }

        let attempts = self.policy.attempts();
        let mut failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let (established, error) = match self.session(&cancel).await {
                SessionEnd::Cancelled => {
                    self.registry.detach_stream().await;
                    tracing::info!("Supervisor stopped");
                    return Ok(());
                }
                SessionEnd::Failed { established, error } => (established, error),
            };
            self.registry.detach_stream().await;
            self.dispatcher.note_session_end(&error);

            failures = if established { 0 } else { failures + 1 };
            if failures >= attempts {
                tracing::error!(attempts, error = %error, "Reconnect attempts exhausted");
                return Err(error);
            }
            if matches!(error, IngestError::Auth(_)) {
                self.needs_login = true;
            }

            let delay = self.policy.delay_for_attempt(failures.max(1));
            tracing::warn!(
                kind = error.kind(),
                error = %error,
                attempt = failures + 1,
                attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting stream"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
            self.dispatcher.note_reconnect();
        }
    }

    async fn session(&mut self, cancel: &CancellationToken) -> SessionEnd {
        let failed = |error| SessionEnd::Failed { established: false, error };

        if self.needs_login {
            if let Err(e) = self.tokens.login().await {
                return failed(e);
            }
            self.needs_login = false;
        }

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            r = StreamSession::connect(&*self.api, &self.tokens) => r,
        };
        let mut session = match connected {
            Ok(session) => session,
            Err(e) => return failed(e),
        };

        let handshake = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            r = self.dispatcher.handshake(&mut session) => r,
        };
        let stream_id = match handshake {
            Ok(id) => id,
            Err(e) => return failed(e),
        };

        self.registry.attach_stream(&stream_id).await;
        if let Err(e) = self.registry.bootstrap().await {
            tracing::error!(error = %e, "Subscription bootstrap failed; streaming without replay");
        }

        match self.dispatcher.run(&mut session, cancel).await {
            Ok(()) => SessionEnd::Cancelled,
            Err(error) => SessionEnd::Failed { established: true, error },
        }
    }
}
