//! # Event Dispatcher
//!
//! Drives one stream session through `Init -> Handshaked -> Streaming ->
//! Terminated`. Events are handled strictly one after another:
//!
//! 1.  **Maintenance**: refresh the token when due and send a keepalive once
//!     the keepalive interval has elapsed. This also runs on a periodic tick
//!     so a quiet stream keeps its token and connection alive.
//! 2.  **Handling**: updates are persisted and then forwarded to the metrics
//!     sink. The two are independent; a failure in one is logged and does
//!     not undo or skip the other.
//! 3.  **Checkpoint**: every event carrying an id advances the cursor after
//!     handling was attempted, whatever its outcome (at-least-once).
//!
//! Only protocol and transport failures end the session. A progress snapshot
//! ([`DispatchHealth`]) is published on a `watch` channel after every step.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::checkpoint::Checkpoint;
use crate::core::ports::{EventStore, MetricsSink, PlatformApi};
use crate::core::token::{RefreshOutcome, TokenManager};
use crate::errors::{IngestError, IngestResult};
use crate::ingestors::stream_session::StreamSession;
use crate::model::{EventKind, MetricRecord, SseEvent, TelemetryEvent, ValueUpdate};

/// Lifecycle of a single stream session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    #[default]
    Init,
    Handshaked,
    Streaming,
    Terminated,
}

/// Observable progress of the dispatch loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchHealth {
    pub state: DispatchState,
    pub stream_id: Option<String>,
    pub events_seen: u64,
    pub updates_persisted: u64,
    pub updates_forwarded: u64,
    pub persist_failures: u64,
    pub forward_failures: u64,
    pub decode_failures: u64,
    pub checkpoint_failures: u64,
    pub last_event_id: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
    /// Sessions started after the first one.
    pub reconnects: u32,
    /// Error that ended the most recent session.
    pub last_error: Option<String>,
}

/// Collaborators and timing for [`EventDispatcher`].
pub struct DispatchDeps {
    pub api: Arc<dyn PlatformApi>,
    pub tokens: Arc<TokenManager>,
    pub events: Arc<dyn EventStore>,
    pub sink: Arc<dyn MetricsSink>,
    pub checkpoint: Arc<Checkpoint>,
    pub keepalive_interval: Duration,
    pub maintenance_tick: Duration,
}

pub struct EventDispatcher {
    deps: DispatchDeps,
    state: DispatchState,
    last_keepalive: Instant,
    health: watch::Sender<DispatchHealth>,
}

impl EventDispatcher {
    pub fn new(deps: DispatchDeps, health: watch::Sender<DispatchHealth>) -> Self {
        Self { deps, state: DispatchState::Init, last_keepalive: Instant::now(), health }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// A receiver of progress snapshots.
    pub fn health(&self) -> watch::Receiver<DispatchHealth> {
        self.health.subscribe()
    }

    pub(crate) fn note_session_end(&self, error: &IngestError) {
        let label = format!("{}: {}", error.kind(), error);
        self.health.send_modify(|h| h.last_error = Some(label));
    }

    pub(crate) fn note_reconnect(&self) {
        self.health.send_modify(|h| h.reconnects += 1);
    }

    /// Starts a new session: performs the handshake on `session`.
    ///
    /// Any previous session state is discarded. On failure the dispatcher
    /// is `Terminated` and the error is returned unchanged.
    pub async fn handshake(&mut self, session: &mut StreamSession) -> IngestResult<String> {
        self.set_state(DispatchState::Init);
        match session.handshake().await {
            Ok(stream_id) => {
                self.last_keepalive = Instant::now();
                self.set_state(DispatchState::Handshaked);
                self.health.send_modify(|h| h.stream_id = Some(stream_id.clone()));
                Ok(stream_id)
            }
            Err(e) => {
                tracing::error!(error = %e, "Stream handshake failed");
                self.set_state(DispatchState::Terminated);
                Err(e)
            }
        }
    }

    /// Consumes `session` until it ends, fails or `cancel` fires.
    ///
    /// Returns `Ok(())` only on cancellation. A stream that simply ends is a
    /// `Transport` error so the caller reconnects.
    pub async fn run(&mut self, session: &mut StreamSession, cancel: &CancellationToken) -> IngestResult<()> {
        let stream_id = match (self.state, session.stream_id()) {
            (DispatchState::Handshaked, Some(id)) => id.to_string(),
            _ => {
                self.set_state(DispatchState::Terminated);
                return Err(IngestError::Protocol("dispatch started before a successful handshake".to_string()));
            }
        };
        self.set_state(DispatchState::Streaming);
        tracing::info!(stream_id = %stream_id, "Dispatching stream events");

        let period = self.deps.maintenance_tick.max(Duration::from_millis(1));
        let mut tick = tokio::time::interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Dispatch cancelled");
                    break Ok(());
                }
                _ = tick.tick() => self.maintain().await,
                // `next_event` only awaits the body; a lost race drops no event.
                next = session.next_event() => match next {
                    None => break Err(IngestError::Transport("event stream ended".to_string())),
                    Some(Err(e)) => break Err(e),
                    Some(Ok(event)) => {
                        self.maintain().await;
                        if let Err(e) = self.dispatch(&event, &stream_id).await {
                            break Err(e);
                        }
                    }
                },
            }
        };

        if let Err(e) = &result {
            tracing::warn!(error = %e, kind = e.kind(), "Stream session ended");
        }
        self.set_state(DispatchState::Terminated);
        result
    }

    /// Handles one streamed event and advances the checkpoint.
    pub async fn dispatch(&mut self, event: &SseEvent, stream_id: &str) -> IngestResult<()> {
        let now = Utc::now();
        self.health.send_modify(|h| {
            h.events_seen += 1;
            h.last_event_at = Some(now);
        });

        match event.kind() {
            EventKind::Hello => {
                return Err(IngestError::Protocol(format!(
                    "unexpected hello on established stream {} (data: {})",
                    stream_id, event.data
                )));
            }
            EventKind::Update => self.handle_update(event, stream_id, now).await,
            EventKind::Heartbeat => tracing::info!(stream_id, "Received heartbeat"),
            EventKind::Unknown(other) => tracing::debug!(event = %other, "Unhandled event type"),
        }

        if let Some(id) = event.id.as_deref() {
            match self.deps.checkpoint.advance(id).await {
                Ok(()) => self.health.send_modify(|h| h.last_event_id = Some(id.to_string())),
                Err(e) => {
                    tracing::error!(event_id = id, error = %e, "Failed to store checkpoint");
                    self.health.send_modify(|h| h.checkpoint_failures += 1);
                }
            }
        }
        Ok(())
    }

    async fn handle_update(&self, event: &SseEvent, stream_id: &str, now: DateTime<Utc>) {
        let update = match ValueUpdate::parse_first(&event.data) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(event_id = ?event.id, error = %e, "Skipping malformed update");
                self.health.send_modify(|h| h.decode_failures += 1);
                return;
            }
        };

        let record = TelemetryEvent::from_update(&update, event.id.as_deref(), stream_id, now);
        match self.deps.events.append(&record).await {
            Ok(()) => {
                tracing::debug!(guid = %record.guid, value = record.present_value, "Event persisted");
                self.health.send_modify(|h| h.updates_persisted += 1);
            }
            Err(e) => {
                tracing::error!(guid = %record.guid, error = %e, "Failed to persist event");
                self.health.send_modify(|h| h.persist_failures += 1);
            }
        }

        let metric = MetricRecord::from(&update);
        match self.deps.sink.forward(&metric).await {
            Ok(()) => self.health.send_modify(|h| h.updates_forwarded += 1),
            Err(e) => {
                tracing::error!(guid = %metric.guid, error = %e, "Failed to forward metric");
                self.health.send_modify(|h| h.forward_failures += 1);
            }
        }
    }

    /// Token refresh and keepalive. Failures are logged; the stale token
    /// stays in use.
    async fn maintain(&mut self) {
        match self.deps.tokens.refresh_if_due(Utc::now()).await {
            Ok(RefreshOutcome::NotDue) => {}
            Ok(RefreshOutcome::Refreshed { expires_at }) => tracing::debug!(%expires_at, "Token refreshed in loop"),
            Err(e) => tracing::error!(error = %e, "Token refresh failed; continuing with current token"),
        }

        if self.last_keepalive.elapsed() < self.deps.keepalive_interval {
            return;
        }
        self.last_keepalive = Instant::now();
        let sent = match self.deps.tokens.access_token().await {
            Ok(token) => self.deps.api.keepalive(&token).await,
            Err(e) => Err(e),
        };
        match sent {
            Ok(()) => tracing::info!("Keepalive sent"),
            Err(e) => tracing::error!(error = %e, "Keepalive failed"),
        }
    }

    fn set_state(&mut self, state: DispatchState) {
        self.state = state;
        self.health.send_modify(|h| h.state = state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{
        byte_stream, FakePlatform, Journal, MemoryCheckpointStore, MemoryEventStore, MemorySink,
    };
    use crate::model::Credential;
    use std::sync::atomic::Ordering;

    const UPDATE_E1: &str = "id: e1\nevent: object.values.update\ndata: [{\"item\":{\"id\":\"g1\",\"presentValue\":42.5,\"itemReference\":\"ref1\"},\"condition\":{\"presentValue\":{\"reliability\":\"reliable\",\"priority\":\"normal\"}}}]\n\n";

    struct Harness {
        platform: Arc<FakePlatform>,
        events: Arc<MemoryEventStore>,
        sink: Arc<MemorySink>,
        checkpoints: Arc<MemoryCheckpointStore>,
        journal: Journal,
        health: watch::Receiver<DispatchHealth>,
        dispatcher: EventDispatcher,
    }

    async fn harness(keepalive: Duration) -> Harness {
        let journal = Journal::default();
        let platform = Arc::new(FakePlatform::with_journal(journal.clone()));
        let tokens = Arc::new(TokenManager::new(platform.clone(), "svc".into(), "pw".into(), Duration::from_secs(1800)));
        tokens.login().await.unwrap();
        let events = Arc::new(MemoryEventStore::with_journal(journal.clone()));
        let sink = Arc::new(MemorySink::with_journal(journal.clone()));
        let checkpoints = Arc::new(MemoryCheckpointStore::with_journal(journal.clone()));
        let (tx, rx) = watch::channel(DispatchHealth::default());
        let dispatcher = EventDispatcher::new(
            DispatchDeps {
                api: platform.clone(),
                tokens,
                events: events.clone(),
                sink: sink.clone(),
                checkpoint: Arc::new(Checkpoint::new(checkpoints.clone())),
                keepalive_interval: keepalive,
                maintenance_tick: Duration::from_secs(60),
            },
            tx,
        );
        Harness { platform, events, sink, checkpoints, journal, health: rx, dispatcher }
    }

    fn session(chunks: Vec<&'static str>) -> StreamSession {
        StreamSession::from_byte_stream(byte_stream(chunks))
    }

    #[tokio::test]
    async fn update_is_persisted_forwarded_then_checkpointed() {
        let mut h = harness(Duration::from_secs(1800)).await;
        let mut s = session(vec!["event: hello\ndata: \"s1\"\n\n", UPDATE_E1]);

        assert_eq!(h.dispatcher.handshake(&mut s).await.unwrap(), "s1");
        assert_eq!(h.dispatcher.state(), DispatchState::Handshaked);
        let ended = h.dispatcher.run(&mut s, &CancellationToken::new()).await;
        assert!(matches!(ended, Err(IngestError::Transport(_))));
        assert_eq!(h.dispatcher.state(), DispatchState::Terminated);

        let stored = h.events.stored();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].guid, "g1");
        assert_eq!(stored[0].event_id.as_deref(), Some("e1"));
        assert_eq!(stored[0].present_value, 42.5);
        assert_eq!(stored[0].stream_id, "s1");

        assert_eq!(
            serde_json::to_string(&h.sink.forwarded()[0]).unwrap(),
            r#"{"measurement":"Building Data","presentValue":42.5,"guid":"g1","itemReference":"ref1"}"#
        );
        assert_eq!(h.journal.entries(), vec!["persist:e1", "forward:g1", "checkpoint:e1"]);
        assert_eq!(h.health.borrow().updates_persisted, 1);
    }

    #[tokio::test]
    async fn checkpoint_advances_despite_store_and_sink_failures() {
        let mut h = harness(Duration::from_secs(1800)).await;
        h.events.fail.store(true, Ordering::SeqCst);
        h.sink.fail.store(true, Ordering::SeqCst);
        let mut s = session(vec!["event: hello\ndata: \"s1\"\n\n", UPDATE_E1]);

        h.dispatcher.handshake(&mut s).await.unwrap();
        let _ = h.dispatcher.run(&mut s, &CancellationToken::new()).await;

        assert_eq!(h.journal.entries(), vec!["persist:e1", "forward:g1", "checkpoint:e1"]);
        assert_eq!(h.checkpoints.writes(), vec!["e1".to_string()]);
        let health = h.health.borrow().clone();
        assert_eq!(health.persist_failures, 1);
        assert_eq!(health.forward_failures, 1);
        assert_eq!(health.last_event_id.as_deref(), Some("e1"));
    }

    #[tokio::test]
    async fn checkpoint_once_per_event_with_id() {
        let mut h = harness(Duration::from_secs(1800)).await;
        let mut s = session(vec![
            "event: hello\ndata: \"s1\"\n\n",
            "id: 1\nevent: object.values.heartbeat\ndata: x\n\n",
            "event: object.values.heartbeat\ndata: y\n\n",
            "id: 3\nevent: something.else\ndata: z\n\n",
            "id: 4\nevent: object.values.update\ndata: not json\n\n",
        ]);

        h.dispatcher.handshake(&mut s).await.unwrap();
        let _ = h.dispatcher.run(&mut s, &CancellationToken::new()).await;

        assert_eq!(h.checkpoints.writes(), vec!["1", "3", "4"]);
        assert!(h.events.stored().is_empty());
        let health = h.health.borrow().clone();
        assert_eq!(health.events_seen, 4);
        assert_eq!(health.decode_failures, 1);
    }

    #[tokio::test]
    async fn checkpoint_failure_does_not_stop_the_loop() {
        let mut h = harness(Duration::from_secs(1800)).await;
        h.checkpoints.fail.store(true, Ordering::SeqCst);
        let mut s = session(vec!["event: hello\ndata: \"s1\"\n\n", UPDATE_E1, UPDATE_E1]);

        h.dispatcher.handshake(&mut s).await.unwrap();
        let _ = h.dispatcher.run(&mut s, &CancellationToken::new()).await;

        assert_eq!(h.events.stored().len(), 2);
        assert_eq!(h.health.borrow().checkpoint_failures, 2);
    }

    #[tokio::test]
    async fn non_hello_first_event_terminates() {
        let mut h = harness(Duration::from_secs(1800)).await;
        let mut s = session(vec![UPDATE_E1]);

        assert!(matches!(h.dispatcher.handshake(&mut s).await, Err(IngestError::Protocol(_))));
        assert_eq!(h.dispatcher.state(), DispatchState::Terminated);
        assert!(matches!(
            h.dispatcher.run(&mut s, &CancellationToken::new()).await,
            Err(IngestError::Protocol(_))
        ));
        assert!(h.events.stored().is_empty());
    }

    #[tokio::test]
    async fn second_hello_ends_the_session() {
        let mut h = harness(Duration::from_secs(1800)).await;
        let mut s = session(vec!["event: hello\ndata: \"s1\"\n\n", "event: hello\ndata: \"s2\"\n\n", UPDATE_E1]);

        h.dispatcher.handshake(&mut s).await.unwrap();
        let ended = h.dispatcher.run(&mut s, &CancellationToken::new()).await;
        assert!(matches!(ended, Err(IngestError::Protocol(_))));
        assert!(h.events.stored().is_empty());
    }

    #[tokio::test]
    async fn keepalive_and_refresh_run_inline() {
        let mut h = harness(Duration::ZERO).await;
        let soon = Utc::now() + chrono::TimeDelta::seconds(60);
        h.platform.set_login(Ok(Credential { access_token: "t1".into(), expires_at: soon }));
        h.dispatcher.deps.tokens.login().await.unwrap();
        h.platform.fail_keepalive(true);
        let mut s = session(vec!["event: hello\ndata: \"s1\"\n\n", "event: object.values.heartbeat\ndata: x\n\n"]);

        h.dispatcher.handshake(&mut s).await.unwrap();
        let _ = h.dispatcher.run(&mut s, &CancellationToken::new()).await;

        assert_eq!(h.platform.refresh_calls(), 1);
        assert_eq!(h.platform.keepalive_calls(), 1);
        assert_eq!(h.journal.entries(), vec!["refresh", "keepalive"]);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_stream_still_gets_maintenance_and_stops_on_cancel() {
        let mut h = harness(Duration::ZERO).await;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<IngestResult<bytes::Bytes>>();
        tx.send(Ok(bytes::Bytes::from_static(b"event: hello\ndata: \"s1\"\n\n"))).unwrap();
        let body = futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
        let mut s = StreamSession::from_byte_stream(futures_util::StreamExt::boxed(body));
        h.dispatcher.handshake(&mut s).await.unwrap();

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        let run = async {
            let result = h.dispatcher.run(&mut s, &cancel).await;
            (result, h.dispatcher.state())
        };
        let stop = async {
            tokio::time::sleep(Duration::from_secs(150)).await;
            stopper.cancel();
        };
        let ((result, state), ()) = tokio::join!(run, stop);

        assert!(result.is_ok());
        assert_eq!(state, DispatchState::Terminated);
        assert_eq!(h.platform.keepalive_calls(), 2);
        drop(tx);
    }
}
