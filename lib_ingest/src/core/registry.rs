//! # Subscription Registry
//!
//! Tracks which GUIDs are subscribed on the current stream (in memory) and
//! which ever were (durably). Subscribe and unsubscribe are idempotent.
//! Unsubscribe only touches the in-memory set; the durable record stays
//! active, so the GUID comes back on the next bootstrap.
//!
//! All state sits behind one async mutex held for the whole operation, so a
//! request handler and the supervisor can call in concurrently and two
//! subscribes of the same GUID never both reach the platform.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::core::ports::{PlatformApi, PlatformReply, SubscriptionStore};
use crate::core::token::TokenManager;
use crate::errors::{IngestError, IngestResult};
use crate::model::{check_guid, SubscriptionRecord};

/// Caller-visible result of [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed,
    AlreadySubscribed,
}

/// Caller-visible result of [`SubscriptionRegistry::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    Unsubscribed,
    NotSubscribed,
}

/// Summary of a bootstrap replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Active durable records read.
    pub durable: usize,
    /// Subscriptions re-issued and acknowledged.
    pub replayed: usize,
    /// Already active in memory (or duplicated durably), not re-issued.
    pub skipped: usize,
    /// Re-issued but refused or failed.
    pub failed: usize,
}

#[derive(Default)]
struct RegistryState {
    stream_id: Option<String>,
    active: BTreeSet<String>,
}

pub struct SubscriptionRegistry {
    api: Arc<dyn PlatformApi>,
    tokens: Arc<TokenManager>,
    store: Arc<dyn SubscriptionStore>,
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new(api: Arc<dyn PlatformApi>, tokens: Arc<TokenManager>, store: Arc<dyn SubscriptionStore>) -> Self {
        Self { api, tokens, store, state: Mutex::new(RegistryState::default()) }
    }

    /// Binds the registry to a freshly handshaked stream.
    ///
    /// Platform subscriptions belong to a stream, so the in-memory set is
    /// cleared; [`bootstrap`](Self::bootstrap) repopulates it.
    pub async fn attach_stream(&self, stream_id: &str) {
        let mut state = self.state.lock().await;
        state.stream_id = Some(stream_id.to_string());
        state.active.clear();
    }

    /// Forgets the stream after its session ended.
    pub async fn detach_stream(&self) {
        let mut state = self.state.lock().await;
        state.stream_id = None;
        state.active.clear();
    }

    pub async fn stream_id(&self) -> Option<String> {
        self.state.lock().await.stream_id.clone()
    }

    /// Subscribes to `guid` on the current stream.
    ///
    /// Only an acknowledged platform call (200/202/204) marks the GUID
    /// active, in memory and durably.
    ///
    /// # Errors
    /// `Config` for a GUID that cannot form a path segment, `Protocol`
    /// before any handshake, `Rejected` for other statuses, `Transport`/`Auth`
    /// from the call itself, `Persistence` if the durable write fails (the
    /// GUID is then left inactive so a retry re-issues the call).
    pub async fn subscribe(&self, guid: &str) -> IngestResult<SubscribeOutcome> {
        let guid = check_guid(guid)?;

        let mut state = self.state.lock().await;
        if state.active.contains(guid) {
            tracing::info!(guid, "Already subscribed to GUID");
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        let stream_id = state
            .stream_id
            .clone()
            .ok_or_else(|| IngestError::Protocol("no stream established; cannot subscribe yet".to_string()))?;

        let reply = self.platform_subscribe(&stream_id, guid).await?;
        if !reply.is_subscribe_ack() {
            tracing::error!(guid, status = reply.status, body = %reply.body, "Failed to subscribe to GUID");
            return Err(IngestError::Rejected { guid: guid.to_string(), status: reply.status, body: reply.body });
        }

        if let Err(e) = self.store.add(&SubscriptionRecord::active(guid)).await {
            tracing::error!(guid, error = %e, "Subscribed on the platform but could not record it");
            return Err(e);
        }
        state.active.insert(guid.to_string());
        tracing::info!(guid, status = reply.status, "Successfully subscribed to GUID");
        Ok(SubscribeOutcome::Subscribed)
    }

    /// Removes `guid` from the in-memory set.
    pub async fn unsubscribe(&self, guid: &str) -> UnsubscribeOutcome {
        let mut state = self.state.lock().await;
        if state.active.remove(guid.trim()) {
            tracing::info!(guid, "Unsubscribed from GUID");
            UnsubscribeOutcome::Unsubscribed
        } else {
            tracing::info!(guid, "Not subscribed to GUID");
            UnsubscribeOutcome::NotSubscribed
        }
    }

    /// Replays every durably active GUID on the current stream.
    ///
    /// Records are replayed newest first (reverse stored order). Durable
    /// state is not rewritten. Individual failures are logged and counted;
    /// only a failure to read the store or a missing stream is an error.
    pub async fn bootstrap(&self) -> IngestResult<BootstrapReport> {
        let mut state = self.state.lock().await;
        let stream_id = state
            .stream_id
            .clone()
            .ok_or_else(|| IngestError::Protocol("no stream established; cannot bootstrap".to_string()))?;

        let guids = self.store.active_guids().await?;
        let mut report = BootstrapReport { durable: guids.len(), ..Default::default() };

        for guid in guids.iter().rev() {
            if state.active.contains(guid) {
                report.skipped += 1;
                continue;
            }
            match self.platform_subscribe(&stream_id, guid).await {
                Ok(reply) if reply.is_subscribe_ack() => {
                    state.active.insert(guid.clone());
                    report.replayed += 1;
                }
                Ok(reply) => {
                    tracing::error!(guid = %guid, status = reply.status, "Replay subscribe refused");
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::error!(guid = %guid, error = %e, "Replay subscribe failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            durable = report.durable,
            replayed = report.replayed,
            skipped = report.skipped,
            failed = report.failed,
            "All subscriptions active"
        );
        Ok(report)
    }

    /// In-memory active GUIDs, sorted.
    pub async fn list(&self) -> Vec<String> {
        self.state.lock().await.active.iter().cloned().collect()
    }

    async fn platform_subscribe(&self, stream_id: &str, guid: &str) -> IngestResult<PlatformReply> {
        let token = self.tokens.access_token().await?;
        self.api.subscribe(&token, stream_id, guid).await
    }
}
