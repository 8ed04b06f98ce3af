//! # Token Lifecycle
//!
//! Owns the platform bearer credential. The expiry instant never moves
//! backwards across refreshes, and a refresh is only attempted once the
//! token is inside the refresh window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;

use crate::core::ports::PlatformApi;
use crate::errors::{IngestError, IngestResult};
use crate::model::Credential;

/// Result of a refresh check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Token is still outside the refresh window.
    NotDue,
    /// A new token was obtained; carries the (monotonic) expiry now in force.
    Refreshed { expires_at: DateTime<Utc> },
}

/// True once `now` is within `window` of `expires_at`.
///
/// A window reaching past the representable range is always due.
pub fn refresh_due(expires_at: DateTime<Utc>, now: DateTime<Utc>, window: TimeDelta) -> bool {
    expires_at.checked_sub_signed(window).map_or(true, |due_at| now >= due_at)
}

/// Obtains and refreshes the bearer credential.
pub struct TokenManager {
    api: Arc<dyn PlatformApi>,
    username: String,
    password: String,
    refresh_window: TimeDelta,
    credential: RwLock<Option<Credential>>,
}

impl TokenManager {
    pub fn new(api: Arc<dyn PlatformApi>, username: String, password: String, refresh_window: Duration) -> Self {
        Self {
            api,
            username,
            password,
            // Out-of-range windows are refused by settings validation; here they are always due.
            refresh_window: TimeDelta::from_std(refresh_window).unwrap_or(TimeDelta::MAX),
            credential: RwLock::new(None),
        }
    }

    /// Authenticates with the stored username and password.
    ///
    /// Replaces any current credential. Failures are `Auth` errors.
    pub async fn login(&self) -> IngestResult<DateTime<Utc>> {
        let fresh = self.api.login(&self.username, &self.password).await.map_err(|e| match e {
            IngestError::Auth(msg) => IngestError::Auth(msg),
            other => IngestError::Auth(format!("login failed: {}", other)),
        })?;
        let expires_at = fresh.expires_at;
        *self.credential.write().await = Some(fresh);
        tracing::info!(%expires_at, "Logged in");
        Ok(expires_at)
    }

    /// Current bearer token.
    pub async fn access_token(&self) -> IngestResult<String> {
        self.credential
            .read()
            .await
            .as_ref()
            .map(|c| c.access_token.clone())
            .ok_or_else(|| IngestError::Auth("no access token; login has not succeeded".to_string()))
    }

    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.credential.read().await.as_ref().map(|c| c.expires_at)
    }

    /// Refreshes the token if `now` is inside the refresh window.
    ///
    /// On failure the stale token stays in place and the error is returned;
    /// callers decide whether to carry on with it.
    pub async fn refresh_if_due(&self, now: DateTime<Utc>) -> IngestResult<RefreshOutcome> {
        let mut guard = self.credential.write().await;
        let current = guard
            .as_ref()
            .ok_or_else(|| IngestError::Auth("cannot refresh before login".to_string()))?;

        if !refresh_due(current.expires_at, now, self.refresh_window) {
            return Ok(RefreshOutcome::NotDue);
        }

        tracing::info!(expires_at = %current.expires_at, "Refreshing token");
        let fresh = self.api.refresh(&current.access_token).await.map_err(|e| match e {
            IngestError::Auth(msg) => IngestError::Auth(msg),
            other => IngestError::Auth(format!("refresh failed: {}", other)),
        })?;

        let expires_at = if fresh.expires_at < current.expires_at {
            tracing::warn!(
                offered = %fresh.expires_at,
                kept = %current.expires_at,
                "Refreshed token reports an earlier expiry; keeping the later one"
            );
            current.expires_at
        } else {
            fresh.expires_at
        };

        *guard = Some(Credential { access_token: fresh.access_token, expires_at });
        tracing::info!(%expires_at, "Refreshed token");
        Ok(RefreshOutcome::Refreshed { expires_at })
    }
}
