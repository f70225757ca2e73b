// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session/token coordinator: keeps the token pair fresh and tears the
//! session down when it cannot.
//!
//! A periodic tick moves `Idle -> CheckingExpiry -> Refreshing` and back to
//! `Idle` on success. A failed refresh ends the session: tokens, derived app
//! state, hub connections and persisted storage are cleared and the UI is
//! sent to the login route, once per session.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{auth, ApiClient};
use crate::clock::Clock;
use crate::hub::HubRegistry;
use crate::nav::{Navigator, Route};
use crate::session::{SessionStore, TokenPair};
use crate::state::AppStore;
use crate::storage::LocalStore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPolicy {
    /// Period of the expiry check.
    pub check_interval: Duration,
    /// Lifetime of an access token.
    pub token_lifetime: Duration,
    /// Fraction of `token_lifetime` after which a refresh is due.
    pub threshold: f64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            token_lifetime: Duration::from_secs(3600),
            threshold: 0.75,
        }
    }
}

impl RefreshPolicy {
    /// Clamp into a usable range: a zero interval becomes 1ms and a NaN
    /// threshold falls back to the default.
    pub fn sanitized(self) -> Self {
        let threshold = if self.threshold.is_nan() {
            Self::default().threshold
        } else {
            self.threshold.clamp(0.0, 1.0)
        };
        Self {
            check_interval: self.check_interval.max(Duration::from_millis(1)),
            token_lifetime: self.token_lifetime,
            threshold,
        }
    }

    pub fn is_due(&self, last_refresh_ms: Option<u64>, now_ms: u64) -> bool {
        should_refresh(last_refresh_ms, now_ms, self.token_lifetime, self.threshold)
    }
}

/// A refresh is due when none has happened yet, or when at least
/// `threshold * lifetime` has elapsed since the last one.
pub fn should_refresh(
    last_refresh_ms: Option<u64>,
    now_ms: u64,
    lifetime: Duration,
    threshold: f64,
) -> bool {
    let Some(last) = last_refresh_ms else {
        return true;
    };
    let window_ms = (lifetime.as_millis() as f64 * threshold).ceil() as u64;
    now_ms.saturating_sub(last) >= window_ms
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    CheckingExpiry,
    Refreshing,
    /// The last session ended in failure. Terminal for that session only.
    Invalidated,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    NoSession,
    NotDue,
    Refreshed,
    /// The refresh finished after the session changed; its result was dropped.
    Discarded,
    Invalidated,
    /// Another refresh is still in flight.
    Busy,
}

/// Exchanges a refresh token for a new pair.
pub trait TokenRefresher: Send + Sync {
    fn refresh(
        &self,
        refresh_token: String,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TokenPair>> + Send + '_>>;
}

impl TokenRefresher for ApiClient {
    fn refresh(
        &self,
        refresh_token: String,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TokenPair>> + Send + '_>> {
        Box::pin(async move { auth::refresh_token(self, &refresh_token).await })
    }
}

/// Services the coordinator reads and tears down.
pub struct CoordinatorParts {
    pub sessions: Arc<SessionStore>,
    pub app: Arc<AppStore>,
    pub hubs: Arc<HubRegistry>,
    pub storage: Arc<LocalStore>,
    pub navigator: Arc<dyn Navigator>,
    pub refresher: Arc<dyn TokenRefresher>,
    pub clock: Arc<dyn Clock>,
}

pub struct SessionCoordinator {
    policy: RefreshPolicy,
    parts: CoordinatorParts,
    /// Set while a tick owns the refresh slot.
    in_flight: AtomicBool,
    /// Held while refreshed tokens are applied and written, and for the
    /// whole teardown, so a late write cannot follow the purge.
    persist: Mutex<()>,
    state_tx: watch::Sender<CoordinatorState>,
}

/// Releases the refresh slot even if the tick future is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SessionCoordinator {
    pub fn new(policy: RefreshPolicy, parts: CoordinatorParts) -> Self {
        let (state_tx, _) = watch::channel(CoordinatorState::Idle);
        Self {
            policy: policy.sanitized(),
            parts,
            in_flight: AtomicBool::new(false),
            persist: Mutex::new(()),
            state_tx,
        }
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<CoordinatorState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, next: CoordinatorState) {
        self.state_tx.send_if_modified(|s| {
            let changed = *s != next;
            *s = next;
            changed
        });
    }

    /// Run one expiry check, refreshing if due.
    pub async fn tick(&self) -> TickOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return TickOutcome::Busy;
        }
        let _slot = InFlight(&self.in_flight);

        let (session, generation) = self.parts.sessions.current();
        let Some(session) = session else {
            if self.state() != CoordinatorState::Invalidated {
                self.set_state(CoordinatorState::Idle);
            }
            return TickOutcome::NoSession;
        };

        self.set_state(CoordinatorState::CheckingExpiry);
        let now = self.parts.clock.now_ms();
        if !self.policy.is_due(session.last_refresh_ms, now) {
            self.set_state(CoordinatorState::Idle);
            return TickOutcome::NotDue;
        }

        self.set_state(CoordinatorState::Refreshing);
        debug!(generation, "refreshing token pair");
        let result = self.parts.refresher.refresh(session.tokens.refresh_token).await;

        match result {
            Ok(tokens) => {
                let _persist = self.persist.lock().await;
                let now = self.parts.clock.now_ms();
                if !self.parts.sessions.apply_refresh(generation, tokens.clone(), now) {
                    debug!(generation, "session changed during refresh, dropping tokens");
                    self.settle_after_discard();
                    return TickOutcome::Discarded;
                }
                if let Err(e) = self.persist_tokens(&tokens).await {
                    warn!(err = %e, "failed to persist refreshed tokens");
                }
                self.set_state(CoordinatorState::Idle);
                info!("token pair refreshed");
                TickOutcome::Refreshed
            }
            Err(e) => {
                warn!(err = %e, "token refresh failed");
                if self.invalidate_generation(generation).await {
                    TickOutcome::Invalidated
                } else {
                    self.settle_after_discard();
                    TickOutcome::Discarded
                }
            }
        }
    }

    fn settle_after_discard(&self) {
        if self.state() != CoordinatorState::Invalidated {
            self.set_state(CoordinatorState::Idle);
        }
    }

    async fn persist_tokens(&self, tokens: &TokenPair) -> anyhow::Result<()> {
        self.parts.storage.set_tokens(tokens)?;
        self.parts.storage.flush().await
    }

    /// End the current session and run the teardown cascade.
    ///
    /// Returns false if there was no session to end.
    pub async fn invalidate(&self) -> bool {
        if !self.parts.sessions.clear() {
            return false;
        }
        self.teardown().await;
        true
    }

    async fn invalidate_generation(&self, generation: u64) -> bool {
        if !self.parts.sessions.clear_if(generation) {
            return false;
        }
        self.teardown().await;
        true
    }

    /// Runs after the session was cleared. Only the caller that cleared it
    /// gets here, so the cascade happens once per session.
    async fn teardown(&self) {
        let _persist = self.persist.lock().await;
        self.parts.storage.clear_tokens();
        self.parts.app.clear_session_state();
        let hubs = self.parts.hubs.dispose_all().await;
        if let Err(e) = self.parts.storage.flush().await {
            warn!(err = %e, "failed to flush storage before purge");
        }
        if let Err(e) = self.parts.storage.purge().await {
            warn!(err = %e, "failed to purge storage");
        }
        self.set_state(CoordinatorState::Invalidated);
        info!(hubs, "session invalidated");
        self.parts.navigator.navigate(Route::Login);
    }

    /// Tick every `check_interval` until `cancel` fires.
    ///
    /// The first tick runs immediately. Cancellation stops scheduling; a
    /// refresh already awaiting its response still completes.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.policy.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let this = Arc::clone(&self);
                let outcome = tokio::spawn(async move { this.tick().await }).await;
                if let Ok(outcome) = outcome {
                    debug!(?outcome, "coordinator tick");
                }
            }
            debug!("coordinator stopped");
        })
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
