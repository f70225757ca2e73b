// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composition root: builds every service once and hands out adapters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{AiChatAdapter, ChatAdapter, UnboxingAdapter};
use crate::api::oauth::GoogleOAuth;
use crate::api::{auth, ApiClient};
use crate::auth::{CoordinatorParts, SessionCoordinator};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{ApiError, ErrorCode};
use crate::hub::HubRegistry;
use crate::nav::Navigator;
use crate::notice::Notifier;
use crate::session::{RoleSource, SessionStore, TokenPair, TokenSource, UserIdentity};
use crate::state::{AppStore, PersistedSnapshot};
use crate::storage::{LocalStore, PERSIST_ROOT_KEY};

pub struct SyncClient {
    config: SyncConfig,
    storage: Arc<LocalStore>,
    sessions: Arc<SessionStore>,
    app: Arc<AppStore>,
    api: ApiClient,
    notifier: Arc<Notifier>,
    hubs: Arc<HubRegistry>,
    coordinator: Arc<SessionCoordinator>,
    shutdown: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncClient {
    /// Client backed by the storage file from `config`.
    pub fn new(config: SyncConfig, navigator: Arc<dyn Navigator>) -> anyhow::Result<Self> {
        let storage = Arc::new(LocalStore::file(config.storage_path()));
        Self::with_parts(config, navigator, storage, Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: SyncConfig,
        navigator: Arc<dyn Navigator>,
        storage: Arc<LocalStore>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let sessions = Arc::new(SessionStore::new());
        let app = Arc::new(AppStore::new());
        let api = ApiClient::new(&config.api_url, Arc::clone(&sessions), config.request_timeout())?;
        let tokens: Arc<dyn TokenSource> = sessions.clone();
        let hubs = Arc::new(HubRegistry::new(tokens, config.reconnect_policy()));
        let coordinator = Arc::new(SessionCoordinator::new(
            config.refresh_policy(),
            CoordinatorParts {
                sessions: Arc::clone(&sessions),
                app: Arc::clone(&app),
                hubs: Arc::clone(&hubs),
                storage: Arc::clone(&storage),
                navigator,
                refresher: Arc::new(api.clone()),
                clock,
            },
        ));

        Ok(Self {
            config,
            storage,
            sessions,
            app,
            api,
            notifier: Arc::new(Notifier::new()),
            hubs,
            coordinator,
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn app(&self) -> &Arc<AppStore> {
        &self.app
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub fn storage(&self) -> &Arc<LocalStore> {
        &self.storage
    }

    pub fn hubs(&self) -> &Arc<HubRegistry> {
        &self.hubs
    }

    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    /// Restore the persisted session and start background work.
    ///
    /// Runs once; later calls return immediately.
    pub async fn init(&self) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.storage.load().await?;
        if let Some(snapshot) = self.storage.get_as::<PersistedSnapshot>(PERSIST_ROOT_KEY) {
            self.app.restore(snapshot);
        }

        self.spawn_logout_watcher();

        match self.storage.tokens() {
            Some(tokens) => {
                let generation = self.sessions.sign_in(tokens, self.app.user());
                info!(generation, "restored session from storage");
                self.resolve_identity(generation).await;
            }
            // An identity without tokens belongs to a session that is gone.
            None => {
                if self.app.user().is_some() {
                    self.app.set_user(None);
                }
            }
        }

        let coordinator = Arc::clone(&self.coordinator).spawn(self.shutdown.clone());
        self.tasks.lock().push(coordinator);
        Ok(())
    }

    /// Authorization failures reported through the notifier end the session.
    fn spawn_logout_watcher(&self) {
        let mut requests = self.notifier.watch_logout_requests();
        let coordinator = Arc::clone(&self.coordinator);
        let cancel = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = requests.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if coordinator.invalidate().await {
                            info!("session ended after authorization failure");
                        }
                    }
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    async fn resolve_identity(&self, generation: u64) {
        let Some(user) = self.notifier.guard(auth::current_user(&self.api)).await else {
            return;
        };
        if self.sessions.set_user(generation, user.clone()) {
            debug!(user = %user.user_id, role = %user.role, "identity resolved");
            self.app.set_user(Some(user));
        }
    }

    /// Start a new session and persist it. Returns the session generation.
    pub async fn sign_in(
        &self,
        tokens: TokenPair,
        user: Option<UserIdentity>,
    ) -> anyhow::Result<u64> {
        let generation = self.sessions.sign_in(tokens.clone(), user.clone());
        self.app.set_user(user);
        self.storage.set_tokens(&tokens)?;
        self.persist().await?;
        info!(generation, "signed in");
        Ok(generation)
    }

    /// Sign in with a Google identity token, resolving the identity if the
    /// backend did not return one.
    pub async fn login_google(&self, id_token: &str) -> anyhow::Result<u64> {
        let result = auth::login_google(&self.api, id_token).await?;
        let missing_user = result.user.is_none();
        let generation = self.sign_in(result.tokens(), result.user).await?;
        if missing_user {
            self.resolve_identity(generation).await;
        }
        Ok(generation)
    }

    /// Complete the Google authorization-code flow and sign in.
    pub async fn login_google_code(&self, code: &str) -> anyhow::Result<u64> {
        let Some(oauth) = GoogleOAuth::from_config(&self.config, self.api.http().clone()) else {
            return Err(
                ApiError::new(ErrorCode::Validation, "google login is not configured").into()
            );
        };
        let google = oauth.exchange_code(code).await?;
        self.login_google(&google.id_token).await
    }

    /// Revoke the refresh token (best effort) and run the logout cascade.
    ///
    /// Returns false if no session was active.
    pub async fn logout(&self) -> bool {
        if let Some(tokens) = self.sessions.tokens() {
            if let Err(e) = auth::logout(&self.api, &tokens.refresh_token).await {
                debug!(err = %e, "backend logout failed");
            }
        }
        self.coordinator.invalidate().await
    }

    pub fn chat(&self) -> ChatAdapter {
        let conn = self.hubs.connection(&self.config.chat_hub_url);
        ChatAdapter::new(conn, Arc::clone(&self.app), self.api.clone())
    }

    pub fn ai_chat(&self) -> AiChatAdapter {
        let conn = self.hubs.connection(&self.config.chat_hub_url);
        AiChatAdapter::new(conn, Arc::clone(&self.app))
    }

    /// Unboxing adapter filtered by the signed-in user's role.
    pub fn unboxing(&self) -> UnboxingAdapter {
        let conn = self.hubs.connection(&self.config.unboxing_hub_url);
        let roles: Arc<dyn RoleSource> = self.sessions.clone();
        UnboxingAdapter::new(conn, self.sessions.role()).with_role_source(roles)
    }

    /// Write the whitelisted app-state snapshot to storage.
    pub async fn persist(&self) -> anyhow::Result<()> {
        self.storage.set_as(PERSIST_ROOT_KEY, &self.app.snapshot())?;
        self.storage.flush().await
    }

    /// Stop background tasks and drop hub connections. The session is kept
    /// and persisted for the next start.
    pub async fn dispose(&self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(err = %e, "background task failed");
            }
        }
        let hubs = self.hubs.dispose_all().await;
        if self.sessions.is_signed_in() {
            self.persist().await?;
        }
        info!(hubs, "client disposed");
        Ok(())
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
