// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unboxing notifications, filtered by the viewer's role.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::events::{HubEvent, UnboxingNotification, RECEIVE_UNBOXING_NOTIFICATION};
use crate::hub::{ConnectionState, EventDispatcher, HubConnection, Lifecycle, Subscription};
use crate::session::{Role, RoleSource};

#[derive(Default)]
struct Shared {
    /// Role filtering is applied with; `None` after a terminal close.
    role: RwLock<Option<Role>>,
    /// Role given at construction or through `set_role`.
    assigned: RwLock<Option<Role>>,
    source: RwLock<Option<Arc<dyn RoleSource>>>,
    last: Mutex<Option<UnboxingNotification>>,
    /// UI callbacks; only notifications visible to `role` reach them.
    listeners: EventDispatcher,
}

impl Shared {
    /// Re-read the role from the session when one is attached.
    fn restore_role(&self) {
        let role = match self.source.read().as_ref() {
            Some(source) => source.current_role(),
            None => *self.assigned.read(),
        };
        *self.role.write() = role;
    }

    fn drop_role(&self) {
        if let Some(role) = self.role.write().take() {
            info!(%role, "unboxing hub closed, dropping cached role");
        }
    }
}

pub struct UnboxingAdapter {
    conn: Arc<HubConnection>,
    shared: Arc<Shared>,
    _subscription: Subscription,
    lifecycle: JoinHandle<()>,
}

impl UnboxingAdapter {
    pub fn new(conn: Arc<HubConnection>, role: Option<Role>) -> Self {
        let shared = Arc::new(Shared {
            role: RwLock::new(role),
            assigned: RwLock::new(role),
            ..Shared::default()
        });

        let filter = Arc::clone(&shared);
        let subscription = conn.add_event_listener(RECEIVE_UNBOXING_NOTIFICATION, move |event| {
            let HubEvent::ReceiveUnboxingNotification(notification) = event else {
                return Ok(());
            };
            let role = *filter.role.read();
            if !notification.is_visible_to(role) {
                debug!(target_role = ?notification.target_role, ?role, "notification filtered");
                return Ok(());
            }
            *filter.last.lock() = Some(notification.clone());
            filter.listeners.dispatch_event(RECEIVE_UNBOXING_NOTIFICATION, event);
            Ok(())
        });

        // A terminal close invalidates whatever role this connection was
        // authorized with. The role comes back on the next successful connect.
        let mut events = conn.subscribe_lifecycle();
        let state = conn.watch_state();
        let watcher = Arc::clone(&shared);
        let lifecycle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    // A close from a previous run is stale once a new
                    // connect has started.
                    Ok(Lifecycle::Closed { error: Some(e) }) => {
                        if *state.borrow() == ConnectionState::Disconnected {
                            debug!(err = %e, "unboxing hub stopped");
                            watcher.drop_role();
                        }
                    }
                    Ok(Lifecycle::Connected) => {
                        watcher.restore_role();
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        if *state.borrow() == ConnectionState::Disconnected {
                            debug!(skipped, "lifecycle lagged while disconnected");
                            watcher.drop_role();
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self { conn, shared, _subscription: subscription, lifecycle }
    }

    /// Take the role from `source` on every connect instead of the fixed one.
    pub fn with_role_source(self, source: Arc<dyn RoleSource>) -> Self {
        *self.shared.source.write() = Some(source);
        self.shared.restore_role();
        self
    }

    pub async fn connect(&self) -> anyhow::Result<()> {
        self.shared.restore_role();
        self.conn.connect().await
    }

    pub fn is_ready(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn role(&self) -> Option<Role> {
        *self.shared.role.read()
    }

    /// Override the role. Detaches any role source.
    pub fn set_role(&self, role: Option<Role>) {
        self.shared.source.write().take();
        *self.shared.assigned.write() = role;
        *self.shared.role.write() = role;
    }

    pub fn last_notification(&self) -> Option<UnboxingNotification> {
        self.shared.last.lock().clone()
    }

    /// Register `callback` for notifications visible to the current role.
    pub fn on_unboxing_received<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&UnboxingNotification) + Send + Sync + 'static,
    {
        self.shared.listeners.add_event_listener(RECEIVE_UNBOXING_NOTIFICATION, move |event| {
            if let HubEvent::ReceiveUnboxingNotification(notification) = event {
                callback(notification);
            }
            Ok(())
        })
    }
}

impl Drop for UnboxingAdapter {
    fn drop(&mut self) {
        self.lifecycle.abort();
    }
}
