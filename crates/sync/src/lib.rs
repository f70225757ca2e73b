// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! treasure-sync: realtime session synchronizer for the BlindTreasure
//! marketplace client.
//!
//! Keeps SignalR hub connections alive, routes hub events to typed
//! listeners, refreshes the token pair in the background and tears the whole
//! session down when authorization is lost.

pub mod adapters;
pub mod api;
pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod hub;
pub mod nav;
pub mod notice;
pub mod session;
pub mod state;
pub mod storage;
pub mod test_support;

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

pub use crate::client::SyncClient;
use crate::config::SyncConfig;
use crate::nav::{ChannelNavigator, Route};

/// Install the ring crypto provider for rustls. reqwest and
/// tokio-tungstenite are built without one, and reqwest needs it even for
/// plain HTTP. Later calls are no-ops.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Options of the binary's run mode that are not part of [`SyncConfig`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Prompt sent to the AI assistant once the chat hub is up.
    pub ai_prompt: Option<String>,
}

/// Connect the hubs for the stored session and log traffic until Ctrl-C or
/// until the session ends.
pub async fn run(config: SyncConfig, options: RunOptions) -> anyhow::Result<()> {
    let navigator = Arc::new(ChannelNavigator::new());
    let mut routes = navigator.subscribe();
    let client = SyncClient::new(config, navigator)?;
    let mut notices = client.notifier().subscribe();

    client.init().await?;
    match client.sessions().user() {
        Some(user) => info!(user = %user.user_id, role = %user.role, "session active"),
        None if client.sessions().is_signed_in() => info!("session active, identity unknown"),
        None => warn!("no stored session, connecting anonymously"),
    }

    let chat = client.chat();
    let ai = client.ai_chat();
    let unboxing = client.unboxing();
    let _unboxing_log = unboxing.on_unboxing_received(|n| {
        info!(
            item = %n.payload.item_name,
            rarity = n.payload.rarity.as_deref().unwrap_or("-"),
            customer = n.payload.customer_name.as_deref().unwrap_or("-"),
            "unboxed"
        );
    });
    let mut messages = chat.watch_last();
    let mut replies = ai.watch_replies();

    // Hubs keep retrying in the background; a failed first connect is not fatal.
    if let Err(e) = chat.connect().await {
        warn!(err = %e, "chat hub unavailable");
    }
    if let Err(e) = unboxing.connect().await {
        warn!(err = %e, "unboxing hub unavailable");
    }
    if let Some(ref prompt) = options.ai_prompt {
        if let Err(e) = ai.send_prompt(prompt).await {
            client.notifier().report(&e);
        }
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            route = routes.recv() => match route {
                Ok(Route::Login) => {
                    warn!("session ended, sign in again");
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            notice = notices.recv() => {
                if let Ok(notice) = notice {
                    warn!(level = ?notice.level, "{}", notice.message);
                }
            }
            changed = messages.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(msg) = messages.borrow_and_update().clone() {
                    info!(from = %msg.sender_id, kind = ?msg.message_type, "{}", msg.content);
                }
            }
            changed = replies.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(msg) = replies.borrow_and_update().clone() {
                    info!(from = "AI", "{}", msg.content);
                }
            }
        }
    }

    drop((chat, ai, unboxing));
    client.dispose().await
}
