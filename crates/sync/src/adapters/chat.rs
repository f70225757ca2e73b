// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-to-user chat over the chat hub.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;
use tracing::debug;

use crate::api::{chat as chat_api, ApiClient};
use crate::error::{ApiError, ErrorCode};
use crate::events::{ChatMessage, HubEvent, RECEIVE_MESSAGE, SEND_MESSAGE};
use crate::hub::{HubConnection, Subscription};
use crate::state::AppStore;

pub struct ChatAdapter {
    conn: Arc<HubConnection>,
    app: Arc<AppStore>,
    api: ApiClient,
    last: Arc<watch::Sender<Option<ChatMessage>>>,
    _subscription: Subscription,
}

impl ChatAdapter {
    /// Subscribe to `ReceiveMessage` on `conn`. AI replies are left to
    /// [`AiChatAdapter`](super::AiChatAdapter).
    pub fn new(conn: Arc<HubConnection>, app: Arc<AppStore>, api: ApiClient) -> Self {
        let (last_tx, _) = watch::channel(None);
        let last = Arc::new(last_tx);

        let sink = Arc::clone(&last);
        let store = Arc::clone(&app);
        let subscription = conn.add_event_listener(RECEIVE_MESSAGE, move |event| {
            let HubEvent::ReceiveMessage(msg) = event else {
                return Ok(());
            };
            if msg.is_from_ai() {
                return Ok(());
            }
            debug!(id = %msg.id, from = %msg.sender_id, "chat message");
            store.apply_chat_message(msg.clone());
            sink.send_replace(Some(msg.clone()));
            Ok(())
        });

        Self { conn, app, api, last, _subscription: subscription }
    }

    pub async fn connect(&self) -> anyhow::Result<()> {
        self.conn.connect().await
    }

    pub fn is_ready(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn last_message(&self) -> Option<ChatMessage> {
        self.last.borrow().clone()
    }

    pub fn watch_last(&self) -> watch::Receiver<Option<ChatMessage>> {
        self.last.subscribe()
    }

    /// Send `content` to `receiver_id`. Fails immediately when the hub is not
    /// connected; nothing is queued.
    pub async fn send_message(&self, receiver_id: &str, content: &str) -> anyhow::Result<()> {
        if content.trim().is_empty() {
            return Err(ApiError::new(ErrorCode::Validation, "message is empty").into());
        }
        self.conn.invoke(SEND_MESSAGE, vec![json!(receiver_id), json!(content)]).await?;
        Ok(())
    }

    /// Mark the conversation with `user_id` read on the backend, then locally.
    pub async fn mark_read(&self, user_id: &str) -> anyhow::Result<()> {
        chat_api::mark_read(&self.api, user_id).await?;
        self.app.mark_chat_read(user_id);
        Ok(())
    }

    /// Load one page of history with `user_id` into chat state.
    pub async fn load_history(
        &self,
        user_id: &str,
        page: u32,
        size: u32,
    ) -> anyhow::Result<usize> {
        let messages = chat_api::conversation(&self.api, user_id, page, size).await?;
        let count = messages.len();
        for msg in messages {
            self.app.apply_chat_message(msg);
        }
        Ok(count)
    }
}
