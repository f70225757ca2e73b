// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;

use crate::error::{ApiError, ErrorCode};
use crate::events::{ChatMessage, HubEvent, RECEIVE_MESSAGE, SEND_MESSAGE_TO_AI};
use crate::hub::{HubConnection, Subscription};
use crate::state::AppStore;

/// Conversation with the AI assistant, sharing the chat hub.
///
/// Only messages sent by the assistant (`senderId == "AI"` or `AiToUser`)
/// are kept. `is_waiting` is true between a prompt and the next reply.
pub struct AiChatAdapter {
    conn: Arc<HubConnection>,
    app: Arc<AppStore>,
    last: Arc<watch::Sender<Option<ChatMessage>>>,
    _subscription: Subscription,
}

impl AiChatAdapter {
    pub fn new(conn: Arc<HubConnection>, app: Arc<AppStore>) -> Self {
        let (last_tx, _) = watch::channel(None);
        let last = Arc::new(last_tx);

        let sink = Arc::clone(&last);
        let store = Arc::clone(&app);
        let subscription = conn.add_event_listener(RECEIVE_MESSAGE, move |event| {
            let HubEvent::ReceiveMessage(msg) = event else {
                return Ok(());
            };
            if !msg.is_from_ai() {
                return Ok(());
            }
            store.update(|s| {
                s.chat.ai_messages.push(msg.clone());
                s.chat.ai_waiting = false;
            });
            sink.send_replace(Some(msg.clone()));
            Ok(())
        });

        Self { conn, app, last, _subscription: subscription }
    }

    pub fn is_ready(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn is_waiting(&self) -> bool {
        self.app.read(|s| s.chat.ai_waiting)
    }

    pub fn last_reply(&self) -> Option<ChatMessage> {
        self.last.borrow().clone()
    }

    pub fn watch_replies(&self) -> watch::Receiver<Option<ChatMessage>> {
        self.last.subscribe()
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.app.read(|s| s.chat.ai_messages.clone())
    }

    pub async fn send_prompt(&self, prompt: &str) -> anyhow::Result<()> {
        if prompt.trim().is_empty() {
            return Err(ApiError::new(ErrorCode::Validation, "prompt is empty").into());
        }
        if !self.conn.is_connected() {
            return Err(ApiError::disconnected(self.conn.url()).into());
        }
        self.app.update(|s| s.chat.ai_waiting = true);
        if let Err(e) = self.conn.invoke(SEND_MESSAGE_TO_AI, vec![json!(prompt)]).await {
            self.app.update(|s| s.chat.ai_waiting = false);
            return Err(e);
        }
        Ok(())
    }
}
