// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed hub events.
//!
//! Hub invocations arrive as a target name plus a JSON argument list. They
//! are decoded into [`HubEvent`] once, at the dispatch boundary, so adapters
//! never handle raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::Role;

/// Server -> client: a chat message was delivered.
pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";
/// Server -> client: someone unboxed an item.
pub const RECEIVE_UNBOXING_NOTIFICATION: &str = "ReceiveUnboxingNotification";
/// Client -> server: send a chat message to another user.
pub const SEND_MESSAGE: &str = "SendMessage";
/// Client -> server: send a prompt to the AI assistant.
pub const SEND_MESSAGE_TO_AI: &str = "SendMessageToAi";

/// Sender id the backend uses for AI assistant replies.
pub const AI_SENDER_ID: &str = "AI";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    UserToUser,
    UserToAi,
    AiToUser,
    ImageMessage,
    InventoryItemMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    #[serde(default)]
    pub receiver_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
    #[serde(alias = "timestamp")]
    pub sent_at: String,
    #[serde(default)]
    pub is_read: bool,
}

fn default_message_type() -> MessageType {
    MessageType::UserToUser
}

impl ChatMessage {
    pub fn is_from_ai(&self) -> bool {
        self.sender_id == AI_SENDER_ID || self.message_type == MessageType::AiToUser
    }

    /// The other party of the conversation, seen from `me`.
    pub fn partner_of(&self, me: &str) -> Option<&str> {
        if self.sender_id == me {
            self.receiver_id.as_deref()
        } else {
            Some(&self.sender_id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnboxingPayload {
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    pub item_name: String,
    #[serde(default)]
    pub rarity: Option<String>,
    #[serde(default)]
    pub blind_box_name: Option<String>,
    #[serde(default)]
    pub unboxed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnboxingNotification {
    /// Only users with this role should see the notification. `None` means everyone.
    #[serde(default)]
    pub target_role: Option<Role>,
    #[serde(flatten)]
    pub payload: UnboxingPayload,
}

impl UnboxingNotification {
    pub fn is_visible_to(&self, role: Option<Role>) -> bool {
        match self.target_role {
            None => true,
            Some(target) => role == Some(target),
        }
    }
}

/// A decoded server -> client hub invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    ReceiveMessage(ChatMessage),
    ReceiveUnboxingNotification(UnboxingNotification),
    Other { target: String, arguments: Vec<Value> },
}

impl HubEvent {
    /// Validate an invocation's arguments against its target.
    pub fn decode(target: &str, arguments: Vec<Value>) -> anyhow::Result<Self> {
        match target {
            RECEIVE_MESSAGE => Ok(Self::ReceiveMessage(first_argument(target, arguments)?)),
            RECEIVE_UNBOXING_NOTIFICATION => {
                Ok(Self::ReceiveUnboxingNotification(first_argument(target, arguments)?))
            }
            _ => Ok(Self::Other { target: target.to_owned(), arguments }),
        }
    }

    /// The event name this value is dispatched under.
    pub fn name(&self) -> &str {
        match self {
            Self::ReceiveMessage(_) => RECEIVE_MESSAGE,
            Self::ReceiveUnboxingNotification(_) => RECEIVE_UNBOXING_NOTIFICATION,
            Self::Other { target, .. } => target,
        }
    }
}

fn first_argument<T: serde::de::DeserializeOwned>(
    target: &str,
    arguments: Vec<Value>,
) -> anyhow::Result<T> {
    let first = arguments
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("{target}: missing argument"))?;
    serde_json::from_value(first).map_err(|e| anyhow::anyhow!("{target}: {e}"))
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
