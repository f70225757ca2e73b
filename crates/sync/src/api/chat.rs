// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/chat/*` endpoints.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::ApiClient;
use crate::events::ChatMessage;
use crate::hub::protocol::urlencode;

/// One page of the conversation with `other_user_id`, oldest first.
pub async fn conversation(
    api: &ApiClient,
    other_user_id: &str,
    page: u32,
    size: u32,
) -> anyhow::Result<Vec<ChatMessage>> {
    let path = format!(
        "/chat/conversations/{}?pageIndex={page}&pageSize={size}",
        urlencode(other_user_id)
    );
    api.get_json(&path).await
}

/// Mark every message from `from_user_id` as read.
pub async fn mark_read(api: &ApiClient, from_user_id: &str) -> anyhow::Result<()> {
    let path = format!("/chat/conversations/{}/mark-read", urlencode(from_user_id));
    let _: Value = api.post_json(&path, &json!({})).await?;
    Ok(())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UnreadCount {
    Bare(u32),
    #[serde(rename_all = "camelCase")]
    Wrapped { unread_count: u32 },
}

/// Unread messages across all conversations.
pub async fn unread_count(api: &ApiClient) -> anyhow::Result<u32> {
    let count: UnreadCount = api.get_json("/chat/unread-count").await?;
    Ok(match count {
        UnreadCount::Bare(n) | UnreadCount::Wrapped { unread_count: n } => n,
    })
}
