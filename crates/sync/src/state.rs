// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-derived state observed by the UI.
//!
//! Everything lives behind one lock so the logout cascade clears user, cart
//! and chat in a single critical section; observers never see tokens gone
//! while a stale cart lingers.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::events::ChatMessage;
use crate::session::UserIdentity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub item_id: String,
    #[serde(default)]
    pub name: String,
    pub quantity: u32,
    /// Unit price in the smallest currency unit.
    #[serde(default)]
    pub unit_price: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CartState {
    pub lines: Vec<CartLine>,
}

impl CartState {
    pub fn total(&self) -> u64 {
        self.lines.iter().map(|l| l.unit_price * u64::from(l.quantity)).sum()
    }

    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }
}

/// Catalogue filters. Not session-bound, so they survive logout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub min_price: Option<u64>,
    #[serde(default)]
    pub max_price: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    /// Messages per conversation partner, in arrival order.
    pub conversations: BTreeMap<String, Vec<ChatMessage>>,
    pub last_message: Option<ChatMessage>,
    pub unread: BTreeMap<String, u32>,
    /// AI assistant thread.
    pub ai_messages: Vec<ChatMessage>,
    pub ai_waiting: bool,
}

impl ChatState {
    /// Record an inbound or echoed message, seen from user `me`.
    pub fn apply_message(&mut self, me: Option<&str>, msg: ChatMessage) {
        let partner = match me {
            Some(me) => msg.partner_of(me),
            None => Some(msg.sender_id.as_str()),
        };
        let Some(partner) = partner.map(str::to_owned) else {
            self.last_message = Some(msg);
            return;
        };

        let inbound = me.is_none_or(|me| msg.sender_id != me);
        if inbound && !msg.is_read {
            *self.unread.entry(partner.clone()).or_default() += 1;
        }
        self.last_message = Some(msg.clone());
        self.conversations.entry(partner).or_default().push(msg);
    }

    /// Mark everything received from `partner` as read.
    pub fn mark_read(&mut self, partner: &str) {
        self.unread.remove(partner);
        if let Some(messages) = self.conversations.get_mut(partner) {
            for msg in messages.iter_mut().filter(|m| m.sender_id == partner) {
                msg.is_read = true;
            }
        }
    }

    pub fn total_unread(&self) -> u32 {
        self.unread.values().sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    pub user: Option<UserIdentity>,
    pub cart: CartState,
    pub chat: ChatState,
    pub filters: Filters,
}

/// The whitelisted subset of [`AppState`] kept in local storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    #[serde(default)]
    pub session: Option<UserIdentity>,
    #[serde(default)]
    pub cart: Vec<CartLine>,
    #[serde(default)]
    pub filters: Filters,
}

/// Owner of [`AppState`]. Every mutation bumps a version published on a
/// `watch` channel.
pub struct AppStore {
    state: RwLock<AppState>,
    version: watch::Sender<u64>,
}

impl AppStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self { state: RwLock::new(AppState::default()), version }
    }

    /// Fires after every mutation.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Read a projection of the state under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&self.state.read())
    }

    pub fn get(&self) -> AppState {
        self.state.read().clone()
    }

    /// Apply `f` under the write lock, then publish.
    pub fn update<R>(&self, f: impl FnOnce(&mut AppState) -> R) -> R {
        let out = {
            let mut state = self.state.write();
            f(&mut state)
        };
        self.version.send_modify(|v| *v += 1);
        out
    }

    pub fn user(&self) -> Option<UserIdentity> {
        self.read(|s| s.user.clone())
    }

    pub fn set_user(&self, user: Option<UserIdentity>) {
        self.update(|s| s.user = user);
    }

    /// Add `line`, merging quantities with an existing line for the same item.
    pub fn add_to_cart(&self, line: CartLine) {
        self.update(|s| match s.cart.lines.iter_mut().find(|l| l.item_id == line.item_id) {
            Some(existing) => existing.quantity += line.quantity,
            None => s.cart.lines.push(line),
        });
    }

    pub fn remove_from_cart(&self, item_id: &str) -> bool {
        self.update(|s| {
            let before = s.cart.lines.len();
            s.cart.lines.retain(|l| l.item_id != item_id);
            s.cart.lines.len() != before
        })
    }

    pub fn cart(&self) -> CartState {
        self.read(|s| s.cart.clone())
    }

    pub fn set_filters(&self, filters: Filters) {
        self.update(|s| s.filters = filters);
    }

    pub fn filters(&self) -> Filters {
        self.read(|s| s.filters.clone())
    }

    pub fn chat(&self) -> ChatState {
        self.read(|s| s.chat.clone())
    }

    /// Record a chat message against the signed-in user's conversations.
    pub fn apply_chat_message(&self, msg: ChatMessage) {
        self.update(|s| {
            let me = s.user.as_ref().map(|u| u.user_id.clone());
            s.chat.apply_message(me.as_deref(), msg);
        });
    }

    pub fn mark_chat_read(&self, partner: &str) {
        self.update(|s| s.chat.mark_read(partner));
    }

    /// Drop everything tied to the signed-in session in one step.
    pub fn clear_session_state(&self) {
        self.update(|s| {
            s.user = None;
            s.cart = CartState::default();
            s.chat = ChatState::default();
        });
    }

    pub fn snapshot(&self) -> PersistedSnapshot {
        self.read(|s| PersistedSnapshot {
            session: s.user.clone(),
            cart: s.cart.lines.clone(),
            filters: s.filters.clone(),
        })
    }

    pub fn restore(&self, snapshot: PersistedSnapshot) {
        self.update(|s| {
            s.user = snapshot.session;
            s.cart = CartState { lines: snapshot.cart };
            s.filters = snapshot.filters;
        });
    }
}

impl Default for AppStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
