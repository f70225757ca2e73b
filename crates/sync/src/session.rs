// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signed-in session: the token pair plus the identity resolved at sign-in.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Marketplace role of the signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Role {
    Customer,
    Seller,
    Staff,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "Customer",
            Self::Seller => "Seller",
            Self::Staff => "Staff",
            Self::Admin => "Admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "customer" => Ok(Self::Customer),
            "seller" => Ok(Self::Seller),
            "staff" => Ok(Self::Staff),
            "admin" => Ok(Self::Admin),
            other => anyhow::bail!("invalid role: {other}"),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Identity of the signed-in user, populated once at authentication time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(rename = "roleName", alias = "role")]
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub tokens: TokenPair,
    pub user: Option<UserIdentity>,
    /// Epoch millis of the last successful refresh; `None` until the first
    /// refresh after sign-in or page load.
    pub last_refresh_ms: Option<u64>,
}

/// Supplies bearer tokens to hub connections.
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

/// Supplies the signed-in user's role to adapters that filter by it.
pub trait RoleSource: Send + Sync {
    fn current_role(&self) -> Option<Role>;
}

/// Owner of the current session.
///
/// The whole session sits behind one lock, so a reader observes either the
/// old token pair or the new one. `generation` increases on every sign-in and
/// clear; async work captures it up front and drops its result if it changed.
#[derive(Debug, Default)]
pub struct SessionStore {
    current: RwLock<Option<Session>>,
    generation: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session. Returns its generation.
    pub fn sign_in(&self, tokens: TokenPair, user: Option<UserIdentity>) -> u64 {
        let mut current = self.current.write();
        *current = Some(Session { tokens, user, last_refresh_ms: None });
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drop the session. Returns true if one existed.
    pub fn clear(&self) -> bool {
        let mut current = self.current.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        current.take().is_some()
    }

    /// Drop the session only if `generation` is still current.
    pub fn clear_if(&self, generation: u64) -> bool {
        let mut current = self.current.write();
        if self.generation() != generation || current.is_none() {
            return false;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        current.take().is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The session together with the generation it belongs to.
    pub fn current(&self) -> (Option<Session>, u64) {
        let current = self.current.read();
        (current.clone(), self.generation())
    }

    pub fn snapshot(&self) -> Option<Session> {
        self.current.read().clone()
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.current.read().as_ref().map(|s| s.tokens.clone())
    }

    pub fn user(&self) -> Option<UserIdentity> {
        self.current.read().as_ref().and_then(|s| s.user.clone())
    }

    pub fn role(&self) -> Option<Role> {
        self.current.read().as_ref().and_then(|s| s.user.as_ref().map(|u| u.role))
    }

    pub fn is_signed_in(&self) -> bool {
        self.current.read().is_some()
    }

    /// Attach the identity resolved after sign-in, if the generation still matches.
    pub fn set_user(&self, generation: u64, user: UserIdentity) -> bool {
        let mut current = self.current.write();
        if self.generation() != generation {
            return false;
        }
        match current.as_mut() {
            Some(session) => {
                session.user = Some(user);
                true
            }
            None => false,
        }
    }

    /// Replace the token pair after a refresh.
    ///
    /// Applied only when `generation` is still current; a response that
    /// arrives after logout or invalidation is discarded.
    pub fn apply_refresh(&self, generation: u64, tokens: TokenPair, now_ms: u64) -> bool {
        let mut current = self.current.write();
        if self.generation() != generation {
            return false;
        }
        match current.as_mut() {
            Some(session) => {
                session.tokens = tokens;
                session.last_refresh_ms = Some(now_ms);
                true
            }
            None => false,
        }
    }
}

impl TokenSource for SessionStore {
    fn access_token(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.tokens.access_token.clone())
    }
}

impl RoleSource for SessionStore {
    fn current_role(&self) -> Option<Role> {
        self.role()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
