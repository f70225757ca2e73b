// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-facing notices (toasts) and the REST failure policy.
//!
//! REST failures are caught at the call site with [`Notifier::guard`], which
//! turns them into `None` plus a notice. Authorization failures additionally
//! request the logout cascade. Realtime failures never come through here:
//! the hub connections retry on their own.

use std::future::Future;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::error::{ApiError, ErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, message: message.into() }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }
}

pub struct Notifier {
    notices: broadcast::Sender<Notice>,
    /// Bumped each time a failure should end the session.
    logout_requests: watch::Sender<u64>,
}

impl Notifier {
    pub fn new() -> Self {
        let (notices, _) = broadcast::channel(64);
        let (logout_requests, _) = watch::channel(0);
        Self { notices, logout_requests }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Fires whenever a reported failure requires signing out.
    pub fn watch_logout_requests(&self) -> watch::Receiver<u64> {
        self.logout_requests.subscribe()
    }

    pub fn notify(&self, notice: Notice) {
        debug!(level = ?notice.level, message = %notice.message, "notice");
        let _ = self.notices.send(notice);
    }

    /// Classify a REST failure into a notice. Returns the notice published.
    pub fn report(&self, err: &anyhow::Error) -> Notice {
        let api_err = err.downcast_ref::<ApiError>();
        let code = api_err.map_or(ErrorCode::Internal, |e| e.code);
        warn!(code = %code, err = %err, "request failed");

        let message = match (code, api_err) {
            (
                ErrorCode::NotFound | ErrorCode::Conflict | ErrorCode::Validation,
                Some(e),
            ) if !e.message.is_empty() => e.message.clone(),
            _ => code.toast_message().to_owned(),
        };

        if code.is_session_fatal() {
            self.logout_requests.send_modify(|n| *n += 1);
        }

        let notice = Notice::error(message);
        self.notify(notice.clone());
        notice
    }

    /// Await a REST call, converting failure into `None` plus a notice.
    pub async fn guard<T, F>(&self, fut: F) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match fut.await {
            Ok(value) => Some(value),
            Err(e) => {
                self.report(&e);
                None
            }
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "notice_tests.rs"]
mod tests;
