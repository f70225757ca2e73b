// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::hub::connection::{HubConnection, ReconnectPolicy};
use crate::session::TokenSource;

/// Keeps at most one live [`HubConnection`] per hub URL.
pub struct HubRegistry {
    tokens: Arc<dyn TokenSource>,
    policy: ReconnectPolicy,
    connections: Mutex<HashMap<String, Arc<HubConnection>>>,
}

impl HubRegistry {
    pub fn new(tokens: Arc<dyn TokenSource>, policy: ReconnectPolicy) -> Self {
        Self { tokens, policy, connections: Mutex::new(HashMap::new()) }
    }

    /// The live connection for `url`, created on first use.
    ///
    /// A connection that was disconnected is replaced by a fresh instance;
    /// the old one keeps no listeners and never reconnects.
    pub fn connection(&self, url: &str) -> Arc<HubConnection> {
        let mut connections = self.connections.lock();
        if let Some(existing) = connections.get(url) {
            if !existing.is_disposed() {
                return Arc::clone(existing);
            }
            debug!(hub = url, "replacing disposed hub connection");
        }
        let conn = Arc::new(HubConnection::new(url, Arc::clone(&self.tokens), self.policy));
        connections.insert(url.to_owned(), Arc::clone(&conn));
        conn
    }

    /// The registered connection for `url`, if any, without creating one.
    pub fn get(&self, url: &str) -> Option<Arc<HubConnection>> {
        self.connections.lock().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disconnect and forget the connection for `url`.
    pub async fn dispose(&self, url: &str) -> bool {
        let removed = self.connections.lock().remove(url);
        match removed {
            Some(conn) => {
                conn.disconnect().await;
                true
            }
            None => false,
        }
    }

    /// Disconnect every connection. Returns how many were torn down.
    pub async fn dispose_all(&self) -> usize {
        let drained: Vec<_> = self.connections.lock().drain().map(|(_, c)| c).collect();
        for conn in &drained {
            conn.disconnect().await;
        }
        drained.len()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
