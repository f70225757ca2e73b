// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio::sync::broadcast;

/// Navigation targets the synchronizer may force.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Login,
    Home,
    Other(String),
}

impl Route {
    pub fn path(&self) -> &str {
        match self {
            Self::Login => "/login",
            Self::Home => "/",
            Self::Other(path) => path,
        }
    }
}

/// The navigation layer of the embedding UI.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

/// Navigator that publishes routes to whoever is listening.
pub struct ChannelNavigator {
    tx: broadcast::Sender<Route>,
}

impl ChannelNavigator {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Route> {
        self.tx.subscribe()
    }
}

impl Default for ChannelNavigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator for ChannelNavigator {
    fn navigate(&self, route: Route) {
        tracing::info!(route = route.path(), "navigate");
        let _ = self.tx.send(route);
    }
}
