// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named-event fan-out with per-listener unsubscription.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use crate::events::HubEvent;

pub type Listener = Arc<dyn Fn(&HubEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<String, Vec<(u64, Listener)>>,
}

/// Routes decoded hub events to the listeners registered for their name.
///
/// Listeners run synchronously, in registration order, over a snapshot taken
/// when the pass starts: a listener removed mid-pass still sees that event,
/// but none after it. A listener that returns an error is logged and skipped.
/// A panicking listener is caught and skipped only in builds that unwind; the
/// release profile aborts instead.
#[derive(Default)]
pub struct EventDispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event_name`. Dropping the returned
    /// [`Subscription`] removes it.
    pub fn add_event_listener<F>(&self, event_name: &str, callback: F) -> Subscription
    where
        F: Fn(&HubEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut reg = self.registry.lock();
        reg.next_id += 1;
        let id = reg.next_id;
        reg.listeners.entry(event_name.to_owned()).or_default().push((id, Arc::new(callback)));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            event_name: event_name.to_owned(),
            id,
            active: true,
        }
    }

    /// Invoke every listener of `event_name`. Returns how many ran.
    pub fn dispatch_event(&self, event_name: &str, event: &HubEvent) -> usize {
        let snapshot: Vec<Listener> = {
            let reg = self.registry.lock();
            match reg.listeners.get(event_name) {
                Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return 0,
            }
        };

        for listener in &snapshot {
            match std::panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(event = event_name, err = %e, "event listener failed"),
                Err(_) => warn!(event = event_name, "event listener panicked"),
            }
        }
        snapshot.len()
    }

    pub fn listener_count(&self, event_name: &str) -> usize {
        self.registry.lock().listeners.get(event_name).map_or(0, Vec::len)
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.registry.lock().listeners.clear();
    }
}

/// Handle for one registered listener.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    event_name: String,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Keep the listener registered for the dispatcher's whole lifetime.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn remove(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut reg = registry.lock();
        if let Some(list) = reg.listeners.get_mut(&self.event_name) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                reg.listeners.remove(&self.event_name);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event_name", &self.event_name)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
