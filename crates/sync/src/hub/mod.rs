// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Realtime hub plumbing: wire protocol, connections and event fan-out.

pub mod connection;
pub mod dispatcher;
pub mod protocol;
pub mod registry;

pub use connection::{ConnectionState, HubConnection, Lifecycle, ReconnectPolicy};
pub use dispatcher::{EventDispatcher, Subscription};
pub use registry::HubRegistry;
