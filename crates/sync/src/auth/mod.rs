// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod coordinator;

pub use coordinator::{
    should_refresh, CoordinatorParts, CoordinatorState, RefreshPolicy, SessionCoordinator,
    TickOutcome, TokenRefresher,
};
