// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-feature adapters that turn hub events into typed UI state.

pub mod ai_chat;
pub mod chat;
pub mod unboxing;

pub use ai_chat::AiChatAdapter;
pub use chat::ChatAdapter;
pub use unboxing::UnboxingAdapter;

#[cfg(test)]
#[path = "adapters_tests.rs"]
mod tests;
