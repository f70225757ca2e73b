// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin REST wrappers over the marketplace backend.

pub mod auth;
pub mod chat;
pub mod client;
pub mod oauth;

pub use client::ApiClient;

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
