// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use crate::auth::coordinator::RefreshPolicy;
use crate::hub::connection::ReconnectPolicy;

/// Configuration for the realtime synchronizer.
#[derive(Debug, Clone, clap::Args)]
pub struct SyncConfig {
    /// Base URL of the REST backend (e.g. `https://api.blindtreasure.vn/api`).
    #[arg(long, default_value = "http://127.0.0.1:5000/api", env = "TREASURE_API_URL")]
    pub api_url: String,

    /// Chat hub endpoint.
    #[arg(long, default_value = "http://127.0.0.1:5000/hubs/chat", env = "TREASURE_CHAT_HUB")]
    pub chat_hub_url: String,

    /// Unboxing notification hub endpoint.
    #[arg(
        long,
        default_value = "http://127.0.0.1:5000/hubs/unboxing",
        env = "TREASURE_UNBOXING_HUB"
    )]
    pub unboxing_hub_url: String,

    /// Local storage file. Defaults to `<state_dir>/storage.json`.
    #[arg(long, env = "TREASURE_STATE_PATH")]
    pub state_path: Option<PathBuf>,

    /// How often the session coordinator checks token age, in milliseconds.
    #[arg(
        long,
        default_value_t = 60_000,
        value_parser = clap::value_parser!(u64).range(1..),
        env = "TREASURE_REFRESH_CHECK_MS"
    )]
    pub refresh_check_ms: u64,

    /// Access token lifetime issued by the backend, in seconds.
    #[arg(long, default_value_t = 3600, env = "TREASURE_TOKEN_LIFETIME_SECS")]
    pub token_lifetime_secs: u64,

    /// Fraction of the token lifetime after which a refresh is issued.
    #[arg(long, default_value_t = 0.75, env = "TREASURE_REFRESH_THRESHOLD")]
    pub refresh_threshold: f64,

    /// Initial reconnect backoff in milliseconds.
    #[arg(long, default_value_t = 100, env = "TREASURE_RECONNECT_INITIAL_MS")]
    pub reconnect_initial_ms: u64,

    /// Reconnect backoff ceiling in milliseconds.
    #[arg(long, default_value_t = 5000, env = "TREASURE_RECONNECT_MAX_MS")]
    pub reconnect_max_ms: u64,

    /// Consecutive failed attempts before a hub connection gives up.
    #[arg(long, default_value_t = 8, env = "TREASURE_RECONNECT_MAX_ATTEMPTS")]
    pub reconnect_max_attempts: u32,

    /// REST request timeout in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "TREASURE_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Google OAuth client ID for social login.
    #[arg(long, env = "TREASURE_GOOGLE_CLIENT_ID")]
    pub google_client_id: Option<String>,

    /// Google OAuth client secret for social login.
    #[arg(long, env = "TREASURE_GOOGLE_CLIENT_SECRET")]
    pub google_client_secret: Option<String>,

    /// Redirect URI registered for the Google OAuth client.
    #[arg(long, env = "TREASURE_GOOGLE_REDIRECT_URI")]
    pub google_redirect_uri: Option<String>,
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn storage_path(&self) -> PathBuf {
        self.state_path.clone().unwrap_or_else(|| state_dir().join("storage.json"))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial: Duration::from_millis(self.reconnect_initial_ms),
            max: Duration::from_millis(self.reconnect_max_ms),
            max_attempts: self.reconnect_max_attempts,
        }
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            check_interval: Duration::from_millis(self.refresh_check_ms),
            token_lifetime: Duration::from_secs(self.token_lifetime_secs),
            threshold: self.refresh_threshold,
        }
        .sanitized()
    }
}

/// Resolve the state directory for local storage.
///
/// Checks `TREASURE_STATE_DIR`, then `$XDG_STATE_HOME/treasure`,
/// then `$HOME/.local/state/treasure`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TREASURE_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("treasure");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/treasure");
    }
    PathBuf::from(".treasure")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
