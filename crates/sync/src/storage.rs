// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local storage: a versioned key/value map persisted as one JSON file.
//!
//! Reads and writes hit the in-memory map; [`LocalStore::flush`] writes it
//! out atomically and [`LocalStore::purge`] wipes both copies.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::session::TokenPair;

/// Access/refresh token pair.
pub const AUTH_KEY: &str = "auth:v1";
/// UI theme preference.
pub const THEME_KEY: &str = "theme:v1";
/// Whitelisted app-state snapshot.
pub const PERSIST_ROOT_KEY: &str = "persist:root:v1";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

pub struct LocalStore {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, Value>>,
    /// Orders flushes and purges against each other.
    io: tokio::sync::Mutex<()>,
}

impl LocalStore {
    /// Store backed by a JSON file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            entries: Mutex::new(BTreeMap::new()),
            io: tokio::sync::Mutex::new(()),
        }
    }

    /// Store that never touches disk.
    pub fn memory() -> Self {
        Self { path: None, entries: Mutex::new(BTreeMap::new()), io: tokio::sync::Mutex::new(()) }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the backing file into memory. A missing file is an empty store.
    pub async fn load(&self) -> anyhow::Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let data = match tokio::fs::read_to_string(path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no local storage file");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let map: BTreeMap<String, Value> = serde_json::from_str(&data)?;
        debug!(path = %path.display(), keys = map.len(), "loaded local storage");
        *self.entries.lock() = map;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    /// Typed read. A value that no longer matches its type is dropped.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, err = %e, "discarding unreadable storage entry");
                self.remove(key);
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: Value) {
        self.entries.lock().insert(key.to_owned(), value);
    }

    pub fn set_as<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        self.set(key, serde_json::to_value(value)?);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.lock().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.get_as(AUTH_KEY)
    }

    pub fn set_tokens(&self, tokens: &TokenPair) -> anyhow::Result<()> {
        self.set_as(AUTH_KEY, tokens)
    }

    pub fn clear_tokens(&self) {
        self.remove(AUTH_KEY);
    }

    pub fn theme(&self) -> Theme {
        self.get_as(THEME_KEY).unwrap_or_default()
    }

    pub fn set_theme(&self, theme: Theme) -> anyhow::Result<()> {
        self.set_as(THEME_KEY, &theme)
    }

    /// Write the in-memory map to disk (write tmp + rename).
    pub async fn flush(&self) -> anyhow::Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let _io = self.io.lock().await;
        let json = {
            let entries = self.entries.lock();
            serde_json::to_string_pretty(&*entries)?
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "flushed local storage");
        Ok(())
    }

    /// Remove every key and delete the backing file.
    pub async fn purge(&self) -> anyhow::Result<()> {
        let _io = self.io.lock().await;
        self.entries.lock().clear();
        let Some(ref path) = self.path else {
            return Ok(());
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(path = %path.display(), "purged local storage");
        Ok(())
    }
}

/// Unique temp name per write so concurrent flushes never share a tmp file.
fn tmp_path(path: &Path) -> PathBuf {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    path.with_file_name(name)
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
