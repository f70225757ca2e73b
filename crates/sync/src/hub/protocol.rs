// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SignalR JSON hub protocol: record-separated JSON frames over a WebSocket.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ErrorCode};

/// Terminates every frame.
pub const RECORD_SEPARATOR: char = '\u{1e}';

const INVOCATION: u64 = 1;
const STREAM_ITEM: u64 = 2;
const COMPLETION: u64 = 3;
const PING: u64 = 6;
const CLOSE: u64 = 7;

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// A method call. Without an `invocation_id` no completion is expected.
    Invocation { invocation_id: Option<String>, target: String, arguments: Vec<Value> },
    StreamItem { invocation_id: String, item: Value },
    Completion { invocation_id: String, result: Option<Value>, error: Option<String> },
    Ping,
    Close { error: Option<String>, allow_reconnect: bool },
    /// A message type this client does not handle.
    Other(u64),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvocationFrame {
    #[serde(default)]
    invocation_id: Option<String>,
    target: String,
    #[serde(default)]
    arguments: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamItemFrame {
    invocation_id: String,
    #[serde(default)]
    item: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletionFrame {
    invocation_id: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseFrame {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

fn protocol_error(message: impl Into<String>) -> anyhow::Error {
    ApiError::new(ErrorCode::Protocol, message).into()
}

/// Encode a message as one framed string.
pub fn encode(msg: &HubMessage) -> String {
    let value = match msg {
        HubMessage::Invocation { invocation_id, target, arguments } => {
            let mut v = json!({ "type": INVOCATION, "target": target, "arguments": arguments });
            if let Some(id) = invocation_id {
                v["invocationId"] = json!(id);
            }
            v
        }
        HubMessage::StreamItem { invocation_id, item } => {
            json!({ "type": STREAM_ITEM, "invocationId": invocation_id, "item": item })
        }
        HubMessage::Completion { invocation_id, result, error } => {
            let mut v = json!({ "type": COMPLETION, "invocationId": invocation_id });
            if let Some(r) = result {
                v["result"] = r.clone();
            }
            if let Some(e) = error {
                v["error"] = json!(e);
            }
            v
        }
        HubMessage::Ping => json!({ "type": PING }),
        HubMessage::Close { error, allow_reconnect } => {
            let mut v = json!({ "type": CLOSE, "allowReconnect": allow_reconnect });
            if let Some(e) = error {
                v["error"] = json!(e);
            }
            v
        }
        HubMessage::Other(kind) => json!({ "type": kind }),
    };
    let mut out = value.to_string();
    out.push(RECORD_SEPARATOR);
    out
}

/// Decode a single frame (without its separator).
pub fn decode(frame: &str) -> anyhow::Result<HubMessage> {
    let value: Value =
        serde_json::from_str(frame).map_err(|e| protocol_error(format!("bad frame: {e}")))?;
    let kind = value
        .get("type")
        .and_then(Value::as_u64)
        .ok_or_else(|| protocol_error("frame without message type"))?;

    let parse_err = |e: serde_json::Error| protocol_error(format!("bad type {kind} frame: {e}"));
    let msg = match kind {
        INVOCATION => {
            let f: InvocationFrame = serde_json::from_value(value).map_err(parse_err)?;
            HubMessage::Invocation {
                invocation_id: f.invocation_id,
                target: f.target,
                arguments: f.arguments,
            }
        }
        STREAM_ITEM => {
            let f: StreamItemFrame = serde_json::from_value(value).map_err(parse_err)?;
            HubMessage::StreamItem { invocation_id: f.invocation_id, item: f.item }
        }
        COMPLETION => {
            let f: CompletionFrame = serde_json::from_value(value).map_err(parse_err)?;
            HubMessage::Completion {
                invocation_id: f.invocation_id,
                result: f.result,
                error: f.error,
            }
        }
        PING => HubMessage::Ping,
        CLOSE => {
            let f: CloseFrame = serde_json::from_value(value).map_err(parse_err)?;
            HubMessage::Close { error: f.error, allow_reconnect: f.allow_reconnect }
        }
        other => HubMessage::Other(other),
    };
    Ok(msg)
}

/// First frame a client sends after the socket opens.
pub fn handshake_request() -> String {
    let mut out = json!({ "protocol": "json", "version": 1 }).to_string();
    out.push(RECORD_SEPARATOR);
    out
}

/// Check the server's handshake reply (`{}` on success).
pub fn parse_handshake_response(frame: &str) -> anyhow::Result<()> {
    let value: Value = serde_json::from_str(frame)
        .map_err(|e| protocol_error(format!("bad handshake response: {e}")))?;
    match value.get("error").and_then(Value::as_str) {
        Some(err) => Err(protocol_error(format!("handshake rejected: {err}"))),
        None => Ok(()),
    }
}

/// Reassembles frames from WebSocket text messages.
///
/// A message normally carries whole frames, possibly several; a trailing
/// partial frame is kept until the rest arrives.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);
        let mut frames = Vec::new();
        while let Some(idx) = self.pending.find(RECORD_SEPARATOR) {
            let frame: String = self.pending.drain(..=idx).collect();
            let frame = frame.trim_end_matches(RECORD_SEPARATOR);
            if !frame.trim().is_empty() {
                frames.push(frame.to_owned());
            }
        }
        frames
    }

    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Build the WebSocket URL for a hub endpoint.
///
/// Converts `http(s)://` to `ws(s)://` and appends the bearer token as the
/// `access_token` query parameter.
pub fn build_hub_url(base_url: &str, access_token: Option<&str>) -> String {
    let mut url = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_owned()
    };
    if let Some(token) = access_token {
        let sep = if url.contains('?') { '&' } else { '?' };
        url.push(sep);
        url.push_str("access_token=");
        url.push_str(&urlencode(token));
    }
    url
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
pub fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
