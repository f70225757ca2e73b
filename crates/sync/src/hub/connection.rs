// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent connection to one SignalR hub.
//!
//! A background task owns the socket: it opens the WebSocket, performs the
//! handshake, dispatches inbound invocations in transport order, resolves
//! completions, sends keep-alive pings and reconnects with exponential
//! backoff when the transport drops. Auth rejections and server closes that
//! forbid reconnecting are terminal and surface to `connect()` callers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{code_of, ApiError, ErrorCode};
use crate::events::HubEvent;
use crate::hub::dispatcher::{EventDispatcher, Subscription};
use crate::hub::protocol::{self, build_hub_url, FrameBuffer, HubMessage};
use crate::session::TokenSource;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
const SERVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff schedule for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Consecutive failed attempts tolerated before giving up.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { initial: Duration::from_millis(100), max: Duration::from_secs(5), max_attempts: 8 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// The connection stopped. `error` is set for terminal failures and
    /// `None` after an explicit disconnect.
    Closed { error: Option<ApiError> },
}

/// Why one socket session ended.
enum SessionEnd {
    Cancelled,
    Dropped(String),
    Closed { error: Option<String>, allow_reconnect: bool },
}

struct Inner {
    url: String,
    tokens: Arc<dyn TokenSource>,
    policy: ReconnectPolicy,
    dispatcher: EventDispatcher,
    state_tx: watch::Sender<ConnectionState>,
    lifecycle_tx: broadcast::Sender<Lifecycle>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<anyhow::Result<Value>>>>,
    next_invocation: AtomicU64,
    last_error: Mutex<Option<ApiError>>,
    disposed: AtomicBool,
    cancel: CancellationToken,
}

/// One live connection to a hub URL.
pub struct HubConnection {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HubConnection {
    pub fn new(
        url: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
        policy: ReconnectPolicy,
    ) -> Self {
        crate::install_crypto_provider();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (lifecycle_tx, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                tokens,
                policy,
                dispatcher: EventDispatcher::new(),
                state_tx,
                lifecycle_tx,
                outbound: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_invocation: AtomicU64::new(0),
                last_error: Mutex::new(None),
                disposed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Establish the connection, or join an attempt already in progress.
    ///
    /// Resolves once the handshake completes. Fails on a terminal error or
    /// after the reconnect policy is exhausted.
    pub async fn connect(&self) -> anyhow::Result<()> {
        if self.is_disposed() {
            return Err(ApiError::new(
                ErrorCode::Disconnected,
                format!("hub {} was disconnected", self.inner.url),
            )
            .into());
        }

        let mut state_rx = self.inner.state_tx.subscribe();
        {
            let mut task = self.task.lock();
            let running = task.as_ref().is_some_and(|h| !h.is_finished());
            if !running {
                self.inner.last_error.lock().take();
                self.inner.set_state(ConnectionState::Connecting);
                let _ = self.inner.lifecycle_tx.send(Lifecycle::Connecting);
                *task = Some(tokio::spawn(Arc::clone(&self.inner).run()));
            }
        }

        let state = *state_rx
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Disconnected))
            .await
            .map_err(|_| ApiError::disconnected(&self.inner.url))?;

        match state {
            ConnectionState::Connected => Ok(()),
            _ => {
                let err = self
                    .inner
                    .last_error
                    .lock()
                    .clone()
                    .unwrap_or_else(|| ApiError::disconnected(&self.inner.url));
                Err(err.into())
            }
        }
    }

    /// Tear the connection down for good.
    ///
    /// Fails pending invocations and removes every listener. The instance
    /// cannot be reconnected afterwards.
    pub async fn disconnect(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.dispatcher.clear();
        self.inner.fail_pending();
        if self.inner.set_state(ConnectionState::Disconnected) {
            let _ = self.inner.lifecycle_tx.send(Lifecycle::Closed { error: None });
        }
        info!(hub = %self.inner.url, "hub disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<Lifecycle> {
        self.inner.lifecycle_tx.subscribe()
    }

    pub fn add_event_listener<F>(&self, event_name: &str, callback: F) -> Subscription
    where
        F: Fn(&HubEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.dispatcher.add_event_listener(event_name, callback)
    }

    /// Deliver `event` to this connection's listeners as if it had arrived
    /// from the hub.
    pub fn dispatch_event(&self, event_name: &str, event: &HubEvent) -> usize {
        self.inner.dispatcher.dispatch_event(event_name, event)
    }

    pub fn listener_count(&self, event_name: &str) -> usize {
        self.inner.dispatcher.listener_count(event_name)
    }

    /// Call a hub method and wait for its completion.
    pub async fn invoke(&self, target: &str, arguments: Vec<Value>) -> anyhow::Result<Value> {
        let tx = self.outbound()?;
        let id = (self.inner.next_invocation.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        let (done_tx, done_rx) = oneshot::channel();
        self.inner.pending.lock().insert(id.clone(), done_tx);

        let frame = protocol::encode(&HubMessage::Invocation {
            invocation_id: Some(id.clone()),
            target: target.to_owned(),
            arguments,
        });
        if tx.send(frame).is_err() {
            self.inner.pending.lock().remove(&id);
            return Err(ApiError::disconnected(&self.inner.url).into());
        }

        match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(ApiError::disconnected(&self.inner.url).into()),
        }
    }

    /// Call a hub method without waiting for a result.
    pub fn send(&self, target: &str, arguments: Vec<Value>) -> anyhow::Result<()> {
        let tx = self.outbound()?;
        let frame = protocol::encode(&HubMessage::Invocation {
            invocation_id: None,
            target: target.to_owned(),
            arguments,
        });
        tx.send(frame).map_err(|_| ApiError::disconnected(&self.inner.url))?;
        Ok(())
    }

    /// The outbound queue, only while connected. Nothing is buffered for later.
    fn outbound(&self) -> anyhow::Result<mpsc::UnboundedSender<String>> {
        if !self.is_connected() {
            return Err(ApiError::disconnected(&self.inner.url).into());
        }
        self.inner
            .outbound
            .lock()
            .clone()
            .ok_or_else(|| ApiError::disconnected(&self.inner.url).into())
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl Inner {
    /// Returns true if the state changed.
    fn set_state(&self, next: ConnectionState) -> bool {
        self.state_tx.send_replace(next) != next
    }

    fn fail_pending(&self) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (_, tx) in pending {
            let _ = tx.send(Err(ApiError::disconnected(&self.url).into()));
        }
    }

    fn terminate(&self, error: ApiError) {
        warn!(hub = %self.url, err = %error, "hub connection stopped");
        *self.last_error.lock() = Some(error.clone());
        self.fail_pending();
        self.set_state(ConnectionState::Disconnected);
        let _ = self.lifecycle_tx.send(Lifecycle::Closed { error: Some(error) });
    }

    async fn run(self: Arc<Self>) {
        let mut attempt = 0u32;
        let mut ever_connected = false;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let url = build_hub_url(&self.url, self.tokens.access_token().as_deref());
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => break,
                r = open(&url) => r,
            };

            match opened {
                Ok((ws, leftover)) => {
                    attempt = 0;
                    ever_connected = true;
                    match self.pump(ws, leftover).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Closed { error, allow_reconnect: false } => {
                            let message = error.unwrap_or_else(|| "closed by server".to_owned());
                            self.terminate(ApiError::new(ErrorCode::Disconnected, message));
                            return;
                        }
                        SessionEnd::Closed { error, allow_reconnect: true } => {
                            debug!(hub = %self.url, ?error, "hub closed, reconnect allowed");
                        }
                        SessionEnd::Dropped(reason) => {
                            debug!(hub = %self.url, reason, "hub transport dropped");
                        }
                    }
                }
                Err(e) => {
                    if code_of(&e).is_some_and(|c| c.is_session_fatal()) {
                        let err = e.downcast_ref::<ApiError>().cloned().unwrap_or_else(|| {
                            ApiError::new(ErrorCode::Unauthorized, e.to_string())
                        });
                        self.terminate(err);
                        return;
                    }
                    debug!(hub = %self.url, attempt, err = %e, "hub connect failed");
                }
            }

            attempt += 1;
            if attempt > self.policy.max_attempts {
                self.terminate(ApiError::new(
                    ErrorCode::Network,
                    format!("hub {} unreachable after {} attempts", self.url, attempt - 1),
                ));
                return;
            }

            let delay = self.policy.delay(attempt);
            if ever_connected {
                self.set_state(ConnectionState::Reconnecting);
                let _ = self.lifecycle_tx.send(Lifecycle::Reconnecting { attempt });
            }
            debug!(hub = %self.url, attempt, delay_ms = delay.as_millis() as u64, "retrying hub");

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.fail_pending();
        if self.set_state(ConnectionState::Disconnected) {
            let _ = self.lifecycle_tx.send(Lifecycle::Closed { error: None });
        }
    }

    /// Drive one open socket until it ends.
    async fn pump(&self, ws: WsStream, leftover: Vec<String>) -> SessionEnd {
        let (mut write, mut read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.lock() = Some(tx);

        self.set_state(ConnectionState::Connected);
        let _ = self.lifecycle_tx.send(Lifecycle::Connected);
        info!(hub = %self.url, "hub connected");

        let mut frames = FrameBuffer::new();
        let mut last_seen = Instant::now();
        let mut keep_alive = tokio::time::interval(KEEP_ALIVE_INTERVAL);
        keep_alive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        keep_alive.tick().await;

        let mut end = None;
        for frame in leftover {
            if let Some(e) = self.handle_frame(&frame) {
                end = Some(e);
                break;
            }
        }

        let end = match end {
            Some(e) => e,
            None => loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        let _ = write.send(Message::Close(None)).await;
                        break SessionEnd::Cancelled;
                    }
                    out = rx.recv() => {
                        let Some(text) = out else {
                            break SessionEnd::Dropped("outbound queue closed".to_owned());
                        };
                        if let Err(e) = write.send(Message::text(text)).await {
                            break SessionEnd::Dropped(e.to_string());
                        }
                    }
                    _ = keep_alive.tick() => {
                        if last_seen.elapsed() > SERVER_TIMEOUT {
                            break SessionEnd::Dropped("server timeout".to_owned());
                        }
                        let ping = protocol::encode(&HubMessage::Ping);
                        if let Err(e) = write.send(Message::text(ping)).await {
                            break SessionEnd::Dropped(e.to_string());
                        }
                    }
                    msg = read.next() => {
                        last_seen = Instant::now();
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(e) = self.handle_text(&mut frames, text.as_str()) {
                                    break e;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                break SessionEnd::Dropped("socket closed".to_owned());
                            }
                            Some(Err(e)) => break SessionEnd::Dropped(e.to_string()),
                            _ => {} // ping/pong/binary ignored
                        }
                    }
                }
            },
        };

        // Clear the queue before failing pending calls so no invocation can
        // slip in between.
        self.outbound.lock().take();
        drop(rx);
        self.fail_pending();
        end
    }

    fn handle_text(&self, frames: &mut FrameBuffer, text: &str) -> Option<SessionEnd> {
        for frame in frames.push(text) {
            if let Some(end) = self.handle_frame(&frame) {
                return Some(end);
            }
        }
        None
    }

    fn handle_frame(&self, frame: &str) -> Option<SessionEnd> {
        let msg = match protocol::decode(frame) {
            Ok(m) => m,
            Err(e) => {
                warn!(hub = %self.url, err = %e, "dropping undecodable frame");
                return None;
            }
        };

        match msg {
            HubMessage::Invocation { target, arguments, .. } => {
                match HubEvent::decode(&target, arguments) {
                    Ok(event) => {
                        let ran = self.dispatcher.dispatch_event(&target, &event);
                        debug!(hub = %self.url, target, listeners = ran, "dispatched hub event");
                    }
                    Err(e) => warn!(hub = %self.url, err = %e, "dropping invalid hub event"),
                }
            }
            HubMessage::Completion { invocation_id, result, error } => {
                let Some(tx) = self.pending.lock().remove(&invocation_id) else {
                    debug!(hub = %self.url, invocation_id, "completion for unknown invocation");
                    return None;
                };
                let outcome = match error {
                    Some(message) => Err(ApiError::new(ErrorCode::Server, message).into()),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(outcome);
            }
            HubMessage::Close { error, allow_reconnect } => {
                return Some(SessionEnd::Closed { error, allow_reconnect });
            }
            HubMessage::Ping | HubMessage::StreamItem { .. } | HubMessage::Other(_) => {}
        }
        None
    }
}

/// Open the socket and complete the hub handshake.
///
/// Returns the stream plus any frames that arrived with the handshake reply.
async fn open(url: &str) -> anyhow::Result<(WsStream, Vec<String>)> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.map_err(classify_connect_error)?;
    ws.send(Message::text(protocol::handshake_request())).await?;

    let leftover = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_handshake(&mut ws))
        .await
        .map_err(|_| anyhow::anyhow!("hub handshake timed out"))??;

    Ok((ws, leftover))
}

async fn read_handshake(ws: &mut WsStream) -> anyhow::Result<Vec<String>> {
    let mut frames = FrameBuffer::new();
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let mut got = frames.push(text.as_str());
                if !got.is_empty() {
                    let reply = got.remove(0);
                    protocol::parse_handshake_response(&reply)?;
                    return Ok(got);
                }
            }
            Some(Ok(Message::Close(_))) | None => anyhow::bail!("socket closed during handshake"),
            Some(Err(e)) => return Err(e.into()),
            _ => {}
        }
    }
}

/// Map upgrade rejections to auth errors so they end the session instead of
/// being retried.
fn classify_connect_error(err: tungstenite::Error) -> anyhow::Error {
    match err {
        tungstenite::Error::Http(ref response) => {
            let status = response.status().as_u16();
            match status {
                401 | 403 => {
                    ApiError::from_status(status, format!("hub rejected credentials ({status})"))
                        .into()
                }
                _ => anyhow::anyhow!("hub upgrade failed ({status})"),
            }
        }
        other => other.into(),
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
