// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: an in-process SignalR hub and small fakes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::hub::protocol::{self, FrameBuffer, HubMessage};
use crate::nav::{Navigator, Route};
use crate::session::TokenSource;

/// What the mock hub pushes to its connected clients.
#[derive(Debug, Clone)]
enum Push {
    Frame(String),
    /// Drop the socket without a close frame.
    Kick,
}

/// An invocation the mock hub received from a client.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub target: String,
    pub arguments: Vec<Value>,
    pub invocation_id: Option<String>,
}

struct HubShared {
    push_tx: broadcast::Sender<Push>,
    received: Mutex<Vec<Received>>,
    queries: Mutex<Vec<String>>,
    handshakes: AtomicU32,
    reject_status: Option<u16>,
    /// Invocations to this target complete with an error.
    failing_target: Option<String>,
}

/// In-process SignalR hub speaking the JSON protocol on `127.0.0.1`.
///
/// Completes every invocation with `{"accepted": <target>}` unless the target
/// is the configured failing one.
pub struct MockHub {
    addr: SocketAddr,
    shared: Arc<HubShared>,
    cancel: CancellationToken,
}

impl MockHub {
    pub async fn start() -> anyhow::Result<Self> {
        Self::spawn(None, None).await
    }

    /// A hub that refuses every upgrade with `status`.
    pub async fn rejecting(status: u16) -> anyhow::Result<Self> {
        Self::spawn(Some(status), None).await
    }

    /// A hub whose `target` invocations complete with an error.
    pub async fn failing(target: &str) -> anyhow::Result<Self> {
        Self::spawn(None, Some(target.to_owned())).await
    }

    async fn spawn(
        reject_status: Option<u16>,
        failing_target: Option<String>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (push_tx, _) = broadcast::channel(64);
        let shared = Arc::new(HubShared {
            push_tx,
            received: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            handshakes: AtomicU32::new(0),
            reject_status,
            failing_target,
        });
        let cancel = CancellationToken::new();

        let accept_shared = Arc::clone(&shared);
        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    r = listener.accept() => match r {
                        Ok((stream, _)) => stream,
                        Err(_) => continue,
                    },
                };
                let shared = Arc::clone(&accept_shared);
                let cancel = accept_cancel.clone();
                tokio::spawn(async move {
                    let _ = serve_client(shared, stream, cancel).await;
                });
            }
        });

        Ok(Self { addr, shared, cancel })
    }

    /// HTTP URL of the hub, as a client would be configured with.
    pub fn url(&self) -> String {
        format!("http://{}/hubs/test", self.addr)
    }

    pub fn handshakes(&self) -> u32 {
        self.shared.handshakes.load(Ordering::SeqCst)
    }

    /// Request URIs seen at upgrade time (path and query).
    pub fn queries(&self) -> Vec<String> {
        self.shared.queries.lock().clone()
    }

    pub fn received(&self) -> Vec<Received> {
        self.shared.received.lock().clone()
    }

    /// Push a server -> client invocation to every connected client.
    pub fn push(&self, target: &str, arguments: Vec<Value>) {
        let frame = protocol::encode(&HubMessage::Invocation {
            invocation_id: None,
            target: target.to_owned(),
            arguments,
        });
        let _ = self.shared.push_tx.send(Push::Frame(frame));
    }

    /// Send a raw text message (may hold several frames or garbage).
    pub fn push_raw(&self, text: &str) {
        let _ = self.shared.push_tx.send(Push::Frame(text.to_owned()));
    }

    pub fn push_close(&self, error: Option<&str>, allow_reconnect: bool) {
        let frame = protocol::encode(&HubMessage::Close {
            error: error.map(str::to_owned),
            allow_reconnect,
        });
        let _ = self.shared.push_tx.send(Push::Frame(frame));
    }

    /// Abruptly drop every connected socket.
    pub fn kick(&self) {
        let _ = self.shared.push_tx.send(Push::Kick);
    }

    /// Wait until at least `n` handshakes completed.
    pub async fn wait_for_handshakes(&self, n: u32) -> bool {
        wait_until(Duration::from_secs(5), || self.handshakes() >= n).await
    }

    /// Wait until at least `n` invocations were received.
    pub async fn wait_for_received(&self, n: usize) -> bool {
        wait_until(Duration::from_secs(5), || self.shared.received.lock().len() >= n).await
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for MockHub {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn serve_client(
    shared: Arc<HubShared>,
    stream: TcpStream,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let reject = shared.reject_status;
    let seen = Arc::clone(&shared);
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        seen.queries.lock().push(req.uri().to_string());
        match reject {
            Some(status) => {
                let mut err = ErrorResponse::new(Some("rejected".to_owned()));
                *err.status_mut() =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::UNAUTHORIZED);
                Err(err)
            }
            None => Ok(resp),
        }
    };
    let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let (mut tx, mut rx) = ws.split();

    // Subscribe before answering the handshake so no push is missed.
    let mut push_rx = shared.push_tx.subscribe();
    let mut frames = FrameBuffer::new();

    let handshake = loop {
        match rx.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Some(first) = frames.push(text.as_str()).into_iter().next() {
                    break first;
                }
            }
            Some(Ok(_)) => continue,
            _ => return Ok(()),
        }
    };
    let request: Value = serde_json::from_str(&handshake)?;
    if request["protocol"] != "json" {
        tx.send(Message::text(format!("{}\u{1e}", json!({"error": "unsupported protocol"}))))
            .await?;
        return Ok(());
    }
    tx.send(Message::text("{}\u{1e}".to_owned())).await?;
    shared.handshakes.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            push = push_rx.recv() => match push {
                Ok(Push::Frame(text)) => tx.send(Message::text(text)).await?,
                Ok(Push::Kick) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            },
            msg = rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    for frame in frames.push(text.as_str()) {
                        let Ok(HubMessage::Invocation { invocation_id, target, arguments }) =
                            protocol::decode(&frame)
                        else {
                            continue;
                        };
                        shared.received.lock().push(Received {
                            target: target.clone(),
                            arguments,
                            invocation_id: invocation_id.clone(),
                        });
                        if let Some(id) = invocation_id {
                            let failing = shared.failing_target.as_deref() == Some(target.as_str());
                            let reply = if failing {
                                HubMessage::Completion {
                                    invocation_id: id,
                                    result: None,
                                    error: Some(format!("{target} failed")),
                                }
                            } else {
                                HubMessage::Completion {
                                    invocation_id: id,
                                    result: Some(json!({ "accepted": target })),
                                    error: None,
                                }
                            };
                            tx.send(Message::text(protocol::encode(&reply))).await?;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    Ok(())
}

/// Poll `cond` every 10 ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Token source with a fixed (or absent) token.
pub struct StaticTokens(pub Option<String>);

impl TokenSource for StaticTokens {
    fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Navigator that records every route it was sent to.
#[derive(Default)]
pub struct RecordingNavigator {
    routes: Mutex<Vec<Route>>,
}

impl RecordingNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn routes(&self) -> Vec<Route> {
        self.routes.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: Route) {
        self.routes.lock().push(route);
    }
}
