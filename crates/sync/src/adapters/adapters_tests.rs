// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use super::*;
use crate::api::ApiClient;
use crate::error::{code_of, ErrorCode};
use crate::events::{RECEIVE_MESSAGE, RECEIVE_UNBOXING_NOTIFICATION, SEND_MESSAGE};
use crate::hub::{HubConnection, ReconnectPolicy};
use crate::session::{Role, RoleSource, SessionStore, TokenPair, UserIdentity};
use crate::state::AppStore;
use crate::test_support::{wait_until, MockHub, StaticTokens};

fn connect_to(hub: &MockHub) -> Arc<HubConnection> {
    Arc::new(HubConnection::new(
        hub.url(),
        Arc::new(StaticTokens(Some("tok".to_owned()))),
        ReconnectPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(20),
            max_attempts: 2,
        },
    ))
}

fn signed_in_app() -> Arc<AppStore> {
    let app = Arc::new(AppStore::new());
    app.set_user(Some(UserIdentity {
        user_id: "me".to_owned(),
        email: "me@example.com".to_owned(),
        full_name: "Me".to_owned(),
        role: Role::Customer,
    }));
    app
}

fn offline_api() -> anyhow::Result<ApiClient> {
    ApiClient::new("http://127.0.0.1:9/api", Arc::new(SessionStore::new()), Duration::from_secs(1))
}

fn message(id: &str, sender: &str, kind: &str) -> Value {
    json!({
        "id": id,
        "senderId": sender,
        "receiverId": "me",
        "content": format!("content {id}"),
        "messageType": kind,
        "sentAt": "2026-01-01T00:00:00Z",
    })
}

fn notification(item: &str, target: Option<&str>) -> Value {
    let mut value = json!({ "itemName": item, "customerName": "Linh", "rarity": "Rare" });
    if let Some(role) = target {
        value["targetRole"] = json!(role);
    }
    value
}

#[tokio::test]
async fn chat_tracks_user_messages_and_skips_ai() -> anyhow::Result<()> {
    let hub = MockHub::start().await?;
    let app = signed_in_app();
    let chat = ChatAdapter::new(connect_to(&hub), Arc::clone(&app), offline_api()?);
    let mut last = chat.watch_last();
    chat.connect().await?;
    assert!(chat.is_ready());

    hub.push(RECEIVE_MESSAGE, vec![message("1", "alice", "UserToUser")]);
    hub.push(RECEIVE_MESSAGE, vec![message("2", "AI", "AiToUser")]);
    hub.push(RECEIVE_MESSAGE, vec![message("3", "bob", "ImageMessage")]);

    assert!(wait_until(Duration::from_secs(2), || {
        chat.last_message().is_some_and(|m| m.id == "3")
    })
    .await);
    assert!(last.has_changed().unwrap_or(false));
    let state = app.chat();
    assert_eq!(state.conversations.len(), 2);
    assert!(!state.conversations.contains_key("AI"));
    assert_eq!(state.total_unread(), 2);
    assert_eq!(last.borrow_and_update().as_ref().map(|m| m.id.clone()), Some("3".to_owned()));
    Ok(())
}

#[tokio::test]
async fn chat_send_invokes_hub_method() -> anyhow::Result<()> {
    let hub = MockHub::start().await?;
    let chat = ChatAdapter::new(connect_to(&hub), signed_in_app(), offline_api()?);
    chat.connect().await?;

    chat.send_message("alice", "is the dragon box still available?").await?;

    let received = hub.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].target, SEND_MESSAGE);
    assert_eq!(
        received[0].arguments,
        vec![json!("alice"), json!("is the dragon box still available?")]
    );
    Ok(())
}

#[tokio::test]
async fn sending_while_disconnected_fails_fast() -> anyhow::Result<()> {
    let hub = MockHub::start().await?;
    let conn = connect_to(&hub);
    let app = signed_in_app();
    let chat = ChatAdapter::new(Arc::clone(&conn), Arc::clone(&app), offline_api()?);
    let ai = AiChatAdapter::new(Arc::clone(&conn), Arc::clone(&app));
    let before = app.version();

    let err = chat.send_message("alice", "hello").await.err();
    assert_eq!(err.as_ref().and_then(code_of), Some(ErrorCode::Disconnected));
    let err = ai.send_prompt("recommend a box").await.err();
    assert_eq!(err.as_ref().and_then(code_of), Some(ErrorCode::Disconnected));

    assert!(!ai.is_waiting());
    assert_eq!(app.version(), before);
    assert!(chat.last_message().is_none());
    assert!(hub.received().is_empty());
    Ok(())
}

#[tokio::test]
async fn empty_message_is_rejected_locally() -> anyhow::Result<()> {
    let hub = MockHub::start().await?;
    let chat = ChatAdapter::new(connect_to(&hub), signed_in_app(), offline_api()?);
    chat.connect().await?;

    let err = chat.send_message("alice", "   ").await.err();
    assert_eq!(err.as_ref().and_then(code_of), Some(ErrorCode::Validation));
    assert!(hub.received().is_empty());
    Ok(())
}

#[tokio::test]
async fn mark_read_calls_backend_then_updates_state() -> anyhow::Result<()> {
    let hits = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&hits);
    let app_router = Router::new().route(
        "/api/chat/conversations/{id}/mark-read",
        post(move || {
            let counter = Arc::clone(&counter);
            async move {
                *counter.lock() += 1;
                axum::http::StatusCode::NO_CONTENT
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app_router).await.ok();
    });

    let hub = MockHub::start().await?;
    let app = signed_in_app();
    let base = format!("http://{addr}/api");
    let api = ApiClient::new(&base, Arc::new(SessionStore::new()), Duration::from_secs(5))?;
    let chat = ChatAdapter::new(connect_to(&hub), Arc::clone(&app), api);
    chat.connect().await?;
    hub.push(RECEIVE_MESSAGE, vec![message("1", "alice", "UserToUser")]);
    assert!(wait_until(Duration::from_secs(2), || app.chat().total_unread() == 1).await);

    chat.mark_read("alice").await?;

    assert_eq!(*hits.lock(), 1);
    assert_eq!(app.chat().total_unread(), 0);
    Ok(())
}

#[tokio::test]
async fn load_history_fills_conversation_state() -> anyhow::Result<()> {
    let app_router = Router::new().route(
        "/api/chat/conversations/{id}",
        get(|| async {
            axum::Json(json!([
                message("h1", "alice", "UserToUser"),
                { "id": "h2", "senderId": "me", "receiverId": "alice", "content": "hi",
                  "messageType": "UserToUser", "sentAt": "2026-01-01T00:01:00Z", "isRead": true },
            ]))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app_router).await.ok();
    });

    let hub = MockHub::start().await?;
    let app = signed_in_app();
    let base = format!("http://{addr}/api");
    let api = ApiClient::new(&base, Arc::new(SessionStore::new()), Duration::from_secs(5))?;
    let chat = ChatAdapter::new(connect_to(&hub), Arc::clone(&app), api);

    assert_eq!(chat.load_history("alice", 0, 20).await?, 2);

    let state = app.chat();
    assert_eq!(state.conversations["alice"].len(), 2);
    assert_eq!(state.total_unread(), 1);
    Ok(())
}

#[tokio::test]
async fn ai_chat_keeps_only_assistant_replies() -> anyhow::Result<()> {
    let hub = MockHub::start().await?;
    let app = signed_in_app();
    let conn = connect_to(&hub);
    let ai = AiChatAdapter::new(Arc::clone(&conn), Arc::clone(&app));
    conn.connect().await?;

    ai.send_prompt("which box has the best odds?").await?;
    assert!(ai.is_waiting());

    hub.push(RECEIVE_MESSAGE, vec![message("u1", "alice", "UserToUser")]);
    hub.push(RECEIVE_MESSAGE, vec![message("a1", "AI", "AiToUser")]);

    assert!(wait_until(Duration::from_secs(2), || !ai.is_waiting()).await);
    assert_eq!(ai.history().iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec!["a1"]);
    assert_eq!(ai.last_reply().map(|m| m.id), Some("a1".to_owned()));
    Ok(())
}

#[tokio::test]
async fn unboxing_filters_by_role() -> anyhow::Result<()> {
    let hub = MockHub::start().await?;
    let unboxing = UnboxingAdapter::new(connect_to(&hub), Some(Role::Customer));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub =
        unboxing.on_unboxing_received(move |n| sink.lock().push(n.payload.item_name.clone()));
    unboxing.connect().await?;

    hub.push(RECEIVE_UNBOXING_NOTIFICATION, vec![notification("for-sellers", Some("Seller"))]);
    hub.push(
        RECEIVE_UNBOXING_NOTIFICATION,
        vec![notification("for-customers", Some("customer"))],
    );
    hub.push(RECEIVE_UNBOXING_NOTIFICATION, vec![notification("for-everyone", None)]);
    hub.push(RECEIVE_UNBOXING_NOTIFICATION, vec![notification("for-admins", Some("Admin"))]);
    hub.push(RECEIVE_UNBOXING_NOTIFICATION, vec![notification("sentinel", None)]);

    assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 3).await);
    assert_eq!(*seen.lock(), vec!["for-customers", "for-everyone", "sentinel"]);
    let last = unboxing.last_notification().map(|n| n.payload.item_name);
    assert_eq!(last.as_deref(), Some("sentinel"));
    Ok(())
}

#[tokio::test]
async fn unsubscribed_callback_is_never_called() -> anyhow::Result<()> {
    let hub = MockHub::start().await?;
    let unboxing = UnboxingAdapter::new(connect_to(&hub), None);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let dropped_sink = Arc::clone(&seen);
    let sub = unboxing.on_unboxing_received(move |n| {
        dropped_sink.lock().push(format!("dropped:{}", n.payload.item_name));
    });
    let kept_sink = Arc::clone(&seen);
    let _kept = unboxing.on_unboxing_received(move |n| {
        kept_sink.lock().push(format!("kept:{}", n.payload.item_name));
    });
    unboxing.connect().await?;

    hub.push(RECEIVE_UNBOXING_NOTIFICATION, vec![notification("one", None)]);
    assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 2).await);
    sub.unsubscribe();
    hub.push(RECEIVE_UNBOXING_NOTIFICATION, vec![notification("two", None)]);
    assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 3).await);

    assert_eq!(*seen.lock(), vec!["dropped:one", "kept:one", "kept:two"]);
    Ok(())
}

#[tokio::test]
async fn terminal_close_drops_cached_role() -> anyhow::Result<()> {
    let hub = MockHub::start().await?;
    let unboxing = UnboxingAdapter::new(connect_to(&hub), Some(Role::Seller));
    unboxing.connect().await?;

    hub.push_close(Some("token revoked"), false);

    assert!(wait_until(Duration::from_secs(2), || unboxing.role().is_none()).await);
    assert!(!unboxing.is_ready());
    Ok(())
}

#[tokio::test]
async fn role_comes_back_on_reconnect_after_terminal_close() -> anyhow::Result<()> {
    let hub = MockHub::start().await?;
    let unboxing = UnboxingAdapter::new(connect_to(&hub), Some(Role::Seller));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub =
        unboxing.on_unboxing_received(move |n| sink.lock().push(n.payload.item_name.clone()));
    unboxing.connect().await?;

    hub.push_close(Some("server restarting"), false);
    assert!(wait_until(Duration::from_secs(2), || unboxing.role().is_none()).await);

    unboxing.connect().await?;
    assert_eq!(unboxing.role(), Some(Role::Seller));
    hub.push(RECEIVE_UNBOXING_NOTIFICATION, vec![notification("for-sellers", Some("Seller"))]);

    assert!(wait_until(Duration::from_secs(2), || !seen.lock().is_empty()).await);
    assert_eq!(*seen.lock(), vec!["for-sellers"]);
    assert_eq!(unboxing.role(), Some(Role::Seller));
    Ok(())
}

#[tokio::test]
async fn reconnect_picks_up_the_session_role() -> anyhow::Result<()> {
    let hub = MockHub::start().await?;
    let sessions = Arc::new(SessionStore::new());
    let tokens = TokenPair { access_token: "a".to_owned(), refresh_token: "r".to_owned() };
    let mut user = UserIdentity {
        user_id: "u-1".to_owned(),
        email: "u@example.com".to_owned(),
        full_name: "U".to_owned(),
        role: Role::Customer,
    };
    sessions.sign_in(tokens.clone(), Some(user.clone()));
    let roles: Arc<dyn RoleSource> = sessions.clone();
    let unboxing = UnboxingAdapter::new(connect_to(&hub), None).with_role_source(roles);
    assert_eq!(unboxing.role(), Some(Role::Customer));
    unboxing.connect().await?;

    hub.push_close(Some("token revoked"), false);
    assert!(wait_until(Duration::from_secs(2), || unboxing.role().is_none()).await);

    user.role = Role::Seller;
    sessions.sign_in(tokens, Some(user));
    unboxing.connect().await?;
    assert_eq!(unboxing.role(), Some(Role::Seller));
    Ok(())
}

#[tokio::test]
async fn dropping_adapters_releases_hub_listeners() -> anyhow::Result<()> {
    let hub = MockHub::start().await?;
    let conn = connect_to(&hub);
    let app = signed_in_app();
    let chat = ChatAdapter::new(Arc::clone(&conn), Arc::clone(&app), offline_api()?);
    let ai = AiChatAdapter::new(Arc::clone(&conn), Arc::clone(&app));
    let unboxing = UnboxingAdapter::new(Arc::clone(&conn), None);
    assert_eq!(conn.listener_count(RECEIVE_MESSAGE), 2);
    assert_eq!(conn.listener_count(RECEIVE_UNBOXING_NOTIFICATION), 1);

    drop(chat);
    drop(ai);
    drop(unboxing);

    assert_eq!(conn.listener_count(RECEIVE_MESSAGE), 0);
    assert_eq!(conn.listener_count(RECEIVE_UNBOXING_NOTIFICATION), 0);
    Ok(())
}
