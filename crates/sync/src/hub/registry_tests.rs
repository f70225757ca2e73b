// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;
use crate::test_support::{MockHub, StaticTokens};

fn registry() -> HubRegistry {
    HubRegistry::new(
        Arc::new(StaticTokens(Some("tok".to_owned()))),
        ReconnectPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(20),
            max_attempts: 2,
        },
    )
}

#[test]
fn same_url_yields_same_instance() {
    let reg = registry();
    let a = reg.connection("http://127.0.0.1:1/hubs/chat");
    let b = reg.connection("http://127.0.0.1:1/hubs/chat");
    let c = reg.connection("http://127.0.0.1:1/hubs/unboxing");

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(reg.len(), 2);
}

#[tokio::test]
async fn disconnected_instance_is_replaced() -> anyhow::Result<()> {
    let hub = MockHub::start().await?;
    let reg = registry();
    let first = reg.connection(&hub.url());
    first.connect().await?;
    first.disconnect().await;

    let second = reg.connection(&hub.url());
    assert!(!Arc::ptr_eq(&first, &second));
    second.connect().await?;
    assert!(second.is_connected());
    assert!(!first.is_connected());
    reg.dispose_all().await;
    Ok(())
}

#[tokio::test]
async fn dispose_all_tears_everything_down() -> anyhow::Result<()> {
    let chat = MockHub::start().await?;
    let unboxing = MockHub::start().await?;
    let reg = registry();
    let a = reg.connection(&chat.url());
    let b = reg.connection(&unboxing.url());
    a.connect().await?;
    b.connect().await?;

    assert_eq!(reg.dispose_all().await, 2);
    assert!(reg.is_empty());
    assert!(a.is_disposed() && b.is_disposed());
    assert!(!a.is_connected() && !b.is_connected());
    Ok(())
}

#[tokio::test]
async fn dispose_unknown_url_is_noop() {
    let reg = registry();
    assert!(!reg.dispose("http://127.0.0.1:1/hubs/none").await);
}
