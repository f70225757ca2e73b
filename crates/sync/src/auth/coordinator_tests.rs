// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::AtomicU32;

use parking_lot::Mutex;
use proptest::prelude::*;
use tokio::sync::oneshot;

use super::*;
use crate::clock::ManualClock;
use crate::hub::ReconnectPolicy;
use crate::nav::Route;
use crate::state::CartLine;
use crate::storage::{Theme, AUTH_KEY};
use crate::test_support::{wait_until, MockHub, RecordingNavigator, StaticTokens};

const HOUR_MS: u64 = 3_600_000;

fn pair(access: &str, refresh: &str) -> TokenPair {
    TokenPair { access_token: access.to_owned(), refresh_token: refresh.to_owned() }
}

/// Scripted refresher. Each call pops the next response; an optional gate
/// holds the call until released.
#[derive(Default)]
struct FakeRefresher {
    calls: AtomicU32,
    seen: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<anyhow::Result<TokenPair>>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FakeRefresher {
    fn with(responses: Vec<anyhow::Result<TokenPair>>) -> Arc<Self> {
        Arc::new(Self { responses: Mutex::new(responses.into()), ..Self::default() })
    }

    /// Hold the next call until the returned sender fires.
    fn gated(responses: Vec<anyhow::Result<TokenPair>>) -> (Arc<Self>, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let this = Self {
            responses: Mutex::new(responses.into()),
            gate: Mutex::new(Some(rx)),
            ..Self::default()
        };
        (Arc::new(this), tx)
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenRefresher for FakeRefresher {
    fn refresh(
        &self,
        refresh_token: String,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TokenPair>> + Send + '_>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(refresh_token);
            let gate = self.gate.lock().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(pair("access-next", "refresh-next")))
        })
    }
}

struct Harness {
    coordinator: Arc<SessionCoordinator>,
    sessions: Arc<SessionStore>,
    app: Arc<AppStore>,
    hubs: Arc<HubRegistry>,
    storage: Arc<LocalStore>,
    nav: Arc<RecordingNavigator>,
    clock: Arc<ManualClock>,
    refresher: Arc<FakeRefresher>,
    _dir: Option<tempfile::TempDir>,
}

fn harness_with(refresher: Arc<FakeRefresher>, on_disk: bool) -> anyhow::Result<Harness> {
    harness_with_policy(refresher, on_disk, RefreshPolicy::default())
}

fn harness_with_policy(
    refresher: Arc<FakeRefresher>,
    on_disk: bool,
    policy: RefreshPolicy,
) -> anyhow::Result<Harness> {
    let (storage, dir) = if on_disk {
        let dir = tempfile::tempdir()?;
        (Arc::new(LocalStore::file(dir.path().join("storage.json"))), Some(dir))
    } else {
        (Arc::new(LocalStore::memory()), None)
    };
    let sessions = Arc::new(SessionStore::new());
    let app = Arc::new(AppStore::new());
    let hubs = Arc::new(HubRegistry::new(
        Arc::new(StaticTokens(None)),
        ReconnectPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(20),
            max_attempts: 2,
        },
    ));
    let nav = RecordingNavigator::new();
    let clock = ManualClock::new(1_000_000);
    let coordinator = Arc::new(SessionCoordinator::new(
        policy,
        CoordinatorParts {
            sessions: Arc::clone(&sessions),
            app: Arc::clone(&app),
            hubs: Arc::clone(&hubs),
            storage: Arc::clone(&storage),
            navigator: nav.clone(),
            refresher: refresher.clone(),
            clock: clock.clone(),
        },
    ));
    Ok(Harness { coordinator, sessions, app, hubs, storage, nav, clock, refresher, _dir: dir })
}

fn harness(refresher: Arc<FakeRefresher>) -> anyhow::Result<Harness> {
    harness_with(refresher, true)
}

#[yare::parameterized(
    never_refreshed = { None, 0, true },
    just_refreshed = { Some(0), 0, false },
    one_ms_early = { Some(0), 2_699_999, false },
    exactly_at_threshold = { Some(0), 2_700_000, true },
    past_lifetime = { Some(0), 3_600_000, true },
    clock_behind = { Some(5_000), 1_000, false },
)]
fn refresh_window_at_three_quarters(last: Option<u64>, now: u64, expected: bool) {
    assert_eq!(should_refresh(last, now, Duration::from_millis(HOUR_MS), 0.75), expected);
}

#[yare::parameterized(
    nan_uses_default = { f64::NAN, 0.75 },
    negative_is_zero = { -1.0, 0.0 },
    above_one_is_one = { 4.0, 1.0 },
    in_range_kept = { 0.5, 0.5 },
)]
fn threshold_is_sanitized(raw: f64, expected: f64) {
    let policy = RefreshPolicy { threshold: raw, ..RefreshPolicy::default() }.sanitized();
    assert_eq!(policy.threshold, expected);
}

#[test]
fn nan_threshold_does_not_refresh_every_tick() {
    let policy = RefreshPolicy { threshold: f64::NAN, ..RefreshPolicy::default() }.sanitized();
    assert!(!policy.is_due(Some(0), 60_000));
    assert!(policy.is_due(Some(0), 2_700_000));
}

proptest! {
    #[test]
    fn refresh_due_iff_elapsed_reaches_threshold(
        last in 0u64..1_000_000_000,
        elapsed in 0u64..10_000_000,
        lifetime_ms in 1u64..8_000_000,
    ) {
        let due = should_refresh(
            Some(last),
            last + elapsed,
            Duration::from_millis(lifetime_ms),
            0.75,
        );
        prop_assert_eq!(due, elapsed as f64 >= 0.75 * lifetime_ms as f64);
    }
}

#[tokio::test]
async fn tick_without_session_does_nothing() -> anyhow::Result<()> {
    let h = harness(FakeRefresher::with(vec![]))?;
    assert_eq!(h.coordinator.tick().await, TickOutcome::NoSession);
    assert_eq!(h.refresher.calls(), 0);
    assert_eq!(h.coordinator.state(), CoordinatorState::Idle);
    Ok(())
}

#[tokio::test]
async fn refreshes_on_first_tick_then_waits_for_window() -> anyhow::Result<()> {
    let h = harness(FakeRefresher::with(vec![
        Ok(pair("a2", "r2")),
        Ok(pair("a3", "r3")),
    ]))?;
    h.sessions.sign_in(pair("a1", "r1"), None);

    assert_eq!(h.coordinator.tick().await, TickOutcome::Refreshed);
    assert_eq!(h.sessions.tokens(), Some(pair("a2", "r2")));
    assert_eq!(h.storage.tokens(), Some(pair("a2", "r2")));
    assert_eq!(*h.refresher.seen.lock(), vec!["r1"]);

    // Persisted to disk, not just memory.
    let reloaded = LocalStore::file(h.storage.path().map(Path::to_path_buf).unwrap_or_default());
    reloaded.load().await?;
    assert!(reloaded.get(AUTH_KEY).is_some());

    h.clock.advance(Duration::from_millis(2_699_999));
    assert_eq!(h.coordinator.tick().await, TickOutcome::NotDue);
    h.clock.advance(Duration::from_millis(1));
    assert_eq!(h.coordinator.tick().await, TickOutcome::Refreshed);
    assert_eq!(h.sessions.tokens(), Some(pair("a3", "r3")));
    assert_eq!(*h.refresher.seen.lock(), vec!["r1", "r2"]);
    assert_eq!(h.coordinator.state(), CoordinatorState::Idle);
    Ok(())
}

#[tokio::test]
async fn refresh_failure_clears_everything_once() -> anyhow::Result<()> {
    let hub = MockHub::start().await?;
    let h = harness(FakeRefresher::with(vec![Err(anyhow::anyhow!("refresh rejected"))]))?;
    let user = crate::session::UserIdentity {
        user_id: "u1".to_owned(),
        email: "u1@example.com".to_owned(),
        full_name: "U One".to_owned(),
        role: crate::session::Role::Customer,
    };
    h.sessions.sign_in(pair("a1", "r1"), Some(user.clone()));
    h.app.set_user(Some(user));
    h.app.add_to_cart(CartLine {
        item_id: "box".to_owned(),
        name: "Box".to_owned(),
        quantity: 1,
        unit_price: 10,
    });
    h.storage.set_tokens(&pair("a1", "r1"))?;
    h.storage.set_theme(Theme::Dark)?;
    h.storage.flush().await?;
    let conn = h.hubs.connection(&hub.url());
    conn.connect().await?;

    assert_eq!(h.coordinator.tick().await, TickOutcome::Invalidated);

    assert!(!h.sessions.is_signed_in());
    let state = h.app.get();
    assert_eq!(state.user, None);
    assert!(state.cart.lines.is_empty());
    assert!(conn.is_disposed() && !conn.is_connected());
    assert!(h.hubs.is_empty());
    assert!(h.storage.keys().is_empty());
    assert!(!h.storage.path().is_some_and(Path::exists));
    assert_eq!(h.nav.routes(), vec![Route::Login]);
    assert_eq!(h.coordinator.state(), CoordinatorState::Invalidated);

    // Nothing left to tear down.
    assert_eq!(h.coordinator.tick().await, TickOutcome::NoSession);
    assert!(!h.coordinator.invalidate().await);
    assert_eq!(h.nav.routes(), vec![Route::Login]);
    assert_eq!(h.coordinator.state(), CoordinatorState::Invalidated);
    Ok(())
}

#[tokio::test]
async fn concurrent_tick_reports_busy() -> anyhow::Result<()> {
    let (refresher, release) = FakeRefresher::gated(vec![Ok(pair("a2", "r2"))]);
    let h = harness(refresher)?;
    h.sessions.sign_in(pair("a1", "r1"), None);

    let first = {
        let coordinator = Arc::clone(&h.coordinator);
        tokio::spawn(async move { coordinator.tick().await })
    };
    assert!(wait_until(Duration::from_secs(2), || h.refresher.calls() == 1).await);
    assert_eq!(h.coordinator.state(), CoordinatorState::Refreshing);

    assert_eq!(h.coordinator.tick().await, TickOutcome::Busy);
    assert_eq!(h.refresher.calls(), 1);

    let _ = release.send(());
    assert_eq!(first.await?, TickOutcome::Refreshed);
    assert_eq!(h.sessions.tokens(), Some(pair("a2", "r2")));
    Ok(())
}

#[tokio::test]
async fn response_for_replaced_session_is_discarded() -> anyhow::Result<()> {
    let (refresher, release) = FakeRefresher::gated(vec![Ok(pair("stale-a", "stale-r"))]);
    let h = harness(refresher)?;
    h.sessions.sign_in(pair("a1", "r1"), None);

    let pending = {
        let coordinator = Arc::clone(&h.coordinator);
        tokio::spawn(async move { coordinator.tick().await })
    };
    assert!(wait_until(Duration::from_secs(2), || h.refresher.calls() == 1).await);
    h.sessions.sign_in(pair("b1", "s1"), None);

    let _ = release.send(());
    assert_eq!(pending.await?, TickOutcome::Discarded);
    assert_eq!(h.sessions.tokens(), Some(pair("b1", "s1")));
    assert_eq!(h.storage.tokens(), None);
    assert!(h.nav.routes().is_empty());
    Ok(())
}

#[tokio::test]
async fn failure_after_logout_does_not_cascade_again() -> anyhow::Result<()> {
    let (refresher, release) = FakeRefresher::gated(vec![Err(anyhow::anyhow!("network down"))]);
    let h = harness(refresher)?;
    h.sessions.sign_in(pair("a1", "r1"), None);

    let pending = {
        let coordinator = Arc::clone(&h.coordinator);
        tokio::spawn(async move { coordinator.tick().await })
    };
    assert!(wait_until(Duration::from_secs(2), || h.refresher.calls() == 1).await);
    assert!(h.coordinator.invalidate().await);

    let _ = release.send(());
    assert_eq!(pending.await?, TickOutcome::Discarded);
    assert_eq!(h.nav.routes(), vec![Route::Login]);
    assert_eq!(h.coordinator.state(), CoordinatorState::Invalidated);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn spawned_loop_ticks_on_interval_until_cancelled() -> anyhow::Result<()> {
    let h = harness_with(FakeRefresher::with(vec![]), false)?;
    h.sessions.sign_in(pair("a1", "r1"), None);
    let cancel = CancellationToken::new();
    let handle = Arc::clone(&h.coordinator).spawn(cancel.clone());

    // First tick fires immediately.
    assert!(wait_until(Duration::from_secs(1), || h.refresher.calls() == 1).await);

    // Next check is not due yet by the token clock.
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(h.refresher.calls(), 1);

    h.clock.advance(Duration::from_millis(2_700_000));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.refresher.calls(), 2);

    cancel.cancel();
    handle.await?;
    h.clock.advance(Duration::from_millis(HOUR_MS));
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.refresher.calls(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn zero_check_interval_still_ticks() -> anyhow::Result<()> {
    let policy = RefreshPolicy { check_interval: Duration::ZERO, ..RefreshPolicy::default() };
    let h = harness_with_policy(FakeRefresher::with(vec![]), false, policy)?;
    assert_eq!(h.coordinator.policy().check_interval, Duration::from_millis(1));
    h.sessions.sign_in(pair("a1", "r1"), None);
    let cancel = CancellationToken::new();
    let handle = Arc::clone(&h.coordinator).spawn(cancel.clone());

    assert!(wait_until(Duration::from_secs(1), || h.refresher.calls() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.refresher.calls(), 1);

    h.clock.advance(Duration::from_millis(2_700_000));
    assert!(wait_until(Duration::from_secs(1), || h.refresher.calls() == 2).await);

    cancel.cancel();
    handle.await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refresh_racing_logout_leaves_no_file_behind() -> anyhow::Result<()> {
    let h = harness(FakeRefresher::with(vec![]))?;
    let path = h.storage.path().map(Path::to_path_buf).unwrap_or_default();
    assert!(!path.as_os_str().is_empty());

    for round in 0..25 {
        h.sessions.sign_in(pair(&format!("a{round}"), &format!("r{round}")), None);
        h.storage.set_tokens(&pair(&format!("a{round}"), &format!("r{round}")))?;

        let ticking = {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move { coordinator.tick().await })
        };
        let ending = {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move { coordinator.invalidate().await })
        };
        let (outcome, ended) = (ticking.await?, ending.await?);

        assert!(ended, "round {round}");
        assert_ne!(outcome, TickOutcome::Invalidated, "round {round}");
        assert!(!path.exists(), "round {round}: storage file came back after {outcome:?}");
        assert_eq!(h.storage.tokens(), None, "round {round}");

        let reopened = LocalStore::file(&path);
        reopened.load().await?;
        assert!(reopened.get(AUTH_KEY).is_none(), "round {round}");
    }
    Ok(())
}
