//! Lifecycle controller and sweeper: transitions, winner selection under
//! the reserve rule, and idempotent sweeping.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use bidhouse::api::AppState;
use bidhouse::bus::{EventBus, LocalBus};
use bidhouse::cache::{MemoryCache, StateCache};
use bidhouse::db::{init_db, AuctionStore};
use bidhouse::domain::{Auction, AuctionStatus, EventKind, Money, ProductId, UserId};
use bidhouse::fabric::LogChatSink;
use bidhouse::TokenManager;

async fn setup() -> (AppState, TempDir) {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("test.db").to_string_lossy().to_string();
    let pool = init_db(&db_path, 5).await.expect("init_db failed");
    let state = AppState::new(
        Arc::new(AuctionStore::new(pool)),
        Arc::new(MemoryCache::new()),
        Arc::new(LocalBus::new()),
        Arc::new(LogChatSink),
        TokenManager::new("test-secret"),
        true,
    );
    (state, temp)
}

fn money(s: &str) -> Money {
    Money::from_canonical(s).unwrap()
}

async fn scheduled_auction(
    state: &AppState,
    starts_in: Duration,
    ends_in: Duration,
    reserve: Option<&str>,
) -> Auction {
    let now = Utc::now();
    let auction = Auction::new(
        ProductId::new(),
        UserId::new(),
        "test lot".to_string(),
        String::new(),
        now + starts_in,
        now + ends_in,
        money("10"),
        reserve.map(money),
        None,
        false,
        now,
    );
    state.store.create_auction(&auction).await.expect("create failed");
    auction
}

#[tokio::test]
async fn test_start_transitions_and_announces() {
    let (state, _temp) = setup().await;
    let auction = scheduled_auction(&state, Duration::minutes(5), Duration::hours(1), None).await;
    let mut events = state.bus.subscribe();

    state.lifecycle.start(auction.id).await.expect("start failed");

    let loaded = state.store.get_auction(auction.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, AuctionStatus::Live);
    // The actual start time is stamped at transition.
    assert!(loaded.start_time <= Utc::now());

    let event = events.next().await.expect("started event expected");
    assert_eq!(event.kind, EventKind::AuctionStarted);
    assert_eq!(event.auction_id, auction.id);

    // Snapshot reflects the live status.
    let snapshot = state.cache.get_snapshot(auction.id).await.unwrap();
    assert_eq!(snapshot.status, AuctionStatus::Live);

    // Starting twice loses the CAS.
    let err = state.lifecycle.start(auction.id).await.expect_err("double start");
    assert_eq!(err.code(), "CONFLICT");
}

#[tokio::test]
async fn test_end_selects_winner_when_reserve_met() {
    let (state, _temp) = setup().await;
    let auction = scheduled_auction(&state, Duration::zero(), Duration::hours(1), Some("100")).await;
    state.lifecycle.start(auction.id).await.unwrap();

    let bidder = UserId::new();
    state
        .arbiter
        .place_bid(auction.id, bidder, money("120"), false)
        .await
        .expect("bid should commit");

    let winner = state.lifecycle.end(auction.id).await.expect("end failed");
    assert_eq!(winner, Some(bidder));

    let loaded = state.store.get_auction(auction.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, AuctionStatus::Ended);
    assert_eq!(loaded.winner_id, Some(bidder));
}

#[tokio::test]
async fn test_end_without_winner_when_reserve_unmet() {
    let (state, _temp) = setup().await;
    let auction = scheduled_auction(&state, Duration::zero(), Duration::hours(1), Some("100")).await;
    state.lifecycle.start(auction.id).await.unwrap();

    state
        .arbiter
        .place_bid(auction.id, UserId::new(), money("80"), false)
        .await
        .expect("bid should commit");

    let mut events = state.bus.subscribe();
    let winner = state.lifecycle.end(auction.id).await.expect("end failed");
    assert_eq!(winner, None);

    let loaded = state.store.get_auction(auction.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, AuctionStatus::Ended);
    assert_eq!(loaded.winner_id, None);

    let event = events.next().await.expect("ended event expected");
    assert_eq!(event.kind, EventKind::AuctionEnded);
    assert!(event.data["winner_id"].is_null());

    // The snapshot is dropped so readers fall through to the store.
    assert!(state.cache.get_snapshot(auction.id).await.is_none());
}

#[tokio::test]
async fn test_end_requires_live() {
    let (state, _temp) = setup().await;
    let auction = scheduled_auction(&state, Duration::minutes(5), Duration::hours(1), None).await;

    let err = state.lifecycle.end(auction.id).await.expect_err("not live yet");
    assert_eq!(err.code(), "CONFLICT");
}

#[tokio::test]
async fn test_cancel_from_scheduled_and_live() {
    let (state, _temp) = setup().await;

    let scheduled = scheduled_auction(&state, Duration::minutes(5), Duration::hours(1), None).await;
    state.lifecycle.cancel(scheduled.id).await.expect("cancel failed");
    let loaded = state.store.get_auction(scheduled.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, AuctionStatus::Cancelled);

    let live = scheduled_auction(&state, Duration::zero(), Duration::hours(1), None).await;
    state.lifecycle.start(live.id).await.unwrap();
    state.lifecycle.cancel(live.id).await.expect("cancel failed");

    // Terminal states cannot be cancelled again.
    let err = state.lifecycle.cancel(live.id).await.expect_err("already cancelled");
    assert_eq!(err.code(), "CONFLICT");
}

#[tokio::test]
async fn test_sweep_starts_due_auctions() {
    let (state, _temp) = setup().await;
    let now = Utc::now();

    let due = scheduled_auction(&state, Duration::seconds(-5), Duration::hours(1), None).await;
    let not_due = scheduled_auction(&state, Duration::hours(1), Duration::hours(2), None).await;

    state.lifecycle.sweep_once(now).await;

    let started = state.store.get_auction(due.id).await.unwrap().unwrap();
    assert_eq!(started.status, AuctionStatus::Live);
    let untouched = state.store.get_auction(not_due.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, AuctionStatus::Scheduled);
}

#[tokio::test]
async fn test_sweep_ends_overdue_auctions_and_is_idempotent() {
    let (state, _temp) = setup().await;

    // Live with a deadline already in the past.
    let overdue = scheduled_auction(
        &state,
        Duration::seconds(-60),
        Duration::milliseconds(-100),
        None,
    )
    .await;
    assert!(state
        .store
        .transition_to_live(overdue.id, Utc::now() - Duration::seconds(30))
        .await
        .unwrap());

    let now = Utc::now();
    state.lifecycle.sweep_once(now).await;

    let ended = state.store.get_auction(overdue.id).await.unwrap().unwrap();
    assert_eq!(ended.status, AuctionStatus::Ended);

    // A second sweep over the same state is a no-op.
    state.lifecycle.sweep_once(Utc::now()).await;
    let still_ended = state.store.get_auction(overdue.id).await.unwrap().unwrap();
    assert_eq!(still_ended.status, AuctionStatus::Ended);
}

#[tokio::test]
async fn test_sweep_leaves_extended_auction_alone() {
    let (state, _temp) = setup().await;

    // Scan says due, but a soft-close bid pushed the deadline forward
    // before the sweeper could lock the row.
    let auction = scheduled_auction(&state, Duration::zero(), Duration::minutes(2), None).await;
    state.lifecycle.start(auction.id).await.unwrap();

    let scan_time = Utc::now() + Duration::minutes(3);
    state
        .arbiter
        .place_bid(auction.id, UserId::new(), money("10"), false)
        .await
        .expect("bid extends the deadline");

    state.lifecycle.sweep_once(scan_time).await;

    let loaded = state.store.get_auction(auction.id).await.unwrap().unwrap();
    assert_eq!(
        loaded.status,
        AuctionStatus::Live,
        "extension must survive a stale sweep scan"
    );
}
