//! Bid arbitration end-to-end against a real store: ordering, monotonicity,
//! rejection reasons, soft-close extension, and post-deadline behavior.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use bidhouse::api::AppState;
use bidhouse::bus::{EventBus, LocalBus};
use bidhouse::cache::{MemoryCache, StateCache};
use bidhouse::db::{init_db, AuctionStore};
use bidhouse::domain::{
    Auction, AuctionId, AuctionStatus, EventKind, Money, ProductId, UserId,
};
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

/// Create a live auction ending `ends_in` from now.
async fn live_auction(
    state: &AppState,
    start_price: &str,
    ends_in: Duration,
) -> Auction {
    let now = Utc::now();
    let mut auction = Auction::new(
        ProductId::new(),
        UserId::new(),
        "test lot".to_string(),
        String::new(),
        now,
        now + ends_in,
        money(start_price),
        None,
        None,
        false,
        now,
    );
    auction.status = AuctionStatus::Live;
    state.store.create_auction(&auction).await.expect("create failed");
    auction
}

async fn committed_amounts(state: &AppState, auction_id: AuctionId) -> Vec<Money> {
    let (bids, _) = state
        .store
        .get_bids_by_auction(auction_id, 100, 0)
        .await
        .expect("list failed");
    // Newest first in the API; reverse into commit order.
    bids.iter().rev().map(|b| b.amount).collect()
}

#[tokio::test]
async fn test_basic_outbid_flow() {
    let (state, _temp) = setup().await;
    let auction = live_auction(&state, "10", Duration::hours(1)).await;
    let alice = UserId::new();
    let bob = UserId::new();

    let first = state
        .arbiter
        .place_bid(auction.id, alice, money("10"), false)
        .await
        .expect("first bid should commit");
    assert!(first.is_winning);
    assert_eq!(first.amount, money("10"));

    let err = state
        .arbiter
        .place_bid(auction.id, bob, money("10"), false)
        .await
        .expect_err("equal bid must be rejected");
    assert_eq!(err.code(), "BID_TOO_LOW");
    assert!(err.to_string().contains("11"));

    let second = state
        .arbiter
        .place_bid(auction.id, bob, money("11"), false)
        .await
        .expect("outbid should commit");
    assert!(second.is_winning);

    let (bids, total) = state.store.get_bids_by_auction(auction.id, 10, 0).await.unwrap();
    assert_eq!(total, 2);
    let alice_bid = bids.iter().find(|b| b.bidder_id == alice).unwrap();
    let bob_bid = bids.iter().find(|b| b.bidder_id == bob).unwrap();
    assert!(!alice_bid.is_winning);
    assert!(bob_bid.is_winning);

    let loaded = state.store.get_auction(auction.id).await.unwrap().unwrap();
    assert_eq!(loaded.current_bid_id, Some(second.id));
    assert_eq!(loaded.bid_count, 2);
}

#[tokio::test]
async fn test_self_outbid_refused() {
    let (state, _temp) = setup().await;
    let auction = live_auction(&state, "10", Duration::hours(1)).await;
    let carol = UserId::new();

    state
        .arbiter
        .place_bid(auction.id, carol, money("20"), false)
        .await
        .expect("first bid should commit");

    let err = state
        .arbiter
        .place_bid(auction.id, carol, money("25"), false)
        .await
        .expect_err("leader outbidding herself must be rejected");
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(err.to_string(), "cannot outbid yourself");

    let loaded = state.store.get_auction(auction.id).await.unwrap().unwrap();
    assert_eq!(loaded.bid_count, 1);
}

#[tokio::test]
async fn test_bid_on_own_auction_refused() {
    let (state, _temp) = setup().await;
    let auction = live_auction(&state, "10", Duration::hours(1)).await;

    let err = state
        .arbiter
        .place_bid(auction.id, auction.seller_id, money("10"), false)
        .await
        .expect_err("seller bidding must be rejected");
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(err.to_string(), "cannot bid on your own auction");
}

#[tokio::test]
async fn test_invalid_amount_refused() {
    let (state, _temp) = setup().await;
    let auction = live_auction(&state, "10", Duration::hours(1)).await;

    for amount in ["0", "-5"] {
        let err = state
            .arbiter
            .place_bid(auction.id, UserId::new(), money(amount), false)
            .await
            .expect_err("non-positive amount must be rejected");
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}

#[tokio::test]
async fn test_unknown_auction_not_found() {
    let (state, _temp) = setup().await;
    let err = state
        .arbiter
        .place_bid(AuctionId::new(), UserId::new(), money("10"), false)
        .await
        .expect_err("missing auction");
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_scheduled_auction_not_live() {
    let (state, _temp) = setup().await;
    let now = Utc::now();
    let auction = Auction::new(
        ProductId::new(),
        UserId::new(),
        "future lot".to_string(),
        String::new(),
        now + Duration::hours(1),
        now + Duration::hours(2),
        money("10"),
        None,
        None,
        false,
        now,
    );
    state.store.create_auction(&auction).await.unwrap();

    let err = state
        .arbiter
        .place_bid(auction.id, UserId::new(), money("10"), false)
        .await
        .expect_err("scheduled auction takes no bids");
    assert_eq!(err.code(), "AUCTION_NOT_LIVE");
}

#[tokio::test]
async fn test_post_deadline_bid_flips_auction_to_ended() {
    let (state, _temp) = setup().await;
    // Live on paper, but the deadline has already passed.
    let auction = live_auction(&state, "10", Duration::milliseconds(-10)).await;
    let mut events = state.bus.subscribe();

    let err = state
        .arbiter
        .place_bid(auction.id, UserId::new(), money("10"), false)
        .await
        .expect_err("late bid must be rejected");
    assert_eq!(err.code(), "AUCTION_ENDED");

    let loaded = state.store.get_auction(auction.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, AuctionStatus::Ended);

    let event = events.next().await.expect("ended event expected");
    assert_eq!(event.kind, EventKind::AuctionEnded);
    assert_eq!(event.auction_id, auction.id);
    assert!(event.data["winner_id"].is_null());

    // Later bids see the ended status, not "not live".
    let err = state
        .arbiter
        .place_bid(auction.id, UserId::new(), money("20"), false)
        .await
        .expect_err("auction is ended");
    assert_eq!(err.code(), "AUCTION_ENDED");
}

#[tokio::test]
async fn test_soft_close_extends_end_time() {
    let (state, _temp) = setup().await;
    // Ends in 2 minutes, inside the 5 minute window.
    let auction = live_auction(&state, "10", Duration::minutes(2)).await;
    let original_end = auction.end_time;
    let mut events = state.bus.subscribe();

    state
        .arbiter
        .place_bid(auction.id, UserId::new(), money("10"), false)
        .await
        .expect("bid should commit");

    let loaded = state.store.get_auction(auction.id).await.unwrap().unwrap();
    let expected_end = original_end + Duration::seconds(300);
    assert_eq!(
        loaded.end_time.timestamp_millis(),
        expected_end.timestamp_millis()
    );

    let placed = events.next().await.expect("bid.placed expected");
    assert_eq!(placed.kind, EventKind::BidPlaced);
    let extended = events.next().await.expect("auction.extended expected");
    assert_eq!(extended.kind, EventKind::AuctionExtended);
    let new_end: chrono::DateTime<Utc> =
        serde_json::from_value(extended.data["new_end_time"].clone()).unwrap();
    assert_eq!(
        new_end.timestamp_millis(),
        expected_end.timestamp_millis()
    );
}

#[tokio::test]
async fn test_no_extension_outside_window() {
    let (state, _temp) = setup().await;
    let auction = live_auction(&state, "10", Duration::hours(1)).await;

    state
        .arbiter
        .place_bid(auction.id, UserId::new(), money("10"), false)
        .await
        .expect("bid should commit");

    let loaded = state.store.get_auction(auction.id).await.unwrap().unwrap();
    assert_eq!(
        loaded.end_time.timestamp_millis(),
        auction.end_time.timestamp_millis()
    );
}

#[tokio::test]
async fn test_end_time_monotonic_while_live() {
    let (state, _temp) = setup().await;
    let auction = live_auction(&state, "10", Duration::minutes(2)).await;

    let mut last_end = auction.end_time;
    let mut amount = money("10");
    for _ in 0..3 {
        let bidder = UserId::new();
        state
            .arbiter
            .place_bid(auction.id, bidder, amount, false)
            .await
            .expect("bid should commit");
        let loaded = state.store.get_auction(auction.id).await.unwrap().unwrap();
        assert!(loaded.end_time >= last_end);
        last_end = loaded.end_time;
        amount = amount + money("1");
    }
}

#[tokio::test]
async fn test_committed_bids_strictly_increase() {
    let (state, _temp) = setup().await;
    let auction = live_auction(&state, "10", Duration::hours(1)).await;

    for amount in ["10", "11", "13", "20"] {
        state
            .arbiter
            .place_bid(auction.id, UserId::new(), money(amount), false)
            .await
            .expect("bid should commit");
    }

    let amounts = committed_amounts(&state, auction.id).await;
    assert_eq!(amounts.len(), 4);
    for pair in amounts.windows(2) {
        assert!(pair[1] > pair[0], "commit order must strictly increase");
    }
}

#[tokio::test]
async fn test_concurrent_bids_keep_single_winner() {
    let (state, _temp) = setup().await;
    let auction = live_auction(&state, "10", Duration::hours(1)).await;

    let mut handles = Vec::new();
    for i in 0..5 {
        let arbiter = state.arbiter.clone();
        let auction_id = auction.id;
        let amount = money(&format!("{}", 11 + i * 2));
        handles.push(tokio::spawn(async move {
            arbiter.place_bid(auction_id, UserId::new(), amount, false).await
        }));
    }

    let mut committed = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            committed += 1;
        }
    }
    assert!(committed >= 1);

    let (bids, total) = state.store.get_bids_by_auction(auction.id, 100, 0).await.unwrap();
    assert_eq!(total, committed as i64);

    let winners: Vec<_> = bids.iter().filter(|b| b.is_winning).collect();
    assert_eq!(winners.len(), 1, "exactly one winning bid at any instant");

    let max_amount = bids.iter().map(|b| b.amount).max().unwrap();
    assert_eq!(winners[0].amount, max_amount);

    let loaded = state.store.get_auction(auction.id).await.unwrap().unwrap();
    assert_eq!(loaded.current_bid_id, Some(winners[0].id));
    assert_eq!(loaded.bid_count, total);
}

#[tokio::test]
async fn test_snapshot_refreshed_after_commit() {
    let (state, _temp) = setup().await;
    let auction = live_auction(&state, "10", Duration::hours(1)).await;

    let bid = state
        .arbiter
        .place_bid(auction.id, UserId::new(), money("12"), false)
        .await
        .expect("bid should commit");

    let snapshot = state
        .cache
        .get_snapshot(auction.id)
        .await
        .expect("snapshot should be refreshed on commit");
    assert_eq!(snapshot.bid_count, 1);
    assert_eq!(snapshot.current_bid_id, Some(bid.id));
    assert_eq!(snapshot.current_amount, Some(money("12")));

    // Reconciliation parity: store and snapshot agree after quiescence.
    let loaded = state.store.get_auction(auction.id).await.unwrap().unwrap();
    assert_eq!(loaded.current_bid_id, snapshot.current_bid_id);
}
