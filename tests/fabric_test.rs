//! Fabric wiring: events published by the engine reach room mailboxes
//! through the hub's subscriber loop, in order, per auction.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use bidhouse::api::AppState;
use bidhouse::bus::{EventBus, LocalBus};
use bidhouse::cache::MemoryCache;
use bidhouse::db::{init_db, AuctionStore};
use bidhouse::domain::{Auction, AuctionEvent, AuctionStatus, Money, ProductId, UserId};
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

async fn live_auction(state: &AppState) -> Auction {
    let now = Utc::now();
    let mut auction = Auction::new(
        ProductId::new(),
        UserId::new(),
        "streamed lot".to_string(),
        String::new(),
        now,
        now + Duration::hours(1),
        Money::from_canonical("10").unwrap(),
        None,
        None,
        false,
        now,
    );
    auction.status = AuctionStatus::Live;
    state.store.create_auction(&auction).await.expect("create failed");
    auction
}

async fn recv_payload(rx: &mut tokio::sync::mpsc::Receiver<String>) -> serde_json::Value {
    let payload = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for room delivery")
        .expect("mailbox closed");
    serde_json::from_str(&payload).expect("payload is wire json")
}

#[tokio::test]
async fn test_committed_bid_reaches_room_clients() {
    let (state, _temp) = setup().await;
    let auction = live_auction(&state).await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let hub_task = state.fabric.hub.spawn(&state.bus, shutdown_rx);

    let (_client, mut mailbox, _feedback) = state.fabric.hub.join(auction.id);

    let bid = state
        .arbiter
        .place_bid(auction.id, UserId::new(), Money::from_canonical("12").unwrap(), false)
        .await
        .expect("bid should commit");

    let event = recv_payload(&mut mailbox).await;
    assert_eq!(event["type"], "bid.placed");
    assert_eq!(event["auction_id"], auction.id.to_string());
    assert_eq!(event["data"]["bid_id"], bid.id.to_string());
    assert_eq!(event["data"]["amount"], 12.0);

    let _ = shutdown_tx.send(true);
    let _ = hub_task.await;
}

#[tokio::test]
async fn test_events_stay_scoped_to_their_room() {
    let (state, _temp) = setup().await;
    let auction_a = live_auction(&state).await;
    let auction_b = live_auction(&state).await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let hub_task = state.fabric.hub.spawn(&state.bus, shutdown_rx);

    let (_ca, mut mailbox_a, _fa) = state.fabric.hub.join(auction_a.id);
    let (_cb, mut mailbox_b, _fb) = state.fabric.hub.join(auction_b.id);

    state
        .arbiter
        .place_bid(auction_a.id, UserId::new(), Money::from_canonical("12").unwrap(), false)
        .await
        .expect("bid should commit");

    let event = recv_payload(&mut mailbox_a).await;
    assert_eq!(event["auction_id"], auction_a.id.to_string());

    // Room B never hears about auction A.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(mailbox_b.try_recv().is_err());

    let _ = shutdown_tx.send(true);
    let _ = hub_task.await;
}

#[tokio::test]
async fn test_local_delivery_preserves_publish_order() {
    let (state, _temp) = setup().await;
    let auction = live_auction(&state).await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let hub_task = state.fabric.hub.spawn(&state.bus, shutdown_rx);

    let (_client, mut mailbox, _feedback) = state.fabric.hub.join(auction.id);

    for count in 1..=5 {
        state
            .bus
            .publish(AuctionEvent::viewer_count(auction.id, count))
            .await
            .expect("publish failed");
    }

    for expected in 1..=5 {
        let event = recv_payload(&mut mailbox).await;
        assert_eq!(event["type"], "viewer_count");
        assert_eq!(event["data"]["count"], expected);
    }

    let _ = shutdown_tx.send(true);
    let _ = hub_task.await;
}

#[tokio::test]
async fn test_chat_event_round_trip() {
    let (state, _temp) = setup().await;
    let auction = live_auction(&state).await;
    let user = UserId::new();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let hub_task = state.fabric.hub.spawn(&state.bus, shutdown_rx);

    let (_client, mut mailbox, _feedback) = state.fabric.hub.join(auction.id);

    state
        .bus
        .publish(AuctionEvent::chat(auction.id, user, "going once".to_string()))
        .await
        .expect("publish failed");

    let event = recv_payload(&mut mailbox).await;
    assert_eq!(event["type"], "chat");
    assert_eq!(event["data"]["user_id"], user.to_string());
    assert_eq!(event["data"]["message"], "going once");

    let _ = shutdown_tx.send(true);
    let _ = hub_task.await;
}
