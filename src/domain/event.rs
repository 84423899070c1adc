//! Wire events: the payloads published on the event fabric and written to
//! duplex clients. One JSON shape for both, per the reconciliation model:
//! events are hints, the store is authoritative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AuctionId, Bid, BidId, Money, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "bid.placed")]
    BidPlaced,
    #[serde(rename = "auction.started")]
    AuctionStarted,
    #[serde(rename = "auction.ended")]
    AuctionEnded,
    #[serde(rename = "auction.extended")]
    AuctionExtended,
    #[serde(rename = "viewer_count")]
    ViewerCount,
    #[serde(rename = "chat")]
    Chat,
}

/// An event on the fabric. `data` is the type-specific payload; the typed
/// structs below give it shape on both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub auction_id: AuctionId,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidPlacedData {
    pub bid_id: BidId,
    pub user_id: UserId,
    pub amount: Money,
    pub is_auto: bool,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionEndedData {
    pub winner_id: Option<UserId>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionExtendedData {
    pub new_end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerCountData {
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatData {
    pub user_id: UserId,
    pub message: String,
}

impl AuctionEvent {
    fn build(kind: EventKind, auction_id: AuctionId, data: Value) -> Self {
        AuctionEvent {
            kind,
            auction_id,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn bid_placed(bid: &Bid) -> Self {
        let data = BidPlacedData {
            bid_id: bid.id,
            user_id: bid.bidder_id,
            amount: bid.amount,
            is_auto: bid.is_auto,
            placed_at: bid.placed_at,
        };
        Self::build(
            EventKind::BidPlaced,
            bid.auction_id,
            serde_json::to_value(data).expect("bid payload serializes"),
        )
    }

    pub fn auction_started(auction_id: AuctionId, started_at: DateTime<Utc>) -> Self {
        Self::build(
            EventKind::AuctionStarted,
            auction_id,
            serde_json::json!({ "started_at": started_at }),
        )
    }

    pub fn auction_ended(
        auction_id: AuctionId,
        winner_id: Option<UserId>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        let data = AuctionEndedData { winner_id, ended_at };
        Self::build(
            EventKind::AuctionEnded,
            auction_id,
            serde_json::to_value(data).expect("ended payload serializes"),
        )
    }

    pub fn auction_extended(auction_id: AuctionId, new_end_time: DateTime<Utc>) -> Self {
        let data = AuctionExtendedData { new_end_time };
        Self::build(
            EventKind::AuctionExtended,
            auction_id,
            serde_json::to_value(data).expect("extended payload serializes"),
        )
    }

    pub fn viewer_count(auction_id: AuctionId, count: i64) -> Self {
        Self::build(
            EventKind::ViewerCount,
            auction_id,
            serde_json::json!({ "count": count }),
        )
    }

    pub fn chat(auction_id: AuctionId, user_id: UserId, message: String) -> Self {
        let data = ChatData { user_id, message };
        Self::build(
            EventKind::Chat,
            auction_id,
            serde_json::to_value(data).expect("chat payload serializes"),
        )
    }

    /// Decode the `bid.placed` payload, if this is such an event.
    pub fn as_bid_placed(&self) -> Option<BidPlacedData> {
        if self.kind != EventKind::BidPlaced {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}
