use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{Auction, AuctionId, AuctionStatus, Bid, BidId, Money};

/// How long a cached snapshot is trusted before readers fall back to the store.
pub const SNAPSHOT_FRESHNESS_SECS: i64 = 5;

/// Cached projection of an auction's hot state. Advisory only: the store is
/// authoritative, and readers must tolerate a missing or stale snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionSnapshot {
    pub auction_id: AuctionId,
    pub status: AuctionStatus,
    pub end_time: DateTime<Utc>,
    pub bid_count: i64,
    pub current_bid_id: Option<BidId>,
    pub current_amount: Option<Money>,
    pub last_updated: DateTime<Utc>,
}

impl AuctionSnapshot {
    /// Project from an auction row and its current winning bid.
    pub fn from_auction(auction: &Auction, current: Option<&Bid>, now: DateTime<Utc>) -> Self {
        AuctionSnapshot {
            auction_id: auction.id,
            status: auction.status,
            end_time: auction.end_time,
            bid_count: auction.bid_count,
            current_bid_id: current.map(|b| b.id),
            current_amount: current.map(|b| b.amount),
            last_updated: now,
        }
    }

    /// Fresh enough to be served without consulting the store.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.last_updated < Duration::seconds(SNAPSHOT_FRESHNESS_SECS)
    }
}
