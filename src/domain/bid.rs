use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AuctionId, BidId, Money, UserId};

/// A committed bid on an auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub auction_id: AuctionId,
    pub bidder_id: UserId,
    pub amount: Money,
    pub is_auto: bool,
    pub is_winning: bool,
    pub placed_at: DateTime<Utc>,
}

impl Bid {
    /// Build a new bid record. Bids enter the store as the winning bid;
    /// the append transaction clears the previous winner in the same commit.
    pub fn new(
        auction_id: AuctionId,
        bidder_id: UserId,
        amount: Money,
        is_auto: bool,
        placed_at: DateTime<Utc>,
    ) -> Self {
        Bid {
            id: BidId::new(),
            auction_id,
            bidder_id,
            amount,
            is_auto,
            is_winning: true,
            placed_at,
        }
    }
}
