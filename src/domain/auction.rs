//! Auction aggregate: status machine, bid validation, soft-close extension,
//! and winner selection. All mutation happens in the store under the bid
//! transaction; these methods are the pure rules consulted inside it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::{AuctionId, Bid, BidId, Money, ProductId, UserId};

/// Default soft-close window and extension, in whole seconds.
pub const DEFAULT_EXTEND_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Scheduled,
    Live,
    Ended,
    Cancelled,
}

impl AuctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Scheduled => "scheduled",
            AuctionStatus::Live => "live",
            AuctionStatus::Ended => "ended",
            AuctionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuctionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(AuctionStatus::Scheduled),
            "live" => Ok(AuctionStatus::Live),
            "ended" => Ok(AuctionStatus::Ended),
            "cancelled" => Ok(AuctionStatus::Cancelled),
            other => Err(format!("unknown auction status: {}", other)),
        }
    }
}

/// Why a proposed bid was refused. A closed set: every rejection maps onto
/// the error surface, and callers can rely on exhaustive matching.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BidRejection {
    #[error("auction is not live")]
    AuctionNotLive,
    #[error("auction has ended")]
    AuctionEnded,
    #[error("bid amount must be at least {0}")]
    BidTooLow(Money),
    #[error("cannot bid on your own auction")]
    BidOnOwnAuction,
    #[error("cannot outbid yourself")]
    SelfOutbid,
    #[error("bid amount must be positive")]
    InvalidAmount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Auction {
    pub id: AuctionId,
    pub product_id: ProductId,
    pub seller_id: UserId,
    pub title: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AuctionStatus,
    pub start_price: Money,
    pub reserve_price: Option<Money>,
    pub buy_now_price: Option<Money>,
    pub bid_count: i64,
    pub current_bid_id: Option<BidId>,
    pub winner_id: Option<UserId>,
    /// Stable, unique identifier of the live room; opaque to the core.
    pub room_id: String,
    pub is_featured: bool,
    pub auto_extend: bool,
    /// Soft-close window, whole seconds.
    pub extend_window_secs: i64,
    /// Soft-close extension, whole seconds.
    pub extend_amount_secs: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auction {
    /// Build a new scheduled auction with defaults matching the store schema.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        product_id: ProductId,
        seller_id: UserId,
        title: String,
        description: String,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        start_price: Money,
        reserve_price: Option<Money>,
        buy_now_price: Option<Money>,
        is_featured: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let id = AuctionId::new();
        Auction {
            id,
            product_id,
            seller_id,
            title,
            description,
            start_time,
            end_time,
            status: AuctionStatus::Scheduled,
            start_price,
            reserve_price,
            buy_now_price,
            bid_count: 0,
            current_bid_id: None,
            winner_id: None,
            room_id: format!("auction-{}", id),
            is_featured,
            auto_extend: true,
            extend_window_secs: DEFAULT_EXTEND_SECS,
            extend_amount_secs: DEFAULT_EXTEND_SECS,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn extend_window(&self) -> Duration {
        Duration::seconds(self.extend_window_secs)
    }

    pub fn extend_amount(&self) -> Duration {
        Duration::seconds(self.extend_amount_secs)
    }

    /// The smallest acceptable bid given the current winning bid, if any.
    pub fn min_required(&self, current: Option<&Bid>) -> Money {
        match current {
            Some(bid) => bid.amount + Money::one(),
            None => self.start_price,
        }
    }

    /// Validate a proposed bid against the auction rules.
    ///
    /// `current` is the current winning bid, loaded under the same lock as
    /// the auction row. Callers handle the status/deadline checks separately
    /// because those mutate state (the post-deadline flip to ended).
    pub fn validate_bid(
        &self,
        bidder_id: UserId,
        amount: Money,
        current: Option<&Bid>,
    ) -> Result<(), BidRejection> {
        if bidder_id == self.seller_id {
            return Err(BidRejection::BidOnOwnAuction);
        }
        let min = self.min_required(current);
        if amount < min {
            return Err(BidRejection::BidTooLow(min));
        }
        // The check is against the winning bid, not the bidder's last bid
        // row: a leader stays a leader across intervening rejected bids.
        if let Some(bid) = current {
            if bid.bidder_id == bidder_id {
                return Err(BidRejection::SelfOutbid);
            }
        }
        Ok(())
    }

    /// Whether a bid landing at `now` falls inside the soft-close window.
    pub fn should_extend(&self, now: DateTime<Utc>) -> bool {
        self.auto_extend && self.end_time - now <= self.extend_window()
    }

    /// Winner under the reserve rule: the holder of the current winning bid,
    /// unless a reserve price is set and unmet.
    pub fn select_winner(&self, current: Option<&Bid>) -> Option<UserId> {
        let bid = current?;
        match self.reserve_price {
            Some(reserve) if bid.amount < reserve => None,
            _ => Some(bid.bidder_id),
        }
    }
}
