use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AuctionId, AutoBidId, Money, UserId};

/// A standing proxy-bid rule: bid on the user's behalf up to `max_amount`,
/// one `increment` at a time. At most one active rule per (auction, bidder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoBid {
    pub id: AutoBidId,
    pub auction_id: AuctionId,
    pub bidder_id: UserId,
    pub max_amount: Money,
    pub increment: Money,
    pub active: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub last_amount: Option<Money>,
    pub created_at: DateTime<Utc>,
}

impl AutoBid {
    pub fn new(
        auction_id: AuctionId,
        bidder_id: UserId,
        max_amount: Money,
        increment: Money,
        now: DateTime<Utc>,
    ) -> Self {
        AutoBid {
            id: AutoBidId::new(),
            auction_id,
            bidder_id,
            max_amount,
            increment,
            active: true,
            last_fired_at: None,
            last_amount: None,
            created_at: now,
        }
    }

    /// The proxy bid this rule would place against `current`, capped at
    /// `max_amount`. None when the rule is inactive or exhausted.
    pub fn next_bid(&self, current: Money) -> Option<Money> {
        if !self.active || self.max_amount <= current {
            return None;
        }
        let uncapped = current + self.increment;
        let next = if uncapped > self.max_amount {
            self.max_amount
        } else {
            uncapped
        };
        // max_amount > current and increment > 0 guarantee next > current.
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(max: &str, inc: &str) -> AutoBid {
        AutoBid::new(
            AuctionId::new(),
            UserId::new(),
            Money::from_canonical(max).unwrap(),
            Money::from_canonical(inc).unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn test_next_bid_steps_by_increment() {
        let r = rule("30", "2");
        assert_eq!(
            r.next_bid(Money::from_canonical("6").unwrap()),
            Some(Money::from_canonical("8").unwrap())
        );
    }

    #[test]
    fn test_next_bid_caps_at_max() {
        let r = rule("20", "2");
        assert_eq!(
            r.next_bid(Money::from_canonical("19").unwrap()),
            Some(Money::from_canonical("20").unwrap())
        );
    }

    #[test]
    fn test_next_bid_none_when_exhausted() {
        let r = rule("20", "2");
        assert_eq!(r.next_bid(Money::from_canonical("20").unwrap()), None);
        assert_eq!(r.next_bid(Money::from_canonical("25").unwrap()), None);
    }

    #[test]
    fn test_next_bid_none_when_inactive() {
        let mut r = rule("20", "2");
        r.active = false;
        assert_eq!(r.next_bid(Money::from_canonical("6").unwrap()), None);
    }
}
