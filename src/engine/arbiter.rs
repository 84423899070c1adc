//! Bid arbitration pipeline.
//!
//! One transaction per proposed bid: lock the auction row, consult the
//! lifecycle invariants, append, commit. Snapshot refresh and event publish
//! happen after commit and never unwind it; the store is the system of
//! record and clients reconcile on reconnect.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::cache::{StateCache, SNAPSHOT_TTL};
use crate::db::{is_busy_error, AuctionStore};
use crate::domain::{
    Auction, AuctionEvent, AuctionId, AuctionSnapshot, AuctionStatus, Bid, BidRejection, Money,
    UserId,
};
use crate::error::AppError;

/// Lock-contention retries before a bid surfaces as a conflict.
const MAX_BID_ATTEMPTS: u32 = 3;

enum Placement {
    /// The bid committed; `extended_to` carries the soft-close extension.
    Committed {
        bid: Bid,
        auction: Auction,
        extended_to: Option<DateTime<Utc>>,
    },
    /// The deadline had passed: the auction flipped to ended in-transaction
    /// and the bid was refused.
    EndedLate {
        auction_id: AuctionId,
        winner_id: Option<UserId>,
        ended_at: DateTime<Utc>,
    },
}

enum PlaceError {
    Reject(BidRejection),
    NotFound,
    Db(sqlx::Error),
}

pub struct BidArbiter {
    store: Arc<AuctionStore>,
    cache: Arc<dyn StateCache>,
    bus: Arc<dyn EventBus>,
}

impl BidArbiter {
    pub fn new(
        store: Arc<AuctionStore>,
        cache: Arc<dyn StateCache>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        BidArbiter { store, cache, bus }
    }

    /// Validate and commit a bid, returning the committed record.
    ///
    /// Reentrant: proxy bids from the auto-bid engine come through here with
    /// `is_auto = true` and get no special treatment.
    ///
    /// # Errors
    /// Domain rejections surface verbatim; store lock contention is retried
    /// up to 3 attempts with jittered backoff and then surfaces as conflict.
    pub async fn place_bid(
        &self,
        auction_id: AuctionId,
        bidder_id: UserId,
        amount: Money,
        is_auto: bool,
    ) -> Result<Bid, AppError> {
        if !amount.is_positive() {
            return Err(BidRejection::InvalidAmount.into());
        }

        let mut attempt: u32 = 0;
        loop {
            match self.try_place(auction_id, bidder_id, amount, is_auto).await {
                Ok(Placement::Committed {
                    bid,
                    auction,
                    extended_to,
                }) => {
                    self.refresh_snapshot(&auction, &bid).await;

                    if let Err(err) = self.bus.publish(AuctionEvent::bid_placed(&bid)).await {
                        warn!(auction_id = %auction_id, error = %err, "failed to publish bid.placed");
                    }
                    if let Some(new_end) = extended_to {
                        info!(auction_id = %auction_id, new_end = %new_end, "soft-close extended auction");
                        if let Err(err) = self
                            .bus
                            .publish(AuctionEvent::auction_extended(auction_id, new_end))
                            .await
                        {
                            warn!(auction_id = %auction_id, error = %err, "failed to publish auction.extended");
                        }
                    }

                    return Ok(bid);
                }
                Ok(Placement::EndedLate {
                    auction_id,
                    winner_id,
                    ended_at,
                }) => {
                    self.cache.delete_snapshot(auction_id).await;
                    if let Err(err) = self
                        .bus
                        .publish(AuctionEvent::auction_ended(auction_id, winner_id, ended_at))
                        .await
                    {
                        warn!(auction_id = %auction_id, error = %err, "failed to publish auction.ended");
                    }
                    return Err(BidRejection::AuctionEnded.into());
                }
                Err(PlaceError::Reject(rejection)) => return Err(rejection.into()),
                Err(PlaceError::NotFound) => {
                    return Err(AppError::NotFound("auction not found".to_string()))
                }
                Err(PlaceError::Db(err)) if is_busy_error(&err) => {
                    attempt += 1;
                    if attempt >= MAX_BID_ATTEMPTS {
                        return Err(AppError::Conflict(
                            "bid lost a race with concurrent updates, please retry".to_string(),
                        ));
                    }
                    let backoff = {
                        let base = 25u64 << attempt;
                        base + rand::thread_rng().gen_range(0..base)
                    };
                    warn!(
                        auction_id = %auction_id,
                        attempt,
                        backoff_ms = backoff,
                        "bid transaction contended, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(PlaceError::Db(err)) => return Err(err.into()),
            }
        }
    }

    async fn try_place(
        &self,
        auction_id: AuctionId,
        bidder_id: UserId,
        amount: Money,
        is_auto: bool,
    ) -> Result<Placement, PlaceError> {
        let mut tx = self.store.begin_write().await.map_err(PlaceError::Db)?;

        let mut auction = self
            .store
            .get_auction_for_update(&mut tx, auction_id)
            .await
            .map_err(PlaceError::Db)?
            .ok_or(PlaceError::NotFound)?;

        match auction.status {
            AuctionStatus::Live => {}
            AuctionStatus::Ended => return Err(PlaceError::Reject(BidRejection::AuctionEnded)),
            AuctionStatus::Scheduled | AuctionStatus::Cancelled => {
                return Err(PlaceError::Reject(BidRejection::AuctionNotLive))
            }
        }

        let now = Utc::now();
        let current = match auction.current_bid_id {
            Some(bid_id) => self
                .store
                .get_bid_in_tx(&mut tx, bid_id)
                .await
                .map_err(PlaceError::Db)?,
            None => None,
        };

        // Past the deadline: flip to ended in the same transaction so every
        // later bid sees a consistent ended state, then refuse this bid.
        if now >= auction.end_time {
            let winner_id = auction.select_winner(current.as_ref());
            self.store
                .mark_ended(&mut tx, auction_id, winner_id, auction.end_time, now)
                .await
                .map_err(PlaceError::Db)?;
            tx.commit().await.map_err(PlaceError::Db)?;
            return Ok(Placement::EndedLate {
                auction_id,
                winner_id,
                ended_at: now,
            });
        }

        auction
            .validate_bid(bidder_id, amount, current.as_ref())
            .map_err(PlaceError::Reject)?;

        let extended_to = auction
            .should_extend(now)
            .then(|| auction.end_time + auction.extend_amount());
        let end_time = extended_to.unwrap_or(auction.end_time);

        let bid = Bid::new(auction_id, bidder_id, amount, is_auto, now);
        self.store
            .append_bid(&mut tx, &bid, end_time, now)
            .await
            .map_err(PlaceError::Db)?;
        tx.commit().await.map_err(PlaceError::Db)?;

        auction.end_time = end_time;
        auction.bid_count += 1;
        auction.current_bid_id = Some(bid.id);
        auction.updated_at = now;

        Ok(Placement::Committed {
            bid,
            auction,
            extended_to,
        })
    }

    /// Fire-and-forget snapshot refresh; the cache is advisory.
    async fn refresh_snapshot(&self, auction: &Auction, current: &Bid) {
        let snapshot = AuctionSnapshot::from_auction(auction, Some(current), Utc::now());
        self.cache.put_snapshot(snapshot, SNAPSHOT_TTL).await;
    }
}
