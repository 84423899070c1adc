//! Auction lifecycle: scheduled -> live -> ended, with cancellation from
//! either pre-terminal state, and the periodic sweeper that drives overdue
//! transitions. All transitions are conditional updates; a losing CAS is a
//! no-op for the sweeper and a conflict for an HTTP caller.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::cache::{StateCache, SNAPSHOT_TTL};
use crate::db::AuctionStore;
use crate::domain::{AuctionEvent, AuctionId, AuctionSnapshot, AuctionStatus, UserId};
use crate::error::AppError;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct LifecycleController {
    store: Arc<AuctionStore>,
    cache: Arc<dyn StateCache>,
    bus: Arc<dyn EventBus>,
}

impl LifecycleController {
    pub fn new(
        store: Arc<AuctionStore>,
        cache: Arc<dyn StateCache>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        LifecycleController { store, cache, bus }
    }

    /// Scheduled -> live. Stamps the actual start time and announces it.
    pub async fn start(&self, id: AuctionId) -> Result<(), AppError> {
        let now = Utc::now();
        if !self.store.transition_to_live(id, now).await? {
            return match self.store.get_auction(id).await? {
                None => Err(AppError::NotFound("auction not found".to_string())),
                Some(_) => Err(AppError::Conflict("auction is not scheduled".to_string())),
            };
        }

        info!(auction_id = %id, "auction started");
        self.refresh_snapshot(id).await;
        if let Err(err) = self.bus.publish(AuctionEvent::auction_started(id, now)).await {
            warn!(auction_id = %id, error = %err, "failed to publish auction.started");
        }
        Ok(())
    }

    /// Live -> ended, selecting the winner under the reserve rule.
    pub async fn end(&self, id: AuctionId) -> Result<Option<UserId>, AppError> {
        self.end_inner(id, None).await
    }

    /// Sweeper variant: re-checks the deadline under the row lock, so an
    /// auction extended by a bid after the sweep scan is left alone.
    async fn end_if_due(&self, id: AuctionId, due_at: DateTime<Utc>) -> Result<(), AppError> {
        self.end_inner(id, Some(due_at)).await.map(|_| ())
    }

    async fn end_inner(
        &self,
        id: AuctionId,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<Option<UserId>, AppError> {
        let mut tx = self.store.begin_write().await?;
        let auction = self
            .store
            .get_auction_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound("auction not found".to_string()))?;

        if auction.status != AuctionStatus::Live {
            return Err(AppError::Conflict("auction is not live".to_string()));
        }
        if let Some(due_at) = due_at {
            if auction.end_time > due_at {
                // A bid landed in the meantime and extended the deadline.
                return Ok(auction.winner_id);
            }
        }

        let now = Utc::now();
        let current = match auction.current_bid_id {
            Some(bid_id) => self.store.get_bid_in_tx(&mut tx, bid_id).await?,
            None => None,
        };
        let winner_id = auction.select_winner(current.as_ref());

        self.store.mark_ended(&mut tx, id, winner_id, now, now).await?;
        tx.commit().await?;

        info!(auction_id = %id, winner = ?winner_id.map(|w| w.to_string()), "auction ended");
        self.cache.delete_snapshot(id).await;
        if let Err(err) = self
            .bus
            .publish(AuctionEvent::auction_ended(id, winner_id, now))
            .await
        {
            warn!(auction_id = %id, error = %err, "failed to publish auction.ended");
        }
        Ok(winner_id)
    }

    /// Scheduled or live -> cancelled.
    pub async fn cancel(&self, id: AuctionId) -> Result<(), AppError> {
        let now = Utc::now();
        if !self.store.transition_to_cancelled(id, now).await? {
            return match self.store.get_auction(id).await? {
                None => Err(AppError::NotFound("auction not found".to_string())),
                Some(_) => Err(AppError::Conflict(
                    "auction is already ended or cancelled".to_string(),
                )),
            };
        }

        info!(auction_id = %id, "auction cancelled");
        self.cache.delete_snapshot(id).await;
        Ok(())
    }

    /// One sweep pass: start due scheduled auctions and end overdue live
    /// ones. Idempotent and safe to run on multiple instances; a losing CAS
    /// shows up as a conflict and is ignored.
    pub async fn sweep_once(&self, now: DateTime<Utc>) {
        match self.store.get_scheduled_for_start(now).await {
            Ok(ids) => {
                for id in ids {
                    match self.start(id).await {
                        Ok(()) | Err(AppError::Conflict(_)) | Err(AppError::NotFound(_)) => {}
                        Err(err) => warn!(auction_id = %id, error = %err, "sweep start failed"),
                    }
                }
            }
            Err(err) => warn!(error = %err, "sweep scan for due starts failed"),
        }

        match self.store.get_live_for_end(now).await {
            Ok(ids) => {
                for id in ids {
                    match self.end_if_due(id, now).await {
                        Ok(()) | Err(AppError::Conflict(_)) | Err(AppError::NotFound(_)) => {}
                        Err(err) => warn!(auction_id = %id, error = %err, "sweep end failed"),
                    }
                }
            }
            Err(err) => warn!(error = %err, "sweep scan for due ends failed"),
        }
    }

    async fn refresh_snapshot(&self, id: AuctionId) {
        let auction = match self.store.get_auction(id).await {
            Ok(Some(auction)) => auction,
            Ok(None) => return,
            Err(err) => {
                warn!(auction_id = %id, error = %err, "snapshot refresh read failed");
                return;
            }
        };
        let current = match auction.current_bid_id {
            Some(bid_id) => self.store.get_bid(bid_id).await.ok().flatten(),
            None => None,
        };
        let snapshot = AuctionSnapshot::from_auction(&auction, current.as_ref(), Utc::now());
        self.cache.put_snapshot(snapshot, SNAPSHOT_TTL).await;
    }
}

/// Run the sweeper until shutdown, ticking once a second.
pub fn spawn_sweeper(
    controller: Arc<LifecycleController>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => controller.sweep_once(Utc::now()).await,
            }
        }
    })
}
