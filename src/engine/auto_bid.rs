//! Auto-bid engine: answers committed human bids with proxy bids.
//!
//! Triggered by `bid.placed` events from the fabric. Each trigger runs one
//! bounded cascade under a per-auction mutex; a short cache lease keyed by
//! the trigger bid keeps other instances from running the same cascade.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::BidArbiter;
use crate::bus::EventBus;
use crate::cache::StateCache;
use crate::db::AuctionStore;
use crate::domain::{AuctionId, AutoBidId, BidId, Money, UserId};

/// Most proxy bids a single trigger may produce.
pub const CASCADE_BOUND: usize = 10;

const TRIGGER_LEASE_TTL: Duration = Duration::from_secs(5);

pub struct AutoBidEngine {
    store: Arc<AuctionStore>,
    cache: Arc<dyn StateCache>,
    arbiter: Arc<BidArbiter>,
    locks: dashmap::DashMap<AuctionId, Arc<Mutex<()>>>,
}

impl AutoBidEngine {
    pub fn new(
        store: Arc<AuctionStore>,
        cache: Arc<dyn StateCache>,
        arbiter: Arc<BidArbiter>,
    ) -> Self {
        AutoBidEngine {
            store,
            cache,
            arbiter,
            locks: dashmap::DashMap::new(),
        }
    }

    /// Consume `bid.placed` events until shutdown. Proxy bids re-enter the
    /// arbiter with `is_auto = true` and do not re-trigger the engine.
    pub fn spawn(
        self: &Arc<Self>,
        bus: &Arc<dyn EventBus>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut events = bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    event = events.next() => {
                        let Some(event) = event else { break };
                        let Some(data) = event.as_bid_placed() else { continue };
                        if data.is_auto {
                            continue;
                        }
                        engine
                            .run_cascade(event.auction_id, data.bid_id, data.user_id, data.amount)
                            .await;
                    }
                }
            }
            debug!("auto-bid engine stopped");
        })
    }

    /// Run the cascade for one trigger. Serialized per auction on this
    /// instance; the cache lease elects one instance per trigger.
    pub async fn run_cascade(
        &self,
        auction_id: AuctionId,
        trigger_bid: BidId,
        trigger_bidder: UserId,
        trigger_amount: Money,
    ) {
        let lock = self
            .locks
            .entry(auction_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let lease_key = format!("autobid:{}:{}", auction_id, trigger_bid);
        if !self.cache.acquire_lease(&lease_key, TRIGGER_LEASE_TTL).await {
            return;
        }

        if let Err(err) = self.cascade(auction_id, trigger_bidder, trigger_amount).await {
            warn!(auction_id = %auction_id, error = %err, "auto-bid cascade failed");
        }
    }

    /// The cascade proper. Repeatedly answer the current price with the rule
    /// holding the lowest cap still above it (creation time breaks ties), so
    /// weaker caps price out early and the strongest rule settles at the
    /// runner-up's cap plus one increment. Terminates because every fire
    /// strictly raises `current` and every cap is finite; the bound covers
    /// pathological configurations.
    async fn cascade(
        &self,
        auction_id: AuctionId,
        mut leader: UserId,
        mut current: Money,
    ) -> Result<(), sqlx::Error> {
        let rules = self.store.list_active_auto_bids(auction_id).await?;
        if rules.is_empty() {
            return Ok(());
        }

        let mut skipped: HashSet<AutoBidId> = HashSet::new();
        let mut fired = 0usize;

        while fired < CASCADE_BOUND {
            let candidate = rules
                .iter()
                .filter(|r| {
                    !skipped.contains(&r.id) && r.bidder_id != leader && r.max_amount > current
                })
                .min_by(|a, b| {
                    a.max_amount
                        .cmp(&b.max_amount)
                        .then(a.created_at.cmp(&b.created_at))
                });
            let Some(rule) = candidate else { break };

            let Some(next) = rule.next_bid(current) else {
                skipped.insert(rule.id);
                continue;
            };

            match self
                .arbiter
                .place_bid(auction_id, rule.bidder_id, next, true)
                .await
            {
                Ok(bid) => {
                    if let Err(err) = self.store.touch_auto_bid(rule.id, bid.placed_at, next).await
                    {
                        warn!(rule_id = %rule.id, error = %err, "failed to record auto-bid fire");
                    }
                    current = next;
                    leader = rule.bidder_id;
                    fired += 1;
                }
                Err(err) => {
                    // A failed proxy bid drops its rule from this round only.
                    warn!(rule_id = %rule.id, error = %err, "proxy bid rejected, skipping rule");
                    skipped.insert(rule.id);
                }
            }
        }

        if fired > 0 {
            debug!(auction_id = %auction_id, fired, price = %current, "auto-bid cascade settled");
        }
        Ok(())
    }
}
