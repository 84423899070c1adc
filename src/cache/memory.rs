//! In-process `StateCache` backed by expiring maps.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{StateCache, VIEWER_TTL};
use crate::domain::{AuctionId, AuctionSnapshot};

#[derive(Debug)]
struct Expiring<T> {
    value: T,
    deadline: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Expiring {
            value,
            deadline: Instant::now() + ttl,
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Expiry is lazy: entries are dropped when read past their deadline, which
/// bounds memory by the working set rather than requiring a reaper task.
#[derive(Default)]
pub struct MemoryCache {
    snapshots: Mutex<HashMap<AuctionId, Expiring<AuctionSnapshot>>>,
    viewers: Mutex<HashMap<AuctionId, Expiring<i64>>>,
    leases: Mutex<HashMap<String, Instant>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateCache for MemoryCache {
    async fn get_snapshot(&self, id: AuctionId) -> Option<AuctionSnapshot> {
        let mut map = self.snapshots.lock().expect("snapshot lock poisoned");
        match map.get(&id) {
            Some(entry) if !entry.expired() => Some(entry.value.clone()),
            Some(_) => {
                map.remove(&id);
                None
            }
            None => None,
        }
    }

    async fn put_snapshot(&self, snapshot: AuctionSnapshot, ttl: Duration) {
        let mut map = self.snapshots.lock().expect("snapshot lock poisoned");
        map.insert(snapshot.auction_id, Expiring::new(snapshot, ttl));
    }

    async fn delete_snapshot(&self, id: AuctionId) {
        let mut map = self.snapshots.lock().expect("snapshot lock poisoned");
        map.remove(&id);
    }

    async fn incr_viewers(&self, id: AuctionId) -> i64 {
        let mut map = self.viewers.lock().expect("viewer lock poisoned");
        let current = match map.get(&id) {
            Some(entry) if !entry.expired() => entry.value,
            _ => 0,
        };
        let next = current + 1;
        map.insert(id, Expiring::new(next, VIEWER_TTL));
        next
    }

    async fn decr_viewers(&self, id: AuctionId) -> i64 {
        let mut map = self.viewers.lock().expect("viewer lock poisoned");
        let current = match map.get(&id) {
            Some(entry) if !entry.expired() => entry.value,
            _ => 0,
        };
        let next = (current - 1).max(0);
        map.insert(id, Expiring::new(next, VIEWER_TTL));
        next
    }

    async fn viewer_count(&self, id: AuctionId) -> i64 {
        let mut map = self.viewers.lock().expect("viewer lock poisoned");
        match map.get(&id) {
            Some(entry) if !entry.expired() => entry.value,
            Some(_) => {
                map.remove(&id);
                0
            }
            None => 0,
        }
    }

    async fn acquire_lease(&self, key: &str, ttl: Duration) -> bool {
        let mut map = self.leases.lock().expect("lease lock poisoned");
        let now = Instant::now();
        match map.get(key) {
            Some(deadline) if *deadline > now => false,
            _ => {
                map.insert(key.to_string(), now + ttl);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuctionStatus, Money};
    use chrono::Utc;

    fn snapshot(id: AuctionId) -> AuctionSnapshot {
        AuctionSnapshot {
            auction_id: id,
            status: AuctionStatus::Live,
            end_time: Utc::now(),
            bid_count: 1,
            current_bid_id: None,
            current_amount: Some(Money::from_canonical("10").unwrap()),
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_and_delete() {
        let cache = MemoryCache::new();
        let id = AuctionId::new();

        assert!(cache.get_snapshot(id).await.is_none());
        cache
            .put_snapshot(snapshot(id), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get_snapshot(id).await.unwrap().bid_count, 1);

        cache.delete_snapshot(id).await;
        assert!(cache.get_snapshot(id).await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_expires() {
        let cache = MemoryCache::new();
        let id = AuctionId::new();
        cache
            .put_snapshot(snapshot(id), Duration::from_millis(10))
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get_snapshot(id).await.is_none());
    }

    #[tokio::test]
    async fn test_viewer_counter_clamps_at_zero() {
        let cache = MemoryCache::new();
        let id = AuctionId::new();

        assert_eq!(cache.incr_viewers(id).await, 1);
        assert_eq!(cache.incr_viewers(id).await, 2);
        assert_eq!(cache.decr_viewers(id).await, 1);
        assert_eq!(cache.decr_viewers(id).await, 0);
        assert_eq!(cache.decr_viewers(id).await, 0);
        assert_eq!(cache.viewer_count(id).await, 0);
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_until_expiry() {
        let cache = MemoryCache::new();

        assert!(cache.acquire_lease("trigger:1", Duration::from_millis(30)).await);
        assert!(!cache.acquire_lease("trigger:1", Duration::from_millis(30)).await);
        // Different key is independent.
        assert!(cache.acquire_lease("trigger:2", Duration::from_millis(30)).await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.acquire_lease("trigger:1", Duration::from_millis(30)).await);
    }
}
