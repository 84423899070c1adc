//! Best-effort state cache: hot auction snapshots, viewer counters, and
//! short-lived leases. Consumed through the `StateCache` trait so a
//! networked cache can replace the in-process one without touching callers.
//!
//! The cache is advisory. No operation's correctness depends on it, so the
//! trait surfaces plain values: implementations swallow their own transient
//! failures (logging at warn) rather than making every caller handle them.

pub mod memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{AuctionId, AuctionSnapshot};

/// Snapshot TTL: stale entries linger up to an hour before eviction.
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(3600);

/// Viewer counters expire an hour after the last increment.
pub const VIEWER_TTL: Duration = Duration::from_secs(3600);

#[async_trait]
pub trait StateCache: Send + Sync {
    /// The cached snapshot, if present and unexpired.
    async fn get_snapshot(&self, id: AuctionId) -> Option<AuctionSnapshot>;

    async fn put_snapshot(&self, snapshot: AuctionSnapshot, ttl: Duration);

    async fn delete_snapshot(&self, id: AuctionId);

    /// Increment the viewer counter, refreshing its TTL. Returns the new count.
    async fn incr_viewers(&self, id: AuctionId) -> i64;

    /// Decrement the viewer counter, clamped at zero. Returns the new count.
    async fn decr_viewers(&self, id: AuctionId) -> i64;

    async fn viewer_count(&self, id: AuctionId) -> i64;

    /// Set-if-absent lease. Returns true when this caller won the lease;
    /// the auto-bid engine uses it to keep one instance per trigger.
    async fn acquire_lease(&self, key: &str, ttl: Duration) -> bool;
}

pub use memory::MemoryCache;
