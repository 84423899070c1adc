//! Cross-instance event fabric, publisher/subscriber side.
//!
//! Publishing is fire-and-forget from the caller's point of view: a failed
//! publish is logged, never unwound (the store has already committed).
//! Delivery is at-least-once within an instance and best-effort across
//! instances; consumers treat events as reconciliation hints.

pub mod local;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::AuctionEvent;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus is closed")]
    Closed,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish onto the global channel.
    async fn publish(&self, event: AuctionEvent) -> Result<(), BusError>;

    /// Open a subscription to the global channel.
    fn subscribe(&self) -> EventStream;
}

/// A subscription to the global event channel.
///
/// Backed by a broadcast receiver; a networked bus bridges its consumer loop
/// into one of these, so subscribers are implementation-agnostic.
pub struct EventStream {
    rx: broadcast::Receiver<AuctionEvent>,
}

impl EventStream {
    pub fn new(rx: broadcast::Receiver<AuctionEvent>) -> Self {
        EventStream { rx }
    }

    /// Next event, or None once the bus shuts down. A lagged subscriber
    /// loses the missed events and keeps going.
    pub async fn next(&mut self) -> Option<AuctionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event subscriber lagged, dropping missed events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

pub use local::LocalBus;
