//! Real-time distribution fabric, local side: the room hub and the duplex
//! connection drivers. The cross-instance half lives in `bus`.

pub mod client;
pub mod hub;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::bus::EventBus;
use crate::cache::StateCache;
use crate::domain::{AuctionId, UserId};

pub use client::serve_connection;
pub use hub::{ClientId, Hub, Room, CLIENT_MAILBOX};

/// The external chat collaborator. The core republishes chat as events;
/// durable storage belongs to the chat service behind this seam.
#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn persist(&self, auction_id: AuctionId, user_id: UserId, message: &str);
}

/// Stand-in sink for deployments without the chat service: the message is
/// recorded in the log and still republished to the room.
pub struct LogChatSink;

#[async_trait]
impl ChatSink for LogChatSink {
    async fn persist(&self, auction_id: AuctionId, user_id: UserId, message: &str) {
        info!(auction_id = %auction_id, user_id = %user_id, message, "chat message");
    }
}

/// Everything a duplex connection needs, bundled for the upgrade handler.
#[derive(Clone)]
pub struct FabricDeps {
    pub hub: Arc<Hub>,
    pub cache: Arc<dyn StateCache>,
    pub bus: Arc<dyn EventBus>,
    pub chat: Arc<dyn ChatSink>,
    pub chat_enabled: bool,
}
