//! Domain types for the auction runtime.
//!
//! This module provides:
//! - Entity ids and the lossless `Money` type
//! - The `Auction` aggregate with bid validation and winner selection
//! - `Bid`, `AutoBid`, and the cached `AuctionSnapshot` projection
//! - Wire events shared by the fabric and duplex clients

pub mod auction;
pub mod auto_bid;
pub mod bid;
pub mod event;
pub mod primitives;
pub mod snapshot;

pub use auction::{Auction, AuctionStatus, BidRejection, DEFAULT_EXTEND_SECS};
pub use auto_bid::AutoBid;
pub use bid::Bid;
pub use event::{AuctionEvent, BidPlacedData, EventKind};
pub use primitives::{AuctionId, AutoBidId, BidId, Money, ProductId, UserId};
pub use snapshot::{AuctionSnapshot, SNAPSHOT_FRESHNESS_SECS};
