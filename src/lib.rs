pub mod api;
pub mod auth;
pub mod bus;
pub mod cache;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fabric;
pub mod rate_limit;

pub use auth::{AuthUser, Role, TokenManager};
pub use bus::{EventBus, LocalBus};
pub use cache::{MemoryCache, StateCache};
pub use config::Config;
pub use db::{init_db, AuctionStore};
pub use domain::{
    Auction, AuctionEvent, AuctionId, AuctionSnapshot, AuctionStatus, AutoBid, Bid, BidId, Money,
    UserId,
};
pub use error::AppError;
