//! Durable auction store over SQLite.
//!
//! `migrations` opens the pool with write-lock queueing and foreign keys
//! enforced and applies the embedded schema; `store` is the repository the
//! engine and API talk to.

pub mod migrations;
pub mod store;

pub use migrations::init_db;
pub use store::{is_busy_error, is_unique_violation, AuctionStore, WriteTx};
