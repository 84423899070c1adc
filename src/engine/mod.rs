//! The auction engine: bid arbitration, the auto-bid cascade, and the
//! lifecycle controller with its sweeper. Everything here mutates auction
//! state through the store's locked transactions and announces results on
//! the event fabric.

pub mod arbiter;
pub mod auto_bid;
pub mod lifecycle;

pub use arbiter::BidArbiter;
pub use auto_bid::{AutoBidEngine, CASCADE_BOUND};
pub use lifecycle::{spawn_sweeper, LifecycleController};
