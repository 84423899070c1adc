//! HTTP surface: router, shared state, middleware, and the response
//! envelope. Success bodies are `{"data": ...}`; errors come from
//! `AppError`'s `IntoResponse`.

pub mod auctions;
pub mod bids;
pub mod health;
pub mod lifecycle;
pub mod ws;

use axum::extract::{ConnectInfo, FromRef, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::TokenManager;
use crate::bus::EventBus;
use crate::cache::StateCache;
use crate::db::AuctionStore;
use crate::engine::{AutoBidEngine, BidArbiter, LifecycleController};
use crate::error::AppError;
use crate::fabric::{ChatSink, FabricDeps, Hub};
use crate::rate_limit::RateLimiter;

/// General ingress limit, requests per minute per IP.
const GENERAL_LIMIT_PER_MIN: u32 = 100;

/// Bid attempts per minute per (user, auction).
const BID_LIMIT_PER_MIN: u32 = 10;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AuctionStore>,
    pub cache: Arc<dyn StateCache>,
    pub bus: Arc<dyn EventBus>,
    pub arbiter: Arc<BidArbiter>,
    pub auto_bids: Arc<AutoBidEngine>,
    pub lifecycle: Arc<LifecycleController>,
    pub fabric: FabricDeps,
    pub tokens: TokenManager,
    pub general_limiter: Arc<RateLimiter>,
    pub bid_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Wire the full component graph from its substrates.
    pub fn new(
        store: Arc<AuctionStore>,
        cache: Arc<dyn StateCache>,
        bus: Arc<dyn EventBus>,
        chat: Arc<dyn ChatSink>,
        tokens: TokenManager,
        chat_enabled: bool,
    ) -> Self {
        let arbiter = Arc::new(BidArbiter::new(store.clone(), cache.clone(), bus.clone()));
        let auto_bids = Arc::new(AutoBidEngine::new(
            store.clone(),
            cache.clone(),
            arbiter.clone(),
        ));
        let lifecycle = Arc::new(LifecycleController::new(
            store.clone(),
            cache.clone(),
            bus.clone(),
        ));
        let fabric = FabricDeps {
            hub: Arc::new(Hub::new()),
            cache: cache.clone(),
            bus: bus.clone(),
            chat,
            chat_enabled,
        };

        AppState {
            store,
            cache,
            bus,
            arbiter,
            auto_bids,
            lifecycle,
            fabric,
            tokens,
            general_limiter: Arc::new(RateLimiter::per_minute(GENERAL_LIMIT_PER_MIN)),
            bid_limiter: Arc::new(RateLimiter::per_minute(BID_LIMIT_PER_MIN)),
        }
    }
}

impl FromRef<AppState> for TokenManager {
    fn from_ref(state: &AppState) -> TokenManager {
        state.tokens.clone()
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/api/v1/auctions", post(auctions::create_auction))
        .route("/api/v1/auctions/live", get(auctions::list_live_auctions))
        .route("/api/v1/auctions/{id}", get(auctions::get_auction))
        .route("/api/v1/auctions/{id}/bids", get(bids::list_bids))
        .route("/api/v1/auctions/{id}/bid", post(bids::place_bid))
        .route("/api/v1/auctions/{id}/auto-bid", post(bids::set_auto_bid))
        .route("/api/v1/auctions/{id}/start", post(lifecycle::start_auction))
        .route("/api/v1/auctions/{id}/end", post(lifecycle::end_auction))
        .route(
            "/api/v1/auctions/{id}/cancel",
            post(lifecycle::cancel_auction),
        )
        .route("/ws/auctions/{id}", get(ws::ws_auction))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            general_rate_limit,
        ))
        .layer(cors)
        .with_state(state)
}

/// 100 requests/minute/IP across the whole surface. Limiter errors cannot
/// happen in-process, so there is no fail-open branch to get wrong.
async fn general_rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "local".to_string());

    match state.general_limiter.check(&format!("ip:{}", ip)) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => AppError::RateLimited {
            message: "too many requests".to_string(),
            retry_after,
        }
        .into_response(),
    }
}

/// Success envelope.
pub(crate) fn data<T: Serialize>(value: T) -> Json<serde_json::Value> {
    Json(json!({ "data": value }))
}

/// Paginated success envelope.
pub(crate) fn paginated<T: Serialize>(
    items: Vec<T>,
    total: i64,
    page: i64,
    page_size: i64,
) -> Json<serde_json::Value> {
    Json(json!({
        "data": items,
        "total": total,
        "page": page,
        "page_size": page_size,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl PageQuery {
    /// (page, page_size, offset) with bounds applied.
    pub fn resolve(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let page_size = self.page_size.unwrap_or(20).clamp(1, 100);
        (page, page_size, (page - 1) * page_size)
    }
}

pub(crate) fn parse_auction_id(raw: &str) -> Result<crate::domain::AuctionId, AppError> {
    raw.parse()
        .map_err(|_| AppError::Validation("invalid auction id".to_string()))
}
