//! Bid-side handlers: place a bid, list bid history, set an auto-bid rule.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::auctions::BidResponse;
use super::{data, paginated, parse_auction_id, AppState, PageQuery};
use crate::auth::AuthUser;
use crate::domain::{AutoBid, Money};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct PlaceBidRequest {
    pub amount: Money,
}

#[derive(Debug, Deserialize)]
pub struct SetAutoBidRequest {
    pub max_amount: Money,
    pub increment: Money,
}

#[derive(Debug, Serialize)]
pub struct AutoBidResponse {
    pub id: String,
    pub auction_id: String,
    pub user_id: String,
    pub max_amount: Money,
    pub increment: Money,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fired_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_amount: Option<Money>,
}

pub async fn place_bid(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<PlaceBidRequest>,
) -> Result<impl IntoResponse, AppError> {
    let auction_id = parse_auction_id(&id)?;

    let key = format!("bid:{}:{}", user.user_id, auction_id);
    if let Err(retry_after) = state.bid_limiter.check(&key) {
        return Err(AppError::RateLimited {
            message: "too many bids, please slow down".to_string(),
            retry_after,
        });
    }

    let bid = state
        .arbiter
        .place_bid(auction_id, user.user_id, req.amount, false)
        .await?;

    Ok((StatusCode::CREATED, data(BidResponse::from_bid(&bid))))
}

pub async fn list_bids(
    Path(id): Path<String>,
    Query(page): Query<PageQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let auction_id = parse_auction_id(&id)?;
    state
        .store
        .get_auction(auction_id)
        .await?
        .ok_or_else(|| AppError::NotFound("auction not found".to_string()))?;

    let (page_num, page_size, offset) = page.resolve();
    let (bids, total) = state
        .store
        .get_bids_by_auction(auction_id, page_size, offset)
        .await?;

    let items: Vec<BidResponse> = bids.iter().map(BidResponse::from_bid).collect();
    Ok(paginated(items, total, page_num, page_size))
}

pub async fn set_auto_bid(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<SetAutoBidRequest>,
) -> Result<impl IntoResponse, AppError> {
    let auction_id = parse_auction_id(&id)?;

    if !req.max_amount.is_positive() {
        return Err(AppError::Validation(
            "max amount must be positive".to_string(),
        ));
    }
    if !req.increment.is_positive() {
        return Err(AppError::Validation(
            "increment must be positive".to_string(),
        ));
    }

    let auction = state
        .store
        .get_auction(auction_id)
        .await?
        .ok_or_else(|| AppError::NotFound("auction not found".to_string()))?;
    if auction.seller_id == user.user_id {
        return Err(AppError::Validation(
            "cannot auto-bid on your own auction".to_string(),
        ));
    }

    let rule = AutoBid::new(
        auction_id,
        user.user_id,
        req.max_amount,
        req.increment,
        Utc::now(),
    );
    let stored = state.store.upsert_auto_bid(&rule).await?;

    let body = AutoBidResponse {
        id: stored.id.to_string(),
        auction_id: stored.auction_id.to_string(),
        user_id: stored.bidder_id.to_string(),
        max_amount: stored.max_amount,
        increment: stored.increment,
        active: stored.active,
        last_fired_at: stored.last_fired_at,
        last_amount: stored.last_amount,
    };
    Ok((StatusCode::CREATED, data(body)))
}
