//! Auction CRUD-side handlers: create, read, list live.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{data, paginated, parse_auction_id, AppState, PageQuery};
use crate::auth::AuthUser;
use crate::cache::{StateCache, SNAPSHOT_TTL};
use crate::db::is_unique_violation;
use crate::domain::{
    Auction, AuctionSnapshot, Bid, Money, ProductId,
};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct CreateAuctionRequest {
    pub product_id: ProductId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_price: Money,
    pub reserve_price: Option<Money>,
    pub buy_now_price: Option<Money>,
    #[serde(default)]
    pub is_featured: bool,
}

#[derive(Debug, Serialize)]
pub struct BidResponse {
    pub id: String,
    pub auction_id: String,
    pub user_id: String,
    pub amount: Money,
    pub is_auto: bool,
    pub is_winning: bool,
    pub placed_at: DateTime<Utc>,
}

impl BidResponse {
    pub fn from_bid(bid: &Bid) -> Self {
        BidResponse {
            id: bid.id.to_string(),
            auction_id: bid.auction_id.to_string(),
            user_id: bid.bidder_id.to_string(),
            amount: bid.amount,
            is_auto: bid.is_auto,
            is_winning: bid.is_winning,
            placed_at: bid.placed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuctionResponse {
    pub id: String,
    pub product_id: String,
    pub seller_id: String,
    pub title: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: String,
    pub start_price: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserve_price: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buy_now_price: Option<Money>,
    pub bid_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_bid: Option<BidResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<String>,
    pub room_id: String,
    pub is_featured: bool,
    pub auto_extend: bool,
    pub extend_window_secs: i64,
    pub extend_amount_secs: i64,
    pub viewer_count: i64,
    pub created_at: DateTime<Utc>,
}

impl AuctionResponse {
    pub fn from_auction(auction: &Auction, current: Option<&Bid>, viewer_count: i64) -> Self {
        AuctionResponse {
            id: auction.id.to_string(),
            product_id: auction.product_id.to_string(),
            seller_id: auction.seller_id.to_string(),
            title: auction.title.clone(),
            description: auction.description.clone(),
            start_time: auction.start_time,
            end_time: auction.end_time,
            status: auction.status.to_string(),
            start_price: auction.start_price,
            reserve_price: auction.reserve_price,
            buy_now_price: auction.buy_now_price,
            bid_count: auction.bid_count,
            current_bid: current.map(BidResponse::from_bid),
            winner_id: auction.winner_id.map(|id| id.to_string()),
            room_id: auction.room_id.clone(),
            is_featured: auction.is_featured,
            auto_extend: auction.auto_extend,
            extend_window_secs: auction.extend_window_secs,
            extend_amount_secs: auction.extend_amount_secs,
            viewer_count,
            created_at: auction.created_at,
        }
    }
}

pub async fn create_auction(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateAuctionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !user.role.can_sell() {
        return Err(AppError::Forbidden(
            "only sellers can create auctions".to_string(),
        ));
    }

    let now = Utc::now();
    if req.title.trim().is_empty() {
        return Err(AppError::Validation("title is required".to_string()));
    }
    if req.start_time < now {
        return Err(AppError::Validation(
            "start time cannot be in the past".to_string(),
        ));
    }
    if req.end_time <= req.start_time {
        return Err(AppError::Validation(
            "end time must be after start time".to_string(),
        ));
    }
    if req.start_price < Money::zero() {
        return Err(AppError::Validation(
            "start price cannot be negative".to_string(),
        ));
    }
    for (name, price) in [
        ("reserve price", req.reserve_price),
        ("buy now price", req.buy_now_price),
    ] {
        if let Some(price) = price {
            if !price.is_positive() {
                return Err(AppError::Validation(format!("{} must be positive", name)));
            }
        }
    }

    let auction = Auction::new(
        req.product_id,
        user.user_id,
        req.title.trim().to_string(),
        req.description,
        req.start_time,
        req.end_time,
        req.start_price,
        req.reserve_price,
        req.buy_now_price,
        req.is_featured,
        now,
    );

    state.store.create_auction(&auction).await.map_err(|err| {
        if is_unique_violation(&err) {
            AppError::Conflict("auction room already exists".to_string())
        } else {
            err.into()
        }
    })?;

    let snapshot = AuctionSnapshot::from_auction(&auction, None, now);
    state.cache.put_snapshot(snapshot, SNAPSHOT_TTL).await;

    let body = AuctionResponse::from_auction(&auction, None, 0);
    Ok((StatusCode::CREATED, data(body)))
}

pub async fn get_auction(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let auction_id = parse_auction_id(&id)?;

    let mut auction = state
        .store
        .get_auction(auction_id)
        .await?
        .ok_or_else(|| AppError::NotFound("auction not found".to_string()))?;

    // Serve the hot fields from a fresh snapshot; refresh it otherwise.
    let now = Utc::now();
    let snapshot = state.cache.get_snapshot(auction_id).await;
    let fresh = matches!(&snapshot, Some(snap) if snap.is_fresh(now));
    if let Some(snap) = snapshot.filter(|_| fresh) {
        auction.status = snap.status;
        auction.end_time = snap.end_time;
        auction.bid_count = snap.bid_count;
        auction.current_bid_id = snap.current_bid_id;
    }

    let current = match auction.current_bid_id {
        Some(bid_id) => state.store.get_bid(bid_id).await?,
        None => None,
    };

    if !fresh {
        let snapshot = AuctionSnapshot::from_auction(&auction, current.as_ref(), now);
        state.cache.put_snapshot(snapshot, SNAPSHOT_TTL).await;
    }

    let viewer_count = state.cache.viewer_count(auction_id).await;
    Ok(data(AuctionResponse::from_auction(
        &auction,
        current.as_ref(),
        viewer_count,
    )))
}

pub async fn list_live_auctions(
    Query(page): Query<PageQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let (page_num, page_size, offset) = page.resolve();
    let (auctions, total) = state.store.get_live_auctions(page_size, offset).await?;

    let mut items = Vec::with_capacity(auctions.len());
    for auction in &auctions {
        let current = match auction.current_bid_id {
            Some(bid_id) => state.store.get_bid(bid_id).await?,
            None => None,
        };
        let viewer_count = state.cache.viewer_count(auction.id).await;
        items.push(AuctionResponse::from_auction(
            auction,
            current.as_ref(),
            viewer_count,
        ));
    }

    Ok(paginated(items, total, page_num, page_size))
}
