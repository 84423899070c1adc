//! Lifecycle handlers: start, end, cancel. Owner or admin only.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde_json::json;

use super::{data, parse_auction_id, AppState};
use crate::auth::AuthUser;
use crate::domain::AuctionId;
use crate::error::AppError;

async fn authorize(
    state: &AppState,
    user: &AuthUser,
    auction_id: AuctionId,
) -> Result<(), AppError> {
    let auction = state
        .store
        .get_auction(auction_id)
        .await?
        .ok_or_else(|| AppError::NotFound("auction not found".to_string()))?;

    if !user.can_manage(auction.seller_id) {
        return Err(AppError::Forbidden(
            "only the auction owner or an admin can do this".to_string(),
        ));
    }
    Ok(())
}

pub async fn start_auction(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let auction_id = parse_auction_id(&id)?;
    authorize(&state, &user, auction_id).await?;

    state.lifecycle.start(auction_id).await?;
    Ok(data(json!({ "ok": true })))
}

pub async fn end_auction(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let auction_id = parse_auction_id(&id)?;
    authorize(&state, &user, auction_id).await?;

    let winner_id = state.lifecycle.end(auction_id).await?;
    Ok(data(json!({
        "ok": true,
        "winner_id": winner_id.map(|w| w.to_string()),
    })))
}

pub async fn cancel_auction(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let auction_id = parse_auction_id(&id)?;
    authorize(&state, &user, auction_id).await?;

    state.lifecycle.cancel(auction_id).await?;
    Ok(data(json!({ "ok": true })))
}
