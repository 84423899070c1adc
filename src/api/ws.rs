//! Duplex stream endpoint: upgrade, validate the auction, hand the socket
//! to the fabric. Anonymous viewers are allowed; a presented token must be
//! valid (and enables chat).

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;

use super::{parse_auction_id, AppState};
use crate::auth::MaybeAuthUser;
use crate::error::AppError;
use crate::fabric;

pub async fn ws_auction(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<AppState>,
    MaybeAuthUser(user): MaybeAuthUser,
) -> Result<Response, AppError> {
    let auction_id = parse_auction_id(&id)?;

    state
        .store
        .get_auction(auction_id)
        .await?
        .ok_or_else(|| AppError::NotFound("auction not found".to_string()))?;

    let deps = state.fabric.clone();
    let user_id = user.map(|u| u.user_id);
    Ok(ws.on_upgrade(move |socket| fabric::serve_connection(socket, deps, auction_id, user_id)))
}
