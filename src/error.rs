//! Central error surface: a closed taxonomy with stable codes and HTTP
//! statuses. Domain rejections from the arbiter map in verbatim; store and
//! infrastructure faults collapse to the generic kinds.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::BidRejection;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{message}")]
    RateLimited { message: String, retry_after: u64 },
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    BidTooLow(String),
    #[error("{0}")]
    AuctionNotLive(String),
    #[error("{0}")]
    AuctionEnded(String),
}

impl AppError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::BidTooLow(_) => "BID_TOO_LOW",
            AppError::AuctionNotLive(_) => "AUCTION_NOT_LIVE",
            AppError::AuctionEnded(_) => "AUCTION_ENDED",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::BidTooLow(_)
            | AppError::AuctionNotLive(_)
            | AppError::AuctionEnded(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("record not found".to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<BidRejection> for AppError {
    fn from(rejection: BidRejection) -> Self {
        let message = rejection.to_string();
        match rejection {
            BidRejection::AuctionNotLive => AppError::AuctionNotLive(message),
            BidRejection::AuctionEnded => AppError::AuctionEnded(message),
            BidRejection::BidTooLow(_) => AppError::BidTooLow(message),
            // Self-outbid and own-auction surface as plain validation errors.
            BidRejection::BidOnOwnAuction
            | BidRejection::SelfOutbid
            | BidRejection::InvalidAmount => AppError::Validation(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Internal details stay in the logs, not the response body.
        if let AppError::Internal(ref msg) = self {
            tracing::error!(error = %msg, "internal error");
        }

        let status = self.status_code();
        let code = self.code();
        let body = match &self {
            AppError::RateLimited {
                message,
                retry_after,
            } => json!({
                "error": code,
                "message": message,
                "retry_after": retry_after,
            }),
            AppError::Internal(_) => json!({
                "error": code,
                "message": "internal server error",
            }),
            other => json!({
                "error": code,
                "message": other.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}
