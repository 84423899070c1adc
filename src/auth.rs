//! Token validation and request identity.
//!
//! Token issuance lives in the external auth service; the core consumes the
//! validate contract only. `TokenManager::issue` exists for the service's
//! own tests and tooling.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::UserId;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Buyer,
    Seller,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
            Role::Admin => "admin",
        }
    }

    pub fn can_sell(&self) -> bool {
        matches!(self, Role::Seller | Role::Admin)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(Role::Buyer),
            "seller" => Ok(Role::Seller),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

/// Validated request identity.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: Role,
}

impl AuthUser {
    /// Owner-or-admin check for lifecycle operations.
    pub fn can_manage(&self, seller_id: UserId) -> bool {
        self.role == Role::Admin || self.user_id == seller_id
    }
}

#[derive(Clone)]
pub struct TokenManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenManager {
    pub fn new(secret: &str) -> Self {
        TokenManager {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Validate a bearer token and extract the identity.
    ///
    /// # Errors
    /// Returns `Unauthorized` for expired, malformed, or mis-signed tokens.
    pub fn validate(&self, token: &str) -> Result<AuthUser, AppError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|err| AppError::Unauthorized(format!("invalid token: {}", err)))?;

        let user_id = data
            .claims
            .sub
            .parse::<UserId>()
            .map_err(|_| AppError::Unauthorized("invalid token subject".to_string()))?;
        let role = data
            .claims
            .role
            .parse::<Role>()
            .map_err(|_| AppError::Unauthorized("invalid token role".to_string()))?;

        Ok(AuthUser { user_id, role })
    }

    /// Sign a token for the given identity.
    pub fn issue(
        &self,
        user_id: UserId,
        role: Role,
        ttl: chrono::Duration,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            role: role.as_str().to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| AppError::Internal(format!("failed to sign token: {}", err)))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Browsers cannot set headers on WebSocket upgrades, so the duplex
/// endpoint also accepts `?token=`.
fn query_token(parts: &Parts) -> Option<&str> {
    parts
        .uri
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
}

impl<S> FromRequestParts<S> for AuthUser
where
    TokenManager: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?
            .to_string();
        TokenManager::from_ref(state).validate(&token)
    }
}

/// Optional identity: anonymous viewers pass through as None.
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    TokenManager: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .or_else(|| query_token(parts))
            .map(str::to_string);
        match token {
            // A presented token must still be valid; only absence is anonymous.
            Some(token) => TokenManager::from_ref(state)
                .validate(&token)
                .map(|user| MaybeAuthUser(Some(user))),
            None => Ok(MaybeAuthUser(None)),
        }
    }
}
