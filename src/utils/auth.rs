use crate::api::error::AppError;
use anyhow::Result;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub user_uuid: Uuid,
    pub role_uuid: Uuid,
}

pub fn create_jwt(user_uuid: Uuid, role_uuid: Uuid, secret: &str) -> Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(24))
        .ok_or_else(|| anyhow::anyhow!("Token expiry out of range"))?
        .timestamp();

    let claims = Claims {
        sub: user_uuid.to_string(),
        exp: expiration as usize,
        user_uuid,
        role_uuid,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;

    Ok(token)
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// Caller identity taken from the claims the auth middleware attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserData {
    pub user_uuid: Uuid,
    pub role_uuid: Uuid,
}

impl From<&Claims> for UserData {
    fn from(claims: &Claims) -> Self {
        Self {
            user_uuid: claims.user_uuid,
            role_uuid: claims.role_uuid,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for UserData
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .map(UserData::from)
            .ok_or_else(|| AppError::Unauthorized("Missing caller identity".to_string()))
    }
}
