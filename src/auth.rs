use axum::{RequestPartsExt, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    error::{AppError, Result},
    models::{AuthorSnapshot, Badge},
};

/// Bearer token claims. The identity provider issues them; the display name,
/// photo and role are what gets snapshotted onto posts and comments.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub name: String,
    #[serde(default)]
    pub picture: String,
    #[serde(default)]
    pub role: Badge,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(author: &AuthorSnapshot, jwt_secret: &str) -> Result<(String, Self)> {
        let now = Utc::now();
        let exp = now + Duration::hours(24);

        let claims = Self {
            sub: author.id.clone(),
            name: author.name.clone(),
            picture: author.photo.clone(),
            role: author.badge,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(jwt_secret.as_ref()),
        )?;

        Ok((token, claims))
    }

    pub fn verify(token: &str, jwt_secret: &str) -> Result<Self> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(jwt_secret.as_ref()),
            &Validation::default(),
        )?;

        Ok(token_data.claims)
    }
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub name: String,
    pub photo: String,
    pub badge: Badge,
}

impl AuthUser {
    /// Author identity as of now, copied onto new content.
    pub fn author(&self) -> AuthorSnapshot {
        AuthorSnapshot {
            id: self.user_id.clone(),
            name: self.name.clone(),
            photo: self.photo.clone(),
            badge: self.badge,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.badge == Badge::Admin
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AppError::Authentication("Missing authorization header".to_string()))?;

        let claims = Claims::verify(bearer.token(), &state.config.jwt_secret)?;
        if claims.sub.is_empty() || claims.sub.contains('/') {
            return Err(AppError::Authentication("Invalid user ID in token".to_string()));
        }

        Ok(AuthUser {
            user_id: claims.sub,
            name: claims.name,
            photo: claims.picture,
            badge: claims.role,
        })
    }
}

// Optional auth user (for endpoints that work with or without auth)
#[derive(Debug)]
pub struct OptionalAuthUser(pub Option<AuthUser>);

impl FromRequestParts<AppState> for OptionalAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match AuthUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(OptionalAuthUser(Some(user))),
            Err(_) => Ok(OptionalAuthUser(None)),
        }
    }
}
