//! Bearer-token authentication extractors.
//!
//! The external auth collaborator issues tokens; the core only resolves
//! `Authorization: Bearer <token>` to an active user row.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::{
    domain::user::User,
    error::ValidationError,
    server::{ApiError, AppState},
    store,
};

/// The authenticated caller.
pub struct AuthUser(pub User);

/// The authenticated caller, additionally required to be an admin.
pub struct AdminUser(pub User);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ValidationError::InvalidToken)?;
        let user = store::users::by_token(state.store.pool(), token)
            .await?
            .ok_or(ValidationError::InvalidToken)?;
        Ok(AuthUser(user))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.admin {
            return Err(ValidationError::AdminRequired.into());
        }
        Ok(AdminUser(user))
    }
}
