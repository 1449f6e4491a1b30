//! Bearer-token authentication extractors.
//!
//! Tokens are HS256 JWTs issued by the account service with the user id in
//! the `id` claim. The extractor verifies the signature and expiry, then
//! loads the user so handlers always see the current admin flag.

use axum::{extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};
use jsonwebtoken::{Algorithm, Validation, decode};
use serde::Deserialize;
use tracing::debug;
use zandmarket_core::UserId;

use crate::error::{AppError, set_sentry_user};
use crate::models::User;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct Claims {
    id: i32,
}

/// Extractor that requires a valid bearer token.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(CurrentUser(user): CurrentUser) -> String {
///     format!("Hello, {}!", user.name)
/// }
/// ```
pub struct CurrentUser(pub User);

/// Extractor that requires a valid bearer token for an admin account.
pub struct RequireAdmin(pub User);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Verify `token` and return the user id it names.
fn verify(token: &str, state: &AppState) -> Result<UserId, AppError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(token, state.jwt_key(), &validation).map_err(|e| {
        debug!(error = %e, "Bearer token rejected");
        AppError::Unauthorized("Not authorized, token failed".into())
    })?;
    Ok(UserId::new(data.claims.id))
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Unauthorized("Not authorized, no token".into()))?;
        let user_id = verify(token, state)?;

        let user = state
            .store()
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Not authorized, user not found".into()))?;

        set_sentry_user(&user.id, Some(user.email.as_str()));
        Ok(Self(user))
    }
}

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(AppError::Forbidden("Admin access required".into()));
        }
        Ok(Self(user))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::Request;

    use super::*;

    #[test]
    fn bearer_prefix_is_required() {
        let (parts, ()) = Request::builder()
            .header(AUTHORIZATION, "Bearer abc.def.ghi")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), Some("abc.def.ghi"));

        let (parts, ()) = Request::builder()
            .header(AUTHORIZATION, "Basic abc")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), None);

        let (parts, ()) = Request::builder().body(()).unwrap().into_parts();
        assert_eq!(bearer_token(&parts), None);
    }
}
