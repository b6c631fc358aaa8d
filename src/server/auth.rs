//! Bearer-token authentication extractors.
//!
//! Opaque bearer tokens are resolved against the `auth_tokens` table;
//! only the SHA-256 of a token is stored. [`CurrentUser`] rejects
//! unauthenticated requests with 401; [`MaybeUser`] is used by the
//! streaming path where publicly visible resources need no credentials.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use vodvault_common::UserId;
use vodvault_db::pool::get_conn;
use vodvault_db::queries::auth_tokens;

use crate::api::ApiError;
use crate::server::AppContext;

/// The authenticated caller. Extraction fails with 401 when the token is
/// missing, unknown, or expired.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

/// The caller when credentials are optional.
#[derive(Debug, Clone, Copy)]
pub struct MaybeUser(pub Option<UserId>);

async fn resolve_bearer(parts: &mut Parts, ctx: &AppContext) -> Result<Option<UserId>, ApiError> {
    let bearer = TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, ctx)
        .await
        .ok();
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        return Ok(None);
    };
    let conn = get_conn(&ctx.db)?;
    Ok(auth_tokens::lookup_token(&conn, bearer.token())?)
}

#[async_trait]
impl FromRequestParts<AppContext> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        match resolve_bearer(parts, ctx).await? {
            Some(usr_id) => Ok(CurrentUser(usr_id)),
            None => Err(ApiError::unauthorized()),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(resolve_bearer(parts, ctx).await?))
    }
}
