use std::convert::Infallible;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use qbank_core::model::{AccessToken, SessionKey};
use services::TokenServiceError;
use storage::repository::PageRequest;

use crate::AppState;
use crate::error::ApiError;

pub const SESSION_HEADER: &str = "x-session-id";
pub const SESSION_COOKIE: &str = "sessionid";
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";
const ACCESS_KEY_SCHEME: &str = "AccessKey";

/// The caller's quiz session key, from the `X-Session-Id` header or the
/// `sessionid` cookie. Unparseable keys count as no session.
pub struct SessionId(pub Option<SessionKey>);

impl<S: Send + Sync> FromRequestParts<S> for SessionId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let raw = from_header.or_else(|| {
            CookieJar::from_headers(&parts.headers)
                .get(SESSION_COOKIE)
                .map(|c| c.value().to_string())
        });
        Ok(SessionId(raw.and_then(|r| r.parse().ok())))
    }
}

/// Optional `Authorization: AccessKey <key>` authentication.
///
/// An absent header (or another scheme) is anonymous access; a present but
/// invalid or inactive key rejects the request with 401.
pub struct AccessKeyAuth(pub Option<AccessToken>);

impl FromRequestParts<AppState> for AccessKeyAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().split_once(' '))
            .filter(|(scheme, _)| *scheme == ACCESS_KEY_SCHEME)
            .map(|(_, key)| key)
        else {
            return Ok(AccessKeyAuth(None));
        };

        match state.services.tokens().validate(raw.trim()).await {
            Ok(token) => Ok(AccessKeyAuth(Some(token))),
            Err(TokenServiceError::Invalid) => {
                Err(ApiError::Unauthorized("Invalid or inactive token.".into()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Admin-only access via the `X-Admin-Key` header.
///
/// Without a configured admin key every request passes.
pub struct AdminGuard;

impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_key.as_deref() else {
            return Ok(AdminGuard);
        };
        let supplied = parts
            .headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if supplied == Some(expected) {
            Ok(AdminGuard)
        } else {
            tracing::warn!(path = %parts.uri.path(), "admin request without a valid key");
            Err(ApiError::Forbidden)
        }
    }
}

/// `?page=&page_size=` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PageParams {
    #[must_use]
    pub fn request(&self) -> PageRequest {
        PageRequest::new(self.page, self.page_size)
    }
}

/// `Json` whose rejection is reported as a `400 {error}` body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}
