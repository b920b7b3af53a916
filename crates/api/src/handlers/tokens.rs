use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};

use crate::AppState;
use crate::dto::{
    IssueTokenBody, ListResponse, MessageResponse, SetTokenActiveBody, TokenDto, VerifyTokenBody,
};
use crate::error::ApiError;
use crate::extract::{AdminGuard, ApiJson, PageParams};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/token-verify", post(verify_token))
        .route("/tokens", get(list_tokens).post(issue_token))
        .route("/tokens/{key}", patch(set_token_active))
}

async fn verify_token(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<VerifyTokenBody>,
) -> Result<Json<MessageResponse>, ApiError> {
    let key = body.key.as_deref().map(str::trim).unwrap_or_default();
    if key.is_empty() {
        return Err(ApiError::bad_request("A token key must be provided."));
    }
    state.services.tokens().validate(key).await?;
    Ok(Json(MessageResponse::new("The token is valid.")))
}

async fn list_tokens(
    _admin: AdminGuard,
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
) -> Result<Json<ListResponse<TokenDto>>, ApiError> {
    let listed = state.services.tokens().list(page.request()).await?;
    Ok(Json(ListResponse::from_page(listed, TokenDto::from)))
}

async fn issue_token(
    _admin: AdminGuard,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<IssueTokenBody>,
) -> Result<(StatusCode, Json<TokenDto>), ApiError> {
    let token = state.services.tokens().issue(body.description).await?;
    Ok((StatusCode::CREATED, Json(token.into())))
}

async fn set_token_active(
    _admin: AdminGuard,
    State(state): State<AppState>,
    Path(key): Path<String>,
    ApiJson(body): ApiJson<SetTokenActiveBody>,
) -> Result<Json<TokenDto>, ApiError> {
    let token = state
        .services
        .tokens()
        .set_active(&key, body.is_active)
        .await?;
    Ok(Json(token.into()))
}
