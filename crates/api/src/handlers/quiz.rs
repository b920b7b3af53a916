use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::AppState;
use crate::dto::{
    MessageResponse, QuestionDto, SessionStatusResponse, StartSessionBody, StartSessionResponse,
};
use crate::error::ApiError;
use crate::extract::{AccessKeyAuth, ApiJson, SESSION_COOKIE, SessionId};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/questions/session",
            get(next_question).post(start_session).delete(reset_session),
        )
        .route("/questions/session/status", get(session_status))
}

async fn start_session(
    _auth: AccessKeyAuth,
    SessionId(existing): SessionId,
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(body): ApiJson<StartSessionBody>,
) -> Result<(CookieJar, Json<StartSessionResponse>), ApiError> {
    let started = state.services.quiz().start(existing, body.into()).await?;
    let session_id = started.session_key.to_string();

    let cookie = Cookie::build((SESSION_COOKIE, session_id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    let response = StartSessionResponse {
        session_id,
        question: started.question.map(QuestionDto::from),
    };
    Ok((jar.add(cookie), Json(response)))
}

async fn next_question(
    _auth: AccessKeyAuth,
    SessionId(key): SessionId,
    State(state): State<AppState>,
) -> Result<Json<QuestionDto>, ApiError> {
    let question = state.services.quiz().next(key.as_ref()).await?;
    Ok(Json(question.into()))
}

async fn reset_session(
    _auth: AccessKeyAuth,
    SessionId(key): SessionId,
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.services.quiz().reset(key.as_ref()).await?;
    Ok(Json(MessageResponse::new("Question session has been reset.")))
}

async fn session_status(
    _auth: AccessKeyAuth,
    SessionId(key): SessionId,
    State(state): State<AppState>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let status = state.services.quiz().status(key.as_ref()).await?;
    Ok(Json(SessionStatusResponse {
        phase: status.phase,
        seen: status.seen,
        pending: status.pending,
    }))
}
