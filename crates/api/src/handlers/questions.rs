use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use qbank_core::model::QuestionId;
use services::{QuestionDraft, QuestionPatch};
use storage::repository::{PageRequest, QuestionQuery};

use crate::AppState;
use crate::dto::{ListResponse, QuestionDetailDto, QuestionDto, QuestionListParams};
use crate::error::ApiError;
use crate::extract::{AdminGuard, ApiJson};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/questions", get(list_questions).post(create_question))
        .route("/questions/upload", post(upload_questions))
        .route(
            "/questions/{id}",
            get(get_question).put(update_question).delete(delete_question),
        )
}

async fn list_questions(
    State(state): State<AppState>,
    Query(params): Query<QuestionListParams>,
) -> Result<Json<ListResponse<QuestionDto>>, ApiError> {
    let query = QuestionQuery {
        group_id: params.group,
        subject_id: params.subject,
        category_id: params.category,
        subcategory_id: params.subcategory,
        level: params.level,
        kind: params.kind,
    };
    let page = PageRequest::new(params.page, params.page_size);
    let listed = state.services.questions().list(&query, page).await?;
    Ok(Json(ListResponse::from_page(listed, QuestionDto::from)))
}

async fn create_question(
    _admin: AdminGuard,
    State(state): State<AppState>,
    ApiJson(draft): ApiJson<QuestionDraft>,
) -> Result<(StatusCode, Json<QuestionDto>), ApiError> {
    let question = state.services.questions().create(draft).await?;
    Ok((StatusCode::CREATED, Json(question.into())))
}

async fn get_question(
    State(state): State<AppState>,
    Path(id): Path<QuestionId>,
) -> Result<Json<QuestionDetailDto>, ApiError> {
    let detail = state.services.questions().get(id).await?;
    Ok(Json(detail.into()))
}

async fn update_question(
    _admin: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<QuestionId>,
    ApiJson(patch): ApiJson<QuestionPatch>,
) -> Result<Json<QuestionDto>, ApiError> {
    let question = state.services.questions().update(id, patch).await?;
    Ok(Json(question.into()))
}

async fn delete_question(
    _admin: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<QuestionId>,
) -> Result<StatusCode, ApiError> {
    state.services.questions().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Bulk upload; the whole list is created or nothing is.
async fn upload_questions(
    _admin: AdminGuard,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Value::Array(items) = body else {
        return Err(ApiError::bad_request("Expected a list of items."));
    };
    let created = state.services.import().import_json(items).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": format!("Successfully uploaded {created} questions."),
            "created": created,
        })),
    ))
}
