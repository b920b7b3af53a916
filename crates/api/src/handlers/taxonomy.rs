//! Group, subject, category and subcategory endpoints.
//!
//! `POST` takes either one object or a list; a list is answered with a list.
//! Batches are created all-or-nothing.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Serialize;

use qbank_core::model::{CategoryId, GroupId, SubCategoryId, SubjectId};
use services::{CategoryDraft, GroupDraft, SubCategoryDraft, SubjectDraft};

use crate::AppState;
use crate::dto::{CategoryDto, GroupDto, ListResponse, OneOrMany, SubCategoryDto, SubjectDto};
use crate::error::ApiError;
use crate::extract::{AdminGuard, ApiJson, PageParams};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/groups", get(list_groups).post(create_groups))
        .route("/groups/{id}", delete(delete_group))
        .route("/groups/{id}/subjects", get(group_subjects))
        .route("/subjects", get(list_subjects).post(create_subjects))
        .route("/subjects/{id}", delete(delete_subject))
        .route("/subjects/{id}/categories", get(subject_categories))
        .route("/categories", get(list_categories).post(create_categories))
        .route("/categories/{id}", delete(delete_category))
        .route("/categories/{id}/subcategories", get(category_subcategories))
        .route(
            "/subcategories",
            get(list_subcategories).post(create_subcategories),
        )
        .route("/subcategories/{id}", delete(delete_subcategory))
}

/// 201 with a single node for a single-object request, a list otherwise.
fn created<T, D>(many: bool, nodes: Vec<T>) -> Response
where
    D: From<T> + Serialize,
{
    let mut dtos: Vec<D> = nodes.into_iter().map(D::from).collect();
    if many || dtos.len() != 1 {
        (StatusCode::CREATED, Json(dtos)).into_response()
    } else {
        let single = dtos.remove(0);
        (StatusCode::CREATED, Json(single)).into_response()
    }
}

// ─── Groups ────────────────────────────────────────────────────────────────────

async fn list_groups(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
) -> Result<Json<ListResponse<GroupDto>>, ApiError> {
    let listed = state.services.taxonomy().list_groups(page.request()).await?;
    Ok(Json(ListResponse::from_page(listed, GroupDto::from)))
}

async fn create_groups(
    _admin: AdminGuard,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<OneOrMany<GroupDraft>>,
) -> Result<Response, ApiError> {
    let many = body.is_many();
    let groups = state.services.taxonomy().create_groups(body.into_vec()).await?;
    Ok(created::<_, GroupDto>(many, groups))
}

async fn delete_group(
    _admin: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<GroupId>,
) -> Result<StatusCode, ApiError> {
    state.services.taxonomy().delete_group(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Subjects ──────────────────────────────────────────────────────────────────

async fn list_subjects(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
) -> Result<Json<ListResponse<SubjectDto>>, ApiError> {
    let listed = state
        .services
        .taxonomy()
        .list_subjects(None, page.request())
        .await?;
    Ok(Json(ListResponse::from_page(listed, SubjectDto::from)))
}

async fn group_subjects(
    State(state): State<AppState>,
    Path(id): Path<GroupId>,
    Query(page): Query<PageParams>,
) -> Result<Json<ListResponse<SubjectDto>>, ApiError> {
    let listed = state
        .services
        .taxonomy()
        .list_subjects(Some(id), page.request())
        .await?;
    Ok(Json(ListResponse::from_page(listed, SubjectDto::from)))
}

async fn create_subjects(
    _admin: AdminGuard,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<OneOrMany<SubjectDraft>>,
) -> Result<Response, ApiError> {
    let many = body.is_many();
    let subjects = state
        .services
        .taxonomy()
        .create_subjects(body.into_vec())
        .await?;
    Ok(created::<_, SubjectDto>(many, subjects))
}

async fn delete_subject(
    _admin: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<SubjectId>,
) -> Result<StatusCode, ApiError> {
    state.services.taxonomy().delete_subject(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Categories ────────────────────────────────────────────────────────────────

async fn list_categories(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
) -> Result<Json<ListResponse<CategoryDto>>, ApiError> {
    let listed = state
        .services
        .taxonomy()
        .list_categories(None, page.request())
        .await?;
    Ok(Json(ListResponse::from_page(listed, CategoryDto::from)))
}

async fn subject_categories(
    State(state): State<AppState>,
    Path(id): Path<SubjectId>,
    Query(page): Query<PageParams>,
) -> Result<Json<ListResponse<CategoryDto>>, ApiError> {
    let listed = state
        .services
        .taxonomy()
        .list_categories(Some(id), page.request())
        .await?;
    Ok(Json(ListResponse::from_page(listed, CategoryDto::from)))
}

async fn create_categories(
    _admin: AdminGuard,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<OneOrMany<CategoryDraft>>,
) -> Result<Response, ApiError> {
    let many = body.is_many();
    let categories = state
        .services
        .taxonomy()
        .create_categories(body.into_vec())
        .await?;
    Ok(created::<_, CategoryDto>(many, categories))
}

async fn delete_category(
    _admin: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<CategoryId>,
) -> Result<StatusCode, ApiError> {
    state.services.taxonomy().delete_category(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Subcategories ─────────────────────────────────────────────────────────────

async fn list_subcategories(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
) -> Result<Json<ListResponse<SubCategoryDto>>, ApiError> {
    let listed = state
        .services
        .taxonomy()
        .list_subcategories(None, page.request())
        .await?;
    Ok(Json(ListResponse::from_page(listed, SubCategoryDto::from)))
}

async fn category_subcategories(
    State(state): State<AppState>,
    Path(id): Path<CategoryId>,
    Query(page): Query<PageParams>,
) -> Result<Json<ListResponse<SubCategoryDto>>, ApiError> {
    let listed = state
        .services
        .taxonomy()
        .list_subcategories(Some(id), page.request())
        .await?;
    Ok(Json(ListResponse::from_page(listed, SubCategoryDto::from)))
}

async fn create_subcategories(
    _admin: AdminGuard,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<OneOrMany<SubCategoryDraft>>,
) -> Result<Response, ApiError> {
    let many = body.is_many();
    let subcategories = state
        .services
        .taxonomy()
        .create_subcategories(body.into_vec())
        .await?;
    Ok(created::<_, SubCategoryDto>(many, subcategories))
}

async fn delete_subcategory(
    _admin: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<SubCategoryId>,
) -> Result<StatusCode, ApiError> {
    state.services.taxonomy().delete_subcategory(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
