//! JSON shapes of requests and responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use qbank_core::model::{
    AccessToken, Category, CategoryId, FilterRequest, Group, GroupId, Level, Metadata, Question,
    QuestionId, QuestionKind, QuizPhase, SubCategory, SubCategoryId, Subject, SubjectId,
};
use services::QuestionDetail;
use storage::repository::Page;

// ─── Envelopes ─────────────────────────────────────────────────────────────────

/// Paginated listing envelope.
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub count: u64,
    pub page: u32,
    pub page_size: u32,
    pub results: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn from_page<U>(page: Page<U>, f: impl FnMut(U) -> T) -> Self {
        Self {
            count: page.total,
            page: page.request.page(),
            page_size: page.request.page_size(),
            results: page.items.into_iter().map(f).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A single object or a list of them; batch endpoints accept both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn is_many(&self) -> bool {
        matches!(self, Self::Many(_))
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![item],
        }
    }
}

// ─── Taxonomy ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct GroupDto {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Group> for GroupDto {
    fn from(group: Group) -> Self {
        Self {
            id: group.id(),
            name: group.name().as_str().to_string(),
            description: group.description().map(str::to_string),
            created_at: group.created_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubjectDto {
    pub id: SubjectId,
    pub group: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Subject> for SubjectDto {
    fn from(subject: Subject) -> Self {
        Self {
            id: subject.id(),
            group: subject.group_id(),
            name: subject.name().as_str().to_string(),
            description: subject.description().map(str::to_string),
            created_at: subject.created_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CategoryDto {
    pub id: CategoryId,
    pub group: GroupId,
    pub subject: SubjectId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Category> for CategoryDto {
    fn from(category: Category) -> Self {
        Self {
            id: category.id(),
            group: category.group_id(),
            subject: category.subject_id(),
            name: category.name().as_str().to_string(),
            description: category.description().map(str::to_string),
            created_at: category.created_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubCategoryDto {
    pub id: SubCategoryId,
    pub group: GroupId,
    pub subject: SubjectId,
    pub category: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<SubCategory> for SubCategoryDto {
    fn from(sub: SubCategory) -> Self {
        Self {
            id: sub.id(),
            group: sub.group_id(),
            subject: sub.subject_id(),
            category: sub.category_id(),
            name: sub.name().as_str().to_string(),
            description: sub.description().map(str::to_string),
            created_at: sub.created_at(),
        }
    }
}

// ─── Questions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct QuestionDto {
    pub id: QuestionId,
    pub group: GroupId,
    pub subject: SubjectId,
    pub category: Option<CategoryId>,
    pub subcategory: Option<SubCategoryId>,
    pub level: Level,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Question> for QuestionDto {
    fn from(question: Question) -> Self {
        let placement = *question.placement();
        Self {
            id: question.id(),
            group: placement.group_id(),
            subject: placement.subject_id(),
            category: placement.category_id(),
            subcategory: placement.subcategory_id(),
            level: question.level(),
            kind: question.kind(),
            metadata: question.metadata().clone(),
            created_at: question.created_at(),
            updated_at: question.updated_at(),
        }
    }
}

/// A question with its taxonomy names inlined.
#[derive(Debug, Serialize)]
pub struct QuestionDetailDto {
    #[serde(flatten)]
    pub question: QuestionDto,
    pub group_name: String,
    pub subject_name: String,
    pub category_name: Option<String>,
    pub subcategory_name: Option<String>,
}

impl From<QuestionDetail> for QuestionDetailDto {
    fn from(detail: QuestionDetail) -> Self {
        Self {
            question: detail.question.into(),
            group_name: detail.group,
            subject_name: detail.subject,
            category_name: detail.category,
            subcategory_name: detail.subcategory,
        }
    }
}

/// `GET /questions` filters.
#[derive(Debug, Default, Deserialize)]
pub struct QuestionListParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub group: Option<GroupId>,
    pub subject: Option<SubjectId>,
    pub category: Option<CategoryId>,
    pub subcategory: Option<SubCategoryId>,
    pub level: Option<Level>,
    #[serde(rename = "type")]
    pub kind: Option<QuestionKind>,
}

// ─── Quiz ──────────────────────────────────────────────────────────────────────

/// Body of `POST /questions/session`.
#[derive(Debug, Default, Deserialize)]
pub struct StartSessionBody {
    pub group_id: Option<GroupId>,
    pub subject_id: Option<SubjectId>,
    #[serde(default)]
    pub category_ids: Vec<CategoryId>,
    #[serde(default)]
    pub subcategory_ids: Vec<SubCategoryId>,
    #[serde(default)]
    pub levels: Vec<Level>,
}

impl From<StartSessionBody> for FilterRequest {
    fn from(body: StartSessionBody) -> Self {
        Self {
            group_id: body.group_id,
            subject_id: body.subject_id,
            category_ids: body.category_ids,
            subcategory_ids: body.subcategory_ids,
            levels: body.levels,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub question: Option<QuestionDto>,
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub phase: QuizPhase,
    pub seen: usize,
    pub pending: usize,
}

// ─── Tokens ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TokenDto {
    pub key: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<AccessToken> for TokenDto {
    fn from(token: AccessToken) -> Self {
        Self {
            key: token.key().as_str().to_string(),
            description: token.description().map(str::to_string),
            is_active: token.is_active(),
            created_at: token.created_at(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct IssueTokenBody {
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetTokenActiveBody {
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyTokenBody {
    #[serde(default)]
    pub key: Option<String>,
}
