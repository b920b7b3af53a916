use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qbank_core::model::{
    AccessToken, Category, CategoryId, Group, GroupId, Level, Metadata, NodeName, Placement,
    Question, QuestionId, QuestionKind, QuizFilter, QuizSessionState, SessionKey, SubCategory,
    SubCategoryId, Subject, SubjectId, TokenKey,
};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::memory::InMemoryRepository;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

// ─── Paging ────────────────────────────────────────────────────────────────────

/// Default number of rows per listing page.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Upper bound clients may request per page.
pub const MAX_PAGE_SIZE: u32 = 100;

/// 1-based page selector, clamped to sane bounds on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    #[must_use]
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    #[must_use]
    pub fn page(&self) -> u32 {
        self.page
    }

    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    #[must_use]
    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of a listing plus the total row count.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub request: PageRequest,
}

impl<T> Page<T> {
    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            request: self.request,
        }
    }
}

// ─── Records ───────────────────────────────────────────────────────────────────

/// Insert shape for a group; the id is assigned by the backend.
#[derive(Debug, Clone)]
pub struct NewGroupRecord {
    pub name: NodeName,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSubjectRecord {
    pub group_id: GroupId,
    pub name: NodeName,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for a category. `group_id` must be the subject's group.
#[derive(Debug, Clone)]
pub struct NewCategoryRecord {
    pub group_id: GroupId,
    pub subject_id: SubjectId,
    pub name: NodeName,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewCategoryRecord {
    #[must_use]
    pub fn under(
        subject: &Subject,
        name: NodeName,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            group_id: subject.group_id(),
            subject_id: subject.id(),
            name,
            description,
            created_at,
        }
    }
}

/// Insert shape for a subcategory. Ancestor ids must match the category's.
#[derive(Debug, Clone)]
pub struct NewSubCategoryRecord {
    pub group_id: GroupId,
    pub subject_id: SubjectId,
    pub category_id: CategoryId,
    pub name: NodeName,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewSubCategoryRecord {
    #[must_use]
    pub fn under(
        category: &Category,
        name: NodeName,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            group_id: category.group_id(),
            subject_id: category.subject_id(),
            category_id: category.id(),
            name,
            description,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewQuestionRecord {
    pub placement: Placement,
    pub level: Level,
    pub kind: QuestionKind,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Optional equality filters for the admin question listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuestionQuery {
    pub group_id: Option<GroupId>,
    pub subject_id: Option<SubjectId>,
    pub category_id: Option<CategoryId>,
    pub subcategory_id: Option<SubCategoryId>,
    pub level: Option<Level>,
    pub kind: Option<QuestionKind>,
}

impl QuestionQuery {
    #[must_use]
    pub fn matches(&self, question: &Question) -> bool {
        let placement = question.placement();
        self.group_id.is_none_or(|id| placement.group_id() == id)
            && self.subject_id.is_none_or(|id| placement.subject_id() == id)
            && self
                .category_id
                .is_none_or(|id| placement.category_id() == Some(id))
            && self
                .subcategory_id
                .is_none_or(|id| placement.subcategory_id() == Some(id))
            && self.level.is_none_or(|level| question.level() == level)
            && self.kind.is_none_or(|kind| question.kind() == kind)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaxonomyCounts {
    pub groups: u64,
    pub subjects: u64,
    pub categories: u64,
    pub subcategories: u64,
}

/// A session document as held by a [`SessionStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub state: QuizSessionState,
    /// Incremented on every write; the token for compare-and-swap.
    pub version: u64,
    pub expires_at: DateTime<Utc>,
}

impl StoredSession {
    /// A session expires at its deadline, not after it.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ─── Contracts ─────────────────────────────────────────────────────────────────

/// Repository contract for the four-level taxonomy.
///
/// Batch inserts are all-or-nothing. Name uniqueness is enforced per parent and
/// reported as `StorageError::Conflict`; a missing parent as `StorageError::NotFound`.
/// Deleting a node removes its descendants and their questions.
#[async_trait]
pub trait TaxonomyRepository: Send + Sync {
    /// Insert groups atomically, returning ids in input order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` on a duplicate name, or other storage errors.
    async fn insert_groups(&self, groups: &[NewGroupRecord]) -> Result<Vec<GroupId>, StorageError>;

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>, StorageError>;

    async fn list_groups(&self, page: PageRequest) -> Result<Page<Group>, StorageError>;

    /// Fetch the groups whose names appear in `names`. Unknown names are skipped.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the lookup fails.
    async fn groups_by_name(&self, names: &[String]) -> Result<Vec<Group>, StorageError>;

    /// Delete a group and everything under it. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the delete fails.
    async fn delete_group(&self, id: GroupId) -> Result<bool, StorageError>;

    /// Insert subjects atomically, returning ids in input order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if a group is missing,
    /// `StorageError::Conflict` on a duplicate name within a group.
    async fn insert_subjects(
        &self,
        subjects: &[NewSubjectRecord],
    ) -> Result<Vec<SubjectId>, StorageError>;

    async fn get_subject(&self, id: SubjectId) -> Result<Option<Subject>, StorageError>;

    async fn list_subjects(
        &self,
        group: Option<GroupId>,
        page: PageRequest,
    ) -> Result<Page<Subject>, StorageError>;

    /// Fetch subjects by `(group, name)` natural key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the lookup fails.
    async fn subjects_by_name(
        &self,
        keys: &[(GroupId, String)],
    ) -> Result<Vec<Subject>, StorageError>;

    async fn delete_subject(&self, id: SubjectId) -> Result<bool, StorageError>;

    /// Insert categories atomically, returning ids in input order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if a parent is missing,
    /// `StorageError::Conflict` on a duplicate name within a subject.
    async fn insert_categories(
        &self,
        categories: &[NewCategoryRecord],
    ) -> Result<Vec<CategoryId>, StorageError>;

    async fn get_category(&self, id: CategoryId) -> Result<Option<Category>, StorageError>;

    async fn list_categories(
        &self,
        subject: Option<SubjectId>,
        page: PageRequest,
    ) -> Result<Page<Category>, StorageError>;

    /// Fetch categories by `(subject, name)` natural key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the lookup fails.
    async fn categories_by_name(
        &self,
        keys: &[(SubjectId, String)],
    ) -> Result<Vec<Category>, StorageError>;

    async fn delete_category(&self, id: CategoryId) -> Result<bool, StorageError>;

    /// Insert subcategories atomically, returning ids in input order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if a parent is missing,
    /// `StorageError::Conflict` on a duplicate name within a category.
    async fn insert_subcategories(
        &self,
        subcategories: &[NewSubCategoryRecord],
    ) -> Result<Vec<SubCategoryId>, StorageError>;

    async fn get_subcategory(&self, id: SubCategoryId)
    -> Result<Option<SubCategory>, StorageError>;

    async fn list_subcategories(
        &self,
        category: Option<CategoryId>,
        page: PageRequest,
    ) -> Result<Page<SubCategory>, StorageError>;

    /// Fetch subcategories by `(category, name)` natural key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the lookup fails.
    async fn subcategories_by_name(
        &self,
        keys: &[(CategoryId, String)],
    ) -> Result<Vec<SubCategory>, StorageError>;

    async fn delete_subcategory(&self, id: SubCategoryId) -> Result<bool, StorageError>;

    async fn taxonomy_counts(&self) -> Result<TaxonomyCounts, StorageError>;
}

/// Repository contract for questions.
#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// Insert questions in a single transaction, returning ids in input order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if a referenced node vanished; nothing is
    /// inserted on any error.
    async fn insert_questions(
        &self,
        questions: &[NewQuestionRecord],
    ) -> Result<Vec<QuestionId>, StorageError>;

    async fn get_question(&self, id: QuestionId) -> Result<Option<Question>, StorageError>;

    /// Persist the mutable fields (level, type, metadata, `updated_at`).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the question does not exist.
    async fn update_question(&self, question: &Question) -> Result<(), StorageError>;

    async fn delete_question(&self, id: QuestionId) -> Result<bool, StorageError>;

    async fn list_questions(
        &self,
        query: &QuestionQuery,
        page: PageRequest,
    ) -> Result<Page<Question>, StorageError>;

    /// Ids of every question satisfying the quiz filter and not in `excluded`,
    /// in ascending order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn unseen_question_ids(
        &self,
        filter: &QuizFilter,
        excluded: &HashSet<QuestionId>,
    ) -> Result<Vec<QuestionId>, StorageError>;

    async fn count_questions(&self) -> Result<u64, StorageError>;
}

/// Repository contract for access tokens.
#[async_trait]
pub trait AccessTokenRepository: Send + Sync {
    /// Persist a new token.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the key is already taken.
    async fn insert_token(&self, token: &AccessToken) -> Result<(), StorageError>;

    async fn get_token(&self, key: &TokenKey) -> Result<Option<AccessToken>, StorageError>;

    async fn list_tokens(&self, page: PageRequest) -> Result<Page<AccessToken>, StorageError>;

    /// Flip a token's active flag.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the key does not exist.
    async fn set_token_active(&self, key: &TokenKey, active: bool) -> Result<(), StorageError>;

    async fn count_tokens(&self) -> Result<u64, StorageError>;
}

/// Keyed store for quiz session documents with optimistic concurrency.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session that has not expired as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the lookup or decoding fails.
    async fn load(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredSession>, StorageError>;

    /// Create or overwrite a session unconditionally. Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    async fn put(
        &self,
        key: &SessionKey,
        state: &QuizSessionState,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, StorageError>;

    /// Replace a session only if its version still equals `expected_version`.
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the session changed or vanished since it
    /// was loaded.
    async fn compare_and_swap(
        &self,
        key: &SessionKey,
        expected_version: u64,
        state: &QuizSessionState,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, StorageError>;

    /// Remove a session. Removing an unknown key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the delete fails.
    async fn delete(&self, key: &SessionKey) -> Result<(), StorageError>;

    /// Drop every session whose expiry is at or before `now`. Returns how many.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the delete fails.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StorageError>;
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub taxonomy: Arc<dyn TaxonomyRepository>,
    pub questions: Arc<dyn QuestionRepository>,
    pub tokens: Arc<dyn AccessTokenRepository>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    /// Wrap one backend implementing every contract.
    #[must_use]
    pub fn from_repository<R>(repo: R) -> Self
    where
        R: TaxonomyRepository
            + QuestionRepository
            + AccessTokenRepository
            + SessionStore
            + Clone
            + 'static,
    {
        let taxonomy: Arc<dyn TaxonomyRepository> = Arc::new(repo.clone());
        let questions: Arc<dyn QuestionRepository> = Arc::new(repo.clone());
        let tokens: Arc<dyn AccessTokenRepository> = Arc::new(repo.clone());
        let sessions: Arc<dyn SessionStore> = Arc::new(repo);
        Self {
            taxonomy,
            questions,
            tokens,
            sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_clamps_inputs() {
        let page = PageRequest::new(Some(0), Some(1_000));
        assert_eq!(page.page(), 1);
        assert_eq!(page.page_size(), MAX_PAGE_SIZE);
        assert_eq!(page.offset(), 0);

        let page = PageRequest::new(Some(3), None);
        assert_eq!(page.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(page.offset(), 40);
    }

    #[test]
    fn sessions_expire_at_their_deadline() {
        let deadline = qbank_core::time::fixed_now();
        let session = StoredSession {
            state: QuizSessionState::default(),
            version: 1,
            expires_at: deadline,
        };
        assert!(!session.is_expired_at(deadline - chrono::Duration::seconds(1)));
        assert!(session.is_expired_at(deadline));
        assert!(session.is_expired_at(deadline + chrono::Duration::seconds(1)));
    }

    #[test]
    fn page_map_preserves_totals() {
        let page = Page {
            items: vec![1, 2],
            total: 7,
            request: PageRequest::default(),
        };
        let mapped = page.map(|n| n * 10);
        assert_eq!(mapped.items, vec![10, 20]);
        assert_eq!(mapped.total, 7);
    }
}
