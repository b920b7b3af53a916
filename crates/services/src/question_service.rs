use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use qbank_core::model::{
    CategoryId, GroupId, Level, Metadata, Placement, Question, QuestionError, QuestionId,
    QuestionKind, SubCategoryId, SubjectId,
};
use storage::repository::{
    NewQuestionRecord, Page, PageRequest, QuestionQuery, QuestionRepository, StorageError,
    TaxonomyRepository,
};

use crate::Clock;
use crate::error::QuestionServiceError;

/// Client input for a single question. Taxonomy nodes are referenced by id.
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionDraft {
    pub group_id: GroupId,
    pub subject_id: SubjectId,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub subcategory_id: Option<SubCategoryId>,
    pub level: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuestionPatch {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// A question with the names of the nodes it hangs under.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionDetail {
    pub question: Question,
    pub group: String,
    pub subject: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

fn parse_level(raw: &str) -> Result<Level, QuestionServiceError> {
    raw.parse::<Level>()
        .map_err(|e: QuestionError| qbank_core::Error::from(e).into())
}

fn parse_kind(raw: &str) -> Result<QuestionKind, QuestionServiceError> {
    raw.parse::<QuestionKind>()
        .map_err(|e: QuestionError| qbank_core::Error::from(e).into())
}

/// Single-question CRUD and the admin listing.
#[derive(Clone)]
pub struct QuestionService {
    clock: Clock,
    taxonomy: Arc<dyn TaxonomyRepository>,
    questions: Arc<dyn QuestionRepository>,
}

impl QuestionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        taxonomy: Arc<dyn TaxonomyRepository>,
        questions: Arc<dyn QuestionRepository>,
    ) -> Self {
        Self {
            clock,
            taxonomy,
            questions,
        }
    }

    /// Validate the placement and persist a new question.
    ///
    /// # Errors
    ///
    /// Returns `QuestionServiceError::Invalid` when a referenced node does not exist,
    /// `QuestionServiceError::Domain` for a bad level, type or placement, and
    /// `QuestionServiceError::Storage` if persistence fails.
    pub async fn create(&self, draft: QuestionDraft) -> Result<Question, QuestionServiceError> {
        let level = parse_level(&draft.level)?;
        let kind = parse_kind(&draft.kind)?;

        let group = self
            .taxonomy
            .get_group(draft.group_id)
            .await?
            .ok_or_else(|| missing("group", draft.group_id.value()))?;
        let subject = self
            .taxonomy
            .get_subject(draft.subject_id)
            .await?
            .ok_or_else(|| missing("subject", draft.subject_id.value()))?;
        let category = match draft.category_id {
            Some(id) => Some(
                self.taxonomy
                    .get_category(id)
                    .await?
                    .ok_or_else(|| missing("category", id.value()))?,
            ),
            None => None,
        };
        let subcategory = match draft.subcategory_id {
            Some(id) => Some(
                self.taxonomy
                    .get_subcategory(id)
                    .await?
                    .ok_or_else(|| missing("subcategory", id.value()))?,
            ),
            None => None,
        };

        let placement =
            Placement::resolve(&group, &subject, category.as_ref(), subcategory.as_ref())
                .map_err(qbank_core::Error::from)?;
        let now = self.clock.now();
        let record = NewQuestionRecord {
            placement,
            level,
            kind,
            metadata: draft.metadata,
            created_at: now,
        };
        let ids = self
            .questions
            .insert_questions(std::slice::from_ref(&record))
            .await?;
        let id = ids
            .first()
            .copied()
            .ok_or_else(|| StorageError::Serialization("insert returned no id".into()))?;
        info!(question_id = id.value(), "question created");
        Ok(Question::new(
            id,
            record.placement,
            record.level,
            record.kind,
            record.metadata,
            now,
        ))
    }

    /// Fetch a question with its taxonomy names.
    ///
    /// # Errors
    ///
    /// Returns `QuestionServiceError::NotFound` if the question does not exist.
    pub async fn get(&self, id: QuestionId) -> Result<QuestionDetail, QuestionServiceError> {
        let question = self
            .questions
            .get_question(id)
            .await?
            .ok_or(QuestionServiceError::NotFound)?;
        self.hydrate(question).await
    }

    /// Apply a partial update to level, type and metadata.
    ///
    /// # Errors
    ///
    /// Returns `QuestionServiceError::NotFound` if the question does not exist, or
    /// `QuestionServiceError::Domain` for an unknown level or type.
    pub async fn update(
        &self,
        id: QuestionId,
        patch: QuestionPatch,
    ) -> Result<Question, QuestionServiceError> {
        let level = patch.level.as_deref().map(parse_level).transpose()?;
        let kind = patch.kind.as_deref().map(parse_kind).transpose()?;
        let mut question = self
            .questions
            .get_question(id)
            .await?
            .ok_or(QuestionServiceError::NotFound)?;

        question.revise(level, kind, patch.metadata, self.clock.now());
        match self.questions.update_question(&question).await {
            Ok(()) => Ok(question),
            Err(StorageError::NotFound) => Err(QuestionServiceError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// # Errors
    ///
    /// Returns `QuestionServiceError::NotFound` if the question does not exist.
    pub async fn delete(&self, id: QuestionId) -> Result<(), QuestionServiceError> {
        if !self.questions.delete_question(id).await? {
            return Err(QuestionServiceError::NotFound);
        }
        info!(question_id = id.value(), "question deleted");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `QuestionServiceError::Storage` if repository access fails.
    pub async fn list(
        &self,
        query: &QuestionQuery,
        page: PageRequest,
    ) -> Result<Page<Question>, QuestionServiceError> {
        Ok(self.questions.list_questions(query, page).await?)
    }

    async fn hydrate(&self, question: Question) -> Result<QuestionDetail, QuestionServiceError> {
        let placement = *question.placement();
        let group = self
            .taxonomy
            .get_group(placement.group_id())
            .await?
            .ok_or(StorageError::NotFound)?;
        let subject = self
            .taxonomy
            .get_subject(placement.subject_id())
            .await?
            .ok_or(StorageError::NotFound)?;
        let category = match placement.category_id() {
            Some(id) => self
                .taxonomy
                .get_category(id)
                .await?
                .map(|c| c.name().to_string()),
            None => None,
        };
        let subcategory = match placement.subcategory_id() {
            Some(id) => self
                .taxonomy
                .get_subcategory(id)
                .await?
                .map(|s| s.name().to_string()),
            None => None,
        };
        Ok(QuestionDetail {
            question,
            group: group.name().to_string(),
            subject: subject.name().to_string(),
            category,
            subcategory,
        })
    }
}

fn missing(node: &str, id: u64) -> QuestionServiceError {
    QuestionServiceError::Invalid(format!("{node} {id} does not exist"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy_service::{GroupDraft, SubjectDraft, TaxonomyService};
    use qbank_core::time::fixed_clock;
    use storage::repository::Storage;

    async fn fixture() -> (QuestionService, GroupId, SubjectId) {
        let storage = Storage::in_memory();
        let taxonomy = TaxonomyService::new(fixed_clock(), Arc::clone(&storage.taxonomy));
        let group = taxonomy
            .create_groups(vec![GroupDraft {
                name: "Science".into(),
                description: None,
            }])
            .await
            .unwrap()
            .remove(0);
        let subject = taxonomy
            .create_subjects(vec![SubjectDraft {
                group: "Science".into(),
                name: "Physics".into(),
                description: None,
            }])
            .await
            .unwrap()
            .remove(0);
        let svc = QuestionService::new(fixed_clock(), storage.taxonomy, storage.questions);
        (svc, group.id(), subject.id())
    }

    fn draft(group_id: GroupId, subject_id: SubjectId, level: &str) -> QuestionDraft {
        QuestionDraft {
            group_id,
            subject_id,
            category_id: None,
            subcategory_id: None,
            level: level.into(),
            kind: "mcq".into(),
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn create_then_get_hydrates_names() {
        let (svc, gid, sid) = fixture().await;
        let question = svc.create(draft(gid, sid, "easy")).await.unwrap();
        let detail = svc.get(question.id()).await.unwrap();
        assert_eq!(detail.group, "Science");
        assert_eq!(detail.subject, "Physics");
        assert_eq!(detail.category, None);
    }

    #[tokio::test]
    async fn unknown_level_is_a_domain_error() {
        let (svc, gid, sid) = fixture().await;
        let err = svc.create(draft(gid, sid, "expert")).await.unwrap_err();
        assert!(matches!(
            err,
            QuestionServiceError::Domain(qbank_core::Error::Question(
                QuestionError::UnknownLevel(_)
            ))
        ));
    }

    #[tokio::test]
    async fn missing_subject_is_invalid() {
        let (svc, gid, _) = fixture().await;
        let err = svc
            .create(draft(gid, SubjectId::new(999), "easy"))
            .await
            .unwrap_err();
        assert!(matches!(err, QuestionServiceError::Invalid(_)));
    }

    #[tokio::test]
    async fn update_changes_only_given_fields() {
        let (svc, gid, sid) = fixture().await;
        let question = svc.create(draft(gid, sid, "easy")).await.unwrap();
        let updated = svc
            .update(
                question.id(),
                QuestionPatch {
                    level: Some("advance".into()),
                    ..QuestionPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.level(), Level::Advance);
        assert_eq!(updated.kind(), QuestionKind::Mcq);

        svc.delete(question.id()).await.unwrap();
        let err = svc.get(question.id()).await.unwrap_err();
        assert!(matches!(err, QuestionServiceError::NotFound));
    }
}
