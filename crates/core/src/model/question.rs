use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{CategoryId, GroupId, QuestionId, SubCategoryId, SubjectId};
use crate::model::taxonomy::{Category, Group, SubCategory, Subject};

/// Free-form question payload (prompt, options, answers, explanation, ...).
///
/// The bank never interprets it; it is stored and returned as-is.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("'{0}' is not a valid level")]
    UnknownLevel(String),

    #[error("'{0}' is not a valid question type")]
    UnknownKind(String),

    #[error("subject {subject} does not belong to group {group}")]
    SubjectOutsideGroup { subject: SubjectId, group: GroupId },

    #[error("category {category} does not belong to subject {subject}")]
    CategoryOutsideSubject {
        category: CategoryId,
        subject: SubjectId,
    },

    #[error("subcategory {subcategory} does not belong to category {category}")]
    SubCategoryOutsideCategory {
        subcategory: SubCategoryId,
        category: CategoryId,
    },

    #[error("a subcategory requires a category")]
    SubCategoryWithoutCategory,
}

//
// ─── CHOICES ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Easy,
    Medium,
    Advance,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Easy, Level::Medium, Level::Advance];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Advance => "advance",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = QuestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| QuestionError::UnknownLevel(value.to_string()))
    }
}

/// Question format, used by clients to pick a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Mcq,
    FillBlank,
    Writing,
    Math,
    TrueFalse,
}

impl QuestionKind {
    pub const ALL: [QuestionKind; 5] = [
        QuestionKind::Mcq,
        QuestionKind::FillBlank,
        QuestionKind::Writing,
        QuestionKind::Math,
        QuestionKind::TrueFalse,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mcq => "mcq",
            Self::FillBlank => "fill_blank",
            Self::Writing => "writing",
            Self::Math => "math",
            Self::TrueFalse => "true_false",
        }
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionKind {
    type Err = QuestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| QuestionError::UnknownKind(value.to_string()))
    }
}

//
// ─── PLACEMENT ─────────────────────────────────────────────────────────────────
//

/// Where a question hangs in the taxonomy.
///
/// Only [`Placement::resolve`] builds a placement from live nodes, so every
/// placement it produces is consistent: the subject sits in the group, the
/// category (if any) in the subject, and the subcategory (if any) in the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Placement {
    group_id: GroupId,
    subject_id: SubjectId,
    category_id: Option<CategoryId>,
    subcategory_id: Option<SubCategoryId>,
}

impl Placement {
    /// Check the ancestry of the given nodes and capture their ids.
    ///
    /// # Errors
    ///
    /// Returns the first `QuestionError` describing a broken parent link.
    pub fn resolve(
        group: &Group,
        subject: &Subject,
        category: Option<&Category>,
        subcategory: Option<&SubCategory>,
    ) -> Result<Self, QuestionError> {
        if subject.group_id() != group.id() {
            return Err(QuestionError::SubjectOutsideGroup {
                subject: subject.id(),
                group: group.id(),
            });
        }
        if let Some(category) = category {
            if category.subject_id() != subject.id() {
                return Err(QuestionError::CategoryOutsideSubject {
                    category: category.id(),
                    subject: subject.id(),
                });
            }
        }
        if let Some(subcategory) = subcategory {
            let category = category.ok_or(QuestionError::SubCategoryWithoutCategory)?;
            if subcategory.category_id() != category.id() {
                return Err(QuestionError::SubCategoryOutsideCategory {
                    subcategory: subcategory.id(),
                    category: category.id(),
                });
            }
        }

        Ok(Self {
            group_id: group.id(),
            subject_id: subject.id(),
            category_id: category.map(Category::id),
            subcategory_id: subcategory.map(SubCategory::id),
        })
    }

    /// Rebuild a placement from stored ids that were validated on write.
    #[must_use]
    pub fn from_persisted(
        group_id: GroupId,
        subject_id: SubjectId,
        category_id: Option<CategoryId>,
        subcategory_id: Option<SubCategoryId>,
    ) -> Self {
        Self {
            group_id,
            subject_id,
            category_id,
            subcategory_id,
        }
    }

    #[must_use]
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    #[must_use]
    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    #[must_use]
    pub fn category_id(&self) -> Option<CategoryId> {
        self.category_id
    }

    #[must_use]
    pub fn subcategory_id(&self) -> Option<SubCategoryId> {
        self.subcategory_id
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    id: QuestionId,
    placement: Placement,
    level: Level,
    kind: QuestionKind,
    metadata: Metadata,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Question {
    #[must_use]
    pub fn new(
        id: QuestionId,
        placement: Placement,
        level: Level,
        kind: QuestionKind,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self::from_persisted(id, placement, level, kind, metadata, now, now)
    }

    #[must_use]
    pub fn from_persisted(
        id: QuestionId,
        placement: Placement,
        level: Level,
        kind: QuestionKind,
        metadata: Metadata,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            placement,
            level,
            kind,
            metadata,
            created_at,
            updated_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }

    #[must_use]
    pub fn kind(&self) -> QuestionKind {
        self.kind
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Apply edits to the mutable fields. Identity and placement never change.
    pub fn revise(
        &mut self,
        level: Option<Level>,
        kind: Option<QuestionKind>,
        metadata: Option<Metadata>,
        now: DateTime<Utc>,
    ) {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(kind) = kind {
            self.kind = kind;
        }
        if let Some(metadata) = metadata {
            self.metadata = metadata;
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::taxonomy::NodeName;
    use crate::time::fixed_now;

    fn tree() -> (Group, Subject, Category, SubCategory) {
        let now = fixed_now();
        let group = Group::new(GroupId::new(1), NodeName::new("G").unwrap(), None, now);
        let subject = Subject::new(
            SubjectId::new(10),
            group.id(),
            NodeName::new("S").unwrap(),
            None,
            now,
        );
        let category = Category::under(
            CategoryId::new(100),
            &subject,
            NodeName::new("C").unwrap(),
            None,
            now,
        );
        let sub = SubCategory::under(
            SubCategoryId::new(1000),
            &category,
            NodeName::new("SC").unwrap(),
            None,
            now,
        );
        (group, subject, category, sub)
    }

    #[test]
    fn level_and_kind_parse_wire_names() {
        assert_eq!("Advance".parse::<Level>(), Ok(Level::Advance));
        assert_eq!("fill_blank".parse::<QuestionKind>(), Ok(QuestionKind::FillBlank));
        assert_eq!(
            "hard".parse::<Level>(),
            Err(QuestionError::UnknownLevel("hard".into()))
        );
    }

    #[test]
    fn placement_accepts_consistent_chain() {
        let (group, subject, category, sub) = tree();
        let placement = Placement::resolve(&group, &subject, Some(&category), Some(&sub)).unwrap();
        assert_eq!(placement.subcategory_id(), Some(sub.id()));
    }

    #[test]
    fn placement_rejects_foreign_subject() {
        let (_, subject, _, _) = tree();
        let other = Group::new(
            GroupId::new(2),
            NodeName::new("Other").unwrap(),
            None,
            fixed_now(),
        );
        let err = Placement::resolve(&other, &subject, None, None).unwrap_err();
        assert!(matches!(err, QuestionError::SubjectOutsideGroup { .. }));
    }

    #[test]
    fn placement_requires_category_for_subcategory() {
        let (group, subject, _, sub) = tree();
        let err = Placement::resolve(&group, &subject, None, Some(&sub)).unwrap_err();
        assert_eq!(err, QuestionError::SubCategoryWithoutCategory);
    }

    #[test]
    fn revise_keeps_identity_and_bumps_timestamp() {
        let (group, subject, category, _) = tree();
        let placement = Placement::resolve(&group, &subject, Some(&category), None).unwrap();
        let mut question = Question::new(
            QuestionId::new(5),
            placement,
            Level::Easy,
            QuestionKind::Mcq,
            Metadata::new(),
            fixed_now(),
        );

        let later = fixed_now() + chrono::Duration::hours(1);
        question.revise(Some(Level::Medium), None, None, later);

        assert_eq!(question.id(), QuestionId::new(5));
        assert_eq!(question.level(), Level::Medium);
        assert_eq!(question.kind(), QuestionKind::Mcq);
        assert_eq!(question.updated_at(), later);
        assert_eq!(question.created_at(), fixed_now());
    }
}
