use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::model::ids::{CategoryId, GroupId, SubCategoryId, SubjectId};

/// Longest accepted node name, in characters.
pub const MAX_NAME_LEN: usize = 100;

/// Longest accepted node description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 1000;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaxonomyError {
    #[error("name cannot be empty")]
    EmptyName,

    #[error("name must be at most {max} characters (got {actual})")]
    NameTooLong { max: usize, actual: usize },

    #[error("description must be at most {max} characters")]
    DescriptionTooLong { max: usize },
}

//
// ─── LEVELS ────────────────────────────────────────────────────────────────────
//

/// The four tiers of the taxonomy tree, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaxonomyLevel {
    Group,
    Subject,
    Category,
    SubCategory,
}

impl TaxonomyLevel {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Group => "Group",
            Self::Subject => "Subject",
            Self::Category => "Category",
            Self::SubCategory => "SubCategory",
        }
    }
}

impl fmt::Display for TaxonomyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

//
// ─── NAMES ─────────────────────────────────────────────────────────────────────
//

/// Validated taxonomy node name (trimmed, non-empty, bounded length).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeName(String);

impl NodeName {
    /// Create a validated node name.
    ///
    /// # Errors
    ///
    /// Returns `TaxonomyError::EmptyName` if the name is blank, or
    /// `TaxonomyError::NameTooLong` past [`MAX_NAME_LEN`] characters.
    pub fn new(value: impl Into<String>) -> Result<Self, TaxonomyError> {
        let raw = value.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TaxonomyError::EmptyName);
        }
        let actual = trimmed.chars().count();
        if actual > MAX_NAME_LEN {
            return Err(TaxonomyError::NameTooLong {
                max: MAX_NAME_LEN,
                actual,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim a free-text description; blank input collapses to `None`.
///
/// # Errors
///
/// Returns `TaxonomyError::DescriptionTooLong` past [`MAX_DESCRIPTION_LEN`] characters.
pub fn normalize_description(raw: Option<String>) -> Result<Option<String>, TaxonomyError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(TaxonomyError::DescriptionTooLong {
            max: MAX_DESCRIPTION_LEN,
        });
    }
    Ok(Some(trimmed.to_string()))
}

//
// ─── NODES ─────────────────────────────────────────────────────────────────────
//

/// Root of the taxonomy; names are globally unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    id: GroupId,
    name: NodeName,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl Group {
    #[must_use]
    pub fn new(
        id: GroupId,
        name: NodeName,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            description,
            created_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> GroupId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &NodeName {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A subject; its name is unique within its group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    id: SubjectId,
    group_id: GroupId,
    name: NodeName,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl Subject {
    #[must_use]
    pub fn new(
        id: SubjectId,
        group_id: GroupId,
        name: NodeName,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            group_id,
            name,
            description,
            created_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> SubjectId {
        self.id
    }

    #[must_use]
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    #[must_use]
    pub fn name(&self) -> &NodeName {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A category; carries its group so lookups never need a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    id: CategoryId,
    group_id: GroupId,
    subject_id: SubjectId,
    name: NodeName,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl Category {
    /// Build a category under `subject`, inheriting its group.
    #[must_use]
    pub fn under(
        id: CategoryId,
        subject: &Subject,
        name: NodeName,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::from_persisted(
            id,
            subject.group_id(),
            subject.id(),
            name,
            description,
            created_at,
        )
    }

    #[must_use]
    pub fn from_persisted(
        id: CategoryId,
        group_id: GroupId,
        subject_id: SubjectId,
        name: NodeName,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            group_id,
            subject_id,
            name,
            description,
            created_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> CategoryId {
        self.id
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
    pub fn name(&self) -> &NodeName {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubCategory {
    id: SubCategoryId,
    group_id: GroupId,
    subject_id: SubjectId,
    category_id: CategoryId,
    name: NodeName,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl SubCategory {
    /// Build a subcategory under `category`, inheriting its subject and group.
    #[must_use]
    pub fn under(
        id: SubCategoryId,
        category: &Category,
        name: NodeName,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::from_persisted(
            id,
            category.group_id(),
            category.subject_id(),
            category.id(),
            name,
            description,
            created_at,
        )
    }

    #[must_use]
    pub fn from_persisted(
        id: SubCategoryId,
        group_id: GroupId,
        subject_id: SubjectId,
        category_id: CategoryId,
        name: NodeName,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            group_id,
            subject_id,
            category_id,
            name,
            description,
            created_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> SubCategoryId {
        self.id
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
    pub fn category_id(&self) -> CategoryId {
        self.category_id
    }

    #[must_use]
    pub fn name(&self) -> &NodeName {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn node_name_is_trimmed() {
        let name = NodeName::new("  Algebra ").unwrap();
        assert_eq!(name.as_str(), "Algebra");
    }

    #[test]
    fn node_name_rejects_blank_and_long_values() {
        assert_eq!(NodeName::new("   "), Err(TaxonomyError::EmptyName));
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert_eq!(
            NodeName::new(long),
            Err(TaxonomyError::NameTooLong {
                max: MAX_NAME_LEN,
                actual: MAX_NAME_LEN + 1
            })
        );
    }

    #[test]
    fn blank_description_becomes_none() {
        assert_eq!(normalize_description(Some("  ".into())), Ok(None));
        assert_eq!(
            normalize_description(Some(" intro ".into())),
            Ok(Some("intro".into()))
        );
    }

    #[test]
    fn children_inherit_ancestry() {
        let now = fixed_now();
        let subject = Subject::new(
            SubjectId::new(2),
            GroupId::new(1),
            NodeName::new("Math").unwrap(),
            None,
            now,
        );
        let category = Category::under(
            CategoryId::new(3),
            &subject,
            NodeName::new("Algebra").unwrap(),
            None,
            now,
        );
        let sub = SubCategory::under(
            SubCategoryId::new(4),
            &category,
            NodeName::new("Linear").unwrap(),
            None,
            now,
        );

        assert_eq!(category.group_id(), GroupId::new(1));
        assert_eq!(sub.subject_id(), SubjectId::new(2));
        assert_eq!(sub.category_id(), CategoryId::new(3));
    }
}
