use std::collections::{BTreeSet, HashMap};

use qbank_core::model::{
    Category, CategoryId, Group, GroupId, SubCategory, Subject, SubjectId,
};
use storage::repository::{StorageError, TaxonomyRepository};

/// A chain of node names from a group downwards, as submitted by clients.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodePath {
    pub group: String,
    pub subject: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

impl NodePath {
    pub(crate) fn new(group: &str) -> Self {
        Self {
            group: group.trim().to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn subject(mut self, name: &str) -> Self {
        self.subject = Some(name.trim().to_string());
        self
    }

    pub(crate) fn category(mut self, name: &str) -> Self {
        self.category = Some(name.trim().to_string());
        self
    }

    pub(crate) fn subcategory(mut self, name: &str) -> Self {
        self.subcategory = Some(name.trim().to_string());
        self
    }
}

/// Taxonomy nodes fetched in one pass for a batch of paths, keyed by natural key.
///
/// Loading issues one query per level regardless of batch size.
#[derive(Debug, Default)]
pub(crate) struct TaxonomyIndex {
    groups: HashMap<String, Group>,
    subjects: HashMap<(GroupId, String), Subject>,
    categories: HashMap<(SubjectId, String), Category>,
    subcategories: HashMap<(CategoryId, String), SubCategory>,
}

impl TaxonomyIndex {
    pub(crate) async fn load(
        repo: &dyn TaxonomyRepository,
        paths: &[NodePath],
    ) -> Result<Self, StorageError> {
        let mut index = Self::default();

        let names: BTreeSet<String> = paths.iter().map(|p| p.group.clone()).collect();
        if names.is_empty() {
            return Ok(index);
        }
        let names: Vec<String> = names.into_iter().collect();
        for group in repo.groups_by_name(&names).await? {
            index.groups.insert(group.name().to_string(), group);
        }

        let keys: BTreeSet<(GroupId, String)> = paths
            .iter()
            .filter_map(|p| Some((index.groups.get(&p.group)?.id(), p.subject.clone()?)))
            .collect();
        if !keys.is_empty() {
            let keys: Vec<_> = keys.into_iter().collect();
            for subject in repo.subjects_by_name(&keys).await? {
                index
                    .subjects
                    .insert((subject.group_id(), subject.name().to_string()), subject);
            }
        }

        let keys: BTreeSet<(SubjectId, String)> = paths
            .iter()
            .filter_map(|p| {
                let group = index.groups.get(&p.group)?;
                let subject = index.subject(group, p.subject.as_deref()?)?;
                Some((subject.id(), p.category.clone()?))
            })
            .collect();
        if !keys.is_empty() {
            let keys: Vec<_> = keys.into_iter().collect();
            for category in repo.categories_by_name(&keys).await? {
                index
                    .categories
                    .insert((category.subject_id(), category.name().to_string()), category);
            }
        }

        let keys: BTreeSet<(CategoryId, String)> = paths
            .iter()
            .filter_map(|p| {
                let group = index.groups.get(&p.group)?;
                let subject = index.subject(group, p.subject.as_deref()?)?;
                let category = index.category(subject, p.category.as_deref()?)?;
                Some((category.id(), p.subcategory.clone()?))
            })
            .collect();
        if !keys.is_empty() {
            let keys: Vec<_> = keys.into_iter().collect();
            for sub in repo.subcategories_by_name(&keys).await? {
                index
                    .subcategories
                    .insert((sub.category_id(), sub.name().to_string()), sub);
            }
        }

        Ok(index)
    }

    pub(crate) fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name.trim())
    }

    pub(crate) fn subject(&self, group: &Group, name: &str) -> Option<&Subject> {
        self.subjects.get(&(group.id(), name.trim().to_string()))
    }

    pub(crate) fn category(&self, subject: &Subject, name: &str) -> Option<&Category> {
        self.categories.get(&(subject.id(), name.trim().to_string()))
    }

    pub(crate) fn subcategory(&self, category: &Category, name: &str) -> Option<&SubCategory> {
        self.subcategories
            .get(&(category.id(), name.trim().to_string()))
    }
}
