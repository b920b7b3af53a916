use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use qbank_core::model::{
    Category, CategoryId, Group, GroupId, NodeName, SubCategory, SubCategoryId, Subject,
    SubjectId, normalize_description,
};
use storage::repository::{
    NewCategoryRecord, NewGroupRecord, NewSubCategoryRecord, NewSubjectRecord, Page,
    PageRequest, StorageError, TaxonomyRepository,
};

use crate::Clock;
use crate::error::{RowErrors, RowFailure, TaxonomyServiceError};
use crate::lookup::{NodePath, TaxonomyIndex};

// ─── Drafts ────────────────────────────────────────────────────────────────────

/// Client input for a new group.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Client input for a new subject; the parent group is referenced by name.
#[derive(Debug, Clone, Deserialize)]
pub struct SubjectDraft {
    pub group: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryDraft {
    pub group: String,
    pub subject: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubCategoryDraft {
    pub group: String,
    pub subject: String,
    pub category: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Validate the fields every node shares, recording failures on `errors`.
fn node_fields(
    name: String,
    description: Option<String>,
    errors: &mut RowErrors,
) -> (Option<NodeName>, Option<String>) {
    let name = NodeName::new(name)
        .map_err(|e| errors.add("name", e.to_string()))
        .ok();
    let description = normalize_description(description)
        .map_err(|e| errors.add("description", e.to_string()))
        .ok()
        .flatten();
    (name, description)
}

fn finish<T>(failures: Vec<RowFailure>, records: Vec<T>) -> Result<Vec<T>, TaxonomyServiceError> {
    if failures.is_empty() {
        Ok(records)
    } else {
        warn!(failed = failures.len(), "taxonomy batch rejected");
        Err(TaxonomyServiceError::Rejected(failures))
    }
}

/// Creates, lists and deletes taxonomy nodes.
///
/// Batch creation resolves every parent by name first, then rejects rows
/// that collide with stored nodes or with an earlier row of the same batch,
/// and only inserts when every row is clean.
#[derive(Clone)]
pub struct TaxonomyService {
    clock: Clock,
    taxonomy: Arc<dyn TaxonomyRepository>,
}

impl TaxonomyService {
    #[must_use]
    pub fn new(clock: Clock, taxonomy: Arc<dyn TaxonomyRepository>) -> Self {
        Self { clock, taxonomy }
    }

    // ─── Groups ────────────────────────────────────────────────────────────

    /// Create groups all-or-nothing.
    ///
    /// # Errors
    ///
    /// Returns `TaxonomyServiceError::EmptyBatch` for an empty input,
    /// `TaxonomyServiceError::Rejected` with per-row failures, or
    /// `TaxonomyServiceError::Storage` if persistence fails.
    pub async fn create_groups(
        &self,
        drafts: Vec<GroupDraft>,
    ) -> Result<Vec<Group>, TaxonomyServiceError> {
        if drafts.is_empty() {
            return Err(TaxonomyServiceError::EmptyBatch);
        }
        let paths: Vec<NodePath> = drafts.iter().map(|d| NodePath::new(&d.name)).collect();
        let index = TaxonomyIndex::load(self.taxonomy.as_ref(), &paths).await?;
        let now = self.clock.now();

        let mut batch_names = HashSet::new();
        let mut records = Vec::with_capacity(drafts.len());
        let mut failures = Vec::new();
        for (row, draft) in drafts.into_iter().enumerate() {
            let mut errors = RowErrors::default();
            let (name, description) = node_fields(draft.name, draft.description, &mut errors);
            if let Some(name) = &name {
                if index.group(name.as_str()).is_some() {
                    errors.add("name", format!("Group '{name}' already exists."));
                } else if !batch_names.insert(name.clone()) {
                    errors.add("name", format!("Duplicate name '{name}' in this batch."));
                }
            }
            match (errors.into_failure(row), name) {
                (Some(failure), _) => failures.push(failure),
                (None, Some(name)) => records.push(NewGroupRecord {
                    name,
                    description,
                    created_at: now,
                }),
                (None, None) => {}
            }
        }

        let records = finish(failures, records)?;
        let ids = self.taxonomy.insert_groups(&records).await?;
        info!(created = ids.len(), "groups created");
        Ok(ids
            .into_iter()
            .zip(records)
            .map(|(id, r)| Group::new(id, r.name, r.description, r.created_at))
            .collect())
    }

    /// # Errors
    ///
    /// Returns `TaxonomyServiceError::Storage` if repository access fails.
    pub async fn list_groups(&self, page: PageRequest) -> Result<Page<Group>, TaxonomyServiceError> {
        Ok(self.taxonomy.list_groups(page).await?)
    }

    /// Delete a group together with its subtree and questions.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` (wrapped) if the group does not exist.
    pub async fn delete_group(&self, id: GroupId) -> Result<(), TaxonomyServiceError> {
        if !self.taxonomy.delete_group(id).await? {
            return Err(StorageError::NotFound.into());
        }
        info!(group_id = id.value(), "group deleted");
        Ok(())
    }

    // ─── Subjects ──────────────────────────────────────────────────────────

    /// Create subjects all-or-nothing; parents are resolved by group name.
    ///
    /// # Errors
    ///
    /// Same contract as [`TaxonomyService::create_groups`].
    pub async fn create_subjects(
        &self,
        drafts: Vec<SubjectDraft>,
    ) -> Result<Vec<Subject>, TaxonomyServiceError> {
        if drafts.is_empty() {
            return Err(TaxonomyServiceError::EmptyBatch);
        }
        let paths: Vec<NodePath> = drafts
            .iter()
            .map(|d| NodePath::new(&d.group).subject(&d.name))
            .collect();
        let index = TaxonomyIndex::load(self.taxonomy.as_ref(), &paths).await?;
        let now = self.clock.now();

        let mut batch_keys = HashSet::new();
        let mut records = Vec::with_capacity(drafts.len());
        let mut failures = Vec::new();
        for (row, draft) in drafts.into_iter().enumerate() {
            let mut errors = RowErrors::default();
            let (name, description) = node_fields(draft.name, draft.description, &mut errors);
            let group = index.group(&draft.group);
            if group.is_none() {
                errors.add("group", format!("Group '{}' not found.", draft.group.trim()));
            }
            if let (Some(group), Some(name)) = (group, &name) {
                if index.subject(group, name.as_str()).is_some() {
                    errors.add(
                        "name",
                        format!("Subject '{name}' already exists in group '{}'.", group.name()),
                    );
                } else if !batch_keys.insert((group.id(), name.clone())) {
                    errors.add("name", format!("Duplicate name '{name}' in this batch."));
                }
            }
            match (errors.into_failure(row), group, name) {
                (Some(failure), _, _) => failures.push(failure),
                (None, Some(group), Some(name)) => records.push(NewSubjectRecord {
                    group_id: group.id(),
                    name,
                    description,
                    created_at: now,
                }),
                _ => {}
            }
        }

        let records = finish(failures, records)?;
        let ids = self.taxonomy.insert_subjects(&records).await?;
        info!(created = ids.len(), "subjects created");
        Ok(ids
            .into_iter()
            .zip(records)
            .map(|(id, r)| Subject::new(id, r.group_id, r.name, r.description, r.created_at))
            .collect())
    }

    /// List subjects, optionally only those under `group`.
    ///
    /// # Errors
    ///
    /// Returns `TaxonomyServiceError::ParentNotFound` if `group` does not exist.
    pub async fn list_subjects(
        &self,
        group: Option<GroupId>,
        page: PageRequest,
    ) -> Result<Page<Subject>, TaxonomyServiceError> {
        if let Some(id) = group {
            if self.taxonomy.get_group(id).await?.is_none() {
                return Err(TaxonomyServiceError::ParentNotFound("group"));
            }
        }
        Ok(self.taxonomy.list_subjects(group, page).await?)
    }

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` (wrapped) if the subject does not exist.
    pub async fn delete_subject(&self, id: SubjectId) -> Result<(), TaxonomyServiceError> {
        if !self.taxonomy.delete_subject(id).await? {
            return Err(StorageError::NotFound.into());
        }
        info!(subject_id = id.value(), "subject deleted");
        Ok(())
    }

    // ─── Categories ────────────────────────────────────────────────────────

    /// Create categories all-or-nothing; parents are resolved by name.
    ///
    /// # Errors
    ///
    /// Same contract as [`TaxonomyService::create_groups`].
    pub async fn create_categories(
        &self,
        drafts: Vec<CategoryDraft>,
    ) -> Result<Vec<Category>, TaxonomyServiceError> {
        if drafts.is_empty() {
            return Err(TaxonomyServiceError::EmptyBatch);
        }
        let paths: Vec<NodePath> = drafts
            .iter()
            .map(|d| NodePath::new(&d.group).subject(&d.subject).category(&d.name))
            .collect();
        let index = TaxonomyIndex::load(self.taxonomy.as_ref(), &paths).await?;
        let now = self.clock.now();

        let mut batch_keys = HashSet::new();
        let mut records = Vec::with_capacity(drafts.len());
        let mut failures = Vec::new();
        for (row, draft) in drafts.into_iter().enumerate() {
            let mut errors = RowErrors::default();
            let (name, description) = node_fields(draft.name, draft.description, &mut errors);
            let subject = match index.group(&draft.group) {
                None => {
                    errors.add("group", format!("Group '{}' not found.", draft.group.trim()));
                    None
                }
                Some(group) => {
                    let subject = index.subject(group, &draft.subject);
                    if subject.is_none() {
                        errors.add(
                            "subject",
                            format!(
                                "Subject '{}' not found in group '{}'.",
                                draft.subject.trim(),
                                group.name()
                            ),
                        );
                    }
                    subject
                }
            };
            if let (Some(subject), Some(name)) = (subject, &name) {
                if index.category(subject, name.as_str()).is_some() {
                    errors.add(
                        "name",
                        format!(
                            "Category '{name}' already exists in subject '{}'.",
                            subject.name()
                        ),
                    );
                } else if !batch_keys.insert((subject.id(), name.clone())) {
                    errors.add("name", format!("Duplicate name '{name}' in this batch."));
                }
            }
            match (errors.into_failure(row), subject, name) {
                (Some(failure), _, _) => failures.push(failure),
                (None, Some(subject), Some(name)) => {
                    records.push(NewCategoryRecord::under(subject, name, description, now));
                }
                _ => {}
            }
        }

        let records = finish(failures, records)?;
        let ids = self.taxonomy.insert_categories(&records).await?;
        info!(created = ids.len(), "categories created");
        Ok(ids
            .into_iter()
            .zip(records)
            .map(|(id, r)| {
                Category::from_persisted(
                    id,
                    r.group_id,
                    r.subject_id,
                    r.name,
                    r.description,
                    r.created_at,
                )
            })
            .collect())
    }

    /// List categories, optionally only those under `subject`.
    ///
    /// # Errors
    ///
    /// Returns `TaxonomyServiceError::ParentNotFound` if `subject` does not exist.
    pub async fn list_categories(
        &self,
        subject: Option<SubjectId>,
        page: PageRequest,
    ) -> Result<Page<Category>, TaxonomyServiceError> {
        if let Some(id) = subject {
            if self.taxonomy.get_subject(id).await?.is_none() {
                return Err(TaxonomyServiceError::ParentNotFound("subject"));
            }
        }
        Ok(self.taxonomy.list_categories(subject, page).await?)
    }

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` (wrapped) if the category does not exist.
    pub async fn delete_category(&self, id: CategoryId) -> Result<(), TaxonomyServiceError> {
        if !self.taxonomy.delete_category(id).await? {
            return Err(StorageError::NotFound.into());
        }
        info!(category_id = id.value(), "category deleted");
        Ok(())
    }

    // ─── Subcategories ─────────────────────────────────────────────────────

    /// Create subcategories all-or-nothing; parents are resolved by name.
    ///
    /// # Errors
    ///
    /// Same contract as [`TaxonomyService::create_groups`].
    pub async fn create_subcategories(
        &self,
        drafts: Vec<SubCategoryDraft>,
    ) -> Result<Vec<SubCategory>, TaxonomyServiceError> {
        if drafts.is_empty() {
            return Err(TaxonomyServiceError::EmptyBatch);
        }
        let paths: Vec<NodePath> = drafts
            .iter()
            .map(|d| {
                NodePath::new(&d.group)
                    .subject(&d.subject)
                    .category(&d.category)
                    .subcategory(&d.name)
            })
            .collect();
        let index = TaxonomyIndex::load(self.taxonomy.as_ref(), &paths).await?;
        let now = self.clock.now();

        let mut batch_keys = HashSet::new();
        let mut records = Vec::with_capacity(drafts.len());
        let mut failures = Vec::new();
        for (row, draft) in drafts.into_iter().enumerate() {
            let mut errors = RowErrors::default();
            let (name, description) = node_fields(draft.name, draft.description, &mut errors);

            let group = index.group(&draft.group);
            if group.is_none() {
                errors.add("group", format!("Group '{}' not found.", draft.group.trim()));
            }
            let subject = group.and_then(|g| index.subject(g, &draft.subject));
            if let (Some(group), None) = (group, subject) {
                errors.add(
                    "subject",
                    format!(
                        "Subject '{}' not found in group '{}'.",
                        draft.subject.trim(),
                        group.name()
                    ),
                );
            }
            let category = subject.and_then(|s| index.category(s, &draft.category));
            if subject.is_some() && category.is_none() {
                errors.add(
                    "category",
                    format!("Category '{}' not found.", draft.category.trim()),
                );
            }

            if let (Some(category), Some(name)) = (category, &name) {
                if index.subcategory(category, name.as_str()).is_some() {
                    errors.add(
                        "name",
                        format!(
                            "SubCategory '{name}' already exists in category '{}'.",
                            category.name()
                        ),
                    );
                } else if !batch_keys.insert((category.id(), name.clone())) {
                    errors.add("name", format!("Duplicate name '{name}' in this batch."));
                }
            }
            match (errors.into_failure(row), category, name) {
                (Some(failure), _, _) => failures.push(failure),
                (None, Some(category), Some(name)) => {
                    records.push(NewSubCategoryRecord::under(category, name, description, now));
                }
                _ => {}
            }
        }

        let records = finish(failures, records)?;
        let ids = self.taxonomy.insert_subcategories(&records).await?;
        info!(created = ids.len(), "subcategories created");
        Ok(ids
            .into_iter()
            .zip(records)
            .map(|(id, r)| {
                SubCategory::from_persisted(
                    id,
                    r.group_id,
                    r.subject_id,
                    r.category_id,
                    r.name,
                    r.description,
                    r.created_at,
                )
            })
            .collect())
    }

    /// List subcategories, optionally only those under `category`.
    ///
    /// # Errors
    ///
    /// Returns `TaxonomyServiceError::ParentNotFound` if `category` does not exist.
    pub async fn list_subcategories(
        &self,
        category: Option<CategoryId>,
        page: PageRequest,
    ) -> Result<Page<SubCategory>, TaxonomyServiceError> {
        if let Some(id) = category {
            if self.taxonomy.get_category(id).await?.is_none() {
                return Err(TaxonomyServiceError::ParentNotFound("category"));
            }
        }
        Ok(self.taxonomy.list_subcategories(category, page).await?)
    }

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` (wrapped) if the subcategory does not exist.
    pub async fn delete_subcategory(&self, id: SubCategoryId) -> Result<(), TaxonomyServiceError> {
        if !self.taxonomy.delete_subcategory(id).await? {
            return Err(StorageError::NotFound.into());
        }
        info!(subcategory_id = id.value(), "subcategory deleted");
        Ok(())
    }
}
