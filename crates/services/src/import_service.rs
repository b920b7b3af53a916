use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use qbank_core::model::{Level, Metadata, Placement, QuestionKind};
use storage::repository::{NewQuestionRecord, QuestionRepository, TaxonomyRepository};

use crate::Clock;
use crate::error::{ImportError, RowErrors};
use crate::lookup::{NodePath, TaxonomyIndex};

const REQUIRED: &str = "This field is required.";

/// One row of a bulk upload. Every field is optional at this stage so that
/// missing values are reported per row instead of failing the whole body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportRecord {
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

impl ImportRecord {
    fn path(&self) -> Option<NodePath> {
        let mut path = NodePath::new(present(self.group.as_ref())?);
        if let Some(subject) = present(self.subject.as_ref()) {
            path = path.subject(subject);
            if let Some(category) = present(self.category.as_ref()) {
                path = path.category(category);
                if let Some(sub) = present(self.subcategory.as_ref()) {
                    path = path.subcategory(sub);
                }
            }
        }
        Some(path)
    }
}

fn choice<T: std::str::FromStr>(
    raw: Option<&String>,
    field: &str,
    errors: &mut RowErrors,
) -> Option<T> {
    let Some(raw) = present(raw) else {
        errors.add(field, REQUIRED);
        return None;
    };
    raw.parse::<T>()
        .map_err(|_| errors.add(field, format!("\"{raw}\" is not a valid choice.")))
        .ok()
}

fn metadata(raw: Option<Value>, errors: &mut RowErrors) -> Option<Metadata> {
    match raw {
        None | Some(Value::Null) => Some(Metadata::new()),
        Some(Value::Object(map)) => Some(map),
        Some(_) => {
            errors.add("metadata", "Expected a JSON object.");
            None
        }
    }
}

/// Two-pass bulk question upload.
///
/// Pass one fetches every referenced node by natural key in a handful of
/// queries; pass two validates each row against that index. Any failing row
/// rejects the whole upload.
#[derive(Clone)]
pub struct ImportService {
    clock: Clock,
    taxonomy: Arc<dyn TaxonomyRepository>,
    questions: Arc<dyn QuestionRepository>,
}

impl ImportService {
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

    /// Import raw JSON items, reporting items that are not valid records per row.
    ///
    /// # Errors
    ///
    /// Same contract as [`ImportService::import`].
    pub async fn import_json(&self, items: Vec<Value>) -> Result<usize, ImportError> {
        let rows = items
            .into_iter()
            .map(|item| serde_json::from_value::<ImportRecord>(item).map_err(|e| e.to_string()))
            .collect();
        self.import_rows(rows).await
    }

    /// Validate and insert every record, or nothing. Returns how many were created.
    ///
    /// # Errors
    ///
    /// Returns `ImportError::Empty` for an empty batch, `ImportError::Rejected`
    /// with every failing row (1-based), or `ImportError::Storage` if the
    /// lookup or insert fails.
    pub async fn import(&self, records: Vec<ImportRecord>) -> Result<usize, ImportError> {
        self.import_rows(records.into_iter().map(Ok).collect()).await
    }

    async fn import_rows(
        &self,
        rows: Vec<Result<ImportRecord, String>>,
    ) -> Result<usize, ImportError> {
        if rows.is_empty() {
            return Err(ImportError::Empty);
        }

        let paths: Vec<NodePath> = rows
            .iter()
            .filter_map(|row| row.as_ref().ok()?.path())
            .collect();
        let index = TaxonomyIndex::load(self.taxonomy.as_ref(), &paths).await?;
        let now = self.clock.now();

        let mut first_seen: HashMap<(Placement, Level, QuestionKind, String), usize> =
            HashMap::new();
        let mut records = Vec::with_capacity(rows.len());
        let mut failures = Vec::new();

        for (row, item) in rows.into_iter().enumerate() {
            let mut errors = RowErrors::default();
            let record = match item {
                Ok(record) => record,
                Err(message) => {
                    errors.add("non_field_errors", message);
                    failures.extend(errors.into_failure(row));
                    continue;
                }
            };

            let placement = resolve_placement(&index, &record, &mut errors);
            let level = choice::<Level>(record.level.as_ref(), "level", &mut errors);
            let kind = choice::<QuestionKind>(record.kind.as_ref(), "type", &mut errors);
            let metadata = metadata(record.metadata, &mut errors);

            if let (true, Some(placement), Some(level), Some(kind), Some(metadata)) =
                (errors.is_empty(), placement, level, kind, metadata)
            {
                let fingerprint = serde_json::to_string(&metadata).unwrap_or_default();
                if let Some(first) = first_seen.get(&(placement, level, kind, fingerprint.clone())) {
                    errors.add("non_field_errors", format!("Duplicate of row {first}."));
                } else {
                    first_seen.insert((placement, level, kind, fingerprint), row + 1);
                    records.push(NewQuestionRecord {
                        placement,
                        level,
                        kind,
                        metadata,
                        created_at: now,
                    });
                }
            }
            failures.extend(errors.into_failure(row));
        }

        if !failures.is_empty() {
            warn!(failed = failures.len(), "bulk upload rejected");
            return Err(ImportError::Rejected(failures));
        }

        let created = self.questions.insert_questions(&records).await?.len();
        info!(created, "bulk upload stored");
        Ok(created)
    }
}

/// Walk the record's names down the taxonomy, stopping at the first missing node.
fn resolve_placement(
    index: &TaxonomyIndex,
    record: &ImportRecord,
    errors: &mut RowErrors,
) -> Option<Placement> {
    let group_name = present(record.group.as_ref());
    let subject_name = present(record.subject.as_ref());
    let category_name = present(record.category.as_ref());
    let subcategory_name = present(record.subcategory.as_ref());

    if group_name.is_none() {
        errors.add("group", REQUIRED);
    }
    if subject_name.is_none() {
        errors.add("subject", REQUIRED);
    }
    if category_name.is_none() {
        errors.add("category", REQUIRED);
    }
    let (group_name, subject_name, category_name) = (group_name?, subject_name?, category_name?);

    let Some(group) = index.group(group_name) else {
        errors.add("group", format!("Group '{group_name}' not found."));
        return None;
    };
    let Some(subject) = index.subject(group, subject_name) else {
        errors.add(
            "subject",
            format!("Subject '{subject_name}' not found in group '{group_name}'."),
        );
        return None;
    };
    let Some(category) = index.category(subject, category_name) else {
        errors.add("category", format!("Category '{category_name}' not found."));
        return None;
    };
    let subcategory = match subcategory_name {
        Some(name) => {
            let Some(sub) = index.subcategory(category, name) else {
                errors.add("subcategory", format!("SubCategory '{name}' not found."));
                return None;
            };
            Some(sub)
        }
        None => None,
    };

    Placement::resolve(group, subject, Some(category), subcategory)
        .map_err(|e| errors.add("non_field_errors", e.to_string()))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy_service::{CategoryDraft, GroupDraft, SubjectDraft, TaxonomyService};
    use qbank_core::time::fixed_clock;
    use serde_json::json;
    use storage::repository::Storage;

    async fn fixture() -> (ImportService, Arc<dyn QuestionRepository>) {
        let storage = Storage::in_memory();
        let taxonomy = TaxonomyService::new(fixed_clock(), Arc::clone(&storage.taxonomy));
        taxonomy
            .create_groups(vec![GroupDraft {
                name: "Science".into(),
                description: None,
            }])
            .await
            .unwrap();
        taxonomy
            .create_subjects(vec![SubjectDraft {
                group: "Science".into(),
                name: "Physics".into(),
                description: None,
            }])
            .await
            .unwrap();
        taxonomy
            .create_categories(vec![CategoryDraft {
                group: "Science".into(),
                subject: "Physics".into(),
                name: "Optics".into(),
                description: None,
            }])
            .await
            .unwrap();
        let svc = ImportService::new(
            fixed_clock(),
            storage.taxonomy,
            Arc::clone(&storage.questions),
        );
        (svc, storage.questions)
    }

    fn row(category: &str, prompt: &str) -> Value {
        json!({
            "group": "Science",
            "subject": "Physics",
            "category": category,
            "level": "easy",
            "type": "mcq",
            "metadata": {"prompt": prompt}
        })
    }

    #[tokio::test]
    async fn one_bad_category_rejects_the_batch() {
        let (svc, questions) = fixture().await;
        let err = svc
            .import_json(vec![
                row("Optics", "a"),
                row("Optics", "b"),
                row("Optics", "c"),
                row("Acoustics", "d"),
            ])
            .await
            .unwrap_err();
        let ImportError::Rejected(failures) = err else {
            panic!("expected rejection, got {err:?}");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].row, 4);
        assert_eq!(
            failures[0].errors.get("category").map(String::as_str),
            Some("Category 'Acoustics' not found.")
        );
        assert_eq!(questions.count_questions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn valid_batch_is_inserted() {
        let (svc, questions) = fixture().await;
        let created = svc
            .import_json(vec![row("Optics", "a"), row("Optics", "b")])
            .await
            .unwrap();
        assert_eq!(created, 2);
        assert_eq!(questions.count_questions().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn duplicates_within_a_batch_are_rejected() {
        let (svc, _) = fixture().await;
        let err = svc
            .import_json(vec![row("Optics", "same"), row("Optics", "same")])
            .await
            .unwrap_err();
        let ImportError::Rejected(failures) = err else {
            panic!("expected rejection");
        };
        assert_eq!(failures[0].row, 2);
        assert_eq!(
            failures[0].errors.get("non_field_errors").map(String::as_str),
            Some("Duplicate of row 1.")
        );
    }

    #[tokio::test]
    async fn missing_and_invalid_fields_are_all_reported() {
        let (svc, _) = fixture().await;
        let err = svc
            .import_json(vec![json!({
                "group": "Science",
                "subject": "Physics",
                "level": "legendary",
                "type": "mcq",
                "metadata": [1, 2]
            })])
            .await
            .unwrap_err();
        let ImportError::Rejected(failures) = err else {
            panic!("expected rejection");
        };
        let errors = &failures[0].errors;
        assert_eq!(errors.get("category").map(String::as_str), Some(REQUIRED));
        assert!(errors.contains_key("level"));
        assert!(errors.contains_key("metadata"));
    }

    #[tokio::test]
    async fn empty_upload_is_refused() {
        let (svc, _) = fixture().await;
        assert!(matches!(svc.import(Vec::new()).await, Err(ImportError::Empty)));
    }
}
