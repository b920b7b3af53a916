use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qbank_core::model::{
    AccessToken, Category, CategoryId, Group, GroupId, Question, QuestionId, QuizFilter,
    QuizSessionState, SessionKey, SubCategory, SubCategoryId, Subject, SubjectId, TokenKey,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::repository::{
    AccessTokenRepository, NewCategoryRecord, NewGroupRecord, NewQuestionRecord,
    NewSubCategoryRecord, NewSubjectRecord, Page, PageRequest, QuestionQuery, QuestionRepository,
    SessionStore, StorageError, StoredSession, TaxonomyCounts, TaxonomyRepository,
};

#[derive(Default)]
struct Tables {
    last_id: u64,
    groups: BTreeMap<GroupId, Group>,
    subjects: BTreeMap<SubjectId, Subject>,
    categories: BTreeMap<CategoryId, Category>,
    subcategories: BTreeMap<SubCategoryId, SubCategory>,
    questions: BTreeMap<QuestionId, Question>,
    tokens: BTreeMap<TokenKey, AccessToken>,
    sessions: HashMap<SessionKey, StoredSession>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn remove_questions(&mut self, mut doomed: impl FnMut(&Question) -> bool) {
        self.questions.retain(|_, q| !doomed(q));
    }
}

fn paginate<T: Clone>(rows: impl Iterator<Item = T>, page: PageRequest) -> Page<T> {
    let rows: Vec<T> = rows.collect();
    let total = rows.len() as u64;
    let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
    let limit = usize::try_from(page.limit()).unwrap_or(usize::MAX);
    Page {
        items: rows.into_iter().skip(offset).take(limit).collect(),
        total,
        request: page,
    }
}

/// In-memory backend implementing every storage contract.
///
/// All tables share one lock, so batch writes and cascades are atomic.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.tables
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl TaxonomyRepository for InMemoryRepository {
    async fn insert_groups(&self, groups: &[NewGroupRecord]) -> Result<Vec<GroupId>, StorageError> {
        let mut guard = self.lock()?;
        let mut names: HashSet<&str> = guard.groups.values().map(|g| g.name().as_str()).collect();
        if !groups.iter().all(|g| names.insert(g.name.as_str())) {
            return Err(StorageError::Conflict);
        }
        drop(names);

        let mut ids = Vec::with_capacity(groups.len());
        for record in groups {
            let id = GroupId::new(guard.next_id());
            let group = Group::new(
                id,
                record.name.clone(),
                record.description.clone(),
                record.created_at,
            );
            guard.groups.insert(id, group);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>, StorageError> {
        Ok(self.lock()?.groups.get(&id).cloned())
    }

    async fn list_groups(&self, page: PageRequest) -> Result<Page<Group>, StorageError> {
        let guard = self.lock()?;
        Ok(paginate(guard.groups.values().cloned(), page))
    }

    async fn groups_by_name(&self, names: &[String]) -> Result<Vec<Group>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .groups
            .values()
            .filter(|g| names.iter().any(|n| n == g.name().as_str()))
            .cloned()
            .collect())
    }

    async fn delete_group(&self, id: GroupId) -> Result<bool, StorageError> {
        let mut guard = self.lock()?;
        if guard.groups.remove(&id).is_none() {
            return Ok(false);
        }
        guard.subjects.retain(|_, s| s.group_id() != id);
        guard.categories.retain(|_, c| c.group_id() != id);
        guard.subcategories.retain(|_, s| s.group_id() != id);
        guard.remove_questions(|q| q.placement().group_id() == id);
        Ok(true)
    }

    async fn insert_subjects(
        &self,
        subjects: &[NewSubjectRecord],
    ) -> Result<Vec<SubjectId>, StorageError> {
        let mut guard = self.lock()?;
        if subjects.iter().any(|s| !guard.groups.contains_key(&s.group_id)) {
            return Err(StorageError::NotFound);
        }
        let mut keys: HashSet<(GroupId, String)> = guard
            .subjects
            .values()
            .map(|s| (s.group_id(), s.name().to_string()))
            .collect();
        if !subjects
            .iter()
            .all(|s| keys.insert((s.group_id, s.name.to_string())))
        {
            return Err(StorageError::Conflict);
        }

        let mut ids = Vec::with_capacity(subjects.len());
        for record in subjects {
            let id = SubjectId::new(guard.next_id());
            let subject = Subject::new(
                id,
                record.group_id,
                record.name.clone(),
                record.description.clone(),
                record.created_at,
            );
            guard.subjects.insert(id, subject);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get_subject(&self, id: SubjectId) -> Result<Option<Subject>, StorageError> {
        Ok(self.lock()?.subjects.get(&id).cloned())
    }

    async fn list_subjects(
        &self,
        group: Option<GroupId>,
        page: PageRequest,
    ) -> Result<Page<Subject>, StorageError> {
        let guard = self.lock()?;
        let rows = guard
            .subjects
            .values()
            .filter(|s| group.is_none_or(|g| s.group_id() == g))
            .cloned();
        Ok(paginate(rows, page))
    }

    async fn subjects_by_name(
        &self,
        keys: &[(GroupId, String)],
    ) -> Result<Vec<Subject>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .subjects
            .values()
            .filter(|s| {
                keys.iter()
                    .any(|(g, n)| *g == s.group_id() && n == s.name().as_str())
            })
            .cloned()
            .collect())
    }

    async fn delete_subject(&self, id: SubjectId) -> Result<bool, StorageError> {
        let mut guard = self.lock()?;
        if guard.subjects.remove(&id).is_none() {
            return Ok(false);
        }
        guard.categories.retain(|_, c| c.subject_id() != id);
        guard.subcategories.retain(|_, s| s.subject_id() != id);
        guard.remove_questions(|q| q.placement().subject_id() == id);
        Ok(true)
    }

    async fn insert_categories(
        &self,
        categories: &[NewCategoryRecord],
    ) -> Result<Vec<CategoryId>, StorageError> {
        let mut guard = self.lock()?;
        let parents_exist = categories.iter().all(|c| {
            guard.groups.contains_key(&c.group_id) && guard.subjects.contains_key(&c.subject_id)
        });
        if !parents_exist {
            return Err(StorageError::NotFound);
        }
        let mut keys: HashSet<(SubjectId, String)> = guard
            .categories
            .values()
            .map(|c| (c.subject_id(), c.name().to_string()))
            .collect();
        if !categories
            .iter()
            .all(|c| keys.insert((c.subject_id, c.name.to_string())))
        {
            return Err(StorageError::Conflict);
        }

        let mut ids = Vec::with_capacity(categories.len());
        for record in categories {
            let id = CategoryId::new(guard.next_id());
            let category = Category::from_persisted(
                id,
                record.group_id,
                record.subject_id,
                record.name.clone(),
                record.description.clone(),
                record.created_at,
            );
            guard.categories.insert(id, category);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get_category(&self, id: CategoryId) -> Result<Option<Category>, StorageError> {
        Ok(self.lock()?.categories.get(&id).cloned())
    }

    async fn list_categories(
        &self,
        subject: Option<SubjectId>,
        page: PageRequest,
    ) -> Result<Page<Category>, StorageError> {
        let guard = self.lock()?;
        let rows = guard
            .categories
            .values()
            .filter(|c| subject.is_none_or(|s| c.subject_id() == s))
            .cloned();
        Ok(paginate(rows, page))
    }

    async fn categories_by_name(
        &self,
        keys: &[(SubjectId, String)],
    ) -> Result<Vec<Category>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .categories
            .values()
            .filter(|c| {
                keys.iter()
                    .any(|(s, n)| *s == c.subject_id() && n == c.name().as_str())
            })
            .cloned()
            .collect())
    }

    async fn delete_category(&self, id: CategoryId) -> Result<bool, StorageError> {
        let mut guard = self.lock()?;
        if guard.categories.remove(&id).is_none() {
            return Ok(false);
        }
        guard.subcategories.retain(|_, s| s.category_id() != id);
        guard.remove_questions(|q| q.placement().category_id() == Some(id));
        Ok(true)
    }

    async fn insert_subcategories(
        &self,
        subcategories: &[NewSubCategoryRecord],
    ) -> Result<Vec<SubCategoryId>, StorageError> {
        let mut guard = self.lock()?;
        let parents_exist = subcategories.iter().all(|s| {
            guard.groups.contains_key(&s.group_id)
                && guard.subjects.contains_key(&s.subject_id)
                && guard.categories.contains_key(&s.category_id)
        });
        if !parents_exist {
            return Err(StorageError::NotFound);
        }
        let mut keys: HashSet<(CategoryId, String)> = guard
            .subcategories
            .values()
            .map(|s| (s.category_id(), s.name().to_string()))
            .collect();
        if !subcategories
            .iter()
            .all(|s| keys.insert((s.category_id, s.name.to_string())))
        {
            return Err(StorageError::Conflict);
        }

        let mut ids = Vec::with_capacity(subcategories.len());
        for record in subcategories {
            let id = SubCategoryId::new(guard.next_id());
            let subcategory = SubCategory::from_persisted(
                id,
                record.group_id,
                record.subject_id,
                record.category_id,
                record.name.clone(),
                record.description.clone(),
                record.created_at,
            );
            guard.subcategories.insert(id, subcategory);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get_subcategory(
        &self,
        id: SubCategoryId,
    ) -> Result<Option<SubCategory>, StorageError> {
        Ok(self.lock()?.subcategories.get(&id).cloned())
    }

    async fn list_subcategories(
        &self,
        category: Option<CategoryId>,
        page: PageRequest,
    ) -> Result<Page<SubCategory>, StorageError> {
        let guard = self.lock()?;
        let rows = guard
            .subcategories
            .values()
            .filter(|s| category.is_none_or(|c| s.category_id() == c))
            .cloned();
        Ok(paginate(rows, page))
    }

    async fn subcategories_by_name(
        &self,
        keys: &[(CategoryId, String)],
    ) -> Result<Vec<SubCategory>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .subcategories
            .values()
            .filter(|s| {
                keys.iter()
                    .any(|(c, n)| *c == s.category_id() && n == s.name().as_str())
            })
            .cloned()
            .collect())
    }

    async fn delete_subcategory(&self, id: SubCategoryId) -> Result<bool, StorageError> {
        let mut guard = self.lock()?;
        if guard.subcategories.remove(&id).is_none() {
            return Ok(false);
        }
        guard.remove_questions(|q| q.placement().subcategory_id() == Some(id));
        Ok(true)
    }

    async fn taxonomy_counts(&self) -> Result<TaxonomyCounts, StorageError> {
        let guard = self.lock()?;
        Ok(TaxonomyCounts {
            groups: guard.groups.len() as u64,
            subjects: guard.subjects.len() as u64,
            categories: guard.categories.len() as u64,
            subcategories: guard.subcategories.len() as u64,
        })
    }
}

#[async_trait]
impl QuestionRepository for InMemoryRepository {
    async fn insert_questions(
        &self,
        questions: &[NewQuestionRecord],
    ) -> Result<Vec<QuestionId>, StorageError> {
        let mut guard = self.lock()?;
        let placements_exist = questions.iter().all(|q| {
            let p = &q.placement;
            guard.groups.contains_key(&p.group_id())
                && guard.subjects.contains_key(&p.subject_id())
                && p.category_id()
                    .is_none_or(|id| guard.categories.contains_key(&id))
                && p.subcategory_id()
                    .is_none_or(|id| guard.subcategories.contains_key(&id))
        });
        if !placements_exist {
            return Err(StorageError::NotFound);
        }

        let mut ids = Vec::with_capacity(questions.len());
        for record in questions {
            let id = QuestionId::new(guard.next_id());
            let question = Question::new(
                id,
                record.placement,
                record.level,
                record.kind,
                record.metadata.clone(),
                record.created_at,
            );
            guard.questions.insert(id, question);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get_question(&self, id: QuestionId) -> Result<Option<Question>, StorageError> {
        Ok(self.lock()?.questions.get(&id).cloned())
    }

    async fn update_question(&self, question: &Question) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let slot = guard
            .questions
            .get_mut(&question.id())
            .ok_or(StorageError::NotFound)?;
        *slot = question.clone();
        Ok(())
    }

    async fn delete_question(&self, id: QuestionId) -> Result<bool, StorageError> {
        Ok(self.lock()?.questions.remove(&id).is_some())
    }

    async fn list_questions(
        &self,
        query: &QuestionQuery,
        page: PageRequest,
    ) -> Result<Page<Question>, StorageError> {
        let guard = self.lock()?;
        let rows = guard
            .questions
            .values()
            .filter(|q| query.matches(q))
            .cloned();
        Ok(paginate(rows, page))
    }

    async fn unseen_question_ids(
        &self,
        filter: &QuizFilter,
        excluded: &HashSet<QuestionId>,
    ) -> Result<Vec<QuestionId>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .questions
            .values()
            .filter(|q| filter.matches(q))
            .map(Question::id)
            .filter(|id| !excluded.contains(id))
            .collect())
    }

    async fn count_questions(&self) -> Result<u64, StorageError> {
        Ok(self.lock()?.questions.len() as u64)
    }
}

#[async_trait]
impl AccessTokenRepository for InMemoryRepository {
    async fn insert_token(&self, token: &AccessToken) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if guard.tokens.contains_key(token.key()) {
            return Err(StorageError::Conflict);
        }
        guard.tokens.insert(token.key().clone(), token.clone());
        Ok(())
    }

    async fn get_token(&self, key: &TokenKey) -> Result<Option<AccessToken>, StorageError> {
        Ok(self.lock()?.tokens.get(key).cloned())
    }

    async fn list_tokens(&self, page: PageRequest) -> Result<Page<AccessToken>, StorageError> {
        let guard = self.lock()?;
        let mut rows: Vec<AccessToken> = guard.tokens.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(paginate(rows.into_iter(), page))
    }

    async fn set_token_active(&self, key: &TokenKey, active: bool) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let token = guard.tokens.get_mut(key).ok_or(StorageError::NotFound)?;
        token.set_active(active);
        Ok(())
    }

    async fn count_tokens(&self) -> Result<u64, StorageError> {
        Ok(self.lock()?.tokens.len() as u64)
    }
}

#[async_trait]
impl SessionStore for InMemoryRepository {
    async fn load(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredSession>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .sessions
            .get(key)
            .filter(|s| !s.is_expired_at(now))
            .cloned())
    }

    async fn put(
        &self,
        key: &SessionKey,
        state: &QuizSessionState,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let mut guard = self.lock()?;
        let version = guard.sessions.get(key).map_or(1, |s| s.version + 1);
        guard.sessions.insert(
            *key,
            StoredSession {
                state: state.clone(),
                version,
                expires_at,
            },
        );
        Ok(version)
    }

    async fn compare_and_swap(
        &self,
        key: &SessionKey,
        expected_version: u64,
        state: &QuizSessionState,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let mut guard = self.lock()?;
        let stored = guard.sessions.get_mut(key).ok_or(StorageError::Conflict)?;
        if stored.version != expected_version {
            return Err(StorageError::Conflict);
        }
        stored.state = state.clone();
        stored.version += 1;
        stored.expires_at = expires_at;
        Ok(stored.version)
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), StorageError> {
        self.lock()?.sessions.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut guard = self.lock()?;
        let before = guard.sessions.len();
        guard.sessions.retain(|_, s| !s.is_expired_at(now));
        Ok((before - guard.sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbank_core::model::{
        FilterRequest, Level, Metadata, NodeName, Placement, QuestionKind,
    };
    use qbank_core::time::fixed_now;

    async fn seed_tree(repo: &InMemoryRepository) -> (Group, Subject, Category) {
        let now = fixed_now();
        let gid = repo
            .insert_groups(&[NewGroupRecord {
                name: NodeName::new("Science").unwrap(),
                description: None,
                created_at: now,
            }])
            .await
            .unwrap()[0];
        let sid = repo
            .insert_subjects(&[NewSubjectRecord {
                group_id: gid,
                name: NodeName::new("Physics").unwrap(),
                description: None,
                created_at: now,
            }])
            .await
            .unwrap()[0];
        let subject = repo.get_subject(sid).await.unwrap().unwrap();
        let cid = repo
            .insert_categories(&[NewCategoryRecord::under(
                &subject,
                NodeName::new("Optics").unwrap(),
                None,
                now,
            )])
            .await
            .unwrap()[0];
        (
            repo.get_group(gid).await.unwrap().unwrap(),
            subject,
            repo.get_category(cid).await.unwrap().unwrap(),
        )
    }

    fn question_record(placement: Placement, level: Level) -> NewQuestionRecord {
        NewQuestionRecord {
            placement,
            level,
            kind: QuestionKind::Mcq,
            metadata: Metadata::new(),
            created_at: fixed_now(),
        }
    }

    #[tokio::test]
    async fn duplicate_group_names_conflict_atomically() {
        let repo = InMemoryRepository::new();
        let record = NewGroupRecord {
            name: NodeName::new("Arts").unwrap(),
            description: None,
            created_at: fixed_now(),
        };
        let err = repo
            .insert_groups(&[record.clone(), record])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
        assert_eq!(repo.taxonomy_counts().await.unwrap().groups, 0);
    }

    #[tokio::test]
    async fn deleting_subject_cascades_to_questions() {
        let repo = InMemoryRepository::new();
        let (group, subject, category) = seed_tree(&repo).await;
        let placement = Placement::resolve(&group, &subject, Some(&category), None).unwrap();
        repo.insert_questions(&[question_record(placement, Level::Easy)])
            .await
            .unwrap();

        assert!(repo.delete_subject(subject.id()).await.unwrap());
        assert_eq!(repo.count_questions().await.unwrap(), 0);
        assert!(repo.get_category(category.id()).await.unwrap().is_none());
        assert!(repo.get_group(group.id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unseen_ids_follow_filter_and_exclusions() {
        let repo = InMemoryRepository::new();
        let (group, subject, category) = seed_tree(&repo).await;
        let placement = Placement::resolve(&group, &subject, Some(&category), None).unwrap();
        let ids = repo
            .insert_questions(&[
                question_record(placement, Level::Easy),
                question_record(placement, Level::Medium),
            ])
            .await
            .unwrap();

        let filter = FilterRequest {
            group_id: Some(group.id()),
            subject_id: Some(subject.id()),
            levels: vec![Level::Medium],
            ..FilterRequest::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(
            repo.unseen_question_ids(&filter, &HashSet::new()).await.unwrap(),
            vec![ids[1]]
        );

        let everything = FilterRequest {
            group_id: Some(group.id()),
            subject_id: Some(subject.id()),
            ..FilterRequest::default()
        }
        .resolve()
        .unwrap();
        let seen: HashSet<QuestionId> = [ids[0]].into_iter().collect();
        assert_eq!(
            repo.unseen_question_ids(&everything, &seen).await.unwrap(),
            vec![ids[1]]
        );
    }

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_version() {
        let repo = InMemoryRepository::new();
        let key = SessionKey::generate();
        let expires = fixed_now() + chrono::Duration::hours(1);
        let state = QuizSessionState::default();

        let v1 = repo.put(&key, &state, expires).await.unwrap();
        let v2 = repo.compare_and_swap(&key, v1, &state, expires).await.unwrap();
        assert_eq!(v2, v1 + 1);

        let err = repo
            .compare_and_swap(&key, v1, &state, expires)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
    }

    #[tokio::test]
    async fn expired_sessions_are_invisible_and_purgeable() {
        let repo = InMemoryRepository::new();
        let key = SessionKey::generate();
        let now = fixed_now();
        repo.put(&key, &QuizSessionState::default(), now)
            .await
            .unwrap();

        assert!(repo.load(&key, now).await.unwrap().is_none());
        assert_eq!(repo.purge_expired(now).await.unwrap(), 1);
    }
}
