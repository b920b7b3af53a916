use std::collections::HashSet;

use chrono::Duration;
use qbank_core::model::{
    AccessToken, CategoryId, FilterRequest, GroupId, Level, Metadata, NodeName, Placement,
    QuestionId, QuestionKind, QuizSessionState, SessionKey, SubjectId, TokenKey,
};
use qbank_core::time::fixed_now;
use storage::StorageError;
use storage::repository::{
    AccessTokenRepository, NewCategoryRecord, NewGroupRecord, NewQuestionRecord,
    NewSubCategoryRecord, NewSubjectRecord, PageRequest, QuestionQuery, QuestionRepository,
    SessionStore, TaxonomyRepository,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn name(raw: &str) -> NodeName {
    NodeName::new(raw).unwrap()
}

fn question(placement: Placement, level: Level) -> NewQuestionRecord {
    let mut metadata = Metadata::new();
    metadata.insert("prompt".into(), "2 + 2?".into());
    NewQuestionRecord {
        placement,
        level,
        kind: QuestionKind::Mcq,
        metadata,
        created_at: fixed_now(),
    }
}

#[tokio::test]
async fn taxonomy_and_questions_round_trip() {
    let repo = connect("memdb_taxonomy_round_trip").await;
    let now = fixed_now();

    let gid = repo
        .insert_groups(&[NewGroupRecord {
            name: name("Science"),
            description: Some("natural sciences".into()),
            created_at: now,
        }])
        .await
        .unwrap()[0];
    let sid = repo
        .insert_subjects(&[NewSubjectRecord {
            group_id: gid,
            name: name("Physics"),
            description: None,
            created_at: now,
        }])
        .await
        .unwrap()[0];
    let subject = repo.get_subject(sid).await.unwrap().unwrap();
    let cids = repo
        .insert_categories(&[
            NewCategoryRecord::under(&subject, name("Optics"), None, now),
            NewCategoryRecord::under(&subject, name("Mechanics"), None, now),
        ])
        .await
        .unwrap();
    let optics = repo.get_category(cids[0]).await.unwrap().unwrap();
    let scid = repo
        .insert_subcategories(&[NewSubCategoryRecord::under(&optics, name("Lenses"), None, now)])
        .await
        .unwrap()[0];
    let lenses = repo.get_subcategory(scid).await.unwrap().unwrap();
    let group = repo.get_group(gid).await.unwrap().unwrap();
    assert_eq!(group.description(), Some("natural sciences"));

    let found = repo
        .categories_by_name(&[(sid, "Mechanics".into()), (sid, "Nope".into())])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), cids[1]);

    let placement = Placement::resolve(&group, &subject, Some(&optics), Some(&lenses)).unwrap();
    let ids = repo
        .insert_questions(&[question(placement, Level::Easy), question(placement, Level::Advance)])
        .await
        .unwrap();

    let stored = repo.get_question(ids[0]).await.unwrap().unwrap();
    assert_eq!(stored.placement(), &placement);
    assert_eq!(stored.metadata().get("prompt").and_then(|v| v.as_str()), Some("2 + 2?"));

    let filter = FilterRequest {
        group_id: Some(gid),
        subject_id: Some(sid),
        category_ids: vec![cids[1]],
        subcategory_ids: vec![scid],
        levels: vec![Level::Advance],
    }
    .resolve()
    .unwrap();
    assert_eq!(
        repo.unseen_question_ids(&filter, &HashSet::new()).await.unwrap(),
        vec![ids[1]]
    );

    let whole_subject = FilterRequest {
        group_id: Some(gid),
        subject_id: Some(sid),
        ..FilterRequest::default()
    }
    .resolve()
    .unwrap();
    let seen: HashSet<QuestionId> = [ids[0], QuestionId::new(u64::MAX)].into_iter().collect();
    assert_eq!(
        repo.unseen_question_ids(&whole_subject, &seen).await.unwrap(),
        vec![ids[1]]
    );
    let seen: HashSet<QuestionId> = ids.iter().copied().collect();
    assert!(
        repo.unseen_question_ids(&whole_subject, &seen)
            .await
            .unwrap()
            .is_empty()
    );

    let listed = repo
        .list_questions(
            &QuestionQuery {
                level: Some(Level::Easy),
                ..QuestionQuery::default()
            },
            PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(listed.total, 1);

    let counts = repo.taxonomy_counts().await.unwrap();
    assert_eq!((counts.groups, counts.categories, counts.subcategories), (1, 2, 1));
}

#[tokio::test]
async fn out_of_range_filter_ids_match_nothing() {
    let repo = connect("memdb_out_of_range_filter").await;
    let now = fixed_now();
    let gid = repo
        .insert_groups(&[NewGroupRecord {
            name: name("Science"),
            description: None,
            created_at: now,
        }])
        .await
        .unwrap()[0];
    let sid = repo
        .insert_subjects(&[NewSubjectRecord {
            group_id: gid,
            name: name("Physics"),
            description: None,
            created_at: now,
        }])
        .await
        .unwrap()[0];
    let group = repo.get_group(gid).await.unwrap().unwrap();
    let subject = repo.get_subject(sid).await.unwrap().unwrap();
    let cid = repo
        .insert_categories(&[NewCategoryRecord::under(&subject, name("Optics"), None, now)])
        .await
        .unwrap()[0];
    let optics = repo.get_category(cid).await.unwrap().unwrap();
    let placement = Placement::resolve(&group, &subject, Some(&optics), None).unwrap();
    let ids = repo
        .insert_questions(&[question(placement, Level::Easy)])
        .await
        .unwrap();

    let none = HashSet::new();
    let huge_group = FilterRequest {
        group_id: Some(GroupId::new(u64::MAX)),
        subject_id: Some(sid),
        ..FilterRequest::default()
    }
    .resolve()
    .unwrap();
    assert!(repo.unseen_question_ids(&huge_group, &none).await.unwrap().is_empty());

    let huge_subject = FilterRequest {
        group_id: Some(gid),
        subject_id: Some(SubjectId::new(u64::MAX)),
        ..FilterRequest::default()
    }
    .resolve()
    .unwrap();
    assert!(repo.unseen_question_ids(&huge_subject, &none).await.unwrap().is_empty());

    let only_huge_category = FilterRequest {
        group_id: Some(gid),
        subject_id: Some(sid),
        category_ids: vec![CategoryId::new(u64::MAX)],
        ..FilterRequest::default()
    }
    .resolve()
    .unwrap();
    assert!(
        repo.unseen_question_ids(&only_huge_category, &none)
            .await
            .unwrap()
            .is_empty()
    );

    let mixed_categories = FilterRequest {
        group_id: Some(gid),
        subject_id: Some(sid),
        category_ids: vec![cid, CategoryId::new(u64::MAX)],
        ..FilterRequest::default()
    }
    .resolve()
    .unwrap();
    assert_eq!(repo.unseen_question_ids(&mixed_categories, &none).await.unwrap(), ids);
}

#[tokio::test]
async fn duplicate_subject_name_is_a_conflict_and_rolls_back() {
    let repo = connect("memdb_duplicate_subject").await;
    let now = fixed_now();
    let gid = repo
        .insert_groups(&[NewGroupRecord {
            name: name("Arts"),
            description: None,
            created_at: now,
        }])
        .await
        .unwrap()[0];

    let record = |n: &str| NewSubjectRecord {
        group_id: gid,
        name: name(n),
        description: None,
        created_at: now,
    };
    let err = repo
        .insert_subjects(&[record("Music"), record("Music")])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict));
    assert_eq!(repo.taxonomy_counts().await.unwrap().subjects, 0);
}

#[tokio::test]
async fn deleting_a_group_cascades() {
    let repo = connect("memdb_cascade").await;
    let now = fixed_now();
    let gid = repo
        .insert_groups(&[NewGroupRecord {
            name: name("History"),
            description: None,
            created_at: now,
        }])
        .await
        .unwrap()[0];
    let sid = repo
        .insert_subjects(&[NewSubjectRecord {
            group_id: gid,
            name: name("Ancient"),
            description: None,
            created_at: now,
        }])
        .await
        .unwrap()[0];
    let group = repo.get_group(gid).await.unwrap().unwrap();
    let subject = repo.get_subject(sid).await.unwrap().unwrap();
    let placement = Placement::resolve(&group, &subject, None, None).unwrap();
    repo.insert_questions(&[question(placement, Level::Medium)])
        .await
        .unwrap();

    assert!(repo.delete_group(gid).await.unwrap());
    assert!(!repo.delete_group(gid).await.unwrap());
    assert_eq!(repo.count_questions().await.unwrap(), 0);
    assert!(repo.get_subject(sid).await.unwrap().is_none());
}

#[tokio::test]
async fn tokens_persist_and_toggle() {
    let repo = connect("memdb_tokens").await;
    let key = TokenKey::new("ABCD1234").unwrap();
    let token = AccessToken::new(key.clone(), Some("classroom".into()), fixed_now());
    repo.insert_token(&token).await.unwrap();

    let err = repo.insert_token(&token).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    repo.set_token_active(&key, false).await.unwrap();
    let fetched = repo.get_token(&key).await.unwrap().unwrap();
    assert!(!fetched.is_active());
    assert_eq!(fetched.description(), Some("classroom"));

    let missing = TokenKey::new("ZZZZ9999").unwrap();
    let err = repo.set_token_active(&missing, true).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}

#[tokio::test]
async fn sessions_use_optimistic_versions_and_expire() {
    let repo = connect("memdb_sessions").await;
    let key = SessionKey::generate();
    let now = fixed_now();
    let expires = now + Duration::hours(1);
    let state = QuizSessionState::default();

    let v1 = repo.put(&key, &state, expires).await.unwrap();
    assert_eq!(v1, 1);
    let v2 = repo.compare_and_swap(&key, v1, &state, expires).await.unwrap();
    assert_eq!(v2, 2);
    let err = repo
        .compare_and_swap(&key, v1, &state, expires)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    let loaded = repo.load(&key, now).await.unwrap().unwrap();
    assert_eq!(loaded.version, 2);
    assert!(repo.load(&key, expires).await.unwrap().is_none());

    assert_eq!(repo.purge_expired(expires).await.unwrap(), 1);
    let err = repo
        .compare_and_swap(&key, 2, &state, expires)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict));
}
