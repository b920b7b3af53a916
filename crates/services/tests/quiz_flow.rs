use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use qbank_core::model::{FilterRequest, GroupId, Level, QuestionId, SessionKey, SubjectId};
use qbank_core::time::fixed_clock;
use serde_json::json;
use services::quiz::DEFAULT_SESSION_TTL_SECS;
use services::{AppServices, GroupDraft, QuizError, SubjectDraft};
use storage::repository::Storage;

async fn seeded(levels: &[&str]) -> (AppServices, GroupId, SubjectId) {
    let storage = Storage::in_memory();
    let services = AppServices::from_storage(
        &storage,
        fixed_clock(),
        Duration::seconds(DEFAULT_SESSION_TTL_SECS),
    );
    let group = services
        .taxonomy()
        .create_groups(vec![GroupDraft {
            name: "Science".into(),
            description: None,
        }])
        .await
        .unwrap()
        .remove(0);
    let subject = services
        .taxonomy()
        .create_subjects(vec![SubjectDraft {
            group: "Science".into(),
            name: "Physics".into(),
            description: None,
        }])
        .await
        .unwrap()
        .remove(0);
    services
        .taxonomy()
        .create_categories(vec![services::CategoryDraft {
            group: "Science".into(),
            subject: "Physics".into(),
            name: "General".into(),
            description: None,
        }])
        .await
        .unwrap();

    let rows = levels
        .iter()
        .enumerate()
        .map(|(i, level)| {
            json!({
                "group": "Science",
                "subject": "Physics",
                "category": "General",
                "level": level,
                "type": "mcq",
                "metadata": {"prompt": format!("question {i}")}
            })
        })
        .collect();
    services.import().import_json(rows).await.unwrap();
    (services, group.id(), subject.id())
}

fn filter(group: GroupId, subject: SubjectId, levels: Vec<Level>) -> FilterRequest {
    FilterRequest {
        group_id: Some(group),
        subject_id: Some(subject),
        levels,
        ..FilterRequest::default()
    }
}

#[tokio::test]
async fn two_easy_questions_are_served_once_each() {
    // Ids are shared across tables: group 1, subject 2, category 3, then
    // six medium questions (4..=9) and the two easy ones, 10 and 11.
    let (services, group, subject) =
        seeded(&["medium", "medium", "medium", "medium", "medium", "medium", "easy", "easy"])
            .await;
    let quiz = services.quiz();
    let expected: HashSet<QuestionId> = [10, 11].map(QuestionId::new).into_iter().collect();

    let started = quiz
        .start(None, filter(group, subject, vec![Level::Easy]))
        .await
        .unwrap();
    let key = started.session_key;
    let first = started.question.unwrap().id();
    assert!(expected.contains(&first));
    assert_eq!(quiz.status(Some(&key)).await.unwrap().seen, 1);

    let second = quiz.next(Some(&key)).await.unwrap().id();
    assert!(expected.contains(&second));
    assert_ne!(first, second);

    assert!(matches!(
        quiz.next(Some(&key)).await,
        Err(QuizError::Exhausted)
    ));
}

#[tokio::test]
async fn sqlite_start_with_an_unrepresentable_group_is_an_empty_session() {
    let services = AppServices::new_sqlite(
        "sqlite:file:memdb_quiz_huge_ids?mode=memory&cache=shared",
        fixed_clock(),
        Duration::seconds(DEFAULT_SESSION_TTL_SECS),
    )
    .await
    .unwrap();
    let quiz = services.quiz();

    let started = quiz
        .start(None, filter(GroupId::new(u64::MAX), SubjectId::new(1), Vec::new()))
        .await
        .unwrap();
    assert!(started.question.is_none());
    assert!(matches!(
        quiz.next(Some(&started.session_key)).await,
        Err(QuizError::Exhausted)
    ));
}

#[tokio::test]
async fn exhaustion_follows_exactly_the_matching_count() {
    let levels = vec!["easy"; 120];
    let (services, group, subject) = seeded(&levels).await;
    let quiz = services.quiz();

    let started = quiz
        .start(None, filter(group, subject, Vec::new()))
        .await
        .unwrap();
    let key = started.session_key;
    let mut served = HashSet::new();
    served.insert(started.question.unwrap().id());
    for _ in 1..120 {
        let question = quiz.next(Some(&key)).await.unwrap();
        assert!(served.insert(question.id()), "repeated {:?}", question.id());
    }
    assert!(matches!(
        quiz.next(Some(&key)).await,
        Err(QuizError::Exhausted)
    ));
}

#[tokio::test]
async fn reset_then_start_can_serve_seen_questions_again() {
    let (services, group, subject) = seeded(&["easy"]).await;
    let quiz = services.quiz();

    let first = quiz
        .start(None, filter(group, subject, Vec::new()))
        .await
        .unwrap();
    let key = first.session_key;
    quiz.reset(Some(&key)).await.unwrap();

    let again = quiz
        .start(Some(key), filter(group, subject, Vec::new()))
        .await
        .unwrap();
    assert_eq!(again.session_key, key);
    assert_eq!(
        again.question.map(|q| q.id()),
        first.question.map(|q| q.id())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_next_calls_never_share_a_question() {
    let levels = vec!["easy"; 40];
    let (services, group, subject) = seeded(&levels).await;
    let quiz = services.quiz();
    let started = quiz
        .start(None, filter(group, subject, Vec::new()))
        .await
        .unwrap();
    let key: SessionKey = started.session_key;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let quiz = Arc::clone(&quiz);
        handles.push(tokio::spawn(async move {
            let mut got = Vec::new();
            loop {
                match quiz.next(Some(&key)).await {
                    Ok(question) => got.push(question.id()),
                    Err(QuizError::Contention) => {}
                    Err(_) => break,
                }
            }
            got
        }));
    }

    let mut served: HashSet<QuestionId> = HashSet::new();
    served.insert(started.question.unwrap().id());
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(served.insert(id), "question {id} served twice");
        }
    }
    assert_eq!(served.len(), 40);
}
