use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use qbank_core::model::{
    FilterRequest, Question, QuizPhase, QuizSessionState, SessionKey,
};
use storage::repository::{QuestionRepository, SessionStore, StorageError};

use super::allocator::BatchAllocator;
use crate::Clock;
use crate::error::QuizError;

/// Ids allocated per refill.
pub const QUIZ_BATCH_SIZE: usize = 50;

/// Default session lifetime: two weeks.
pub const DEFAULT_SESSION_TTL_SECS: i64 = 1_209_600;

/// Read-modify-write attempts before a busy session is reported to the caller.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Outcome of starting a quiz.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizStart {
    pub session_key: SessionKey,
    /// `None` when nothing matches the filter.
    pub question: Option<Question>,
}

/// Snapshot of a session for status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizStatus {
    pub phase: QuizPhase,
    pub seen: usize,
    pub pending: usize,
}

/// Serves random, non-repeating questions per session.
///
/// Session documents live in a [`SessionStore`]. Every mutation of an
/// existing session is a compare-and-swap on its version, so two concurrent
/// requests for the same session can never hand out the same question or
/// lose each other's progress.
#[derive(Clone)]
pub struct QuizSessionService {
    clock: Clock,
    ttl: Duration,
    batch_size: usize,
    sessions: Arc<dyn SessionStore>,
    questions: Arc<dyn QuestionRepository>,
    allocator: BatchAllocator,
}

impl QuizSessionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        ttl: Duration,
        sessions: Arc<dyn SessionStore>,
        questions: Arc<dyn QuestionRepository>,
    ) -> Self {
        Self {
            clock,
            ttl,
            batch_size: QUIZ_BATCH_SIZE,
            sessions,
            allocator: BatchAllocator::new(Arc::clone(&questions)),
            questions,
        }
    }

    /// Override the refill size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn expiry(&self) -> DateTime<Utc> {
        self.clock.expiry_after(self.ttl)
    }

    /// Start (or restart) a quiz and serve its first question.
    ///
    /// A caller already holding a session key keeps it; its previous seen set
    /// and batch are discarded.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Filter` when the group or subject is missing (nothing
    /// is written in that case), or `QuizError::Storage` if persistence fails.
    pub async fn start(
        &self,
        existing: Option<SessionKey>,
        request: FilterRequest,
    ) -> Result<QuizStart, QuizError> {
        let filter = request.resolve()?;
        let session_key = existing.unwrap_or_else(SessionKey::generate);

        let mut state = QuizSessionState::begin(filter);
        let question = self.draw(&mut state).await?;
        self.sessions.put(&session_key, &state, self.expiry()).await?;

        info!(
            session = %session_key,
            served = question.is_some(),
            pending = state.pending_len(),
            "quiz session started"
        );
        Ok(QuizStart {
            session_key,
            question,
        })
    }

    /// Serve the next unseen question of an active session.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::NoActiveSession` without a started session,
    /// `QuizError::Exhausted` once every matching question was served,
    /// `QuizError::Contention` if the session kept changing underneath us, or
    /// `QuizError::Storage` if persistence fails.
    pub async fn next(&self, key: Option<&SessionKey>) -> Result<Question, QuizError> {
        let key = key.ok_or(QuizError::NoActiveSession)?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let stored = self
                .sessions
                .load(key, self.clock.now())
                .await?
                .ok_or(QuizError::NoActiveSession)?;
            let mut state = stored.state;
            if state.filter().is_none() {
                return Err(QuizError::NoActiveSession);
            }

            let drawn = self.draw(&mut state).await?;
            match self
                .sessions
                .compare_and_swap(key, stored.version, &state, self.expiry())
                .await
            {
                Ok(_) => {
                    return match drawn {
                        Some(question) => {
                            debug!(
                                session = %key,
                                question_id = question.id().value(),
                                seen = state.seen().len(),
                                "served question"
                            );
                            Ok(question)
                        }
                        None => {
                            info!(session = %key, seen = state.seen().len(), "quiz exhausted");
                            Err(QuizError::Exhausted)
                        }
                    };
                }
                Err(StorageError::Conflict) => {
                    warn!(session = %key, attempt, "session changed concurrently; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(QuizError::Contention)
    }

    /// Forget the session's filter, seen set and batch. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Storage` if the delete fails.
    pub async fn reset(&self, key: Option<&SessionKey>) -> Result<(), QuizError> {
        if let Some(key) = key {
            self.sessions.delete(key).await?;
            info!(session = %key, "quiz session reset");
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `QuizError::Storage` if the lookup fails.
    pub async fn status(&self, key: Option<&SessionKey>) -> Result<QuizStatus, QuizError> {
        let stored = match key {
            Some(key) => self.sessions.load(key, self.clock.now()).await?,
            None => None,
        };
        let state = stored.map(|s| s.state).unwrap_or_default();
        Ok(QuizStatus {
            phase: state.phase(),
            seen: state.seen().len(),
            pending: state.pending_len(),
        })
    }

    /// Drop sessions past their expiry. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Storage` if the delete fails.
    pub async fn purge_expired(&self) -> Result<u64, QuizError> {
        let purged = self.sessions.purge_expired(self.clock.now()).await?;
        info!(purged, "expired quiz sessions purged");
        Ok(purged)
    }

    /// Pop the next servable question, refilling the batch as needed.
    ///
    /// Ids that no longer resolve to a question matching the filter are
    /// skipped. Every pass marks one id as seen and refills exclude seen ids,
    /// so the loop ends after at most as many passes as there are unseen
    /// matches.
    async fn draw(&self, state: &mut QuizSessionState) -> Result<Option<Question>, StorageError> {
        let Some(filter) = state.filter().cloned() else {
            return Ok(None);
        };

        loop {
            if state.needs_refill() {
                let batch = self
                    .allocator
                    .allocate(&filter, &state.seen_set(), self.batch_size)
                    .await?;
                if state.refill(batch) == 0 {
                    state.mark_exhausted();
                    return Ok(None);
                }
            }
            let Some(id) = state.take_next() else {
                continue;
            };
            match self.questions.get_question(id).await? {
                Some(question) if filter.matches(&question) => return Ok(Some(question)),
                _ => debug!(question_id = id.value(), "skipping stale question id"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbank_core::model::{
        GroupId, Level, Metadata, NodeName, Placement, QuestionId, SubjectId,
    };
    use qbank_core::time::fixed_clock;
    use std::collections::HashSet;
    use storage::repository::{NewGroupRecord, NewQuestionRecord, NewSubjectRecord, Storage};

    struct Fixture {
        service: QuizSessionService,
        storage: Storage,
        group: GroupId,
        subject: SubjectId,
    }

    async fn fixture(levels: &[Level]) -> Fixture {
        let storage = Storage::in_memory();
        let now = fixed_clock().now();
        let group = storage
            .taxonomy
            .insert_groups(&[NewGroupRecord {
                name: NodeName::new("Science").unwrap(),
                description: None,
                created_at: now,
            }])
            .await
            .unwrap()[0];
        let subject = storage
            .taxonomy
            .insert_subjects(&[NewSubjectRecord {
                group_id: group,
                name: NodeName::new("Physics").unwrap(),
                description: None,
                created_at: now,
            }])
            .await
            .unwrap()[0];
        let placement = Placement::from_persisted(group, subject, None, None);
        let records: Vec<_> = levels
            .iter()
            .map(|&level| NewQuestionRecord {
                placement,
                level,
                kind: qbank_core::model::QuestionKind::Mcq,
                metadata: Metadata::new(),
                created_at: now,
            })
            .collect();
        storage.questions.insert_questions(&records).await.unwrap();

        let service = QuizSessionService::new(
            fixed_clock(),
            Duration::seconds(DEFAULT_SESSION_TTL_SECS),
            Arc::clone(&storage.sessions),
            Arc::clone(&storage.questions),
        );
        Fixture {
            service,
            storage,
            group,
            subject,
        }
    }

    fn request(fx: &Fixture, levels: Vec<Level>) -> FilterRequest {
        FilterRequest {
            group_id: Some(fx.group),
            subject_id: Some(fx.subject),
            levels,
            ..FilterRequest::default()
        }
    }

    #[tokio::test]
    async fn start_without_subject_writes_nothing() {
        let fx = fixture(&[Level::Easy]).await;
        let key = SessionKey::generate();
        let err = fx
            .service
            .start(
                Some(key),
                FilterRequest {
                    group_id: Some(fx.group),
                    ..FilterRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuizError::Filter(_)));
        let status = fx.service.status(Some(&key)).await.unwrap();
        assert_eq!(status.phase, QuizPhase::Uninitialized);
    }

    #[tokio::test]
    async fn serves_each_match_once_then_exhausts() {
        let fx = fixture(&[Level::Easy, Level::Easy, Level::Medium]).await;
        let started = fx
            .service
            .start(None, request(&fx, vec![Level::Easy]))
            .await
            .unwrap();
        let key = started.session_key;
        let first = started.question.unwrap().id();
        let second = fx.service.next(Some(&key)).await.unwrap().id();
        assert_ne!(first, second);

        let err = fx.service.next(Some(&key)).await.unwrap_err();
        assert!(matches!(err, QuizError::Exhausted));
        let status = fx.service.status(Some(&key)).await.unwrap();
        assert_eq!(status.phase, QuizPhase::Exhausted);
        assert_eq!(status.seen, 2);
    }

    #[tokio::test]
    async fn small_batches_refill_without_repeats() {
        let fx = fixture(&[Level::Easy; 7]).await;
        let service = fx.service.clone().with_batch_size(2);
        let started = service.start(None, request(&fx, vec![])).await.unwrap();
        let key = started.session_key;

        let mut served: HashSet<QuestionId> = HashSet::new();
        served.insert(started.question.unwrap().id());
        while let Ok(question) = service.next(Some(&key)).await {
            assert!(served.insert(question.id()), "question served twice");
        }
        assert_eq!(served.len(), 7);
    }

    #[tokio::test]
    async fn deleted_questions_are_skipped() {
        let fx = fixture(&[Level::Easy, Level::Easy, Level::Easy]).await;
        let started = fx.service.start(None, request(&fx, vec![])).await.unwrap();
        let key = started.session_key;
        let served = started.question.unwrap().id();

        for id in [1_u64, 2, 3, 4, 5].map(QuestionId::new) {
            if id != served {
                fx.storage.questions.delete_question(id).await.unwrap();
            }
        }
        let err = fx.service.next(Some(&key)).await.unwrap_err();
        assert!(matches!(err, QuizError::Exhausted));
    }

    #[tokio::test]
    async fn next_without_session_is_rejected() {
        let fx = fixture(&[Level::Easy]).await;
        assert!(matches!(
            fx.service.next(None).await,
            Err(QuizError::NoActiveSession)
        ));
        assert!(matches!(
            fx.service.next(Some(&SessionKey::generate())).await,
            Err(QuizError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn start_with_no_matches_returns_no_question() {
        let fx = fixture(&[Level::Easy]).await;
        let started = fx
            .service
            .start(None, request(&fx, vec![Level::Advance]))
            .await
            .unwrap();
        assert!(started.question.is_none());
        let err = fx.service.next(Some(&started.session_key)).await.unwrap_err();
        assert!(matches!(err, QuizError::Exhausted));
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let fx = fixture(&[Level::Easy]).await;
        let started = fx.service.start(None, request(&fx, vec![])).await.unwrap();
        let key = started.session_key;
        fx.service.reset(Some(&key)).await.unwrap();
        fx.service.reset(Some(&key)).await.unwrap();
        fx.service.reset(None).await.unwrap();
        assert!(matches!(
            fx.service.next(Some(&key)).await,
            Err(QuizError::NoActiveSession)
        ));
    }
}
