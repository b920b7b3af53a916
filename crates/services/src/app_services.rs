use chrono::Duration;
use std::sync::Arc;

use storage::repository::Storage;

use crate::Clock;
use crate::error::AppServicesError;
use crate::import_service::ImportService;
use crate::question_service::QuestionService;
use crate::quiz::QuizSessionService;
use crate::stats_service::StatsService;
use crate::taxonomy_service::TaxonomyService;
use crate::token_service::TokenService;

/// Assembles every app-facing service over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    taxonomy: Arc<TaxonomyService>,
    questions: Arc<QuestionService>,
    import: Arc<ImportService>,
    tokens: Arc<TokenService>,
    stats: Arc<StatsService>,
    quiz: Arc<QuizSessionService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the database cannot be opened or migrated.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        session_ttl: Duration,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock, session_ttl))
    }

    /// Build services over the in-memory backend.
    #[must_use]
    pub fn in_memory(clock: Clock, session_ttl: Duration) -> Self {
        Self::from_storage(&Storage::in_memory(), clock, session_ttl)
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock, session_ttl: Duration) -> Self {
        let taxonomy = Arc::new(TaxonomyService::new(clock, Arc::clone(&storage.taxonomy)));
        let questions = Arc::new(QuestionService::new(
            clock,
            Arc::clone(&storage.taxonomy),
            Arc::clone(&storage.questions),
        ));
        let import = Arc::new(ImportService::new(
            clock,
            Arc::clone(&storage.taxonomy),
            Arc::clone(&storage.questions),
        ));
        let tokens = Arc::new(TokenService::new(clock, Arc::clone(&storage.tokens)));
        let stats = Arc::new(StatsService::new(
            Arc::clone(&storage.taxonomy),
            Arc::clone(&storage.questions),
            Arc::clone(&storage.tokens),
        ));
        let quiz = Arc::new(QuizSessionService::new(
            clock,
            session_ttl,
            Arc::clone(&storage.sessions),
            Arc::clone(&storage.questions),
        ));

        Self {
            taxonomy,
            questions,
            import,
            tokens,
            stats,
            quiz,
        }
    }

    #[must_use]
    pub fn taxonomy(&self) -> Arc<TaxonomyService> {
        Arc::clone(&self.taxonomy)
    }

    #[must_use]
    pub fn questions(&self) -> Arc<QuestionService> {
        Arc::clone(&self.questions)
    }

    #[must_use]
    pub fn import(&self) -> Arc<ImportService> {
        Arc::clone(&self.import)
    }

    #[must_use]
    pub fn tokens(&self) -> Arc<TokenService> {
        Arc::clone(&self.tokens)
    }

    #[must_use]
    pub fn stats(&self) -> Arc<StatsService> {
        Arc::clone(&self.stats)
    }

    #[must_use]
    pub fn quiz(&self) -> Arc<QuizSessionService> {
        Arc::clone(&self.quiz)
    }
}
