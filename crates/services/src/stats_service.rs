use std::sync::Arc;

use serde::Serialize;
use storage::repository::{
    AccessTokenRepository, QuestionRepository, StorageError, TaxonomyRepository,
};

/// Row counts shown on the admin home dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardCounts {
    pub total_groups: u64,
    pub total_subjects: u64,
    pub total_categories: u64,
    pub total_subcategories: u64,
    pub total_questions: u64,
    #[serde(rename = "total_access_tokens")]
    pub total_tokens: u64,
}

#[derive(Clone)]
pub struct StatsService {
    taxonomy: Arc<dyn TaxonomyRepository>,
    questions: Arc<dyn QuestionRepository>,
    tokens: Arc<dyn AccessTokenRepository>,
}

impl StatsService {
    #[must_use]
    pub fn new(
        taxonomy: Arc<dyn TaxonomyRepository>,
        questions: Arc<dyn QuestionRepository>,
        tokens: Arc<dyn AccessTokenRepository>,
    ) -> Self {
        Self {
            taxonomy,
            questions,
            tokens,
        }
    }

    /// # Errors
    ///
    /// Returns `StorageError` if any count query fails.
    pub async fn dashboard(&self) -> Result<DashboardCounts, StorageError> {
        let taxonomy = self.taxonomy.taxonomy_counts().await?;
        Ok(DashboardCounts {
            total_groups: taxonomy.groups,
            total_subjects: taxonomy.subjects,
            total_categories: taxonomy.categories,
            total_subcategories: taxonomy.subcategories,
            total_questions: self.questions.count_questions().await?,
            total_tokens: self.tokens.count_tokens().await?,
        })
    }
}
