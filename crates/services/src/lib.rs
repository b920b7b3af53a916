#![forbid(unsafe_code)]

pub mod app_services;
pub mod error;
pub mod import_service;
mod lookup;
pub mod question_service;
pub mod quiz;
pub mod stats_service;
pub mod taxonomy_service;
pub mod token_service;

pub use qbank_core::Clock;

pub use app_services::AppServices;
pub use error::{
    AppServicesError, ImportError, QuestionServiceError, QuizError, RowFailure,
    TaxonomyServiceError, TokenServiceError,
};
pub use import_service::{ImportRecord, ImportService};
pub use question_service::{QuestionDetail, QuestionDraft, QuestionPatch, QuestionService};
pub use quiz::{BatchAllocator, QUIZ_BATCH_SIZE, QuizSessionService, QuizStart, QuizStatus};
pub use stats_service::{DashboardCounts, StatsService};
pub use taxonomy_service::{
    CategoryDraft, GroupDraft, SubCategoryDraft, SubjectDraft, TaxonomyService,
};
pub use token_service::TokenService;
