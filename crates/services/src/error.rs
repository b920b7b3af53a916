//! Shared error types for the services crate.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use qbank_core::model::{FilterError, TokenError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Every validation problem found in one row of a batch submission.
///
/// `row` is 1-based; `errors` maps field name to message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub row: usize,
    pub errors: BTreeMap<String, String>,
}

/// Field errors collected while validating one row; the first message per field wins.
#[derive(Debug, Default)]
pub(crate) struct RowErrors(BTreeMap<String, String>);

impl RowErrors {
    pub(crate) fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert into a failure for the zero-based `index`, or `None` if the row is clean.
    pub(crate) fn into_failure(self, index: usize) -> Option<RowFailure> {
        if self.0.is_empty() {
            return None;
        }
        Some(RowFailure {
            row: index + 1,
            errors: self.0,
        })
    }
}

/// Errors emitted by `TaxonomyService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TaxonomyServiceError {
    #[error("no data provided")]
    EmptyBatch,
    #[error("{} row(s) failed validation", .0.len())]
    Rejected(Vec<RowFailure>),
    #[error("{0} not found")]
    ParentNotFound(&'static str),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `QuestionService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuestionServiceError {
    #[error("question not found")]
    NotFound,
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Domain(#[from] qbank_core::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `ImportService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ImportError {
    #[error("No data provided.")]
    Empty,
    #[error("Upload failed. Please fix the errors.")]
    Rejected(Vec<RowFailure>),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `TokenService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenServiceError {
    #[error("invalid or inactive token")]
    Invalid,
    #[error("token not found")]
    NotFound,
    #[error("could not generate a unique token key after {0} attempts")]
    KeySpaceExhausted(usize),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by the quiz session controller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuizError {
    #[error("Selecting a group and at least one subject is mandatory.")]
    Filter(#[from] FilterError),
    #[error("There is no active question session.")]
    NoActiveSession,
    #[error("No more new questions are available for your selection.")]
    Exhausted,
    #[error("the question session is busy, retry the request")]
    Contention,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
