use thiserror::Error;

use crate::model::{FilterError, QuestionError, TaxonomyError, TokenError};

/// Any domain validation failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Token(#[from] TokenError),
}
