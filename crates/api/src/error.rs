//! HTTP error mapping.
//!
//! Every handler returns `Result<_, ApiError>`. Service errors convert into
//! `ApiError` with `?`; the conversion decides the status code, and internal
//! failures are logged here and masked from the client.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use services::{
    ImportError, QuestionServiceError, QuizError, RowFailure, TaxonomyServiceError,
    TokenServiceError,
};
use storage::StorageError;

const INTERNAL_MESSAGE: &str = "Internal server error.";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden,
    NotFound(String),
    Conflict(String),
    /// A batch submission with per-row failures; nothing was written.
    Rejected {
        message: String,
        failures: Vec<RowFailure>,
    },
    Internal,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub(crate) fn internal(context: &str, err: &dyn std::error::Error) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Rejected { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::Rejected { message, failures } => json!({
                "message": message,
                "failed_count": failures.len(),
                "failed_items": failures,
            }),
            Self::BadRequest(m) | Self::Unauthorized(m) | Self::NotFound(m) | Self::Conflict(m) => {
                json!({ "error": m })
            }
            Self::Forbidden => json!({ "error": "A valid admin key is required." }),
            Self::Internal => json!({ "error": INTERNAL_MESSAGE }),
        };
        (status, Json(body)).into_response()
    }
}

// ─── Conversions ───────────────────────────────────────────────────────────────

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => Self::NotFound("Not found.".into()),
            StorageError::Conflict => Self::Conflict("The resource already exists.".into()),
            other => Self::internal("storage failure", &other),
        }
    }
}

impl From<TaxonomyServiceError> for ApiError {
    fn from(err: TaxonomyServiceError) -> Self {
        match err {
            TaxonomyServiceError::EmptyBatch => Self::bad_request("No data provided."),
            TaxonomyServiceError::Rejected(failures) => Self::Rejected {
                message: "Creation failed. Please fix the errors.".into(),
                failures,
            },
            TaxonomyServiceError::ParentNotFound(kind) => {
                Self::NotFound(format!("The {kind} does not exist."))
            }
            TaxonomyServiceError::Storage(e) => e.into(),
            other => Self::internal("taxonomy failure", &other),
        }
    }
}

impl From<QuestionServiceError> for ApiError {
    fn from(err: QuestionServiceError) -> Self {
        match err {
            QuestionServiceError::NotFound => Self::NotFound("Question not found.".into()),
            QuestionServiceError::Invalid(message) => Self::BadRequest(message),
            QuestionServiceError::Domain(e) => Self::BadRequest(e.to_string()),
            QuestionServiceError::Storage(e) => e.into(),
            other => Self::internal("question failure", &other),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Empty => Self::bad_request(ImportError::Empty.to_string()),
            ImportError::Rejected(failures) => {
                tracing::info!(failed = failures.len(), "bulk upload rejected");
                Self::Rejected {
                    message: "Upload failed. Please fix the errors.".into(),
                    failures,
                }
            }
            ImportError::Storage(e) => e.into(),
            other => Self::internal("import failure", &other),
        }
    }
}

impl From<TokenServiceError> for ApiError {
    fn from(err: TokenServiceError) -> Self {
        match err {
            TokenServiceError::Invalid => Self::bad_request("Invalid or inactive token."),
            TokenServiceError::NotFound => Self::NotFound("Token not found.".into()),
            TokenServiceError::Token(e) => Self::BadRequest(e.to_string()),
            TokenServiceError::Storage(e) => e.into(),
            other => Self::internal("token failure", &other),
        }
    }
}

impl From<QuizError> for ApiError {
    fn from(err: QuizError) -> Self {
        match err {
            QuizError::Filter(_) | QuizError::NoActiveSession => Self::BadRequest(err.to_string()),
            QuizError::Exhausted => Self::NotFound(err.to_string()),
            QuizError::Contention => Self::Conflict(err.to_string()),
            QuizError::Storage(e) => e.into(),
            other => Self::internal("quiz failure", &other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiz_errors_keep_their_contract_statuses() {
        assert_eq!(
            ApiError::from(QuizError::NoActiveSession).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(QuizError::Exhausted).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(QuizError::Contention).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn storage_failures_are_masked() {
        let err = ApiError::from(StorageError::Connection("db is gone".into()));
        assert!(matches!(err, ApiError::Internal));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
