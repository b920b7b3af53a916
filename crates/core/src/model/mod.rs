mod ids;
mod question;
mod quiz;
mod taxonomy;
mod token;

pub use ids::{
    CategoryId, GroupId, ParseIdError, QuestionId, SessionKey, SubCategoryId, SubjectId,
};
pub use question::{Level, Metadata, Placement, Question, QuestionError, QuestionKind};
pub use quiz::{FilterError, FilterRequest, FilterScope, QuizFilter, QuizPhase, QuizSessionState};
pub use taxonomy::{
    Category, Group, MAX_DESCRIPTION_LEN, MAX_NAME_LEN, NodeName, SubCategory, Subject,
    TaxonomyError, TaxonomyLevel, normalize_description,
};
pub use token::{AccessToken, TOKEN_ALPHABET, TOKEN_KEY_LEN, TokenError, TokenKey};
