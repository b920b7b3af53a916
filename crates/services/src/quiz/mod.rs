mod allocator;
mod controller;

// Public API of the quiz session engine.
pub use crate::error::QuizError;
pub use allocator::{BatchAllocator, sample_unseen};
pub use controller::{
    DEFAULT_SESSION_TTL_SECS, QUIZ_BATCH_SIZE, QuizSessionService, QuizStart, QuizStatus,
};
