//! IELTS practice sessions: answer intake, objective grading, essay grading hand-off, and band
//! scoring.
//!
//! Scoring is computed on demand from a [`ResolvedSession`]; nothing derived from answers is
//! cached. Reading answers are compared against grading keys at submission, writing answers wait
//! for the external grader and surface as pending until it reports back.

pub mod domain;
pub mod grading;
pub mod repository;
pub mod router;
pub mod scoring;
pub mod service;

#[cfg(test)]
mod tests;

pub use domain::{
    Answer, AnswerId, Criterion, CriterionFeedback, DetailedFeedback, GradingKey, GradingState,
    PracticeSession, Question, QuestionGroup, QuestionGroupId, QuestionId, QuestionType,
    ResolvedGroup, ResolvedQuestion, ResolvedSession, ScoringType, Section, SessionId, UserId,
    DEFAULT_MAX_SCORE,
};
pub use grading::{
    DispatchError, EssayGrade, EssayGrader, GradeOutcome, GraderError, GradingDispatcher,
    GradingError, GradingRequest, GradingTask, GradingWorker, RetryPolicy,
};
pub use repository::{
    ContentRepository, GradeRecord, RepositoryError, SessionPage, SessionQuery,
    SessionRepository, SortOrder,
};
pub use router::{practice_router, USER_HEADER};
pub use scoring::{
    calculate_session_results, compare_answers, raw_score_to_band, PendingWritingPolicy,
    ScoreSummary, ScoringConfig, ScoringEngine, ScoringError,
};
pub use service::{
    resolve_session, AnswerSubmission, PracticeService, PracticeServiceError, PracticeSubmission,
    ResultsPage, ResultsQuery, SessionListing, SessionResults, SubmissionReceipt,
};
