use serde::{Deserialize, Serialize};

use super::domain::{
    Answer, AnswerId, DetailedFeedback, GradingKey, PracticeSession, Question, QuestionGroup,
    QuestionGroupId, QuestionId, SessionId, UserId,
};

/// Read access to authored content: groups, their questions, and grading keys.
pub trait ContentRepository: Send + Sync {
    fn groups(&self, ids: &[QuestionGroupId]) -> Result<Vec<QuestionGroup>, RepositoryError>;
    fn questions_for_groups(
        &self,
        ids: &[QuestionGroupId],
    ) -> Result<Vec<Question>, RepositoryError>;
    fn question(&self, id: &QuestionId) -> Result<Option<Question>, RepositoryError>;
    fn grading_keys(&self, ids: &[QuestionId]) -> Result<Vec<GradingKey>, RepositoryError>;
}

/// Storage for sessions, their answers, and grader feedback.
pub trait SessionRepository: Send + Sync {
    fn insert_session(&self, session: PracticeSession) -> Result<PracticeSession, RepositoryError>;
    fn update_session(&self, session: PracticeSession) -> Result<(), RepositoryError>;
    fn fetch_session(&self, id: &SessionId) -> Result<Option<PracticeSession>, RepositoryError>;
    /// Removes the session together with its answers and feedback.
    fn delete_session(&self, id: &SessionId) -> Result<(), RepositoryError>;
    fn sessions_for_user(
        &self,
        user: &UserId,
        query: &SessionQuery,
    ) -> Result<SessionPage, RepositoryError>;

    fn insert_answer(&self, answer: Answer) -> Result<Answer, RepositoryError>;
    fn fetch_answer(&self, id: &AnswerId) -> Result<Option<Answer>, RepositoryError>;
    fn answers_for_session(&self, id: &SessionId) -> Result<Vec<Answer>, RepositoryError>;

    /// Attach a grader result to an ungraded answer. The first grade wins: returns `false` and
    /// leaves the stored score and feedback untouched when the answer is already graded.
    fn record_grade(&self, id: &AnswerId, grade: GradeRecord) -> Result<bool, RepositoryError>;
    /// Move an ungraded answer into the failed state. Graded answers are left untouched.
    fn mark_grading_failed(&self, id: &AnswerId, reason: String) -> Result<(), RepositoryError>;
    fn feedback_for_answers(
        &self,
        ids: &[AnswerId],
    ) -> Result<Vec<DetailedFeedback>, RepositoryError>;
}

/// Grader output persisted against an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRecord {
    pub score: f32,
    pub feedback: String,
    pub detailed: DetailedFeedback,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[serde(alias = "asc")]
    Ascending,
    #[default]
    #[serde(alias = "desc")]
    Descending,
}

/// Window over a user's sessions ordered by start time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionQuery {
    pub offset: usize,
    pub limit: usize,
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionPage {
    pub sessions: Vec<PracticeSession>,
    pub total_count: usize,
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
